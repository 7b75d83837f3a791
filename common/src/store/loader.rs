use crate::error::{AgentError, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }

    fn convert(self, raw: &str) -> SqlValue {
        let raw = raw.trim();
        if raw.is_empty() {
            return SqlValue::Null;
        }
        match self {
            ColumnKind::Integer => raw
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
            ColumnKind::Real => raw
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or_else(|_| SqlValue::Text(raw.to_string())),
            ColumnKind::Text => SqlValue::Text(raw.to_string()),
        }
    }
}

/// narrowest type every non-empty value fits
fn infer_kind<'a>(values: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut kind = ColumnKind::Integer;
    for value in values.map(str::trim).filter(|v| !v.is_empty()) {
        if kind == ColumnKind::Integer && value.parse::<i64>().is_err() {
            kind = ColumnKind::Real;
        }
        if kind == ColumnKind::Real && value.parse::<f64>().is_err() {
            return ColumnKind::Text;
        }
    }
    kind
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// replace `table` in the database at `db_path` with the contents of a csv file;
/// returns the number of rows written
#[tracing::instrument(skip(csv_path, db_path), fields(csv = %csv_path.display(), db = %db_path.display()))]
pub fn load_csv(csv_path: &Path, db_path: &Path, table: &str) -> Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().any(|h| h.is_empty()) {
        return Err(AgentError::Store(format!(
            "{} has an empty or missing header row",
            csv_path.display()
        )));
    }

    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    tracing::info!("read {} rows with {} columns", records.len(), headers.len());

    let kinds: Vec<ColumnKind> = (0..headers.len())
        .map(|idx| infer_kind(records.iter().map(|r| r.get(idx).unwrap_or(""))))
        .collect();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut conn = Connection::open(db_path)?;
    let tx = conn.transaction()?;

    let column_defs: Vec<String> = headers
        .iter()
        .zip(&kinds)
        .map(|(name, kind)| format!("{} {}", quote_ident(name), kind.sql_type()))
        .collect();

    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({columns});",
        table = quote_ident(table),
        columns = column_defs.join(", ")
    ))?;

    {
        let placeholders = vec!["?"; headers.len()].join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders
        ))?;

        for record in &records {
            let values = kinds
                .iter()
                .enumerate()
                .map(|(idx, kind)| kind.convert(record.get(idx).unwrap_or("")));
            insert.execute(params_from_iter(values))?;
        }
    }

    tx.commit()?;
    tracing::info!(rows = records.len(), table, "csv loaded");

    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::{Scalar, SqliteStore};
    use std::time::Duration;

    #[test]
    fn test_infer_kind() {
        assert_eq!(infer_kind(["1", "-1", ""].into_iter()), ColumnKind::Integer);
        assert_eq!(infer_kind(["1", "2.5"].into_iter()), ColumnKind::Real);
        assert_eq!(infer_kind(["1", "sweet"].into_iter()), ColumnKind::Text);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("prep_time"), "\"prep_time\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn test_load_csv_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("indian_food.csv");
        let db_path = dir.path().join("data").join("desserts.db");
        std::fs::write(
            &csv_path,
            "name,state,course,prep_time\n\
             Gulab jamun,West Bengal,dessert,15\n\
             Jalebi,Uttar Pradesh,dessert,\n\
             Dal makhani,Punjab,main course,10\n",
        )
        .unwrap();

        assert_eq!(load_csv(&csv_path, &db_path, "indian_desserts").unwrap(), 3);
        // second load replaces rather than appends
        assert_eq!(load_csv(&csv_path, &db_path, "indian_desserts").unwrap(), 3);

        let store = SqliteStore::new(&db_path, Duration::from_secs(5));
        let columns = store.table_columns("indian_desserts").unwrap();
        assert_eq!(columns[3].1, "INTEGER");

        let rows = store
            .fetch("SELECT prep_time FROM indian_desserts ORDER BY name")
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[2][0], Scalar::Null);
    }
}
