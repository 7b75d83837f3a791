use crate::error::{AgentError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// one cell of a result row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for Scalar {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Scalar::Null,
            ValueRef::Integer(i) => Scalar::Integer(i),
            ValueRef::Real(f) => Scalar::Real(f),
            ValueRef::Text(t) => Scalar::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Scalar::Blob(b.to_vec()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Real(r) => write!(f, "{}", r),
            Scalar::Text(t) => write!(f, "'{}'", t),
            Scalar::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

/// what the executor hands back; store failures are values, not faults
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Scalar>>,
    },
    Error {
        message: String,
    },
}

impl QueryOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, QueryOutcome::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            QueryOutcome::Error { message } => Some(message),
            QueryOutcome::Rows { .. } => None,
        }
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        match self {
            QueryOutcome::Rows { rows, .. } => rows,
            QueryOutcome::Error { .. } => &[],
        }
    }
}

impl From<QueryRows> for QueryOutcome {
    fn from(rows: QueryRows) -> Self {
        QueryOutcome::Rows {
            columns: rows.columns,
            rows: rows.rows,
        }
    }
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutcome::Rows { rows, .. } if rows.is_empty() => write!(f, "No results found."),
            QueryOutcome::Rows { rows, .. } => {
                for (idx, row) in rows.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                    write!(f, "({})", cells.join(", "))?;
                }
                Ok(())
            }
            QueryOutcome::Error { message } => write!(f, "Execution Error: {}", message),
        }
    }
}

/// the engine's own text for a failure, without rusqlite's wrapping
pub fn store_error_message(err: &AgentError) -> String {
    match err {
        AgentError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg))) => msg.clone(),
        // prepare errors carry the statement and token offset next to the engine text
        AgentError::Sqlite(rusqlite::Error::SqlInputError { msg, .. }) => msg.clone(),
        AgentError::Sqlite(other) => other.to_string(),
        AgentError::Store(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// read-only access to the sqlite file; every call opens and closes its own connection
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_read_only(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(&self.path, flags)?)
    }

    /// run `sql` under the store timeout; on expiry the statement is interrupted
    #[tracing::instrument(skip(self), fields(db = %self.path.display()))]
    pub async fn fetch(&self, sql: &str) -> Result<QueryRows> {
        if sql.trim().is_empty() {
            return Err(AgentError::Store("empty query".to_string()));
        }

        let conn = self.open_read_only()?;
        let interrupt = conn.get_interrupt_handle();
        let sql = sql.to_string();

        // run sync sqlite work in blocking task
        let task = tokio::task::spawn_blocking(move || run_query(&conn, &sql));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| AgentError::Store(format!("query task failed: {}", e)))?
            }
            Err(_) => {
                interrupt.interrupt();
                tracing::warn!("query exceeded {:?}, interrupted", self.timeout);
                Err(AgentError::timeout("query", self.timeout))
            }
        }
    }

    /// runs the final query; never fails, errors come back as `QueryOutcome::Error`
    #[tracing::instrument(skip(self))]
    pub async fn execute(&self, sql: &str) -> QueryOutcome {
        match self.fetch(sql).await {
            Ok(rows) => {
                tracing::info!(rows = rows.rows.len(), "query executed");
                rows.into()
            }
            Err(e) => {
                let message = store_error_message(&e);
                tracing::warn!("query execution failed: {}", message);
                QueryOutcome::Error { message }
            }
        }
    }

    /// `(name, declared type)` for every column of `table`, in table order
    pub fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let conn = self.open_read_only()?;
        let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(Scalar::from(row.get_ref(idx)?));
        }
        out.push(values);
    }

    Ok(QueryRows { columns, rows: out })
}
