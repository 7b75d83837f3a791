use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::store::SqliteStore;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
}

/// read-only description of the target table; column order follows the source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub table: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    table_description: String,
    columns: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    #[serde(rename = "type", default = "unknown_type")]
    column_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    examples: Option<Value>,
}

fn unknown_type() -> String {
    "UNKNOWN".to_string()
}

impl SchemaDescription {
    /// parse a metadata document of the form `{table: {table_description, columns: {..}}}`
    pub fn from_json_str(text: &str, table: &str) -> Result<Self> {
        let document: Map<String, Value> = serde_json::from_str(text)?;

        let raw_table = document.get(table).cloned().ok_or_else(|| {
            AgentError::Schema(format!("table '{}' not described in metadata", table))
        })?;
        let raw_table: RawTable = serde_json::from_value(raw_table)?;

        let mut columns = Vec::with_capacity(raw_table.columns.len());
        for (name, value) in raw_table.columns {
            let raw: RawColumn = serde_json::from_value(value).map_err(|e| {
                AgentError::Schema(format!("column '{}' is malformed: {}", name, e))
            })?;
            columns.push(ColumnSpec {
                name,
                column_type: raw.column_type,
                description: raw.description,
                examples: raw.examples,
            });
        }

        if columns.is_empty() {
            return Err(AgentError::Schema(format!(
                "table '{}' has no columns in metadata",
                table
            )));
        }

        Ok(Self {
            table: table.to_string(),
            description: raw_table.table_description,
            columns,
        })
    }

    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path, table: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let schema = Self::from_json_str(&text, table)?;
        tracing::info!(columns = schema.columns.len(), "schema description loaded");
        Ok(schema)
    }

    /// build from `(name, declared type)` pairs, e.g. a table catalog
    pub fn from_columns(table: &str, columns: Vec<(String, String)>) -> Result<Self> {
        if columns.is_empty() {
            return Err(AgentError::Schema(format!(
                "table '{}' does not exist or has no columns",
                table
            )));
        }

        Ok(Self {
            table: table.to_string(),
            description: String::new(),
            columns: columns
                .into_iter()
                .map(|(name, column_type)| ColumnSpec {
                    name,
                    column_type: if column_type.is_empty() {
                        unknown_type()
                    } else {
                        column_type
                    },
                    description: String::new(),
                    examples: None,
                })
                .collect(),
        })
    }

    /// columns and declared types straight from the store catalog
    pub fn from_store(store: &SqliteStore, table: &str) -> Result<Self> {
        let schema = Self::from_columns(table, store.table_columns(table)?)?;
        tracing::info!(
            columns = schema.columns.len(),
            "schema description read from {}",
            store.path().display()
        );
        Ok(schema)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// sqlite identifiers are case-insensitive, so is this lookup
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// copy restricted to `names`, keeping schema order
    pub fn subset(&self, names: &[String]) -> Self {
        Self {
            table: self.table.clone(),
            description: self.description.clone(),
            columns: self
                .columns
                .iter()
                .filter(|c| names.iter().any(|n| c.name.eq_ignore_ascii_case(n)))
                .cloned()
                .collect(),
        }
    }

    /// one `- name (type): description` line per column
    pub fn render_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                if c.description.is_empty() {
                    format!("- {} ({})", c.name, c.column_type)
                } else {
                    format!("- {} ({}): {}", c.name, c.column_type, c.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
