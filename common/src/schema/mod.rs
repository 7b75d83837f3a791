pub mod description;
pub mod retrieval;

pub use description::{ColumnSpec, SchemaDescription};
pub use retrieval::{relevant_schema, KeywordRetriever, SchemaRetriever};
