pub mod loader;
pub mod sqlite;

pub use loader::load_csv;
pub use sqlite::{store_error_message, QueryOutcome, QueryRows, Scalar, SqliteStore};
