pub mod init;

pub use init::{init_tracing, tracing_enabled, OtelGuard};
