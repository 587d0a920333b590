pub mod config;
pub mod error;
pub mod loader;
pub mod session;
pub mod store;

// Re-exports
pub use crate::config::DbConfig;
pub use error::{Error, Result, StorageError, StorageResult};
pub use loader::{BulkLoader, LoadSummary};
pub use session::Session;
pub use store::{MemoryStore, PgStore, Store};
