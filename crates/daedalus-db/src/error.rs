use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Column \"{column}\" of relation \"{table}\" does not exist")]
    UndefinedColumn { table: String, column: String },

    #[error("Null value in column \"{column}\" of relation \"{table}\" violates not-null constraint")]
    NotNull { table: String, column: String },

    #[error("Invalid value for column \"{column}\": expected {expected}, got {value}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        value: String,
    },

    #[error("Duplicate key value in \"{table}\": {key}")]
    DuplicateKey { table: String, key: String },

    #[error("Foreign key violation on \"{table}\".\"{column}\": {key} is not present in \"{references}\"")]
    ForeignKey {
        table: String,
        column: String,
        references: String,
        key: String,
    },

    #[error("Relation \"{0}\" does not exist")]
    MissingTable(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    Connection(#[source] StorageError),

    #[error("Schema initialization failed for {table}: {source}")]
    SchemaInit {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Bulk load into {table} failed: {source}")]
    BulkLoad {
        table: String,
        #[source]
        source: StorageError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] daedalus_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;
