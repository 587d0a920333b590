use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported schema for {table}: expected a single primary key column, found {key_columns:?}")]
    UnsupportedSchema {
        table: String,
        key_columns: Vec<String>,
    },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
