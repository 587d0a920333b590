pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::StorageResult;
use async_trait::async_trait;
use daedalus_core::{Column, EntitySchema, Record};
use std::collections::HashSet;

/// The storage operations a [`Session`](crate::Session) runs against.
///
/// Keys cross this boundary in their canonical text form
/// (see [`ColumnType::key_text`](daedalus_core::ColumnType::key_text)).
/// Every statement is atomic on its own; grouping statements is done with
/// `begin`/`commit`/`rollback`.
#[async_trait]
pub trait Store: Send {
    async fn begin(&mut self) -> StorageResult<()>;

    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;

    /// Create the entity's table if it does not exist. Existing tables are
    /// left as they are.
    async fn create_table(&mut self, schema: &EntitySchema) -> StorageResult<()>;

    /// The subset of `keys` present in the table.
    async fn existing_keys(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        keys: &[String],
    ) -> StorageResult<HashSet<String>>;

    /// Overwrite the supplied columns of the rows named by each record's key.
    async fn update_rows(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        rows: &[Record],
    ) -> StorageResult<u64>;

    /// Insert rows; columns a record omits take their storage default.
    async fn insert_rows(&mut self, schema: &EntitySchema, rows: &[Record]) -> StorageResult<u64>;

    async fn fetch_row(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        value: &str,
    ) -> StorageResult<Option<Record>>;
}
