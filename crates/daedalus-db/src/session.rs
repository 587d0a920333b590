use crate::store::{MemoryStore, PgStore, Store};
use crate::{DbConfig, Error, Result, StorageError};
use daedalus_core::{Entity, EntityKind, EntitySchema, Record, NAMESPACE};
use serde_json::Value;

/// A database session with explicit transaction scoping.
///
/// A session is meant for a single writer. Producers running in parallel
/// each get their own session (or serialize access to a shared one).
pub struct Session<S = PgStore> {
    store: S,
    in_transaction: bool,
}

impl Session<PgStore> {
    /// Connect to Postgres; unreachable hosts and rejected credentials are
    /// reported as [`Error::Connection`].
    pub async fn create(config: &DbConfig) -> Result<Self> {
        let store = PgStore::connect(config).await?;
        Ok(Self::with_store(store))
    }

    /// Roll back anything left open and close the connection.
    pub async fn close(mut self) -> Result<()> {
        if self.in_transaction {
            self.abort().await;
        }
        self.store.close().await
    }
}

impl Session<MemoryStore> {
    pub fn in_memory() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl<S: Store> Session<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            in_transaction: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::TransactionState(
                "begin() called while a transaction is already open".to_string(),
            ));
        }

        self.store.begin().await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::TransactionState(
                "commit() called with no open transaction".to_string(),
            ));
        }

        // A failed COMMIT still ends the transaction.
        self.in_transaction = false;
        self.store.commit().await?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::TransactionState(
                "rollback() called with no open transaction".to_string(),
            ));
        }

        self.in_transaction = false;
        self.store.rollback().await?;
        Ok(())
    }

    /// Roll back the open transaction on a failure path, logging instead of
    /// returning a secondary error.
    pub(crate) async fn abort(&mut self) {
        if !self.in_transaction {
            return;
        }

        tracing::warn!("Rolling back open transaction");
        self.in_transaction = false;
        if let Err(e) = self.store.rollback().await {
            tracing::error!("Rollback failed: {}", e);
        }
    }

    /// Create the tables for `entities` if they do not exist yet.
    ///
    /// Tables are created in dependency order whatever order they are listed
    /// in. Runs in its own transaction: either every table exists afterwards
    /// or nothing was created.
    pub async fn init_schema(&mut self, entities: &[EntityKind]) -> Result<()> {
        let mut ordered = entities.to_vec();
        ordered.sort();
        ordered.dedup();

        self.begin().await?;

        for kind in &ordered {
            let schema = kind.schema();
            if let Err(source) = self.store.create_table(schema).await {
                self.abort().await;
                return Err(Error::SchemaInit {
                    table: schema.qualified_name(),
                    source,
                });
            }
            tracing::debug!("Ensured table {}", schema.qualified_name());
        }

        self.in_transaction = false;
        if let Err(source) = self.store.commit().await {
            return Err(Error::SchemaInit {
                table: NAMESPACE.to_string(),
                source,
            });
        }

        tracing::info!("Schema initialized for {} entities", ordered.len());
        Ok(())
    }

    /// Read one row by primary key.
    pub async fn find(&mut self, schema: &EntitySchema, key: &Value) -> Result<Option<Record>> {
        let key_column = schema.primary_key_column()?;
        let key_text = key_column
            .ty
            .key_text(key)
            .ok_or_else(|| StorageError::TypeMismatch {
                column: key_column.name.to_string(),
                expected: key_column.ty.sql_type(),
                value: key.to_string(),
            })?;

        Ok(self.store.fetch_row(schema, key_column, &key_text).await?)
    }

    /// Read one entity by primary key.
    pub async fn find_entity<E: Entity>(&mut self, key: &Value) -> Result<Option<E>> {
        match self.find(E::KIND.schema(), key).await? {
            Some(record) => Ok(Some(E::from_record(&record)?)),
            None => Ok(None),
        }
    }
}
