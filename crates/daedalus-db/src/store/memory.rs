use super::Store;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daedalus_core::{Column, ColumnDefault, ColumnType, EntitySchema, Record};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Table {
    schema: EntitySchema,
    rows: BTreeMap<String, Record>,
}

type Tables = HashMap<String, Table>;

/// In-process backend enforcing the same constraints as the Postgres schema.
///
/// Handles from [`MemoryStore::share`] see the same committed tables, the
/// way separate connections see one database. A transaction works on a
/// private snapshot that replaces the committed tables on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<Tables>>,
    pending: Option<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle on the same committed data, with no open transaction.
    pub fn share(&self) -> Self {
        Self {
            committed: self.committed.clone(),
            pending: None,
        }
    }

    /// Rows currently visible to this handle.
    pub async fn row_count(&self, schema: &EntitySchema) -> usize {
        self.read(|tables| {
            tables
                .get(&schema.qualified_name())
                .map_or(0, |table| table.rows.len())
        })
        .await
    }

    /// Primary keys visible to this handle, in key order.
    pub async fn keys(&self, schema: &EntitySchema) -> Vec<String> {
        self.read(|tables| {
            tables
                .get(&schema.qualified_name())
                .map(|table| table.rows.keys().cloned().collect())
                .unwrap_or_default()
        })
        .await
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T + Send) -> T {
        match &self.pending {
            Some(tables) => f(tables),
            None => f(&*self.committed.read().await),
        }
    }

    async fn write<T>(&mut self, f: impl FnOnce(&mut Tables) -> StorageResult<T> + Send) -> StorageResult<T> {
        match &mut self.pending {
            Some(tables) => f(tables),
            None => f(&mut *self.committed.write().await),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&mut self) -> StorageResult<()> {
        let snapshot = self.committed.read().await.clone();
        self.pending = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        if let Some(tables) = self.pending.take() {
            *self.committed.write().await = tables;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.pending = None;
        Ok(())
    }

    async fn create_table(&mut self, schema: &EntitySchema) -> StorageResult<()> {
        let schema = *schema;
        self.write(move |tables| {
            let name = schema.qualified_name();
            if tables.contains_key(&name) {
                return Ok(());
            }

            for fk in schema.foreign_keys {
                let target = format!("{}.{}", schema.namespace, fk.table);
                if !tables.contains_key(&target) {
                    return Err(StorageError::MissingTable(target));
                }
            }

            tables.insert(
                name,
                Table {
                    schema,
                    rows: BTreeMap::new(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn existing_keys(
        &mut self,
        schema: &EntitySchema,
        _key: &Column,
        keys: &[String],
    ) -> StorageResult<HashSet<String>> {
        let name = schema.qualified_name();
        self.read(|tables| -> StorageResult<_> {
            let table = tables.get(&name).ok_or_else(|| StorageError::MissingTable(name.clone()))?;
            Ok(keys
                .iter()
                .filter(|k| table.rows.contains_key(*k))
                .cloned()
                .collect())
        })
        .await
    }

    async fn update_rows(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        rows: &[Record],
    ) -> StorageResult<u64> {
        let name = schema.qualified_name();
        let key = *key;
        self.write(move |tables| {
            let table = tables.get(&name).ok_or_else(|| StorageError::MissingTable(name.clone()))?;

            let mut staged: Vec<(String, Record)> = Vec::with_capacity(rows.len());
            for row in rows {
                let row_key = key_of(&table.schema, &key, row.get(key.name))?;
                let Some(current) = staged
                    .iter()
                    .rev()
                    .find(|(k, _)| *k == row_key)
                    .map(|(_, r)| r)
                    .or_else(|| table.rows.get(&row_key))
                else {
                    continue;
                };

                let mut merged = current.clone();
                for (column_name, value) in row {
                    if column_name == key.name {
                        continue;
                    }
                    let column = declared(&table.schema, column_name)?;
                    merged.insert(column_name.clone(), coerce(&table.schema, column, value)?);
                }
                check_foreign_keys(tables, &table.schema, &merged)?;
                staged.push((row_key, merged));
            }

            let affected = staged.len() as u64;
            if let Some(table) = tables.get_mut(&name) {
                table.rows.extend(staged);
            }
            Ok(affected)
        })
        .await
    }

    async fn insert_rows(&mut self, schema: &EntitySchema, rows: &[Record]) -> StorageResult<u64> {
        let name = schema.qualified_name();
        self.write(move |tables| {
            let table = tables.get(&name).ok_or_else(|| StorageError::MissingTable(name.clone()))?;
            let key = table.schema.primary_key_column().map_err(|_| StorageError::MissingTable(name.clone()))?;

            let mut staged: BTreeMap<String, Record> = BTreeMap::new();
            for row in rows {
                let full = materialize(&table.schema, row)?;
                let row_key = key_of(&table.schema, key, full.get(key.name))?;
                if table.rows.contains_key(&row_key) || staged.contains_key(&row_key) {
                    return Err(StorageError::DuplicateKey {
                        table: name.clone(),
                        key: row_key,
                    });
                }
                check_foreign_keys(tables, &table.schema, &full)?;
                staged.insert(row_key, full);
            }

            let affected = staged.len() as u64;
            if let Some(table) = tables.get_mut(&name) {
                table.rows.extend(staged);
            }
            Ok(affected)
        })
        .await
    }

    async fn fetch_row(
        &mut self,
        schema: &EntitySchema,
        _key: &Column,
        value: &str,
    ) -> StorageResult<Option<Record>> {
        let name = schema.qualified_name();
        self.read(|tables| -> StorageResult<_> {
            let table = tables.get(&name).ok_or_else(|| StorageError::MissingTable(name.clone()))?;
            Ok(table.rows.get(value).cloned())
        })
        .await
    }
}

fn declared(schema: &EntitySchema, name: &str) -> StorageResult<&'static Column> {
    schema.column(name).ok_or_else(|| StorageError::UndefinedColumn {
        table: schema.qualified_name(),
        column: name.to_string(),
    })
}

fn key_of(schema: &EntitySchema, key: &Column, value: Option<&Value>) -> StorageResult<String> {
    let value = value.unwrap_or(&Value::Null);
    if value.is_null() {
        return Err(StorageError::NotNull {
            table: schema.qualified_name(),
            column: key.name.to_string(),
        });
    }
    key.ty.key_text(value).ok_or_else(|| StorageError::TypeMismatch {
        column: key.name.to_string(),
        expected: key.ty.sql_type(),
        value: value.to_string(),
    })
}

/// A complete row: supplied values checked and normalized, defaults filled.
fn materialize(schema: &EntitySchema, row: &Record) -> StorageResult<Record> {
    for name in row.keys() {
        declared(schema, name)?;
    }

    let mut full = Record::new();
    for column in schema.columns {
        let value = match row.get(column.name) {
            Some(value) => coerce(schema, column, value)?,
            None => default_value(column),
        };
        full.insert(column.name.to_string(), value);
    }
    Ok(full)
}

fn default_value(column: &Column) -> Value {
    match column.default {
        Some(ColumnDefault::GeneratedUuid) => Value::String(Uuid::new_v4().to_string()),
        Some(ColumnDefault::Now) => Value::String(Utc::now().to_rfc3339()),
        Some(ColumnDefault::Bool(b)) => Value::Bool(b),
        None => Value::Null,
    }
}

fn coerce(schema: &EntitySchema, column: &Column, value: &Value) -> StorageResult<Value> {
    if value.is_null() {
        if column.nullable {
            return Ok(Value::Null);
        }
        return Err(StorageError::NotNull {
            table: schema.qualified_name(),
            column: column.name.to_string(),
        });
    }

    let coerced = match column.ty {
        ColumnType::Uuid | ColumnType::Text | ColumnType::Integer => {
            column.ty.key_text(value).map(|text| match column.ty {
                ColumnType::Integer => value.clone(),
                _ => Value::String(text),
            })
        }
        ColumnType::Float => value.as_f64().map(Value::from),
        ColumnType::Boolean => value.as_bool().map(Value::Bool),
        ColumnType::Json => Some(value.clone()),
        ColumnType::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| Value::String(t.with_timezone(&Utc).to_rfc3339())),
    };

    let in_range = match (column.ty, &coerced) {
        (ColumnType::Integer, Some(v)) => v.as_i64().is_some_and(|n| i32::try_from(n).is_ok()),
        _ => true,
    };

    coerced
        .filter(|_| in_range)
        .ok_or_else(|| StorageError::TypeMismatch {
            column: column.name.to_string(),
            expected: column.ty.sql_type(),
            value: value.to_string(),
        })
}

fn check_foreign_keys(tables: &Tables, schema: &EntitySchema, row: &Record) -> StorageResult<()> {
    for fk in schema.foreign_keys {
        let value = match row.get(fk.column) {
            Some(value) if !value.is_null() => value,
            _ => continue,
        };

        let target_name = format!("{}.{}", schema.namespace, fk.table);
        let target = tables
            .get(&target_name)
            .ok_or_else(|| StorageError::MissingTable(target_name.clone()))?;

        let present = match target.schema.primary_key_column() {
            Ok(key) if key.name == fk.references => key
                .ty
                .key_text(value)
                .is_some_and(|k| target.rows.contains_key(&k)),
            _ => target
                .rows
                .values()
                .any(|r| r.get(fk.references) == Some(value)),
        };

        if !present {
            return Err(StorageError::ForeignKey {
                table: schema.qualified_name(),
                column: fk.column.to_string(),
                references: target_name,
                key: value.to_string(),
            });
        }
    }
    Ok(())
}
