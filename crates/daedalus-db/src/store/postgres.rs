use super::Store;
use crate::{DbConfig, Error, Result, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daedalus_core::{Column, ColumnType, EntitySchema, Record};
use serde_json::Value;
use sqlx::{types::Json, Connection, Executor, PgConnection, Postgres, QueryBuilder};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

/// Upper bound on bind parameters in one Postgres statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Postgres backend holding one dedicated connection.
///
/// Dropping the store with a transaction open closes the connection, which
/// makes the server roll the transaction back.
pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let conn = PgConnection::connect_with(&config.connect_options())
            .await
            .map_err(|e| Error::Connection(e.into()))?;

        tracing::info!(
            "Connected to postgres at {}:{}/{}",
            config.host,
            config.port,
            config.database
        );

        Ok(Self { conn })
    }

    /// Connect from a `postgres://` URL.
    pub async fn connect_url(database_url: &str) -> Result<Self> {
        let conn = PgConnection::connect(database_url)
            .await
            .map_err(|e| Error::Connection(e.into()))?;

        tracing::info!("Connected to postgres");

        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await.map_err(StorageError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&mut self) -> StorageResult<()> {
        (&mut self.conn).execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        (&mut self.conn).execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        (&mut self.conn).execute("ROLLBACK").await?;
        Ok(())
    }

    async fn create_table(&mut self, schema: &EntitySchema) -> StorageResult<()> {
        sqlx::query(&create_namespace_sql(schema.namespace))
            .execute(&mut self.conn)
            .await?;

        sqlx::query(&create_table_sql(schema))
            .execute(&mut self.conn)
            .await?;

        Ok(())
    }

    async fn existing_keys(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        keys: &[String],
    ) -> StorageResult<HashSet<String>> {
        let sql = format!(
            "SELECT {0}::text FROM {1} WHERE {0} = ANY($1)",
            quote(key.name),
            table_ref(schema)
        );

        let query = sqlx::query_scalar::<_, String>(&sql);
        let query = match key.ty {
            ColumnType::Uuid => query.bind(
                keys.iter()
                    .map(|k| parse_uuid_key(key, k))
                    .collect::<StorageResult<Vec<_>>>()?,
            ),
            ColumnType::Integer => query.bind(
                keys.iter()
                    .map(|k| parse_integer_key(key, k))
                    .collect::<StorageResult<Vec<_>>>()?,
            ),
            _ => query.bind(keys.to_vec()),
        };

        let found = query.fetch_all(&mut self.conn).await?;
        Ok(found.into_iter().collect())
    }

    async fn update_rows(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        rows: &[Record],
    ) -> StorageResult<u64> {
        let mut affected = 0;
        for mut statement in update_statements(schema, key, rows)? {
            affected += statement.build().execute(&mut self.conn).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn insert_rows(&mut self, schema: &EntitySchema, rows: &[Record]) -> StorageResult<u64> {
        let mut affected = 0;
        for mut statement in insert_statements(schema, rows)? {
            affected += statement.build().execute(&mut self.conn).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn fetch_row(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        value: &str,
    ) -> StorageResult<Option<Record>> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} AS t WHERE t.{} = $1",
            table_ref(schema),
            quote(key.name)
        );

        let query = sqlx::query_scalar::<_, Value>(&sql);
        let query = match key.ty {
            ColumnType::Uuid => query.bind(parse_uuid_key(key, value)?),
            ColumnType::Integer => query.bind(parse_integer_key(key, value)?),
            _ => query.bind(value.to_string()),
        };

        let row = query.fetch_optional(&mut self.conn).await?;
        Ok(match row {
            Some(Value::Object(fields)) => Some(fields),
            _ => None,
        })
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn table_ref(schema: &EntitySchema) -> String {
    format!("{}.{}", quote(schema.namespace), quote(schema.table))
}

pub fn create_namespace_sql(namespace: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote(namespace))
}

/// `CREATE TABLE IF NOT EXISTS` statement for an entity.
pub fn create_table_sql(schema: &EntitySchema) -> String {
    let mut lines: Vec<String> = schema
        .columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", quote(column.name), column.ty.sql_type());
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = column.default {
                line.push_str(" DEFAULT ");
                line.push_str(default.sql());
            }
            line
        })
        .collect();

    let key_columns: Vec<String> = schema.primary_key.iter().map(|k| quote(k)).collect();
    lines.push(format!("PRIMARY KEY ({})", key_columns.join(", ")));

    for fk in schema.foreign_keys {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}.{} ({})",
            quote(fk.column),
            quote(schema.namespace),
            quote(fk.table),
            quote(fk.references)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table_ref(schema),
        lines.join(",\n    ")
    )
}

/// Multi-row `INSERT` statements; absent columns are written as `DEFAULT`.
fn insert_statements(
    schema: &EntitySchema,
    rows: &[Record],
) -> StorageResult<Vec<QueryBuilder<'static, Postgres>>> {
    let supplied: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    // Declared columns keep registry order; undeclared keys go last and are
    // left for the server to reject.
    let mut columns: Vec<&str> = schema
        .column_names()
        .filter(|name| supplied.contains(name))
        .collect();
    columns.extend(supplied.iter().filter(|name| schema.column(name).is_none()));

    if columns.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES", table_ref(schema));
        return Ok(rows.iter().map(|_| QueryBuilder::new(sql.clone())).collect());
    }

    let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

    let mut statements = Vec::new();
    for chunk in rows.chunks(rows_per_statement) {
        let mut builder = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) VALUES ",
            table_ref(schema),
            column_list.join(", ")
        ));

        for (i, row) in chunk.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push("(");
            for (j, name) in columns.iter().enumerate() {
                if j > 0 {
                    builder.push(", ");
                }
                match row.get(*name) {
                    Some(value) => push_value(&mut builder, name, schema.column(name), value)?,
                    None => {
                        builder.push("DEFAULT");
                    }
                }
            }
            builder.push(")");
        }

        statements.push(builder);
    }

    Ok(statements)
}

/// `UPDATE .. FROM (VALUES ..)` statements, one per distinct set of supplied
/// columns so that omitted columns are never touched.
fn update_statements(
    schema: &EntitySchema,
    key: &Column,
    rows: &[Record],
) -> StorageResult<Vec<QueryBuilder<'static, Postgres>>> {
    let mut groups: BTreeMap<Vec<&str>, Vec<&Record>> = BTreeMap::new();
    for row in rows {
        let mut columns: Vec<&str> = row
            .keys()
            .map(String::as_str)
            .filter(|name| *name != key.name)
            .collect();
        columns.sort_unstable();
        groups.entry(columns).or_default().push(row);
    }

    let mut statements = Vec::new();
    for (columns, group) in groups {
        if columns.is_empty() {
            continue;
        }

        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{0} = v.{0}", quote(c)))
            .collect();
        let aliases: Vec<String> = std::iter::once(key.name)
            .chain(columns.iter().copied())
            .map(quote)
            .collect();
        let rows_per_statement = (MAX_BIND_PARAMS / (columns.len() + 1)).max(1);

        for chunk in group.chunks(rows_per_statement) {
            let mut builder = QueryBuilder::new(format!(
                "UPDATE {} AS t SET {} FROM (VALUES ",
                table_ref(schema),
                assignments.join(", ")
            ));

            for (i, row) in chunk.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push("(");
                push_value(
                    &mut builder,
                    key.name,
                    Some(key),
                    row.get(key.name).unwrap_or(&Value::Null),
                )?;
                for name in &columns {
                    builder.push(", ");
                    push_value(
                        &mut builder,
                        name,
                        schema.column(name),
                        row.get(*name).unwrap_or(&Value::Null),
                    )?;
                }
                builder.push(")");
            }

            builder.push(format!(
                ") AS v({}) WHERE t.{1} = v.{1}",
                aliases.join(", "),
                quote(key.name)
            ));
            statements.push(builder);
        }
    }

    Ok(statements)
}

/// `Some(None)` for null, `Some(Some(_))` when the value converts, `None`
/// when it does not.
fn typed<T>(value: &Value, convert: impl FnOnce(&Value) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        convert(value).map(Some)
    }
}

fn push_value<'args>(
    builder: &mut QueryBuilder<'args, Postgres>,
    name: &str,
    column: Option<&Column>,
    value: &Value,
) -> StorageResult<()> {
    let Some(column) = column else {
        push_untyped(builder, value);
        return Ok(());
    };

    let mismatch = || StorageError::TypeMismatch {
        column: name.to_string(),
        expected: column.ty.sql_type(),
        value: value.to_string(),
    };

    match column.ty {
        ColumnType::Uuid => {
            let bound = typed(value, |v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()));
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Text => {
            let bound = typed(value, |v| v.as_str().map(String::from));
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Float => {
            let bound = typed(value, Value::as_f64);
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Integer => {
            let bound = typed(value, |v| v.as_i64().and_then(|n| i32::try_from(n).ok()));
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Boolean => {
            let bound = typed(value, Value::as_bool);
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Json => {
            let bound = typed(value, |v| Some(Json(v.clone())));
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
        ColumnType::Timestamp => {
            let bound = typed(value, |v| {
                v.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
            });
            builder.push_bind(bound.ok_or_else(mismatch)?);
        }
    }

    Ok(())
}

/// Binds a value for a column the registry does not declare.
fn push_untyped(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => builder.push_bind(None::<String>),
        Value::Bool(b) => builder.push_bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => builder.push_bind(i),
            None => builder.push_bind(n.as_f64()),
        },
        Value::String(s) => builder.push_bind(s.clone()),
        other => builder.push_bind(Json(other.clone())),
    };
}

fn parse_uuid_key(key: &Column, value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| StorageError::TypeMismatch {
        column: key.name.to_string(),
        expected: key.ty.sql_type(),
        value: value.to_string(),
    })
}

fn parse_integer_key(key: &Column, value: &str) -> StorageResult<i32> {
    value.parse().map_err(|_| StorageError::TypeMismatch {
        column: key.name.to_string(),
        expected: key.ty.sql_type(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use daedalus_core::EntityKind;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(EntityKind::Pipeline.schema());

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"operations\".\"pipeline\" ("));
        assert!(sql.contains("\"pipeline_code\" UUID NOT NULL DEFAULT gen_random_uuid()"));
        assert!(sql.contains("\"created_at\" TIMESTAMPTZ DEFAULT now()"));
        assert!(sql.contains("PRIMARY KEY (\"pipeline_code\")"));
        assert!(sql.contains(
            "FOREIGN KEY (\"app_code\") REFERENCES \"operations\".\"app\" (\"app_code\")"
        ));
    }

    #[test]
    fn test_create_namespace_sql() {
        assert_eq!(
            create_namespace_sql("operations"),
            "CREATE SCHEMA IF NOT EXISTS \"operations\""
        );
    }

    #[test]
    fn test_quote_escapes_identifiers() {
        assert_eq!(quote("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_insert_uses_default_for_absent_columns() {
        let rows = vec![
            record(json!({ "task_type_code": "E", "task_type_name": "extract" })),
            record(json!({ "task_type_code": "T", "task_type_name": "transform", "created_at": "2024-05-01T10:00:00Z" })),
        ];

        let statements = insert_statements(EntityKind::TaskType.schema(), &rows).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql(),
            "INSERT INTO \"operations\".\"task_type\" (\"task_type_code\", \"task_type_name\", \"created_at\") \
             VALUES ($1, $2, DEFAULT), ($3, $4, $5)"
        );
    }

    #[test]
    fn test_insert_passes_unknown_columns_through() {
        let rows = vec![record(json!({ "app_name": "ingest", "colour": "blue" }))];

        let statements = insert_statements(EntityKind::App.schema(), &rows).unwrap();
        assert!(statements[0].sql().contains("(\"app_name\", \"colour\")"));
    }

    #[test]
    fn test_insert_without_columns_uses_default_values() {
        let rows = vec![Record::new(), Record::new()];

        let statements = insert_statements(EntityKind::App.schema(), &rows).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql(),
            "INSERT INTO \"operations\".\"app\" DEFAULT VALUES"
        );
    }

    #[test]
    fn test_update_groups_by_supplied_columns() {
        let schema = EntityKind::Source.schema();
        let key = schema.primary_key_column().unwrap();
        let rows = vec![
            record(json!({ "source_code": Uuid::new_v4().to_string(), "active": false })),
            record(json!({ "source_code": Uuid::new_v4().to_string(), "timeout": 30.0, "active": true })),
            record(json!({ "source_code": Uuid::new_v4().to_string(), "active": true })),
        ];

        let statements = update_statements(schema, key, &rows).unwrap();
        let sql: Vec<&str> = statements.iter().map(|s| s.sql()).collect();

        assert_eq!(
            sql,
            vec![
                "UPDATE \"operations\".\"source\" AS t SET \"active\" = v.\"active\" \
                 FROM (VALUES ($1, $2), ($3, $4)) AS v(\"source_code\", \"active\") \
                 WHERE t.\"source_code\" = v.\"source_code\"",
                "UPDATE \"operations\".\"source\" AS t SET \"active\" = v.\"active\", \"timeout\" = v.\"timeout\" \
                 FROM (VALUES ($1, $2, $3)) AS v(\"source_code\", \"active\", \"timeout\") \
                 WHERE t.\"source_code\" = v.\"source_code\"",
            ]
        );
    }

    #[test]
    fn test_update_with_key_only_issues_nothing() {
        let schema = EntityKind::App.schema();
        let key = schema.primary_key_column().unwrap();
        let rows = vec![record(json!({ "app_code": Uuid::new_v4().to_string() }))];

        assert!(update_statements(schema, key, &rows).unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let rows = vec![record(json!({ "name": "nightly", "process_id": "many" }))];

        let err = insert_statements(EntityKind::Job.schema(), &rows).err().unwrap();
        match err {
            StorageError::TypeMismatch { column, expected, .. } => {
                assert_eq!(column, "process_id");
                assert_eq!(expected, "INTEGER");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_integer_out_of_range_is_mismatch() {
        let rows = vec![record(json!({ "process_id": 1_i64 << 40 }))];
        assert!(insert_statements(EntityKind::Job.schema(), &rows).is_err());
    }

    #[test]
    fn test_large_batches_are_chunked() {
        let rows: Vec<Record> = (0..40_000)
            .map(|i| record(json!({ "task_type_code": format!("T{i}"), "task_type_name": "bulk" })))
            .collect();

        let statements = insert_statements(EntityKind::TaskType.schema(), &rows).unwrap();
        assert_eq!(statements.len(), 2);
    }
}
