use crate::{Error, Result};
use serde_json::Value;
use uuid::Uuid;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Float,
    Integer,
    Boolean,
    Json,
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "UUID",
            ColumnType::Text => "TEXT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Integer => "INTEGER",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSONB",
            ColumnType::Timestamp => "TIMESTAMPTZ",
        }
    }

    /// Canonical text form of a key value.
    ///
    /// Supplied keys and stored keys are compared in this form, so
    /// `"6F9619FF-8B86-D011-B42D-00CF4FC964FF"` and its lowercase spelling
    /// name the same row. Returns `None` when the value cannot be read as
    /// this type.
    pub fn key_text(&self, value: &Value) -> Option<String> {
        match (self, value) {
            (ColumnType::Uuid, Value::String(s)) => Uuid::parse_str(s).ok().map(|u| u.to_string()),
            (ColumnType::Text, Value::String(s)) => Some(s.clone()),
            (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(|n| n.to_string()),
            _ => None,
        }
    }
}

/// Value the storage layer fills in when an insert omits the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    GeneratedUuid,
    Now,
    Bool(bool),
}

impl ColumnDefault {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnDefault::GeneratedUuid => "gen_random_uuid()",
            ColumnDefault::Now => "now()",
            ColumnDefault::Bool(true) => "TRUE",
            ColumnDefault::Bool(false) => "FALSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub const fn with_default(self, default: ColumnDefault) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// True when the storage layer assigns a fresh identifier on insert.
    pub fn is_generated(&self) -> bool {
        matches!(self.default, Some(ColumnDefault::GeneratedUuid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
    pub references: &'static str,
}

/// Static description of one entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    pub table: &'static str,
    pub namespace: &'static str,
    pub primary_key: &'static [&'static str],
    pub columns: &'static [Column],
    pub foreign_keys: &'static [ForeignKey],
}

impl EntitySchema {
    /// `namespace.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.table)
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> {
        self.columns.iter().map(|c| c.name)
    }

    /// The single primary key column.
    ///
    /// Composite keys (and keys naming an undeclared column) are rejected with
    /// [`Error::UnsupportedSchema`].
    pub fn primary_key_column(&self) -> Result<&'static Column> {
        let unsupported = || Error::UnsupportedSchema {
            table: self.qualified_name(),
            key_columns: self.primary_key.iter().map(|k| k.to_string()).collect(),
        };

        match self.primary_key {
            [name] => self.column(name).ok_or_else(unsupported),
            _ => Err(unsupported()),
        }
    }
}
