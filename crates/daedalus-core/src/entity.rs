use crate::registry::EntityKind;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Loosely typed row: column name to value.
pub type Record = serde_json::Map<String, Value>;

/// A persisted entity with a registered schema.
///
/// Conversions go through the registry's column list, so a struct field that
/// is not a declared column never reaches a record and an undeclared record
/// key never reaches a struct.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    /// Every declared column, `null` included.
    fn to_record(&self) -> Result<Record> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(fields) => fields,
            _ => Record::new(),
        };

        Ok(Self::KIND
            .schema()
            .column_names()
            .map(|name| (name.to_string(), fields.remove(name).unwrap_or(Value::Null)))
            .collect())
    }

    /// Reads recognized columns only; unknown keys are dropped and missing
    /// ones fall back to the field default.
    fn from_record(record: &Record) -> Result<Self> {
        let fields: Record = Self::KIND
            .schema()
            .column_names()
            .filter_map(|name| record.get(name).map(|value| (name.to_string(), value.clone())))
            .collect();

        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub app_code: Option<Uuid>,
    pub app_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl App {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }
}

impl Entity for App {
    const KIND: EntityKind = EntityKind::App;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDomain {
    pub pipeline_domain_code: Option<Uuid>,
    pub pipeline_domain_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineDomain {
    pub fn new(pipeline_domain_name: impl Into<String>) -> Self {
        Self {
            pipeline_domain_name: pipeline_domain_name.into(),
            ..Default::default()
        }
    }
}

impl Entity for PipelineDomain {
    const KIND: EntityKind = EntityKind::PipelineDomain;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub pipeline_code: Option<Uuid>,
    pub pipeline_name: String,
    pub pipeline_domain_code: Uuid,
    pub app_code: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Pipeline {
    const KIND: EntityKind = EntityKind::Pipeline;
}

/// An extraction endpoint of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub source_code: Option<Uuid>,
    pub source_name: String,
    pub location_type: String,
    /// URL
    pub location: Option<String>,
    /// API sources only
    pub location_endpoint: Option<String>,
    pub extension: Option<String>,
    pub extract_type: String,
    pub params: Option<Value>,
    pub headers: Option<Value>,
    pub timeout: Option<f64>,
    pub pipeline_code: Uuid,
    pub active: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Source {
    const KIND: EntityKind = EntityKind::Source;
}

/// One execution run of an app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub job_id: Option<Uuid>,
    pub name: String,
    pub memory_usage_start: f64,
    pub cpu_usage_start: f64,
    pub memory_usage_end: f64,
    pub cpu_usage_end: f64,
    pub status: String,
    pub exception: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Option<f64>,
    pub memory_usage: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub host_name: String,
    pub execution_user: String,
    pub process_id: i32,
    pub number_of_tasks: i32,
    pub app_code: Uuid,
}

impl Entity for Job {
    const KIND: EntityKind = EntityKind::Job;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskType {
    pub task_type_code: String,
    pub task_type_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskType {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            task_type_code: code.into(),
            task_type_name: name.into(),
            ..Default::default()
        }
    }
}

impl Entity for TaskType {
    const KIND: EntityKind = EntityKind::TaskType;
}

/// One step of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub task_id: Option<Uuid>,
    pub name: String,
    pub source_code: Uuid,
    pub location: String,
    pub memory_usage_start: f64,
    pub cpu_usage_start: f64,
    pub memory_usage_end: f64,
    pub cpu_usage_end: f64,
    pub status: String,
    pub location_status: Option<f64>,
    pub task_image: Option<String>,
    pub task_image_status: Option<String>,
    pub exception: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Option<f64>,
    pub records_processed: Option<i32>,
    pub memory_usage: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub job_id: Uuid,
    pub pipeline_code: Uuid,
    pub task_type_code: String,
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;
}
