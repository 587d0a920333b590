pub mod entity;
pub mod error;
pub mod registry;
pub mod schema;

// Re-exports
pub use entity::{App, Entity, Job, Pipeline, PipelineDomain, Record, Source, Task, TaskType};
pub use error::{Error, Result};
pub use registry::{EntityKind, NAMESPACE};
pub use schema::{Column, ColumnDefault, ColumnType, EntitySchema, ForeignKey};
