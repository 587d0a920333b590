use crate::schema::{Column, ColumnDefault, ColumnType, EntitySchema, ForeignKey};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace every entity table lives under.
pub const NAMESPACE: &str = "operations";

const fn generated_key(name: &'static str) -> Column {
    Column::new(name, ColumnType::Uuid).with_default(ColumnDefault::GeneratedUuid)
}

const fn text(name: &'static str) -> Column {
    Column::new(name, ColumnType::Text)
}

const fn uuid(name: &'static str) -> Column {
    Column::new(name, ColumnType::Uuid)
}

const fn float(name: &'static str) -> Column {
    Column::new(name, ColumnType::Float)
}

const fn integer(name: &'static str) -> Column {
    Column::new(name, ColumnType::Integer)
}

const fn timestamp(name: &'static str) -> Column {
    Column::new(name, ColumnType::Timestamp)
}

const fn stamped(name: &'static str) -> Column {
    timestamp(name).nullable().with_default(ColumnDefault::Now)
}

static APP: EntitySchema = EntitySchema {
    table: "app",
    namespace: NAMESPACE,
    primary_key: &["app_code"],
    columns: &[
        generated_key("app_code"),
        text("app_name"),
        stamped("created_at"),
        stamped("updated_at"),
    ],
    foreign_keys: &[],
};

static PIPELINE_DOMAIN: EntitySchema = EntitySchema {
    table: "pipeline_domain",
    namespace: NAMESPACE,
    primary_key: &["pipeline_domain_code"],
    columns: &[
        generated_key("pipeline_domain_code"),
        text("pipeline_domain_name"),
        stamped("created_at"),
        stamped("updated_at"),
    ],
    foreign_keys: &[],
};

static PIPELINE: EntitySchema = EntitySchema {
    table: "pipeline",
    namespace: NAMESPACE,
    primary_key: &["pipeline_code"],
    columns: &[
        generated_key("pipeline_code"),
        text("pipeline_name"),
        uuid("pipeline_domain_code"),
        uuid("app_code"),
        stamped("created_at"),
        stamped("updated_at"),
    ],
    foreign_keys: &[
        ForeignKey {
            column: "pipeline_domain_code",
            table: "pipeline_domain",
            references: "pipeline_domain_code",
        },
        ForeignKey {
            column: "app_code",
            table: "app",
            references: "app_code",
        },
    ],
};

static SOURCE: EntitySchema = EntitySchema {
    table: "source",
    namespace: NAMESPACE,
    primary_key: &["source_code"],
    columns: &[
        generated_key("source_code"),
        text("source_name"),
        text("location_type"),
        text("location").nullable(),
        text("location_endpoint").nullable(),
        text("extension").nullable(),
        text("extract_type"),
        Column::new("params", ColumnType::Json).nullable(),
        Column::new("headers", ColumnType::Json).nullable(),
        float("timeout").nullable(),
        uuid("pipeline_code"),
        Column::new("active", ColumnType::Boolean).with_default(ColumnDefault::Bool(true)),
        stamped("created_at"),
        stamped("updated_at"),
    ],
    foreign_keys: &[ForeignKey {
        column: "pipeline_code",
        table: "pipeline",
        references: "pipeline_code",
    }],
};

static JOB: EntitySchema = EntitySchema {
    table: "job",
    namespace: NAMESPACE,
    primary_key: &["job_id"],
    columns: &[
        generated_key("job_id"),
        text("name"),
        float("memory_usage_start"),
        float("cpu_usage_start"),
        float("memory_usage_end"),
        float("cpu_usage_end"),
        text("status"),
        text("exception").nullable(),
        timestamp("started_at"),
        timestamp("ended_at"),
        float("duration").nullable(),
        float("memory_usage").nullable(),
        float("cpu_usage").nullable(),
        text("host_name"),
        text("execution_user"),
        integer("process_id"),
        integer("number_of_tasks"),
        uuid("app_code"),
    ],
    foreign_keys: &[ForeignKey {
        column: "app_code",
        table: "app",
        references: "app_code",
    }],
};

static TASK_TYPE: EntitySchema = EntitySchema {
    table: "task_type",
    namespace: NAMESPACE,
    primary_key: &["task_type_code"],
    columns: &[
        text("task_type_code"),
        text("task_type_name"),
        timestamp("created_at").with_default(ColumnDefault::Now),
        timestamp("updated_at").with_default(ColumnDefault::Now),
    ],
    foreign_keys: &[],
};

static TASK: EntitySchema = EntitySchema {
    table: "task",
    namespace: NAMESPACE,
    primary_key: &["task_id"],
    columns: &[
        generated_key("task_id"),
        text("name"),
        uuid("source_code"),
        text("location"),
        float("memory_usage_start"),
        float("cpu_usage_start"),
        float("memory_usage_end"),
        float("cpu_usage_end"),
        text("status"),
        float("location_status").nullable(),
        text("task_image").nullable(),
        text("task_image_status").nullable(),
        text("exception").nullable(),
        timestamp("started_at"),
        timestamp("ended_at"),
        float("duration").nullable(),
        integer("records_processed").nullable(),
        float("memory_usage").nullable(),
        float("cpu_usage").nullable(),
        uuid("job_id"),
        uuid("pipeline_code"),
        text("task_type_code"),
    ],
    foreign_keys: &[
        ForeignKey {
            column: "source_code",
            table: "source",
            references: "source_code",
        },
        ForeignKey {
            column: "job_id",
            table: "job",
            references: "job_id",
        },
        ForeignKey {
            column: "pipeline_code",
            table: "pipeline",
            references: "pipeline_code",
        },
        ForeignKey {
            column: "task_type_code",
            table: "task_type",
            references: "task_type_code",
        },
    ],
};

/// Every entity the store persists.
///
/// Declaration order is a dependency order: each entity only references
/// entities declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    App,
    PipelineDomain,
    Pipeline,
    Source,
    Job,
    TaskType,
    Task,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::App,
        EntityKind::PipelineDomain,
        EntityKind::Pipeline,
        EntityKind::Source,
        EntityKind::Job,
        EntityKind::TaskType,
        EntityKind::Task,
    ];

    pub fn schema(&self) -> &'static EntitySchema {
        match self {
            EntityKind::App => &APP,
            EntityKind::PipelineDomain => &PIPELINE_DOMAIN,
            EntityKind::Pipeline => &PIPELINE,
            EntityKind::Source => &SOURCE,
            EntityKind::Job => &JOB,
            EntityKind::TaskType => &TASK_TYPE,
            EntityKind::Task => &TASK,
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.schema().table
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == table)
    }

    /// Entities this one holds foreign keys to.
    pub fn dependencies(&self) -> Vec<EntityKind> {
        self.schema()
            .foreign_keys
            .iter()
            .filter_map(|fk| Self::from_table(fk.table))
            .collect()
    }

    /// Entities holding a foreign key to this one, with the key that does it.
    pub fn referenced_by(&self) -> Vec<(EntityKind, &'static ForeignKey)> {
        let table = self.table_name();
        Self::ALL
            .into_iter()
            .flat_map(move |kind| {
                kind.schema()
                    .foreign_keys
                    .iter()
                    .filter(move |fk| fk.table == table)
                    .map(move |fk| (kind, fk))
            })
            .collect()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::from_table(&normalized).ok_or_else(|| Error::UnknownEntity(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_declaration_order_is_dependency_order() {
        for (position, kind) in EntityKind::ALL.iter().enumerate() {
            for dependency in kind.dependencies() {
                let dep_position = EntityKind::ALL.iter().position(|k| *k == dependency).unwrap();
                assert!(dep_position < position, "{kind} depends on later {dependency}");
            }
        }
    }

    #[test]
    fn test_every_schema_is_consistent() {
        for kind in EntityKind::ALL {
            let schema = kind.schema();
            assert_eq!(schema.namespace, NAMESPACE);

            let names: HashSet<_> = schema.column_names().collect();
            assert_eq!(names.len(), schema.columns.len(), "duplicate column in {kind}");

            let key = schema.primary_key_column().unwrap();
            assert!(!key.nullable);

            for fk in schema.foreign_keys {
                assert!(names.contains(fk.column));
                let target = EntityKind::from_table(fk.table).unwrap().schema();
                assert_eq!(target.primary_key, &[fk.references]);
            }
        }
    }

    #[test]
    fn test_key_origin() {
        assert!(EntityKind::App.schema().primary_key_column().unwrap().is_generated());
        assert!(EntityKind::Job.schema().primary_key_column().unwrap().is_generated());
        assert!(!EntityKind::TaskType.schema().primary_key_column().unwrap().is_generated());
    }

    #[test]
    fn test_parse_entity_kind() {
        assert_eq!("task_type".parse::<EntityKind>().unwrap(), EntityKind::TaskType);
        assert_eq!("Pipeline-Domain".parse::<EntityKind>().unwrap(), EntityKind::PipelineDomain);
        assert!(matches!("tasks".parse::<EntityKind>(), Err(Error::UnknownEntity(_))));
    }

    #[test]
    fn test_referenced_by() {
        let referencing: HashSet<_> = EntityKind::Pipeline
            .referenced_by()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(referencing, HashSet::from([EntityKind::Source, EntityKind::Task]));
        assert!(EntityKind::Task.referenced_by().is_empty());
    }
}
