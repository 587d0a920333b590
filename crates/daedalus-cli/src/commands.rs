use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use crate::cli::Commands;
use daedalus_core::{EntityKind, Record, NAMESPACE};
use daedalus_db::store::postgres::{create_namespace_sql, create_table_sql};
use daedalus_db::{BulkLoader, DbConfig, Session};

pub async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::InitDb { entities } => {
            let entities = creation_order(entities);

            let mut session = connect().await?;
            let result = session.init_schema(&entities).await;
            session.close().await?;
            result?;

            println!("✓ Schema initialized");
            for kind in &entities {
                println!("  {}", kind.schema().qualified_name());
            }
        }

        Commands::Load {
            entity,
            file,
            dry_run,
        } => {
            let records = read_records(&file)?;
            let schema = entity.schema();

            let mut session = connect().await?;
            let result = BulkLoader::new(&mut session)
                .load(schema, records, !dry_run)
                .await;
            let summary = match result {
                Ok(summary) => summary,
                Err(e) => {
                    session.close().await?;
                    return Err(e.into());
                }
            };
            if dry_run && session.in_transaction() {
                session.rollback().await?;
            }
            session.close().await?;

            if dry_run {
                println!("✓ Dry run for {} (rolled back)", schema.qualified_name());
            } else {
                println!("✓ Loaded {}", schema.qualified_name());
            }
            println!("  Inserted: {}", summary.inserted);
            println!("  Updated: {}", summary.updated);
            println!("  Skipped: {}", summary.skipped);
        }

        Commands::Get { entity, key } => {
            let mut session = connect().await?;
            let row = session
                .find(entity.schema(), &serde_json::Value::String(key.clone()))
                .await;
            session.close().await?;

            match row? {
                Some(row) => println!("{}", serde_json::to_string_pretty(&row)?),
                None => anyhow::bail!("No {} with key {}", entity, key),
            }
        }

        Commands::Schema { entity } => {
            let kinds = match entity {
                Some(kind) => vec![kind],
                None => EntityKind::ALL.to_vec(),
            };

            println!("{};", create_namespace_sql(NAMESPACE));
            for kind in kinds {
                println!();
                println!("{};", create_table_sql(kind.schema()));
            }
        }
    }

    Ok(())
}

/// The tables `init_schema` creates, in the order it creates them.
fn creation_order(mut entities: Vec<EntityKind>) -> Vec<EntityKind> {
    if entities.is_empty() {
        return EntityKind::ALL.to_vec();
    }
    entities.sort();
    entities.dedup();
    entities
}

async fn connect() -> Result<Session> {
    let config = DbConfig::from_env().context("Invalid DB_* configuration")?;
    tracing::debug!("Connecting with {:?}", config);
    Ok(Session::create(&config).await?)
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let mut raw = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read stdin")?;
    } else {
        raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }

    let records: Vec<Record> =
        serde_json::from_str(&raw).context("Expected a JSON array of objects")?;
    tracing::debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}
