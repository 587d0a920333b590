use crate::session::Session;
use crate::store::Store;
use crate::{Error, Result, StorageError, StorageResult};
use daedalus_core::{Column, EntitySchema, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one [`BulkLoader::load`] call.
///
/// Counts are input records, so they always add up to the batch size. When
/// several records name the same key, the first one is counted as the insert
/// (or update) and the rest as updates of that row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

/// Records split by whether they name a primary key.
#[derive(Debug, Default)]
struct Candidates {
    inserts: Vec<Record>,
    updates: Vec<Record>,
}

impl Candidates {
    fn partition(schema: &EntitySchema, key: &Column, records: Vec<Record>) -> Self {
        let mut candidates = Self::default();
        for record in records {
            match record.get(key.name) {
                Some(value) if !value.is_null() => candidates.updates.push(record),
                _ => candidates.inserts.push(prepare_insert(schema, record)),
            }
        }
        candidates
    }
}

/// Drop explicit nulls for columns that have a storage default, so the
/// default applies. This covers the null generated key and audit timestamps
/// produced by `Entity::to_record`.
fn prepare_insert(schema: &EntitySchema, mut record: Record) -> Record {
    record.retain(|name, value| {
        !(value.is_null() && schema.column(name).is_some_and(|c| c.default.is_some()))
    });
    record
}

/// Generic insert-or-update of record batches into one entity table.
pub struct BulkLoader<'s, S: Store> {
    session: &'s mut Session<S>,
}

impl<'s, S: Store> BulkLoader<'s, S> {
    pub fn new(session: &'s mut Session<S>) -> Self {
        Self { session }
    }

    /// Insert records without a primary key, update the ones whose key
    /// exists, and skip the ones naming an unknown generated key.
    ///
    /// Runs in the session's open transaction if there is one, otherwise in a
    /// new one. With `commit` false the transaction is left open for the
    /// caller. Any failure rolls the whole transaction back.
    ///
    /// An empty `records` returns at once and never commits, even with
    /// `commit` true. Finish a `commit = false` batch with
    /// [`Session::commit`], not with an empty load.
    pub async fn load(
        &mut self,
        schema: &EntitySchema,
        records: Vec<Record>,
        commit: bool,
    ) -> Result<LoadSummary> {
        let key = schema.primary_key_column()?;
        let table = schema.qualified_name();

        if records.is_empty() {
            tracing::debug!("Nothing to load into {}", table);
            return Ok(LoadSummary::default());
        }

        let total = records.len();
        let candidates = Candidates::partition(schema, key, records);
        tracing::debug!(
            "Loading {} records into {}: {} insert candidates, {} update candidates",
            total,
            table,
            candidates.inserts.len(),
            candidates.updates.len()
        );

        if !self.session.in_transaction() {
            self.session.begin().await?;
        }

        let summary = match self.stage(schema, key, candidates).await {
            Ok(summary) => summary,
            Err(source) => {
                self.session.abort().await;
                return Err(Error::BulkLoad { table, source });
            }
        };

        if commit {
            match self.session.commit().await {
                Ok(()) => {}
                Err(Error::Storage(source)) => return Err(Error::BulkLoad { table, source }),
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Loaded {}: {} inserted, {} updated, {} skipped",
            table,
            summary.inserted,
            summary.updated,
            summary.skipped
        );

        Ok(summary)
    }

    async fn stage(
        &mut self,
        schema: &EntitySchema,
        key: &Column,
        candidates: Candidates,
    ) -> StorageResult<LoadSummary> {
        let Candidates {
            mut inserts,
            updates: update_candidates,
        } = candidates;

        // One entry per distinct key, in first-seen order. Later records for
        // the same key merge over earlier ones field by field.
        let mut keyed: Vec<(String, Record, usize)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in update_candidates {
            let value = record.get(key.name).cloned().unwrap_or_default();
            let text = key
                .ty
                .key_text(&value)
                .ok_or_else(|| StorageError::TypeMismatch {
                    column: key.name.to_string(),
                    expected: key.ty.sql_type(),
                    value: value.to_string(),
                })?;

            match positions.get(&text) {
                Some(&i) => {
                    let (_, merged, count) = &mut keyed[i];
                    merged.extend(record);
                    *count += 1;
                }
                None => {
                    positions.insert(text.clone(), keyed.len());
                    keyed.push((text, record, 1));
                }
            }
        }

        let lookup: Vec<String> = keyed.iter().map(|(text, _, _)| text.clone()).collect();

        let existing = if lookup.is_empty() {
            Default::default()
        } else {
            self.session
                .store_mut()
                .existing_keys(schema, key, &lookup)
                .await?
        };

        let mut updates = Vec::new();
        let mut updated = 0;
        let mut skipped = 0;
        for (text, record, count) in keyed {
            if existing.contains(&text) {
                updates.push(record);
                updated += count;
            } else if key.is_generated() {
                tracing::debug!("Skipping {} record(s) with unknown key {}", count, text);
                skipped += count;
            } else {
                // Caller-supplied codes are their own identity. The first
                // record inserts the row, repeats update it.
                inserts.push(prepare_insert(schema, record));
                updated += count - 1;
            }
        }

        if !updates.is_empty() {
            self.session
                .store_mut()
                .update_rows(schema, key, &updates)
                .await?;
        }

        if !inserts.is_empty() {
            self.session.store_mut().insert_rows(schema, &inserts).await?;
        }

        Ok(LoadSummary {
            inserted: inserts.len(),
            updated,
            skipped,
        })
    }
}
