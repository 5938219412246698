//! Dedup and idempotency engine.
//!
//! Each source record is reduced to a natural key and classified against
//! the destination index built at run start and against the keys already
//! produced in this run:
//!
//! - key present in the destination: skipped as existing (or diffed and
//!   patched under [`ExistingPolicy::UpsertWithDiff`]);
//! - key already produced earlier in this run: skipped as duplicate;
//! - otherwise: created with the next surrogate id.
//!
//! Records are processed strictly in listing order, so the first record to
//! produce a key wins. Surrogate ids start at `max(existing ids) + 1` and
//! only advance after a successful write.

use crate::client::{HttpClient, RequestClient};
use crate::config::{DestinationConfig, ExistingPolicy};
use crate::error::{SyncError, SyncResult};
use crate::mapping::{EntityMapping, MappingContext};
use crate::reader::table_data_url;
use crate::record::{same_value, strip_absent, DestinationRow, Fields, RemoteRow, SourceRecord};
use crate::resolver::ReferenceMaps;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Fields never compared when diffing against an existing row.
const DIFF_IGNORED: &[&str] = &["id", "Id", "created_at", "updated_at"];

/// Existing destination rows of one table, keyed by natural key.
#[derive(Debug, Clone, Default)]
pub struct DestinationIndex {
    rows: HashMap<String, RemoteRow>,
    max_id: u64,
}

impl DestinationIndex {
    /// Builds the index from a full listing.
    ///
    /// Rows without a natural key still count towards the maximum id.
    pub fn build(rows: Vec<RemoteRow>, key_field: &str) -> Self {
        let max_id = rows.iter().filter_map(RemoteRow::id).max().unwrap_or(0);
        let rows = rows
            .into_iter()
            .filter_map(|row| row.text(key_field).map(|key| (key, row)))
            .collect();
        Self { rows, max_id }
    }

    /// Returns true if the key exists in the destination.
    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Returns the existing row for a key.
    pub fn get(&self, key: &str) -> Option<&RemoteRow> {
        self.rows.get(key)
    }

    /// Largest integer id present at run start.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// First surrogate id to assign.
    pub fn next_id(&self) -> u64 {
        self.max_id + 1
    }

    /// Number of keyed rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no keyed rows exist.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-entity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    /// Rows created.
    pub created: u64,
    /// Records whose key already existed in the destination.
    pub skipped_existing: u64,
    /// Records whose key was already produced in this run.
    pub skipped_duplicate: u64,
    /// Existing rows patched under the upsert policy.
    pub updated: u64,
}

/// Outcome of classifying one natural key.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Create a new row.
    Create,
    /// The key exists in the destination; nothing to do.
    SkipExisting,
    /// The key was already produced in this run.
    SkipDuplicate,
    /// Patch an existing row with the differing fields.
    Update {
        /// Id of the existing row.
        id: u64,
        /// Fields to write.
        changes: Fields,
    },
}

/// Persists rows. Implemented over the destination API, and by in-memory
/// collectors in tests.
pub trait RowWriter {
    /// Creates a row in a table.
    fn create(&self, table: &str, row: &DestinationRow) -> SyncResult<()>;

    /// Patches an existing row.
    fn update(&self, table: &str, id: u64, changes: &Fields) -> SyncResult<()>;
}

/// Writes rows through the destination data API.
pub struct DestinationWriter<'a, C: HttpClient> {
    client: &'a RequestClient<C>,
    config: &'a DestinationConfig,
}

impl<'a, C: HttpClient> DestinationWriter<'a, C> {
    /// Creates a writer over an authenticated destination client.
    pub fn new(client: &'a RequestClient<C>, config: &'a DestinationConfig) -> Self {
        Self { client, config }
    }

    /// Posts an arbitrary row and returns the response.
    pub fn create_raw(&self, table: &str, row: &Value) -> SyncResult<Value> {
        let url = table_data_url(self.config, table)?;
        self.client.post(url.as_str(), row)
    }
}

impl<C: HttpClient> RowWriter for DestinationWriter<'_, C> {
    fn create(&self, table: &str, row: &DestinationRow) -> SyncResult<()> {
        self.create_raw(table, &row.to_payload()).map(|_| ())
    }

    fn update(&self, table: &str, id: u64, changes: &Fields) -> SyncResult<()> {
        let mut url = table_data_url(self.config, table)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Configuration(format!("invalid url for table {table}")))?
            .push(&id.to_string());
        self.client
            .patch(url.as_str(), &Value::Object(changes.clone()))
            .map(|_| ())
    }
}

/// Decision state for one entity type within one run.
#[derive(Debug)]
pub struct DedupEngine<'a> {
    index: &'a DestinationIndex,
    policy: ExistingPolicy,
    seen: HashSet<String>,
    next_id: u64,
    counts: EntityCounts,
}

impl<'a> DedupEngine<'a> {
    /// Creates an engine seeded from the index.
    pub fn new(index: &'a DestinationIndex, policy: ExistingPolicy) -> Self {
        Self {
            index,
            policy,
            seen: HashSet::new(),
            next_id: index.next_id(),
            counts: EntityCounts::default(),
        }
    }

    /// Next surrogate id to assign.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Counts so far.
    pub fn counts(&self) -> EntityCounts {
        self.counts
    }

    /// Classifies a key given its mapped fields, without side effects.
    pub fn decide(&self, key: &str, fields: &Fields) -> Decision {
        if let Some(existing) = self.index.get(key) {
            return match self.policy {
                ExistingPolicy::CreateOnly => Decision::SkipExisting,
                ExistingPolicy::UpsertWithDiff if self.seen.contains(key) => {
                    Decision::SkipDuplicate
                }
                ExistingPolicy::UpsertWithDiff => {
                    let changes = diff(existing, fields);
                    match existing.id() {
                        Some(id) if !changes.is_empty() => Decision::Update { id, changes },
                        _ => Decision::SkipExisting,
                    }
                }
            };
        }
        if self.seen.contains(key) {
            return Decision::SkipDuplicate;
        }
        Decision::Create
    }

    /// Processes one record: classifies it, performs the write if any, and
    /// advances the counters. Returns the created row, if one was created.
    pub fn process<W: RowWriter>(
        &mut self,
        table: &str,
        key_field: &str,
        key: String,
        fields: Fields,
        writer: &W,
    ) -> SyncResult<Option<DestinationRow>> {
        match self.decide(&key, &fields) {
            Decision::SkipExisting => {
                debug!(table, key = %key, "skip existing");
                self.counts.skipped_existing += 1;
                self.seen.insert(key);
                Ok(None)
            }
            Decision::SkipDuplicate => {
                debug!(table, key = %key, "skip duplicate");
                self.counts.skipped_duplicate += 1;
                Ok(None)
            }
            Decision::Update { id, changes } => {
                debug!(table, key = %key, id, fields = changes.len(), "update existing");
                writer.update(table, id, &changes)?;
                self.counts.updated += 1;
                self.seen.insert(key);
                Ok(None)
            }
            Decision::Create => {
                let row = DestinationRow::new(self.next_id, key_field, key.clone(), fields);
                debug!(table, key = %key, id = row.id(), "create");
                writer.create(table, &row)?;
                self.seen.insert(key);
                self.next_id += 1;
                self.counts.created += 1;
                Ok(Some(row))
            }
        }
    }
}

/// Result of syncing one entity type.
#[derive(Debug, Clone)]
pub struct EntitySync {
    /// Rows created, in creation order.
    pub created_rows: Vec<DestinationRow>,
    /// Counts.
    pub counts: EntityCounts,
    /// Next surrogate id after the run.
    pub next_id: u64,
}

/// Syncs the records of one entity type, in listing order.
pub fn sync_entity<M, W>(
    mapping: &M,
    records: &[SourceRecord],
    refs: &ReferenceMaps,
    ctx: &MappingContext,
    index: &DestinationIndex,
    policy: ExistingPolicy,
    writer: &W,
) -> SyncResult<EntitySync>
where
    M: EntityMapping + ?Sized,
    W: RowWriter,
{
    let table = mapping.destination_table();
    let mut engine = DedupEngine::new(index, policy);
    let mut created_rows = Vec::new();

    for record in records {
        let key = mapping.natural_key(record);
        let fields = mapping.map_fields(record, &key, refs, ctx);
        if let Some(row) = engine.process(table, mapping.key_field(), key, fields, writer)? {
            created_rows.push(row);
        }
    }

    let counts = engine.counts();
    info!(
        entity = mapping.entity(),
        created = counts.created,
        skipped_existing = counts.skipped_existing,
        skipped_duplicate = counts.skipped_duplicate,
        updated = counts.updated,
        "entity synced"
    );

    Ok(EntitySync {
        created_rows,
        counts,
        next_id: engine.next_id(),
    })
}

/// Fields of `fields` whose value differs from the existing row.
fn diff(existing: &RemoteRow, fields: &Fields) -> Fields {
    strip_absent(fields.clone())
        .into_iter()
        .filter(|(name, _)| !DIFF_IGNORED.contains(&name.as_str()))
        .filter(|(name, value)| {
            existing
                .get(name)
                .map_or(true, |current| !same_value(current, value))
        })
        .collect()
}
