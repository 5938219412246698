//! Reference resolution for linked source tables.
//!
//! A [`ReferenceMap`] is built once per run by reading a whole referenced
//! table and projecting a few fields out of each record, so that entity
//! mapping can inline linked data without per-row requests. Lookups of
//! unknown identifiers yield no value rather than an error.

use crate::client::HttpClient;
use crate::error::SyncResult;
use crate::reader::{SourceReader, SourceTable};
use crate::record::{Fields, SourceRecord};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Name of the projected primary field.
pub const PRIMARY: &str = "name";

/// Which fields to project out of a referenced record.
///
/// Each entry maps an output name to a source field name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    fields: Vec<(String, String)>,
}

impl Projection {
    /// Projects a single source field under [`PRIMARY`].
    pub fn scalar(source_field: impl Into<String>) -> Self {
        Self::default().field(PRIMARY, source_field)
    }

    /// Adds a projected field.
    pub fn field(mut self, output: impl Into<String>, source_field: impl Into<String>) -> Self {
        self.fields.push((output.into(), source_field.into()));
        self
    }

    fn apply(&self, record: &SourceRecord) -> Fields {
        self.fields
            .iter()
            .filter_map(|(output, source)| {
                record
                    .field(source)
                    .map(|value| (output.clone(), value.clone()))
            })
            .collect()
    }
}

/// A referenced table that entity mapping wants inlined.
///
/// The table's primary field is always projected under [`PRIMARY`]; extra
/// fields are projected as listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpec {
    /// Source table name.
    pub table: &'static str,
    /// Additional `(output, source field)` projections.
    pub extra: Vec<(&'static str, &'static str)>,
}

impl ReferenceSpec {
    /// References a table by its primary field only.
    pub fn primary(table: &'static str) -> Self {
        Self {
            table,
            extra: Vec::new(),
        }
    }

    /// Adds a projected field.
    pub fn with_field(mut self, output: &'static str, source_field: &'static str) -> Self {
        self.extra.push((output, source_field));
        self
    }

    /// Builds the projection once the primary field name is known.
    pub fn projection(&self, primary_field: &str) -> Projection {
        self.extra
            .iter()
            .fold(Projection::scalar(primary_field), |p, (output, source)| {
                p.field(*output, *source)
            })
    }
}

/// Source record id to projected fields. Read-only after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMap {
    entries: HashMap<String, Fields>,
}

impl ReferenceMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the whole table and projects every record.
    pub fn resolve<C: HttpClient>(
        reader: &SourceReader<'_, C>,
        table: &str,
        projection: &Projection,
    ) -> SyncResult<Self> {
        let records = reader.read_all(table)?;
        let map = Self::from_records(&records, projection);
        info!(table, entries = map.len(), "resolved reference table");
        Ok(map)
    }

    /// Projects already-read records.
    pub fn from_records(records: &[SourceRecord], projection: &Projection) -> Self {
        let entries = records
            .iter()
            .map(|record| (record.id.clone(), projection.apply(record)))
            .collect();
        Self { entries }
    }

    /// Projected fields of a record.
    pub fn get(&self, id: &str) -> Option<&Fields> {
        self.entries.get(id)
    }

    /// A single projected value.
    pub fn value(&self, id: &str, field: &str) -> Option<&Value> {
        self.get(id)?.get(field)
    }

    /// Projected fields of the first record linked from `link_field`.
    pub fn first_linked(&self, record: &SourceRecord, link_field: &str) -> Option<&Fields> {
        record
            .link_ids(link_field)
            .first()
            .and_then(|id| self.get(id))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All reference maps of a run, keyed by source table name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceMaps {
    maps: BTreeMap<String, ReferenceMap>,
}

impl ReferenceMaps {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a map for a table.
    pub fn insert(&mut self, table: impl Into<String>, map: ReferenceMap) {
        self.maps.insert(table.into(), map);
    }

    /// Returns the map for a table, if one was resolved.
    pub fn get(&self, table: &str) -> Option<&ReferenceMap> {
        self.maps.get(table)
    }

    /// Projected fields of the first record `record` links to through
    /// `link_field` in `table`.
    pub fn first_linked(
        &self,
        table: &str,
        record: &SourceRecord,
        link_field: &str,
    ) -> Option<&Fields> {
        self.get(table)?.first_linked(record, link_field)
    }

    /// Resolves every spec against the source metadata.
    ///
    /// A referenced table that does not exist, or whose primary field cannot
    /// be determined, gets an empty map.
    pub fn resolve_all<C: HttpClient>(
        reader: &SourceReader<'_, C>,
        tables: &[SourceTable],
        specs: &[ReferenceSpec],
    ) -> SyncResult<Self> {
        let mut maps = Self::new();
        for spec in specs {
            if maps.get(spec.table).is_some() {
                continue;
            }
            let primary = tables
                .iter()
                .find(|t| t.name == spec.table)
                .and_then(SourceTable::primary_field_name);
            let map = match primary {
                Some(primary) => ReferenceMap::resolve(reader, spec.table, &spec.projection(primary))?,
                None => {
                    debug!(table = spec.table, "reference table unavailable, using empty map");
                    ReferenceMap::new()
                }
            };
            maps.insert(spec.table, map);
        }
        Ok(maps)
    }
}
