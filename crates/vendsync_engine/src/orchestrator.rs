//! Sync orchestrator.
//!
//! A run reads source metadata, resolves reference tables, lists each
//! destination table once to build its index and starting surrogate id,
//! provisions the operator row, and then syncs each entity type in turn.
//! Any error aborts the whole run; rows created before the failure stay in
//! the destination and are recognised as existing on the next run.

use crate::bootstrap::{BootstrapReport, SchemaBootstrapper};
use crate::client::{Auth, HttpClient, RequestClient};
use crate::config::{BootstrapConfig, SyncConfig};
use crate::dedup::{sync_entity, DestinationIndex, DestinationWriter, EntityCounts};
use crate::error::{SyncError, SyncResult};
use crate::mapping::{EntityMapping, MachineMapping, MappingContext, ProductMapping};
use crate::reader::{DestinationReader, SourceReader};
use crate::resolver::{ReferenceMaps, ReferenceSpec};
use crate::schema::SchemaSpec;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Destination table holding operator rows.
pub const OPERATORS_TABLE: &str = "operators";

/// Summary of a migration run; serialized as the run's sole output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Counts per entity type.
    #[serde(flatten)]
    pub entities: BTreeMap<String, EntityCounts>,
    /// Whether writes were suppressed.
    pub dry_run: bool,
}

impl SyncSummary {
    /// Counts for one entity type.
    pub fn entity(&self, name: &str) -> EntityCounts {
        self.entities.get(name).copied().unwrap_or_default()
    }

    /// Total rows created across entity types.
    pub fn total_created(&self) -> u64 {
        self.entities.values().map(|c| c.created).sum()
    }
}

/// Runs migrations from the source base into the destination project.
pub struct SyncOrchestrator<C: HttpClient + Clone> {
    config: SyncConfig,
    source: RequestClient<C>,
    destination: RequestClient<C>,
    mappings: Vec<Box<dyn EntityMapping>>,
}

impl<C: HttpClient + Clone> SyncOrchestrator<C> {
    /// Creates an orchestrator syncing products and machines.
    ///
    /// Fails with [`SyncError::Configuration`] before any request when a
    /// required setting is missing.
    pub fn new(config: SyncConfig, client: C) -> SyncResult<Self> {
        config.validate()?;

        let source = RequestClient::new(client.clone(), Auth::Bearer(config.source.api_key.clone()))
            .with_retry(config.read_retry.clone(), config.write_retry.clone())
            .with_timeout(config.timeout);
        let destination =
            RequestClient::new(client, Auth::XcToken(config.destination.api_key.clone()))
                .with_retry(config.read_retry.clone(), config.write_retry.clone())
                .with_timeout(config.timeout)
                .with_dry_run(config.dry_run);

        Ok(Self {
            config,
            source,
            destination,
            mappings: vec![Box::new(ProductMapping), Box::new(MachineMapping)],
        })
    }

    /// Replaces the entity mappings, which run in the given order.
    pub fn with_mappings(mut self, mappings: Vec<Box<dyn EntityMapping>>) -> Self {
        self.mappings = mappings;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Performs one full sync pass.
    pub fn run(&self) -> SyncResult<SyncSummary> {
        let start = Instant::now();
        let source_reader = SourceReader::new(&self.source, &self.config.source);
        let dest_reader = DestinationReader::new(&self.destination, &self.config.destination);
        let writer = DestinationWriter::new(&self.destination, &self.config.destination);

        let tables = source_reader.meta_tables()?;
        for mapping in &self.mappings {
            if !tables.iter().any(|t| t.name == mapping.source_table()) {
                return Err(SyncError::MissingUpstream {
                    table: mapping.source_table().to_string(),
                });
            }
        }

        let specs: Vec<ReferenceSpec> =
            self.mappings.iter().flat_map(|m| m.references()).collect();
        let refs = ReferenceMaps::resolve_all(&source_reader, &tables, &specs)?;

        let mut indexes = Vec::with_capacity(self.mappings.len());
        for mapping in &self.mappings {
            let rows = dest_reader.read_all_destination(mapping.destination_table())?;
            let index = DestinationIndex::build(rows, mapping.key_field());
            info!(
                table = mapping.destination_table(),
                existing = index.len(),
                next_id = index.next_id(),
                "destination indexed"
            );
            indexes.push(index);
        }

        let operator_id = self.ensure_operator(&dest_reader, &writer)?;
        let link = if self.config.use_operator_link {
            operator_id
        } else {
            None
        };
        let ctx = MappingContext::new(self.config.operator_code.clone(), link);

        let mut summary = SyncSummary {
            entities: BTreeMap::new(),
            dry_run: self.config.dry_run,
        };
        for (mapping, index) in self.mappings.iter().zip(&indexes) {
            let records = source_reader.read_all(mapping.source_table())?;
            let result = sync_entity(
                mapping.as_ref(),
                &records,
                &refs,
                &ctx,
                index,
                self.config.existing_policy,
                &writer,
            )?;
            summary
                .entities
                .insert(mapping.entity().to_string(), result.counts);
        }

        info!(
            created = summary.total_created(),
            dry_run = summary.dry_run,
            elapsed_ms = duration_ms(start.elapsed()),
            "sync complete"
        );
        Ok(summary)
    }

    /// Returns the id of the operator row for the configured code, creating
    /// the row when none exists.
    ///
    /// Yields `None` when the id cannot be determined, as in dry-run mode.
    fn ensure_operator(
        &self,
        reader: &DestinationReader<'_, C>,
        writer: &DestinationWriter<'_, C>,
    ) -> SyncResult<Option<u64>> {
        let code = self.config.operator_code.as_str();
        let index = DestinationIndex::build(reader.read_all_destination(OPERATORS_TABLE)?, "code");
        if let Some(existing) = index.get(code) {
            return Ok(existing.id());
        }

        let now = chrono::Utc::now().to_rfc3339();
        let row = json!({
            "id": index.next_id(),
            "code": code,
            "name": code,
            "status": "active",
            "created_at": now,
            "updated_at": now,
        });
        let created = writer.create_raw(OPERATORS_TABLE, &row)?;
        info!(code, "operator created");
        Ok(["id", "Id"]
            .iter()
            .find_map(|key| created.get(*key).and_then(Value::as_u64)))
    }
}

/// Applies a schema to the destination project described by `config`.
pub fn bootstrap<C: HttpClient>(
    config: &BootstrapConfig,
    client: C,
    schema: &SchemaSpec,
) -> SyncResult<BootstrapReport> {
    config.validate()?;
    let client = RequestClient::new(client, Auth::XcToken(config.destination.api_key.clone()))
        .with_retry(config.read_retry.clone(), config.write_retry.clone())
        .with_timeout(config.timeout)
        .with_dry_run(config.dry_run);
    SchemaBootstrapper::new(&client, &config.destination).apply(schema)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationConfig, RetryConfig, SourceConfig};
    use crate::mock::MockHttpClient;
    use std::sync::Arc;

    fn config() -> SyncConfig {
        SyncConfig::new(
            SourceConfig::new("app1", "pat").with_api_url(MockHttpClient::SOURCE_URL),
            DestinationConfig::new(MockHttpClient::DESTINATION_URL, "tok", "zgovend"),
        )
        .with_read_retry(RetryConfig::no_delay(4))
        .with_write_retry(RetryConfig::no_delay(2))
    }

    fn mock_with_tables() -> Arc<MockHttpClient> {
        let mock = Arc::new(MockHttpClient::new());
        mock.add_source_table("商品", "商品名稱", vec![]);
        mock.add_source_table("販賣機", "機號", vec![]);
        for table in ["products", "machines", "operators"] {
            mock.seed_destination_rows(table, vec![]);
        }
        mock
    }

    #[test]
    fn missing_configuration_fails_before_io() {
        let mock = Arc::new(MockHttpClient::new());
        let config = SyncConfig::new(
            SourceConfig::new("", "pat"),
            DestinationConfig::new(MockHttpClient::DESTINATION_URL, "tok", "zgovend"),
        );
        let result = SyncOrchestrator::new(config, Arc::clone(&mock));
        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn missing_source_table_is_fatal() {
        let mock = Arc::new(MockHttpClient::new());
        mock.add_source_table("商品", "商品名稱", vec![]);
        let orchestrator = SyncOrchestrator::new(config(), Arc::clone(&mock)).unwrap();
        let err = orchestrator.run().unwrap_err();
        assert!(matches!(err, SyncError::MissingUpstream { table } if table == "販賣機"));
    }

    #[test]
    fn operator_row_is_created_once() {
        let mock = mock_with_tables();
        let orchestrator =
            SyncOrchestrator::new(config().with_operator_code("acme"), Arc::clone(&mock)).unwrap();

        orchestrator.run().unwrap();
        orchestrator.run().unwrap();

        let operators = mock.destination_rows(OPERATORS_TABLE);
        assert_eq!(operators.len(), 1);
        assert_eq!(operators[0]["code"], json!("acme"));
        assert_eq!(operators[0]["id"], json!(1));
    }

    #[test]
    fn summary_serializes_per_entity() {
        let mock = mock_with_tables();
        let summary = SyncOrchestrator::new(config().with_dry_run(true), mock)
            .unwrap()
            .run()
            .unwrap();

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["dry_run"], json!(true));
        assert_eq!(
            value["products"],
            json!({"created": 0, "skipped_existing": 0, "skipped_duplicate": 0, "updated": 0})
        );
        assert!(value.get("machines").is_some());
    }
}
