//! # vendsync engine
//!
//! Idempotent catalog migration from an Airtable base into a NocoDB
//! project, plus schema bootstrap for the destination.
//!
//! This crate provides:
//! - A retrying request client over a pluggable HTTP transport
//! - Paginated readers for the source and destination APIs
//! - Reference resolution for linked source tables
//! - The dedup/idempotency engine that decides create vs. skip per record
//! - A schema bootstrapper driven by a typed schema specification
//! - The sync orchestrator tying these together
//!
//! ## Key Invariants
//!
//! - Within a destination table, natural keys are unique
//! - Surrogate ids are unique and strictly increasing within a run, and
//!   start above the largest id present at run start
//! - A row already present by natural key is never re-created
//! - A schema object is created at most once, however many times the
//!   bootstrapper runs
//!
//! Everything runs sequentially on the calling thread with blocking I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod client;
mod config;
mod dedup;
mod error;
mod mapping;
mod mock;
mod orchestrator;
mod reader;
mod record;
mod resolver;
mod schema;

pub use bootstrap::{BootstrapReport, EnsureOutcome, SchemaBootstrapper};
pub use client::{Auth, HttpClient, HttpRequest, Method, RequestClient};
pub use config::{
    BootstrapConfig, DestinationConfig, ExistingPolicy, RetryConfig, SourceConfig, SyncConfig,
    DEFAULT_OPERATOR_CODE, DEFAULT_PROJECT, DEFAULT_SOURCE_API_URL,
};
pub use dedup::{
    sync_entity, Decision, DedupEngine, DestinationIndex, DestinationWriter, EntityCounts,
    EntitySync, RowWriter,
};
pub use error::{SyncError, SyncResult};
pub use mapping::{EntityMapping, MachineMapping, MappingContext, ProductMapping};
pub use mock::MockHttpClient;
pub use orchestrator::{bootstrap, SyncOrchestrator, SyncSummary, OPERATORS_TABLE};
pub use reader::{DestinationReader, SourceField, SourceReader, SourceTable, PAGE_SIZE};
pub use record::{DestinationRow, Fields, RemoteRow, SourceRecord};
pub use resolver::{Projection, ReferenceMap, ReferenceMaps, ReferenceSpec};
pub use schema::{
    catalog_schema, ColumnKind, ColumnSpec, LinkKind, LinkSpec, SchemaSpec, TableSpec, PRIMARY_KEY,
};
