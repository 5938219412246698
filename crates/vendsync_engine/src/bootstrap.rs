//! Schema bootstrapper.
//!
//! Every operation inspects the destination before mutating it and leaves
//! an existing object untouched, so applying the same [`SchemaSpec`] any
//! number of times converges to one end state. After the first successful
//! run, later runs issue reads only.

use crate::client::{HttpClient, RequestClient};
use crate::config::DestinationConfig;
use crate::error::SyncResult;
use crate::reader::endpoint;
use crate::schema::{LinkSpec, SchemaSpec, TableSpec, PRIMARY_KEY};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

const LINK_UIDTS: &[&str] = &["LinkToAnotherRecord", "Links"];

/// Result of an ensure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOutcome {
    /// The object was created.
    Created,
    /// The object already existed; nothing was changed.
    Exists,
    /// A table the operation depends on does not exist.
    Missing,
}

/// Outcomes of a full bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Per table.
    pub tables: BTreeMap<String, EnsureOutcome>,
    /// Primary key per table.
    pub id_pk: BTreeMap<String, EnsureOutcome>,
    /// Per link, keyed `child.title`.
    pub links: BTreeMap<String, EnsureOutcome>,
}

impl BootstrapReport {
    /// Iterates over every outcome.
    pub fn outcomes(&self) -> impl Iterator<Item = EnsureOutcome> + '_ {
        self.tables
            .values()
            .chain(self.id_pk.values())
            .chain(self.links.values())
            .copied()
    }
}

/// Brings a destination project to the shape of a [`SchemaSpec`].
pub struct SchemaBootstrapper<'a, C: HttpClient> {
    client: &'a RequestClient<C>,
    config: &'a DestinationConfig,
}

impl<'a, C: HttpClient> SchemaBootstrapper<'a, C> {
    /// Creates a bootstrapper; `config.project` is the project id.
    pub fn new(client: &'a RequestClient<C>, config: &'a DestinationConfig) -> Self {
        Self { client, config }
    }

    /// Applies every table, primary key and link of the spec, in that order.
    pub fn apply(&self, schema: &SchemaSpec) -> SyncResult<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for table in &schema.tables {
            let outcome = self.ensure_table(table)?;
            report.tables.insert(table.name.to_string(), outcome);
        }
        for table in &schema.tables {
            let outcome = self.ensure_primary_key(table.name)?;
            report.id_pk.insert(table.name.to_string(), outcome);
        }
        for link in &schema.links {
            let outcome = self.ensure_link(link)?;
            report.links.insert(link.key(), outcome);
        }

        Ok(report)
    }

    /// Creates the table with its full column list unless a table with that
    /// name exists.
    pub fn ensure_table(&self, table: &TableSpec) -> SyncResult<EnsureOutcome> {
        if self.table_id(table.name)?.is_some() {
            info!(table = table.name, "table exists");
            return Ok(EnsureOutcome::Exists);
        }

        let columns: Vec<Value> = table.columns.iter().map(|c| c.to_json()).collect();
        let payload = json!({
            "table_name": table.name,
            "title": table.name,
            "columns": columns,
        });
        self.client.post(self.tables_url()?.as_str(), &payload)?;
        info!(table = table.name, columns = columns.len(), "table created");
        Ok(EnsureOutcome::Created)
    }

    /// Adds the `id` primary-key column unless present.
    pub fn ensure_primary_key(&self, table: &str) -> SyncResult<EnsureOutcome> {
        let Some(table_id) = self.table_id(table)? else {
            return Ok(EnsureOutcome::Missing);
        };

        let has_pk = self
            .columns(&table_id)?
            .iter()
            .any(|c| c.get("column_name").and_then(Value::as_str) == Some(PRIMARY_KEY));
        if has_pk {
            return Ok(EnsureOutcome::Exists);
        }

        let payload = json!({
            "column_name": PRIMARY_KEY,
            "title": PRIMARY_KEY,
            "uidt": "ID",
        });
        self.client.post(self.columns_url(&table_id)?.as_str(), &payload)?;
        info!(table, "primary key created");
        Ok(EnsureOutcome::Created)
    }

    /// Adds the link column unless a column with its title exists or another
    /// relationship column already targets the same parent.
    pub fn ensure_link(&self, link: &LinkSpec) -> SyncResult<EnsureOutcome> {
        let (Some(child_id), Some(parent_id)) =
            (self.table_id(link.child)?, self.table_id(link.parent)?)
        else {
            return Ok(EnsureOutcome::Missing);
        };

        let columns = self.columns(&child_id)?;
        if columns.iter().any(|c| links_to(c, link.title, &parent_id)) {
            return Ok(EnsureOutcome::Exists);
        }

        let payload = json!({
            "column_name": link.title,
            "title": link.title,
            "uidt": "Links",
            "parentId": parent_id,
            "childId": child_id,
            "type": link.kind.code(),
        });
        self.client.post(self.columns_url(&child_id)?.as_str(), &payload)?;
        info!(child = link.child, parent = link.parent, title = link.title, "link created");
        Ok(EnsureOutcome::Created)
    }

    fn table_id(&self, name: &str) -> SyncResult<Option<String>> {
        let body = self.client.get(self.tables_url()?.as_str())?;
        Ok(list(&body)
            .iter()
            .find(|t| t.get("table_name").and_then(Value::as_str) == Some(name))
            .and_then(|t| t.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn columns(&self, table_id: &str) -> SyncResult<Vec<Value>> {
        let url = endpoint(
            &self.config.base_url,
            &["api", "v1", "db", "meta", "tables", table_id],
        )?;
        let body = self.client.get(url.as_str())?;
        Ok(body
            .get("columns")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn tables_url(&self) -> SyncResult<url::Url> {
        endpoint(
            &self.config.base_url,
            &["api", "v1", "db", "meta", "projects", &self.config.project, "tables"],
        )
    }

    fn columns_url(&self, table_id: &str) -> SyncResult<url::Url> {
        endpoint(
            &self.config.base_url,
            &["api", "v1", "db", "meta", "tables", table_id, "columns"],
        )
    }
}

fn list(body: &Value) -> &[Value] {
    body.get("list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn links_to(column: &Value, title: &str, parent_id: &str) -> bool {
    if column.get("title").and_then(Value::as_str) == Some(title) {
        return true;
    }
    let is_link = column
        .get("uidt")
        .and_then(Value::as_str)
        .is_some_and(|uidt| LINK_UIDTS.contains(&uidt));
    is_link
        && column
            .pointer("/colOptions/fk_related_model_id")
            .and_then(Value::as_str)
            == Some(parent_id)
}
