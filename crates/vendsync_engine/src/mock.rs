//! In-memory fake of the source and destination APIs.
//!
//! [`MockHttpClient`] implements [`HttpClient`] by routing requests to an
//! in-memory source base and destination project, so the whole engine can
//! be exercised without a network. It records every request and can be told
//! to fail a number of upcoming requests.

use crate::client::{HttpClient, HttpRequest, Method};
use crate::error::{SyncError, SyncResult};
use crate::record::Fields;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use url::Url;

#[derive(Debug, Default)]
struct SourceTableState {
    id: String,
    primary_field: String,
    records: Vec<Value>,
}

#[derive(Debug, Default)]
struct MetaTableState {
    id: String,
    name: String,
    columns: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    method: Option<Method>,
    remaining: u32,
    status: Option<u16>,
}

#[derive(Debug, Default)]
struct MockState {
    source: BTreeMap<String, SourceTableState>,
    data: BTreeMap<String, Vec<Fields>>,
    meta: Vec<MetaTableState>,
    failures: Vec<Failure>,
    requests: Vec<HttpRequest>,
}

/// A mock HTTP client backed by in-memory tables.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    state: Mutex<MockState>,
}

impl MockHttpClient {
    /// Base URL that routes to the fake source API.
    pub const SOURCE_URL: &'static str = "http://source.mock/v0";

    /// Base URL that routes to the fake destination API.
    pub const DESTINATION_URL: &'static str = "http://destination.mock";

    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source table with the given primary field name and records.
    ///
    /// Records use the source wire shape: `{"id", "fields", "createdTime"}`.
    pub fn add_source_table(&self, name: &str, primary_field: &str, records: Vec<Value>) {
        let mut state = self.state.lock();
        let id = format!("tbl{}", state.source.len() + 1);
        state.source.insert(
            name.to_string(),
            SourceTableState {
                id,
                primary_field: primary_field.to_string(),
                records,
            },
        );
    }

    /// Creates a destination data table holding the given rows.
    pub fn seed_destination_rows(&self, table: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.state.lock().data.insert(table.to_string(), rows);
    }

    /// Returns the rows currently stored in a destination table.
    pub fn destination_rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .data
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Names of the tables in the destination schema catalog.
    pub fn schema_tables(&self) -> Vec<String> {
        self.state.lock().meta.iter().map(|t| t.name.clone()).collect()
    }

    /// Columns of a table in the destination schema catalog.
    pub fn schema_columns(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .meta
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Adds a table to the destination schema catalog directly.
    pub fn seed_schema_table(&self, table: &str, columns: Vec<Value>) {
        let mut state = self.state.lock();
        let id = format!("md_{}", state.meta.len() + 1);
        state.meta.push(MetaTableState {
            id,
            name: table.to_string(),
            columns,
        });
        state.data.entry(table.to_string()).or_default();
    }

    /// Fails the next `count` requests with the given method (any method
    /// when `None`). Failures carry `status` when set, otherwise they look
    /// like connection errors.
    pub fn fail_next(&self, method: Option<Method>, count: u32, status: Option<u16>) {
        self.state.lock().failures.push(Failure {
            method,
            remaining: count,
            status,
        });
    }

    /// Fails every upcoming request with the given method.
    pub fn fail_always(&self, method: Option<Method>, status: Option<u16>) {
        self.fail_next(method, u32::MAX, status);
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of requests received with the given method.
    pub fn count_method(&self, method: Method) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// All requests received, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Forgets the recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

impl HttpClient for MockHttpClient {
    fn send(&self, request: &HttpRequest) -> SyncResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(failure) = state
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && f.method.map_or(true, |m| m == request.method))
        {
            if failure.remaining != u32::MAX {
                failure.remaining -= 1;
            }
            return Err(match failure.status {
                Some(status) => SyncError::http_status(status, "injected failure"),
                None => SyncError::transport_retryable("injected failure"),
            });
        }

        let url = Url::parse(&request.url)
            .map_err(|e| SyncError::transport_fatal(format!("bad url: {e}")))?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.map(decode_segment).collect())
            .unwrap_or_default();
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        let response = if Self::SOURCE_URL.starts_with(&origin) {
            state.route_source(&segments, &query)
        } else {
            state.route_destination(request, &segments, &query)
        }?;

        Ok(serde_json::to_vec(&response)?)
    }
}

impl MockState {
    fn route_source(
        &self,
        segments: &[&str],
        query: &BTreeMap<String, String>,
    ) -> SyncResult<Value> {
        match segments {
            ["v0", "meta", "bases", _, "tables"] => {
                let tables: Vec<Value> = self
                    .source
                    .iter()
                    .map(|(name, table)| {
                        json!({
                            "id": table.id,
                            "name": name,
                            "primaryFieldId": "fld0",
                            "fields": [{"id": "fld0", "name": table.primary_field}],
                        })
                    })
                    .collect();
                Ok(json!({ "tables": tables }))
            }
            ["v0", _, table] => {
                let table = self.source.get(*table).ok_or_else(not_found)?;
                let size = query_number(query, "pageSize").unwrap_or(100).max(1);
                let start = query_number(query, "offset").unwrap_or(0);
                let end = (start + size).min(table.records.len());
                let page = table.records.get(start..end).unwrap_or_default();
                let mut body = json!({ "records": page });
                if end < table.records.len() {
                    body["offset"] = json!(end.to_string());
                }
                Ok(body)
            }
            _ => Err(not_found()),
        }
    }

    fn route_destination(
        &mut self,
        request: &HttpRequest,
        segments: &[&str],
        query: &BTreeMap<String, String>,
    ) -> SyncResult<Value> {
        let body = request.body.clone().unwrap_or(Value::Null);
        match (request.method, segments) {
            (Method::Get, ["api", "v1", "db", "data", "v1", _, table]) => {
                let rows = self.data.get(*table).ok_or_else(not_found)?;
                let size = query_number(query, "pageSize").unwrap_or(25).max(1);
                let page = query_number(query, "page").unwrap_or(1).max(1);
                let start = (page - 1) * size;
                let end = (start + size).min(rows.len());
                let list = rows.get(start..end).unwrap_or_default();
                Ok(json!({
                    "list": list,
                    "pageInfo": {
                        "page": page,
                        "pageSize": size,
                        "totalRows": rows.len(),
                        "isLastPage": end >= rows.len(),
                    },
                }))
            }
            (Method::Post, ["api", "v1", "db", "data", "v1", _, table]) => {
                let rows = self.data.get_mut(*table).ok_or_else(not_found)?;
                let mut row = body.as_object().cloned().ok_or_else(bad_request)?;
                if !row.contains_key("id") {
                    let next = rows
                        .iter()
                        .filter_map(|r| r.get("id").and_then(Value::as_u64))
                        .max()
                        .unwrap_or(0)
                        + 1;
                    row.insert("id".into(), json!(next));
                }
                rows.push(row.clone());
                Ok(Value::Object(row))
            }
            (Method::Patch, ["api", "v1", "db", "data", "v1", _, table, id]) => {
                let rows = self.data.get_mut(*table).ok_or_else(not_found)?;
                let id: u64 = id.parse().map_err(|_| bad_request())?;
                let row = rows
                    .iter_mut()
                    .find(|r| r.get("id").and_then(Value::as_u64) == Some(id))
                    .ok_or_else(not_found)?;
                let changes = body.as_object().cloned().ok_or_else(bad_request)?;
                row.extend(changes);
                Ok(Value::Object(row.clone()))
            }
            (Method::Get, ["api", "v1", "db", "meta", "projects", _, "tables"]) => {
                let list: Vec<Value> = self
                    .meta
                    .iter()
                    .map(|t| json!({"id": t.id, "table_name": t.name, "title": t.name}))
                    .collect();
                Ok(json!({ "list": list }))
            }
            (Method::Post, ["api", "v1", "db", "meta", "projects", _, "tables"]) => {
                let name = body
                    .get("table_name")
                    .and_then(Value::as_str)
                    .ok_or_else(bad_request)?
                    .to_string();
                let columns = body
                    .get("columns")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let id = format!("md_{}", self.meta.len() + 1);
                self.meta.push(MetaTableState {
                    id: id.clone(),
                    name: name.clone(),
                    columns,
                });
                self.data.entry(name.clone()).or_default();
                Ok(json!({"id": id, "table_name": name}))
            }
            (Method::Get, ["api", "v1", "db", "meta", "tables", id]) => {
                let table = self.meta.iter().find(|t| t.id == *id).ok_or_else(not_found)?;
                Ok(json!({
                    "id": table.id,
                    "table_name": table.name,
                    "columns": table.columns,
                }))
            }
            (Method::Post, ["api", "v1", "db", "meta", "tables", id, "columns"]) => {
                let table = self
                    .meta
                    .iter_mut()
                    .find(|t| t.id == *id)
                    .ok_or_else(not_found)?;
                let mut column = body.as_object().cloned().ok_or_else(bad_request)?;
                if column.get("uidt").and_then(Value::as_str) == Some("Links") {
                    let parent = column.remove("parentId").unwrap_or(Value::Null);
                    let kind = column.remove("type").unwrap_or(Value::Null);
                    column.remove("childId");
                    column.insert("uidt".into(), json!("LinkToAnotherRecord"));
                    column.insert(
                        "colOptions".into(),
                        json!({"fk_related_model_id": parent, "type": kind}),
                    );
                }
                table.columns.push(Value::Object(column.clone()));
                Ok(Value::Object(column))
            }
            _ => Err(not_found()),
        }
    }
}

fn query_number(query: &BTreeMap<String, String>, key: &str) -> Option<usize> {
    query.get(key).and_then(|v| v.parse().ok())
}

fn not_found() -> SyncError {
    SyncError::http_status(404, "not found")
}

fn bad_request() -> SyncError {
    SyncError::http_status(400, "bad request")
}

/// Decodes a percent-encoded path segment.
fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: Method::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn decodes_percent_encoded_segments() {
        assert_eq!(decode_segment("%E5%95%86%E5%93%81"), "商品");
        assert_eq!(decode_segment("products"), "products");
        assert_eq!(decode_segment("a%2"), "a%2");
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mock = MockHttpClient::new();
        mock.seed_destination_rows("products", vec![]);
        mock.fail_next(Some(Method::Get), 1, Some(503));

        let url = format!(
            "{}/api/v1/db/data/v1/p/products?page=1&pageSize=100",
            MockHttpClient::DESTINATION_URL
        );
        let err = mock.send(&get(&url)).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(mock.send(&get(&url)).is_ok());
        assert_eq!(mock.request_count(), 2);
    }

    #[test]
    fn unknown_routes_are_not_found() {
        let mock = MockHttpClient::new();
        let url = format!("{}/nowhere", MockHttpClient::DESTINATION_URL);
        assert_eq!(mock.send(&get(&url)).unwrap_err().status(), Some(404));
    }
}
