//! Paginated readers for the source and destination APIs.
//!
//! The source follows an opaque-cursor convention: each page may return an
//! `offset` token that is passed back on the next request, and its absence
//! marks the last page. The destination numbers pages from 1 and flags the
//! last one with `pageInfo.isLastPage`.

use crate::client::{HttpClient, RequestClient};
use crate::config::{DestinationConfig, SourceConfig};
use crate::error::{SyncError, SyncResult};
use crate::record::{RemoteRow, SourceRecord};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Records requested per page, on both sides.
pub const PAGE_SIZE: u32 = 100;

/// A table described by the source metadata endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceTable {
    /// Table identifier.
    #[serde(default)]
    pub id: String,
    /// Table name.
    pub name: String,
    /// Identifier of the primary field.
    #[serde(rename = "primaryFieldId", default)]
    pub primary_field_id: Option<String>,
    /// Fields of the table.
    #[serde(default)]
    pub fields: Vec<SourceField>,
}

impl SourceTable {
    /// Name of the primary field, if it can be resolved.
    pub fn primary_field_name(&self) -> Option<&str> {
        let primary = self.primary_field_id.as_deref()?;
        self.fields
            .iter()
            .find(|field| field.id == primary)
            .map(|field| field.name.as_str())
    }
}

/// A field described by the source metadata endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceField {
    /// Field identifier.
    pub id: String,
    /// Field name.
    pub name: String,
}

#[derive(Deserialize)]
struct MetaTables {
    #[serde(default)]
    tables: Vec<SourceTable>,
}

#[derive(Deserialize)]
struct SourcePage {
    #[serde(default)]
    records: Vec<SourceRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Deserialize)]
struct DestinationPage {
    #[serde(default)]
    list: Vec<serde_json::Map<String, Value>>,
    #[serde(rename = "pageInfo", default)]
    page_info: PageInfo,
}

#[derive(Deserialize, Default)]
struct PageInfo {
    #[serde(rename = "isLastPage", default)]
    is_last_page: Option<bool>,
}

/// Reads from the source API.
pub struct SourceReader<'a, C: HttpClient> {
    client: &'a RequestClient<C>,
    config: &'a SourceConfig,
}

impl<'a, C: HttpClient> SourceReader<'a, C> {
    /// Creates a reader over an authenticated source client.
    pub fn new(client: &'a RequestClient<C>, config: &'a SourceConfig) -> Self {
        Self { client, config }
    }

    /// Lists the tables of the base.
    pub fn meta_tables(&self) -> SyncResult<Vec<SourceTable>> {
        let url = endpoint(
            &self.config.api_url,
            &["meta", "bases", &self.config.base_id, "tables"],
        )?;
        let meta: MetaTables = decode("meta", self.client.get(url.as_str())?)?;
        Ok(meta.tables)
    }

    /// Reads every record of a table, following the offset cursor until the
    /// source stops returning one.
    pub fn read_all(&self, table: &str) -> SyncResult<Vec<SourceRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut url = endpoint(&self.config.api_url, &[&self.config.base_id, table])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &PAGE_SIZE.to_string());
                if let Some(cursor) = &offset {
                    query.append_pair("offset", cursor);
                }
            }

            let page: SourcePage = decode(table, self.client.get(url.as_str())?)?;
            pages += 1;
            debug!(table, page = pages, records = page.records.len(), "read source page");
            records.extend(page.records);

            match page.offset.filter(|cursor| !cursor.is_empty()) {
                Some(cursor) => offset = Some(cursor),
                None => break,
            }
        }

        Ok(records)
    }
}

/// Reads rows from the destination data API.
pub struct DestinationReader<'a, C: HttpClient> {
    client: &'a RequestClient<C>,
    config: &'a DestinationConfig,
}

impl<'a, C: HttpClient> DestinationReader<'a, C> {
    /// Creates a reader over an authenticated destination client.
    pub fn new(client: &'a RequestClient<C>, config: &'a DestinationConfig) -> Self {
        Self { client, config }
    }

    /// Reads every row of a table, page by page, until the destination
    /// reports the last page.
    ///
    /// A page without `pageInfo.isLastPage` but with fewer rows than
    /// requested is also treated as the last one.
    pub fn read_all_destination(&self, table: &str) -> SyncResult<Vec<RemoteRow>> {
        let mut rows = Vec::new();
        let mut page = 1u32;

        loop {
            let mut url = table_data_url(self.config, table)?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("pageSize", &PAGE_SIZE.to_string());

            let body: DestinationPage = decode(table, self.client.get(url.as_str())?)?;
            let fetched = body.list.len();
            debug!(table, page, rows = fetched, "read destination page");
            rows.extend(body.list.into_iter().map(RemoteRow::new));

            let last = body
                .page_info
                .is_last_page
                .unwrap_or(fetched < PAGE_SIZE as usize);
            if last {
                break;
            }
            page += 1;
        }

        Ok(rows)
    }
}

fn decode<T: serde::de::DeserializeOwned>(table: &str, body: Value) -> SyncResult<T> {
    serde_json::from_value(body).map_err(|e| SyncError::Decode(format!("{table}: {e}")))
}

/// `{base}/api/v1/db/data/v1/{project}/{table}`.
pub(crate) fn table_data_url(config: &DestinationConfig, table: &str) -> SyncResult<Url> {
    endpoint(
        &config.base_url,
        &["api", "v1", "db", "data", "v1", &config.project, table],
    )
}

/// Appends percent-encoded path segments to a base URL.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> SyncResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| SyncError::Configuration(format!("invalid base url {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Configuration(format!("base url cannot carry a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Auth;
    use crate::config::RetryConfig;
    use crate::mock::MockHttpClient;
    use serde_json::json;
    use std::sync::Arc;

    fn source_client(mock: &Arc<MockHttpClient>) -> RequestClient<Arc<MockHttpClient>> {
        RequestClient::new(Arc::clone(mock), Auth::Bearer("pat".into()))
            .with_retry(RetryConfig::no_delay(4), RetryConfig::no_delay(2))
    }

    #[test]
    fn endpoint_encodes_segments() {
        let url = endpoint("https://api.airtable.com/v0", &["app1", "販賣機"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/app1/%E8%B2%A9%E8%B3%A3%E6%A9%9F"
        );

        let url = endpoint("http://noco:8080/", &["api", "v1"]).unwrap();
        assert_eq!(url.as_str(), "http://noco:8080/api/v1");
    }

    #[test]
    fn invalid_base_url_is_configuration_error() {
        assert!(matches!(
            endpoint("not a url", &["x"]),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn primary_field_lookup() {
        let table: SourceTable = serde_json::from_value(json!({
            "id": "tbl1",
            "name": "型號",
            "primaryFieldId": "fld2",
            "fields": [{"id": "fld1", "name": "備註"}, {"id": "fld2", "name": "名稱"}],
        }))
        .unwrap();
        assert_eq!(table.primary_field_name(), Some("名稱"));

        let table: SourceTable = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(table.primary_field_name(), None);
    }

    #[test]
    fn source_read_follows_cursor_across_pages() {
        let mock = Arc::new(MockHttpClient::new());
        let records: Vec<_> = (0..250)
            .map(|i| json!({"id": format!("rec{i:03}"), "fields": {"n": i}}))
            .collect();
        mock.add_source_table("商品", "名稱", records);

        let rc = source_client(&mock);
        let config = SourceConfig::new("app1", "pat").with_api_url(MockHttpClient::SOURCE_URL);
        let read = SourceReader::new(&rc, &config).read_all("商品").unwrap();

        assert_eq!(read.len(), 250);
        assert_eq!(read[0].id, "rec000");
        assert_eq!(read[249].id, "rec249");
        assert_eq!(mock.request_count(), 3);
    }

    #[test]
    fn destination_read_stops_on_last_page() {
        let mock = Arc::new(MockHttpClient::new());
        let rows: Vec<_> = (1..=201).map(|i| json!({"id": i, "sku": format!("S{i}")})).collect();
        mock.seed_destination_rows("products", rows);

        let rc = RequestClient::new(Arc::clone(&mock), Auth::XcToken("tok".into()));
        let config = DestinationConfig::new(MockHttpClient::DESTINATION_URL, "tok", "zgovend");
        let read = DestinationReader::new(&rc, &config)
            .read_all_destination("products")
            .unwrap();

        assert_eq!(read.len(), 201);
        assert_eq!(read[200].id(), Some(201));
        assert_eq!(mock.request_count(), 3);
    }

    #[test]
    fn empty_destination_table_is_one_page() {
        let mock = Arc::new(MockHttpClient::new());
        mock.seed_destination_rows("machines", vec![]);
        let rc = RequestClient::new(Arc::clone(&mock), Auth::XcToken("tok".into()));
        let config = DestinationConfig::new(MockHttpClient::DESTINATION_URL, "tok", "zgovend");
        let read = DestinationReader::new(&rc, &config)
            .read_all_destination("machines")
            .unwrap();

        assert!(read.is_empty());
        assert_eq!(mock.request_count(), 1);
    }

    struct FixedBody(&'static str);

    impl HttpClient for FixedBody {
        fn send(&self, _request: &crate::client::HttpRequest) -> SyncResult<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[test]
    fn malformed_page_is_decode_error() {
        let rc = RequestClient::new(FixedBody(r#"{"records": 5}"#), Auth::Bearer("pat".into()));
        let config = SourceConfig::new("app1", "pat").with_api_url(MockHttpClient::SOURCE_URL);
        let err = SourceReader::new(&rc, &config).read_all("商品").unwrap_err();
        assert!(matches!(err, SyncError::Decode(msg) if msg.starts_with("商品")));
    }
}
