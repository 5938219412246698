//! Entity mappings from source records to destination fields.

use crate::record::{Fields, SourceRecord};
use crate::resolver::{ReferenceMaps, ReferenceSpec, PRIMARY};
use serde_json::{json, Map, Value};

/// Values shared by every row of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingContext {
    /// Operator code tagged onto every row.
    pub operator_code: String,
    /// Operator row id, set when rows should link to the operator row.
    pub operator_link: Option<u64>,
    /// Timestamp used where the source has none.
    pub now: String,
}

impl MappingContext {
    /// Creates a context stamped with the current time.
    pub fn new(operator_code: impl Into<String>, operator_link: Option<u64>) -> Self {
        Self {
            operator_code: operator_code.into(),
            operator_link,
            now: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Overrides the fallback timestamp.
    pub fn with_now(mut self, now: impl Into<String>) -> Self {
        self.now = now.into();
        self
    }

    fn base_fields(&self) -> Fields {
        let mut fields = Map::new();
        fields.insert("operator_id".into(), json!(self.operator_code));
        if let Some(id) = self.operator_link {
            fields.insert("operator_link".into(), json!([id]));
        }
        fields
    }
}

/// How one entity type maps from a source table to a destination table.
pub trait EntityMapping {
    /// Entity name used in summaries.
    fn entity(&self) -> &'static str;

    /// Source table name.
    fn source_table(&self) -> &'static str;

    /// Destination table name.
    fn destination_table(&self) -> &'static str;

    /// Destination column holding the natural key.
    fn key_field(&self) -> &'static str;

    /// Source field holding the business identifier.
    fn business_key(&self) -> &'static str;

    /// Referenced tables whose values are inlined.
    fn references(&self) -> Vec<ReferenceSpec> {
        Vec::new()
    }

    /// Natural key of a record: its business identifier, or the source
    /// record id when that is missing.
    fn natural_key(&self, record: &SourceRecord) -> String {
        record
            .text(self.business_key())
            .unwrap_or_else(|| record.id.clone())
    }

    /// Maps a record to destination fields, excluding `id` and the natural
    /// key column. Absent values may be left as null; they are stripped
    /// when the row is built.
    fn map_fields(
        &self,
        record: &SourceRecord,
        natural_key: &str,
        refs: &ReferenceMaps,
        ctx: &MappingContext,
    ) -> Fields;
}

/// Products: source `商品` to destination `products`, keyed by SKU.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductMapping;

impl EntityMapping for ProductMapping {
    fn entity(&self) -> &'static str {
        "products"
    }

    fn source_table(&self) -> &'static str {
        "商品"
    }

    fn destination_table(&self) -> &'static str {
        "products"
    }

    fn key_field(&self) -> &'static str {
        "sku"
    }

    fn business_key(&self) -> &'static str {
        "商品編號"
    }

    fn map_fields(
        &self,
        record: &SourceRecord,
        natural_key: &str,
        _refs: &ReferenceMaps,
        ctx: &MappingContext,
    ) -> Fields {
        let created_at = record.created_time.clone().unwrap_or_else(|| ctx.now.clone());
        let updated_at = record.last_modified().unwrap_or_else(|| created_at.clone());

        let mut fields = ctx.base_fields();
        fields.insert(
            "name".into(),
            json!(record.text("商品名稱").unwrap_or_else(|| natural_key.to_string())),
        );
        fields.insert(
            "price".into(),
            record.field("售價").cloned().unwrap_or_else(|| json!(0)),
        );
        fields.insert(
            "status".into(),
            json!(record.text("Status").unwrap_or_else(|| "active".into())),
        );
        fields.insert("barcode".into(), json!(record.text("barcode")));
        fields.insert("image_url".into(), json!(record.first_attachment_url("商品圖檔")));
        fields.insert("created_at".into(), json!(created_at));
        fields.insert("updated_at".into(), json!(updated_at));
        fields
    }
}

/// Vending machines: source `販賣機` to destination `machines`, keyed by
/// machine code.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineMapping;

impl MachineMapping {
    const MODELS: &'static str = "型號";
    const STORES: &'static str = "門市";
}

impl EntityMapping for MachineMapping {
    fn entity(&self) -> &'static str {
        "machines"
    }

    fn source_table(&self) -> &'static str {
        "販賣機"
    }

    fn destination_table(&self) -> &'static str {
        "machines"
    }

    fn key_field(&self) -> &'static str {
        "code"
    }

    fn business_key(&self) -> &'static str {
        "機號"
    }

    fn references(&self) -> Vec<ReferenceSpec> {
        vec![
            ReferenceSpec::primary(Self::MODELS),
            ReferenceSpec::primary(Self::STORES)
                .with_field("address", "地址")
                .with_field("store_code", "店號"),
        ]
    }

    fn map_fields(
        &self,
        record: &SourceRecord,
        natural_key: &str,
        refs: &ReferenceMaps,
        ctx: &MappingContext,
    ) -> Fields {
        let model = refs
            .first_linked(Self::MODELS, record, "型號")
            .and_then(|m| m.get(PRIMARY))
            .cloned();
        let store = refs.first_linked(Self::STORES, record, "所在門市");
        let store_value = |key: &str| store.and_then(|s| s.get(key)).cloned();

        let last_beat = record.first("最後心跳").cloned();
        let status = if last_beat.is_some() { "active" } else { "inactive" };

        let notes = json!({
            "hid": record.fields.get("hid"),
            "heartbeats": record.fields.get("心跳"),
            "temperature": record.fields.get("溫度"),
            "today_revenue": record.fields.get("今日營收"),
            "transactions": record.fields.get("交易記錄"),
            "inventory": record.fields.get("庫存"),
            "screenshot": record.fields.get("畫面截圖"),
            "store_code": store_value("store_code"),
        });

        let created_at = record.created_time.clone().unwrap_or_else(|| ctx.now.clone());
        let updated_at = last_beat.clone().unwrap_or_else(|| json!(created_at));

        let mut fields = ctx.base_fields();
        fields.insert("name".into(), json!(natural_key));
        fields.insert("type".into(), model.unwrap_or(Value::Null));
        fields.insert("status".into(), json!(status));
        fields.insert("area".into(), store_value(PRIMARY).unwrap_or(Value::Null));
        fields.insert("address".into(), store_value("address").unwrap_or(Value::Null));
        fields.insert("last_sync_at".into(), last_beat.unwrap_or(Value::Null));
        fields.insert("notes".into(), json!(notes.to_string()));
        fields.insert("created_at".into(), json!(created_at));
        fields.insert("updated_at".into(), updated_at);
        fields
    }
}
