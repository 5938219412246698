//! Source records, destination rows, and field value helpers.

use serde::Deserialize;
use serde_json::{Map, Value};

/// A flat field-name to value mapping.
pub type Fields = Map<String, Value>;

/// A record read from the source table. Immutable once read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceRecord {
    /// Source-assigned identifier.
    pub id: String,
    /// Field values; lists for multi-select, attachment and linked fields.
    #[serde(default)]
    pub fields: Fields,
    /// Creation timestamp.
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<String>,
}

impl SourceRecord {
    /// Creates a record from its parts.
    pub fn new(id: impl Into<String>, fields: Fields, created_time: Option<String>) -> Self {
        Self {
            id: id.into(),
            fields,
            created_time,
        }
    }

    /// Returns a field value if it carries data.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| is_present(value))
    }

    /// Returns a field rendered as text, for scalar fields.
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name).and_then(scalar_text)
    }

    /// Returns the first element of a multi-valued field, or the value
    /// itself for scalar fields.
    pub fn first(&self, name: &str) -> Option<&Value> {
        match self.field(name)? {
            Value::Array(items) => items.first().filter(|value| is_present(value)),
            value => Some(value),
        }
    }

    /// Returns the `url` of the first attachment in an attachment field.
    pub fn first_attachment_url(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::Array(items) => items
                .first()
                .and_then(|item| item.get("url"))
                .and_then(scalar_text),
            _ => None,
        }
    }

    /// Returns the identifiers of the records a link field points at.
    pub fn link_ids(&self, name: &str) -> Vec<&str> {
        match self.field(name) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(id)) => vec![id.as_str()],
            _ => Vec::new(),
        }
    }

    /// Last-modified timestamp, when the table exposes one.
    pub fn last_modified(&self) -> Option<String> {
        self.text("modified")
    }
}

/// A row as listed from the destination, in whatever shape it was stored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteRow {
    fields: Fields,
}

impl RemoteRow {
    /// Wraps a listed row.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Returns the integer surrogate id, if any.
    ///
    /// Only genuine non-negative integers count; text or fractional ids are
    /// ignored.
    pub fn id(&self) -> Option<u64> {
        ["id", "Id"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_u64))
    }

    /// Returns a field rendered as text.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .filter(|value| is_present(value))
            .and_then(scalar_text)
    }

    /// Returns a raw field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns all fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

/// A row constructed for insertion into the destination. Never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    id: u64,
    natural_key: String,
    fields: Fields,
}

impl DestinationRow {
    /// Builds a row, writing `id` and the natural key column into the
    /// fields and dropping every field without a value.
    pub fn new(id: u64, key_field: &str, natural_key: impl Into<String>, fields: Fields) -> Self {
        let natural_key = natural_key.into();
        let mut fields = strip_absent(fields);
        fields.insert("id".into(), Value::from(id));
        fields.insert(key_field.into(), Value::String(natural_key.clone()));
        Self {
            id,
            natural_key,
            fields,
        }
    }

    /// Surrogate identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Natural key.
    pub fn natural_key(&self) -> &str {
        &self.natural_key
    }

    /// Fields as written.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// The JSON payload sent to the destination.
    pub fn to_payload(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Returns true if a value carries data.
///
/// Null, empty strings, and empty lists or objects count as absent.
/// `false` and `0` are values.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Removes every field without a value.
pub fn strip_absent(fields: Fields) -> Fields {
    fields
        .into_iter()
        .filter(|(_, value)| is_present(value))
        .collect()
}

/// Renders a scalar as text: strings as-is, numbers and booleans in their
/// JSON form.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Compares two field values, treating numerically equal numbers as equal.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
