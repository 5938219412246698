//! Typed destination schema specification.
//!
//! The default catalog schema lives in [`catalog_schema`]; the bootstrapper
//! brings a destination project to the shape it describes.

use serde_json::{json, Value};

/// Name of the surrogate primary-key column on every table.
pub const PRIMARY_KEY: &str = "id";

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Single-line text.
    Text,
    /// Number.
    Number,
    /// Date and time.
    DateTime,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Multi-line text.
    LongText,
}

impl ColumnKind {
    /// The destination's UI data type name.
    pub fn uidt(self) -> &'static str {
        match self {
            ColumnKind::Text => "SingleLineText",
            ColumnKind::Number => "Number",
            ColumnKind::DateTime => "DateTime",
            ColumnKind::Email => "Email",
            ColumnKind::Phone => "PhoneNumber",
            ColumnKind::LongText => "LongText",
        }
    }
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name, also used as its title.
    pub name: &'static str,
    /// Semantic type.
    pub kind: ColumnKind,
    /// Whether a value is required.
    pub required: bool,
    /// Whether values must be unique.
    pub unique: bool,
}

impl ColumnSpec {
    /// Creates an optional, non-unique column.
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            unique: false,
        }
    }

    /// Single-line text column.
    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    /// Number column.
    pub const fn number(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Number)
    }

    /// Date-time column.
    pub const fn datetime(name: &'static str) -> Self {
        Self::new(name, ColumnKind::DateTime)
    }

    /// Long text column.
    pub const fn long_text(name: &'static str) -> Self {
        Self::new(name, ColumnKind::LongText)
    }

    /// Marks the column required.
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the column unique.
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Column descriptor as sent to the destination meta API.
    pub fn to_json(&self) -> Value {
        let mut column = json!({
            "column_name": self.name,
            "title": self.name,
            "uidt": self.kind.uidt(),
        });
        if self.required {
            column["rqd"] = json!(1);
        }
        if self.unique {
            column["unique"] = json!(1);
        }
        column
    }
}

/// A table and its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name, also used as its title.
    pub name: &'static str,
    /// Columns, excluding the primary key.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Creates a table spec.
    pub fn new(name: &'static str, columns: Vec<ColumnSpec>) -> Self {
        Self { name, columns }
    }
}

/// Relationship kind of a link column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Child row belongs to one parent row.
    BelongsTo,
}

impl LinkKind {
    /// Relationship code used by the destination meta API.
    pub fn code(self) -> &'static str {
        match self {
            LinkKind::BelongsTo => "bt",
        }
    }
}

/// A link column from a child table to a parent table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    /// Table that receives the link column.
    pub child: &'static str,
    /// Table the link points at.
    pub parent: &'static str,
    /// Title of the link column.
    pub title: &'static str,
    /// Relationship kind.
    pub kind: LinkKind,
}

impl LinkSpec {
    /// Creates a belongs-to link.
    pub const fn belongs_to(child: &'static str, parent: &'static str, title: &'static str) -> Self {
        Self {
            child,
            parent,
            title,
            kind: LinkKind::BelongsTo,
        }
    }

    /// Key used in reports: `child.title`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.child, self.title)
    }
}

/// A complete schema: tables, then links between them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaSpec {
    /// Tables, in creation order.
    pub tables: Vec<TableSpec>,
    /// Links, in creation order.
    pub links: Vec<LinkSpec>,
}

/// The vending catalog schema.
pub fn catalog_schema() -> SchemaSpec {
    use ColumnSpec as C;

    let tables = vec![
        TableSpec::new(
            "operators",
            vec![
                C::text("code").required().unique(),
                C::text("name").required(),
                C::text("status").required(),
                C::text("contact_name"),
                C::new("contact_email", ColumnKind::Email),
                C::new("contact_phone", ColumnKind::Phone),
                C::long_text("notes"),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
            ],
        ),
        TableSpec::new(
            "support_tickets",
            vec![
                C::text("operator_id"),
                C::text("user_id").required(),
                C::text("category").required(),
                C::text("subject"),
                C::long_text("description").required(),
                C::text("status").required(),
                C::text("priority"),
                C::long_text("attachments"),
                C::text("contact_channel"),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
                C::datetime("closed_at"),
            ],
        ),
        TableSpec::new(
            "products",
            vec![
                C::text("operator_id"),
                C::text("sku").required().unique(),
                C::text("name").required(),
                C::long_text("description"),
                C::text("category"),
                C::text("barcode"),
                C::text("unit"),
                C::number("price").required(),
                C::number("cost"),
                C::text("status").required(),
                C::text("image_url"),
                C::long_text("tags"),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
            ],
        ),
        TableSpec::new(
            "machines",
            vec![
                C::text("operator_id"),
                C::text("code").required().unique(),
                C::text("name"),
                C::text("type"),
                C::text("status").required(),
                C::text("area"),
                C::text("address"),
                C::number("latitude"),
                C::number("longitude"),
                C::datetime("last_sync_at"),
                C::long_text("notes"),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
            ],
        ),
        TableSpec::new(
            "preset_stock_templates",
            vec![
                C::text("operator_id"),
                C::text("name").required(),
                C::text("source_type").required(),
                C::text("source_id"),
                C::text("status"),
                C::text("created_by"),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
            ],
        ),
        TableSpec::new(
            "preset_stock_channels",
            vec![
                C::text("operator_id"),
                C::text("template_id").required(),
                C::text("channel_no").required(),
                C::text("product_id"),
                C::number("par_level").required(),
                C::number("stock_level").required(),
                C::datetime("created_at").required(),
                C::datetime("updated_at").required(),
            ],
        ),
    ];

    let links = vec![
        LinkSpec::belongs_to("support_tickets", "operators", "operator_link"),
        LinkSpec::belongs_to("products", "operators", "operator_link"),
        LinkSpec::belongs_to("machines", "operators", "operator_link"),
        LinkSpec::belongs_to("preset_stock_templates", "operators", "operator_link"),
        LinkSpec::belongs_to("preset_stock_channels", "operators", "operator_link"),
        LinkSpec::belongs_to("preset_stock_channels", "preset_stock_templates", "template_link"),
        LinkSpec::belongs_to("preset_stock_channels", "products", "product_link"),
    ];

    SchemaSpec { tables, links }
}
