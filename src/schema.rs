//! Index field schemas.
//!
//! The compiler only emits clauses for fields listed here, and prompts
//! describe the target index from the same data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::glossary::{CHANNELS, PRIORITIES, SENTIMENTS};

/// Search-engine field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Keyword,
    Text,
    Date,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    #[serde(other)]
    Other,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Float | Self::Double)
    }

    /// Whether the field can back a terms aggregation or exact-match filter.
    pub fn is_exact(self) -> bool {
        !matches!(self, Self::Text | Self::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Text => "text",
            Self::Date => "date",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Other => "other",
        }
    }
}

/// A single field of an index schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Enumerated values, when the field is a closed vocabulary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            values: None,
        }
    }

    pub fn with_values(mut self, values: &[&str]) -> Self {
        self.values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Whether `value` is acceptable for this field (always true for open
    /// vocabularies).
    pub fn accepts(&self, value: &str) -> bool {
        match &self.values {
            Some(values) => values.iter().any(|v| v.eq_ignore_ascii_case(value)),
            None => true,
        }
    }
}

/// Field schema of one index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub fields: Vec<FieldSchema>,
}

impl IndexSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// First field from `candidates` that exists in the schema.
    pub fn first_present<'a>(&'a self, candidates: &[&str]) -> Option<&'a FieldSchema> {
        candidates.iter().find_map(|c| self.field(c))
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::Text)
    }

    /// The primary timestamp field: a conventional name if present,
    /// otherwise the first date-typed field.
    pub fn time_field(&self) -> Option<&FieldSchema> {
        self.first_present(&["timestamp", "@timestamp", "created_at", "date", "sent_at"])
            .filter(|f| f.field_type == FieldType::Date)
            .or_else(|| self.fields.iter().find(|f| f.field_type == FieldType::Date))
    }

    /// One line per field, for reasoning prompts.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| match &f.values {
                Some(values) => format!(
                    "- {} ({}): one of [{}]",
                    f.name,
                    f.field_type.as_str(),
                    values.join(", ")
                ),
                None => format!("- {} ({})", f.name, f.field_type.as_str()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lookup of index schemas by logical index key.
pub trait SchemaProvider: Send + Sync {
    fn schema(&self, index: &str) -> Option<IndexSchema>;
}

/// In-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaRegistry {
    schemas: HashMap<String, IndexSchema>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the communications, social and surveys schemas.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_index("communications", communications_schema())
            .with_index("social", social_schema())
            .with_index("surveys", surveys_schema())
    }

    pub fn with_index(mut self, index: impl Into<String>, schema: IndexSchema) -> Self {
        self.schemas.insert(index.into(), schema);
        self
    }
}

impl SchemaProvider for StaticSchemaRegistry {
    fn schema(&self, index: &str) -> Option<IndexSchema> {
        self.schemas.get(index).cloned()
    }
}

/// Customer communications (emails, calls, chats...).
pub fn communications_schema() -> IndexSchema {
    IndexSchema::new(vec![
        FieldSchema::new("timestamp", FieldType::Date),
        FieldSchema::new("channel", FieldType::Keyword).with_values(CHANNELS),
        FieldSchema::new("sentiment", FieldType::Keyword).with_values(SENTIMENTS),
        FieldSchema::new("sentiment_score", FieldType::Float),
        FieldSchema::new("priority", FieldType::Keyword).with_values(PRIORITIES),
        FieldSchema::new("status", FieldType::Keyword)
            .with_values(&["open", "pending", "escalated", "resolved", "closed"]),
        FieldSchema::new("customer_id", FieldType::Keyword),
        FieldSchema::new("customer_name", FieldType::Keyword),
        FieldSchema::new("category", FieldType::Keyword),
        FieldSchema::new("topics", FieldType::Keyword),
        FieldSchema::new("region", FieldType::Keyword),
        FieldSchema::new("product", FieldType::Keyword),
        FieldSchema::new("subject", FieldType::Text),
        FieldSchema::new("body", FieldType::Text),
        FieldSchema::new("response_time_minutes", FieldType::Integer),
    ])
}

/// Social media mentions.
pub fn social_schema() -> IndexSchema {
    IndexSchema::new(vec![
        FieldSchema::new("posted_at", FieldType::Date),
        FieldSchema::new("platform", FieldType::Keyword),
        FieldSchema::new("sentiment", FieldType::Keyword).with_values(SENTIMENTS),
        FieldSchema::new("topics", FieldType::Keyword),
        FieldSchema::new("region", FieldType::Keyword),
        FieldSchema::new("product", FieldType::Keyword),
        FieldSchema::new("text", FieldType::Text),
        FieldSchema::new("engagement", FieldType::Long),
    ])
}

/// Customer satisfaction surveys.
pub fn surveys_schema() -> IndexSchema {
    IndexSchema::new(vec![
        FieldSchema::new("submitted_at", FieldType::Date),
        FieldSchema::new("customer_id", FieldType::Keyword),
        FieldSchema::new("channel", FieldType::Keyword).with_values(CHANNELS),
        FieldSchema::new("sentiment", FieldType::Keyword).with_values(SENTIMENTS),
        FieldSchema::new("nps", FieldType::Integer),
        FieldSchema::new("csat", FieldType::Float),
        FieldSchema::new("region", FieldType::Keyword),
        FieldSchema::new("product", FieldType::Keyword),
        FieldSchema::new("comment", FieldType::Text),
    ])
}
