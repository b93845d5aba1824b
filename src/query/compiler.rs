//! DSL compilation.
//!
//! Compiles a [`ParsedIntent`] against an index schema into a search query
//! envelope. Only fields present in the schema are referenced; everything
//! else is dropped and mentioned in the explanation.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::schema::{FieldSchema, FieldType, IndexSchema};

use super::types::*;
use super::validator::is_forbidden_key;

/// Confidence below which the explanation carries a warning.
const LOW_CONFIDENCE: f32 = 0.5;

const DEFAULT_TERMS_SIZE: u64 = 10;

const CALENDAR_INTERVALS: &[&str] = &["minute", "hour", "day", "week", "month", "quarter", "year"];

/// DSL key for an aggregation. Model-supplied labels are reduced to
/// `[a-z0-9_]`; empty or forbidden labels fall back to a generated name.
fn aggregation_key(agg: &IntentAggregation, field: Option<&FieldSchema>) -> String {
    let generated = match agg.field.as_ref().and(field) {
        Some(f) => format!("{}_{}", agg.agg_type.as_str(), f.name),
        None => agg.agg_type.as_str().to_string(),
    };
    let Some(label) = agg.name.as_deref() else {
        return generated;
    };

    let cleaned: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() || is_forbidden_key(cleaned) {
        generated
    } else {
        cleaned.to_string()
    }
}

/// Candidate schema fields for each entity category, in preference order.
fn entity_fields(category: EntityCategory) -> &'static [&'static str] {
    match category {
        EntityCategory::Customers => &["customer_id", "customer_name", "customer"],
        EntityCategory::Channels => &["channel", "platform"],
        EntityCategory::Sentiments => &["sentiment"],
        EntityCategory::Topics => &["topics", "topic"],
        EntityCategory::Categories => &["category", "categories"],
        EntityCategory::Priorities => &["priority"],
        EntityCategory::Regions => &["region"],
        EntityCategory::Products => &["product", "products"],
        EntityCategory::Statuses => &["status"],
    }
}

// ============================================================================
// Compilation state
// ============================================================================

/// Clauses and explanation fragments accumulated during one compilation.
#[derive(Default)]
struct Clauses {
    filter: Vec<Value>,
    must: Vec<Value>,
    must_not: Vec<Value>,
    conditions: Vec<String>,
    notes: Vec<String>,
}

impl Clauses {
    fn into_query(self) -> (Value, Vec<String>, Vec<String>) {
        let query = if self.filter.is_empty() && self.must.is_empty() && self.must_not.is_empty() {
            json!({"match_all": {}})
        } else {
            let mut bool_query = Map::new();
            for (key, clauses) in [
                ("filter", self.filter),
                ("must", self.must),
                ("must_not", self.must_not),
            ] {
                if !clauses.is_empty() {
                    bool_query.insert(key.to_string(), Value::Array(clauses));
                }
            }
            json!({ "bool": bool_query })
        };
        (query, self.conditions, self.notes)
    }
}

// ============================================================================
// DSL Compiler
// ============================================================================

/// Compiles intents into search DSL envelopes.
#[derive(Debug, Clone)]
pub struct DslCompiler {
    default_size: usize,
    max_size: usize,
}

impl Default for DslCompiler {
    fn default() -> Self {
        Self::new(20, 100)
    }
}

impl DslCompiler {
    pub fn new(default_size: usize, max_size: usize) -> Self {
        Self {
            default_size,
            max_size,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_size, config.max_size)
    }

    /// Compile an intent for `index` using that index's schema.
    pub fn compile(&self, intent: &ParsedIntent, index: &str, schema: &IndexSchema) -> GeneratedDsl {
        let mut clauses = Clauses::default();

        self.add_entities(&intent.entities, schema, &mut clauses);
        for filter in &intent.filters {
            self.add_filter(filter, schema, &mut clauses);
        }
        self.add_time_range(intent, schema, &mut clauses);

        let (query, conditions, mut notes) = clauses.into_query();
        let mut envelope = Map::new();
        envelope.insert("query".to_string(), query);

        let aggs = self.build_aggregations(&intent.aggregations, schema, &mut notes);
        let has_aggs = !aggs.is_empty();
        let agg_descriptions: Vec<String> = aggs.iter().map(|(_, _, d)| d.clone()).collect();
        if has_aggs {
            let block: Map<String, Value> = aggs.into_iter().map(|(name, body, _)| (name, body)).collect();
            envelope.insert("aggs".to_string(), Value::Object(block));
        }

        let sort = self.build_sort(intent, schema, &mut notes);
        if let Some((field, order)) = &sort {
            envelope.insert("sort".to_string(), json!([{ field.as_str(): { "order": order.as_str() } }]));
        }

        let default_size = if has_aggs { 0 } else { self.default_size };
        let size = intent.size.unwrap_or(default_size).min(self.max_size);
        envelope.insert("size".to_string(), json!(size));
        if let Some(from) = intent.from.filter(|f| *f > 0) {
            envelope.insert("from".to_string(), json!(from));
        }
        envelope.insert("track_total_hits".to_string(), Value::Bool(true));

        let explanation = explain(
            intent,
            index,
            &conditions,
            &agg_descriptions,
            sort.as_ref(),
            size,
            &notes,
        );

        if !notes.is_empty() {
            info!(index = %index, dropped = notes.len(), "Compiled DSL with adjustments");
        }
        debug!(index = %index, aggregations = has_aggs, size, "Compiled DSL");

        GeneratedDsl {
            index: index.to_string(),
            dsl: Value::Object(envelope),
            explanation,
            intent: intent.clone(),
        }
    }

    fn add_entities(&self, entities: &Entities, schema: &IndexSchema, clauses: &mut Clauses) {
        for (category, values) in entities.iter() {
            let fields: Vec<&FieldSchema> = entity_fields(category)
                .iter()
                .filter_map(|name| schema.field(name))
                .collect();

            if fields.is_empty() {
                if category == EntityCategory::Topics {
                    self.add_topic_search(values, schema, clauses);
                } else {
                    clauses.notes.push(format!(
                        "{} filter ignored (no matching field in this index)",
                        category.singular()
                    ));
                }
                continue;
            }

            let primary = fields[0];
            let accepted = enumerated(primary, values, &mut clauses.notes);
            if accepted.is_empty() {
                continue;
            }

            let clause = if fields.len() == 1 {
                terms_clause(primary, &accepted)
            } else {
                let should: Vec<Value> = fields.iter().map(|f| terms_clause(f, &accepted)).collect();
                json!({"bool": {"should": should, "minimum_should_match": 1}})
            };
            clauses.filter.push(clause);
            clauses
                .conditions
                .push(format!("{} is {}", primary.name, accepted.join(" or ")));
        }
    }

    fn add_topic_search(&self, topics: &[String], schema: &IndexSchema, clauses: &mut Clauses) {
        let fields: Vec<&str> = schema.text_fields().map(|f| f.name.as_str()).collect();
        if fields.is_empty() {
            clauses
                .notes
                .push("topic filter ignored (no text fields in this index)".to_string());
            return;
        }
        clauses.must.push(json!({
            "multi_match": {
                "query": topics.join(" "),
                "fields": fields,
                "operator": "or"
            }
        }));
        clauses
            .conditions
            .push(format!("text mentions {}", topics.join(" or ")));
    }

    fn add_filter(&self, filter: &IntentFilter, schema: &IndexSchema, clauses: &mut Clauses) {
        let Some(field) = schema.field(&filter.field) else {
            clauses
                .notes
                .push(format!("unknown field '{}' ignored", filter.field));
            return;
        };
        let name = field.name.as_str();

        if filter.operator == FilterOperator::Exists {
            clauses.filter.push(json!({"exists": {"field": name}}));
            clauses.conditions.push(format!("{} exists", name));
            return;
        }
        if filter.value.is_null() {
            clauses
                .notes
                .push(format!("filter on '{}' ignored (no value)", name));
            return;
        }

        let condition = format!(
            "{} {} {}",
            name,
            filter.operator.describe(),
            display_value(&filter.value)
        );

        match filter.operator {
            FilterOperator::Eq | FilterOperator::In | FilterOperator::Ne => {
                let values = scalar_strings(&filter.value);
                let accepted = enumerated(field, &values, &mut clauses.notes);
                if accepted.is_empty() {
                    return;
                }
                let clause = if field.field_type == FieldType::Text {
                    json!({"match": { name: accepted.join(" ") }})
                } else if field.field_type.is_exact() && accepted.len() == 1 && !filter.value.is_array() {
                    let value = if field.field_type.is_numeric() {
                        typed_scalar(field, &filter.value)
                    } else {
                        Value::String(accepted[0].clone())
                    };
                    json!({"term": { name: value }})
                } else {
                    terms_clause(field, &accepted)
                };
                if filter.operator == FilterOperator::Ne {
                    clauses.must_not.push(clause);
                } else {
                    clauses.filter.push(clause);
                }
            }
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
                if !(field.field_type.is_numeric() || field.field_type == FieldType::Date) {
                    clauses
                        .notes
                        .push(format!("range filter on non-numeric field '{}' ignored", name));
                    return;
                }
                clauses.filter.push(json!({
                    "range": { name: { filter.operator.as_str(): typed_scalar(field, &filter.value) } }
                }));
            }
            FilterOperator::Contains => {
                clauses
                    .must
                    .push(json!({"match": { name: display_value(&filter.value) }}));
            }
            FilterOperator::Exists => {}
        }
        clauses.conditions.push(condition);
    }

    fn add_time_range(&self, intent: &ParsedIntent, schema: &IndexSchema, clauses: &mut Clauses) {
        let Some(range) = &intent.time_range else {
            return;
        };
        let Some(field) = schema.time_field() else {
            clauses
                .notes
                .push("time range ignored (index has no date field)".to_string());
            return;
        };
        clauses.filter.push(json!({
            "range": { field.name.as_str(): { "gte": range.from, "lte": range.to } }
        }));
        clauses
            .conditions
            .push(format!("{} between {} and {}", field.name, range.from, range.to));
    }

    /// `(name, body, description)` for every aggregation the schema supports.
    fn build_aggregations(
        &self,
        requested: &[IntentAggregation],
        schema: &IndexSchema,
        notes: &mut Vec<String>,
    ) -> Vec<(String, Value, String)> {
        let mut built: Vec<(String, Value, String)> = Vec::new();

        for agg in requested {
            let field = match agg.agg_type {
                AggregationType::DateHistogram => match &agg.field {
                    Some(name) => schema.field(name).filter(|f| f.field_type == FieldType::Date),
                    None => schema.time_field(),
                },
                _ => agg.field.as_deref().and_then(|name| schema.field(name)),
            };

            let body = match (agg.agg_type, field) {
                (AggregationType::Count, None) if agg.field.is_none() => {
                    Some(json!({"filter": {"match_all": {}}}))
                }
                (AggregationType::Count, Some(f)) => Some(json!({"value_count": {"field": f.name}})),
                (AggregationType::Terms, Some(f)) if f.field_type.is_exact() => {
                    let size = agg
                        .options
                        .get("size")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_TERMS_SIZE)
                        .min(self.max_size as u64);
                    Some(json!({"terms": {"field": f.name, "size": size}}))
                }
                (AggregationType::DateHistogram, Some(f)) => {
                    let interval = agg
                        .options
                        .get("interval")
                        .or_else(|| agg.options.get("calendar_interval"))
                        .and_then(Value::as_str)
                        .map(str::to_lowercase)
                        .filter(|i| CALENDAR_INTERVALS.contains(&i.as_str()))
                        .unwrap_or_else(|| "day".to_string());
                    Some(json!({"date_histogram": {"field": f.name, "calendar_interval": interval}}))
                }
                (AggregationType::Percentiles, Some(f)) if f.field_type.is_numeric() => {
                    match agg.options.get("percents").filter(|p| p.is_array()) {
                        Some(percents) => {
                            Some(json!({"percentiles": {"field": f.name, "percents": percents}}))
                        }
                        None => Some(json!({"percentiles": {"field": f.name}})),
                    }
                }
                (t, Some(f)) if t.is_metric() && f.field_type.is_numeric() => {
                    Some(json!({ t.as_str(): {"field": f.name} }))
                }
                _ => None,
            };

            let Some(body) = body else {
                notes.push(format!(
                    "{} aggregation on '{}' ignored (field missing or unsuitable)",
                    agg.agg_type.as_str(),
                    agg.field.as_deref().unwrap_or("-")
                ));
                continue;
            };

            let mut name = aggregation_key(agg, field);
            if built.iter().any(|(existing, _, _)| *existing == name) {
                name = format!("{}_{}", name, built.len() + 1);
            }
            let description = match field {
                Some(f) => format!("{} of {} ({})", agg.agg_type.as_str(), f.name, name),
                None => format!("{} ({})", agg.agg_type.as_str(), name),
            };
            built.push((name, body, description));
        }

        built
    }

    fn build_sort(
        &self,
        intent: &ParsedIntent,
        schema: &IndexSchema,
        notes: &mut Vec<String>,
    ) -> Option<(String, SortOrder)> {
        if let Some(sort) = &intent.sort {
            match schema.field(&sort.field) {
                Some(f) if f.field_type.is_exact() => return Some((f.name.clone(), sort.order)),
                _ => notes.push(format!("sort on '{}' ignored", sort.field)),
            }
        }
        schema
            .time_field()
            .map(|f| (f.name.clone(), SortOrder::Desc))
    }
}

// ============================================================================
// Clause helpers
// ============================================================================

/// Keep values the field's enumerated vocabulary accepts, in the schema's
/// spelling. Open vocabularies accept everything.
fn enumerated(field: &FieldSchema, values: &[String], notes: &mut Vec<String>) -> Vec<String> {
    let Some(allowed) = &field.values else {
        return values.to_vec();
    };
    let mut accepted = Vec::new();
    for value in values {
        match allowed.iter().find(|a| a.eq_ignore_ascii_case(value)) {
            Some(canonical) if !accepted.contains(canonical) => accepted.push(canonical.clone()),
            Some(_) => {}
            None => notes.push(format!("'{}' is not a known {} value", value, field.name)),
        }
    }
    accepted
}

fn terms_clause(field: &FieldSchema, values: &[String]) -> Value {
    if values.len() == 1 {
        json!({"term": { field.name.as_str(): values[0] }})
    } else {
        json!({"terms": { field.name.as_str(): values }})
    }
}

fn scalar_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(display_value).collect(),
        other => vec![display_value(other)],
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric fields get numbers where the value parses as one.
fn typed_scalar(field: &FieldSchema, value: &Value) -> Value {
    match value {
        Value::String(s) if field.field_type.is_numeric() => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

// ============================================================================
// Explanation
// ============================================================================

fn explain(
    intent: &ParsedIntent,
    index: &str,
    conditions: &[String],
    aggregations: &[String],
    sort: Option<&(String, SortOrder)>,
    size: usize,
    notes: &[String],
) -> String {
    let mut out = format!("{} {}", intent.kind.display_name(), index);
    if conditions.is_empty() {
        out.push_str(" (all documents)");
    } else {
        out.push_str(" where ");
        out.push_str(&conditions.join(" and "));
    }
    out.push('.');

    if !aggregations.is_empty() {
        out.push_str(&format!(" Aggregations: {}.", aggregations.join(", ")));
    }
    if size > 0 {
        match sort {
            Some((field, order)) => {
                out.push_str(&format!(" Returning up to {} results sorted by {} {}.", size, field, order.as_str()))
            }
            None => out.push_str(&format!(" Returning up to {} results.", size)),
        }
    }
    if !notes.is_empty() {
        out.push_str(&format!(" Note: {}.", notes.join("; ")));
    }
    if intent.parse_failed {
        out.push_str(" The request could not be fully interpreted, so this is a broad search.");
    } else if intent.confidence < LOW_CONFIDENCE {
        out.push_str(&format!(
            " Low confidence ({:.2}); consider rephrasing or refining.",
            intent.confidence
        ));
    }
    out
}
