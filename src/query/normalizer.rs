//! Intent normalization.
//!
//! Turns raw reasoning-service text (usually prose-wrapped JSON) into a
//! [`NormalizedIntent`]. Nothing here panics or returns an error: malformed
//! input becomes [`NormalizedIntent::Degraded`].

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::glossary::GlossaryMapper;
use crate::temporal::{format_instant, normalize_timestamp, RelativeTimeResolver, TimeRange};

use super::types::*;

/// Upper bound on `{` positions tried before giving up.
const MAX_CANDIDATES: usize = 16;

// ============================================================================
// Balanced-brace extraction
// ============================================================================

/// Byte span `[open, close]` of the first balanced object at or after `start`.
fn object_span(text: &str, start: usize) -> Option<(usize, usize)> {
    let open = start + text.get(start..)?.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the first balanced `{...}` substring at or after byte `start`.
///
/// Tracks nesting depth and ignores braces inside JSON string literals.
/// Returns `None` when there is no `{` or the object never closes.
pub fn extract_json_object(text: &str, start: usize) -> Option<&str> {
    object_span(text, start).map(|(open, close)| &text[open..=close])
}

/// Find the first balanced candidate that parses as a JSON object.
fn parse_first_object(text: &str) -> std::result::Result<Map<String, Value>, String> {
    if text.trim().is_empty() {
        return Err("empty reasoning output".to_string());
    }
    if !text.contains('{') {
        return Err("no JSON object found".to_string());
    }

    let mut cursor = 0;
    let mut last_error = "unbalanced JSON object".to_string();
    for _ in 0..MAX_CANDIDATES {
        let Some((open, close)) = object_span(text, cursor) else {
            break;
        };
        match serde_json::from_str::<Value>(&text[open..=close]) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => last_error = "JSON candidate is not an object".to_string(),
            Err(e) => last_error = format!("invalid JSON: {}", e),
        }
        cursor = open + 1;
    }
    Err(last_error)
}

// ============================================================================
// Intent Normalizer
// ============================================================================

/// Validates and canonicalizes reasoning output into a typed intent.
#[derive(Debug, Clone)]
pub struct IntentNormalizer {
    glossary: GlossaryMapper,
    default_confidence: f32,
    degraded_confidence: f32,
}

impl Default for IntentNormalizer {
    fn default() -> Self {
        Self::new(0.7, 0.3)
    }
}

impl IntentNormalizer {
    pub fn new(default_confidence: f32, degraded_confidence: f32) -> Self {
        Self {
            glossary: GlossaryMapper::new(),
            default_confidence,
            degraded_confidence,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_confidence, config.degraded_confidence)
    }

    /// Normalize raw reasoning text.
    pub fn normalize(&self, raw: &str, resolver: &RelativeTimeResolver) -> NormalizedIntent {
        match parse_first_object(raw) {
            Ok(map) => NormalizedIntent::Parsed(self.normalize_object(&map, resolver)),
            Err(reason) => {
                debug!(reason = %reason, raw_len = raw.len(), "Reasoning output not parseable");
                NormalizedIntent::Degraded {
                    reason,
                    confidence: self.degraded_confidence,
                }
            }
        }
    }

    fn normalize_object(&self, map: &Map<String, Value>, resolver: &RelativeTimeResolver) -> ParsedIntent {
        let kind = lookup(map, &["intent", "intentKind", "intent_kind", "kind"])
            .and_then(Value::as_str)
            .map(IntentKind::parse_lenient)
            .unwrap_or_default();

        let mut intent = ParsedIntent::new(
            kind,
            clamp_confidence(lookup(map, &["confidence"]).and_then(as_f64), self.default_confidence),
        );

        if let Some(Value::Object(entities)) = lookup(map, &["entities"]) {
            intent.entities = self.normalize_entities(entities);
        }
        if let Some(Value::Array(filters)) = lookup(map, &["filters"]) {
            intent.filters = filters.iter().filter_map(normalize_filter).collect();
        }
        if let Some(Value::Array(aggs)) = lookup(map, &["aggregations", "aggs"]) {
            intent.aggregations = aggs.iter().filter_map(normalize_aggregation).collect();
        }
        intent.time_range = lookup(map, &["timeRange", "time_range", "time"])
            .and_then(|v| normalize_time_range(v, resolver));
        intent.sort = lookup(map, &["sort"]).and_then(normalize_sort);
        intent.size = lookup(map, &["size", "limit"]).and_then(as_usize);
        intent.from = lookup(map, &["from", "offset"]).and_then(as_usize);

        intent
    }

    fn normalize_entities(&self, raw: &Map<String, Value>) -> Entities {
        let mut entities = Entities::new();
        for (key, values) in raw {
            let Some(category) = EntityCategory::parse(key) else {
                debug!(key = %key, "Ignoring unknown entity category");
                continue;
            };
            for value in string_values(values) {
                entities.insert(category, self.glossary.normalize(category, &value));
            }
        }
        entities
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|v| v as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

/// Clamp into `[0, 1]`; missing or NaN input yields `default`.
pub fn clamp_confidence(raw: Option<f64>, default: f32) -> f32 {
    match raw {
        Some(v) if v.is_nan() => default.clamp(0.0, 1.0),
        Some(v) => v.clamp(0.0, 1.0) as f32,
        None => default.clamp(0.0, 1.0),
    }
}

/// Scalars and arrays of scalars as trimmed, non-empty strings.
fn string_values(value: &Value) -> Vec<String> {
    let scalar = |v: &Value| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    };
    let values: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar).collect(),
        other => scalar(other).into_iter().collect(),
    };
    values.into_iter().filter(|s| !s.is_empty()).collect()
}

fn normalize_filter(value: &Value) -> Option<IntentFilter> {
    let map = value.as_object()?;
    let field = map.get("field")?.as_str()?.trim();
    if field.is_empty() {
        return None;
    }
    let operator = lookup(map, &["operator", "op"])
        .and_then(Value::as_str)
        .map(FilterOperator::parse_lenient)
        .unwrap_or_default();
    let value = map.get("value").cloned().unwrap_or(Value::Null);
    Some(IntentFilter::new(field, operator, value))
}

fn normalize_aggregation(value: &Value) -> Option<IntentAggregation> {
    match value {
        Value::String(s) => Some(IntentAggregation::new(AggregationType::parse_lenient(s), None)),
        Value::Object(map) => {
            let agg_type = lookup(map, &["type", "agg_type", "aggType"])
                .and_then(Value::as_str)
                .map(AggregationType::parse_lenient)
                .unwrap_or_default();
            let field = map
                .get("field")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|f| !f.is_empty());
            let mut agg = IntentAggregation::new(agg_type, field);
            agg.name = map
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            if let Some(Value::Object(options)) = map.get("options") {
                agg.options = options.clone();
            }
            Some(agg)
        }
        _ => None,
    }
}

fn normalize_sort(value: &Value) -> Option<SortSpec> {
    let (field, order) = match value {
        Value::String(field) => (field.as_str(), SortOrder::default()),
        Value::Object(map) => (
            map.get("field")?.as_str()?,
            map.get("order")
                .and_then(Value::as_str)
                .map(SortOrder::parse_lenient)
                .unwrap_or_default(),
        ),
        _ => return None,
    };
    let field = field.trim();
    (!field.is_empty()).then(|| SortSpec {
        field: field.to_string(),
        order,
    })
}

/// A phrase goes through the resolver; explicit `from`/`to` strings are
/// normalized individually. A lone `from` runs until the reference instant.
fn normalize_time_range(value: &Value, resolver: &RelativeTimeResolver) -> Option<TimeRange> {
    match value {
        Value::String(phrase) => resolver.resolve(phrase),
        Value::Object(map) => {
            if let Some(phrase) = lookup(map, &["relative", "phrase"]).and_then(Value::as_str) {
                return resolver.resolve(phrase);
            }
            let offset = *resolver.now().offset();
            let from = map.get("from").and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
            let to = map.get("to").and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());
            match (from, to) {
                (Some(from), Some(to)) => Some(TimeRange::new(
                    normalize_timestamp(from, &offset),
                    normalize_timestamp(to, &offset),
                )),
                (Some(from), None) => Some(TimeRange::new(
                    normalize_timestamp(from, &offset),
                    format_instant(resolver.now()),
                )),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    fn resolver() -> RelativeTimeResolver {
        let now = DateTime::<FixedOffset>::parse_from_rfc3339("2026-10-14T15:30:00Z").unwrap();
        RelativeTimeResolver::at(now)
    }

    fn parsed(raw: &str) -> ParsedIntent {
        match IntentNormalizer::default().normalize(raw, &resolver()) {
            NormalizedIntent::Parsed(intent) => intent,
            other => panic!("expected parsed intent, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_nested_object() {
        let text = r#"Sure! {"a": {"b": 1}} and {"c": 2}"#;
        assert_eq!(extract_json_object(text, 0), Some(r#"{"a": {"b": 1}}"#));
        assert_eq!(extract_json_object(text, 7), Some(r#"{"b": 1}"#));
        assert_eq!(extract_json_object(text, 22), Some(r#"{"c": 2}"#));
    }

    #[test]
    fn test_extract_ignores_braces_in_strings() {
        let text = r#"{"note": "use } and { freely \" }", "x": 1} trailing"#;
        assert_eq!(
            extract_json_object(text, 0),
            Some(r#"{"note": "use } and { freely \" }", "x": 1}"#)
        );
    }

    #[test]
    fn test_extract_unbalanced() {
        assert_eq!(extract_json_object(r#"{"a": {"b": 1}"#, 0), None);
        assert_eq!(extract_json_object("no braces", 0), None);
        assert_eq!(extract_json_object("{}", 5), None);
    }

    #[test]
    fn test_normalize_prose_wrapped_json() {
        let raw = "Here is the intent:\n```json\n{\"intent\": \"search\", \"entities\": {\"sentiments\": [\"Angry\", \"negative\"], \"channels\": \"e-mails\"}, \"confidence\": 0.92}\n```";
        let intent = parsed(raw);
        assert_eq!(intent.kind, IntentKind::Search);
        assert_eq!(intent.entities.sentiments, vec!["negative"]);
        assert_eq!(intent.entities.channels, vec!["email"]);
        assert!((intent.confidence - 0.92).abs() < 1e-6);
        assert!(!intent.parse_failed);
    }

    #[test]
    fn test_skips_invalid_first_candidate() {
        let raw = r#"{not json} then {"intent": "trend", "confidence": 1}"#;
        let intent = parsed(raw);
        assert_eq!(intent.kind, IntentKind::Trend);
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn test_degrades_on_garbage() {
        let normalizer = IntentNormalizer::default();
        for raw in ["", "   ", "I could not understand", "{\"intent\": \"search\"", "[1, 2, 3]"] {
            let result = normalizer.normalize(raw, &resolver());
            assert!(result.is_degraded(), "input {:?}", raw);
            let intent = result.into_intent();
            assert!(intent.parse_failed);
            assert!(intent.parse_failure_reason.is_some());
            assert!((intent.confidence - 0.3).abs() < 1e-6);
            assert!(intent.entities.is_empty());
            assert!(intent.filters.is_empty());
            assert!(intent.aggregations.is_empty());
        }
    }

    #[test]
    fn test_confidence_clamping() {
        assert_eq!(parsed(r#"{"confidence": -4}"#).confidence, 0.0);
        assert_eq!(parsed(r#"{"confidence": 17.5}"#).confidence, 1.0);
        assert!((parsed(r#"{}"#).confidence - 0.7).abs() < 1e-6);
        assert!((parsed(r#"{"confidence": "NaN"}"#).confidence - 0.7).abs() < 1e-6);
        assert!((parsed(r#"{"confidence": "0.4"}"#).confidence - 0.4).abs() < 1e-6);
        assert_eq!(clamp_confidence(Some(f64::NAN), 0.7), 0.7);
        assert_eq!(clamp_confidence(Some(f64::INFINITY), 0.7), 1.0);
    }

    #[test]
    fn test_empty_object_keeps_collections() {
        let intent = parsed("{}");
        assert_eq!(intent.kind, IntentKind::Search);
        assert!(intent.entities.is_empty());
        assert!(intent.filters.is_empty());
        assert!(intent.aggregations.is_empty());
        assert!(intent.time_range.is_none());
    }

    #[test]
    fn test_entity_values_of_mixed_shapes() {
        let intent = parsed(
            r#"{"entities": {"channels": "Emails", "customers": ["  ", "Acme", 42], "regions": [null, {"x": 1}]}}"#,
        );
        assert_eq!(intent.entities.channels, vec!["email"]);
        assert_eq!(intent.entities.customers, vec!["acme", "42"]);
        assert!(intent.entities.regions.is_empty());
    }

    #[test]
    fn test_filters_and_aggregations() {
        let raw = r#"{
            "intent": "aggregate",
            "filters": [
                {"field": "response_time_minutes", "operator": ">=", "value": 30},
                {"field": "status", "operator": "between", "value": "open"},
                {"operator": "eq", "value": "orphan"},
                "junk"
            ],
            "aggregations": [
                {"type": "terms", "field": "channel", "name": "by_channel"},
                {"type": "median", "field": "nps"},
                "avg"
            ]
        }"#;
        let intent = parsed(raw);
        assert_eq!(intent.kind, IntentKind::Aggregate);
        assert_eq!(intent.filters.len(), 2);
        assert_eq!(intent.filters[0].operator, FilterOperator::Gte);
        assert_eq!(intent.filters[1].operator, FilterOperator::Eq);
        assert_eq!(intent.aggregations.len(), 3);
        assert_eq!(intent.aggregations[0].agg_type, AggregationType::Terms);
        assert_eq!(intent.aggregations[0].name.as_deref(), Some("by_channel"));
        assert_eq!(intent.aggregations[1].agg_type, AggregationType::Count);
        assert_eq!(intent.aggregations[2].agg_type, AggregationType::Avg);
    }

    #[test]
    fn test_relative_time_range() {
        let intent = parsed(r#"{"timeRange": "last week"}"#);
        let range = intent.time_range.unwrap();
        assert_eq!(range.from, "2026-10-04T00:00:00.000Z");
        assert_eq!(range.to, "2026-10-10T23:59:59.999Z");

        let intent = parsed(r#"{"time_range": {"relative": "all"}}"#);
        assert!(intent.time_range.is_none());
    }

    #[test]
    fn test_absolute_time_range() {
        let intent = parsed(r#"{"timeRange": {"from": "2026-01-01", "to": "2026-01-31T23:59:59Z"}}"#);
        let range = intent.time_range.unwrap();
        assert!(range.from.starts_with("2026-01-01"));
        assert_eq!(range.to, "2026-01-31T23:59:59Z");

        let intent = parsed(r#"{"timeRange": {"from": "sometime", "to": "later"}}"#);
        let range = intent.time_range.unwrap();
        assert_eq!(range.from, "sometime");
        assert_eq!(range.to, "later");
    }

    #[test]
    fn test_sort_and_paging() {
        let intent = parsed(r#"{"sort": {"field": "timestamp", "order": "asc"}, "size": "15", "from": 30}"#);
        assert_eq!(intent.sort.as_ref().map(|s| s.order), Some(SortOrder::Asc));
        assert_eq!(intent.size, Some(15));
        assert_eq!(intent.from, Some(30));
    }
}
