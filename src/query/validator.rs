//! DSL security validation.
//!
//! Walks a compiled envelope and rejects constructs that must never reach
//! the search backend: unlisted top-level keys, scripts and mutation
//! keywords at any depth. Unknown query clause types are only logged.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::error::ValidationError;
use crate::schema::IndexSchema;

const DEFAULT_TOP_LEVEL_KEYS: &[&str] = &[
    "query",
    "aggs",
    "aggregations",
    "sort",
    "size",
    "from",
    "_source",
    "track_total_hits",
];

const SCRIPT_KEYS: &[&str] = &["script", "_script"];
const MUTATION_KEYS: &[&str] = &["update", "delete", "_update"];

const STRUCTURAL_KEYS: &[&str] = &["must", "should", "filter", "must_not", "minimum_should_match"];

const KNOWN_CLAUSES: &[&str] = &[
    "match_all",
    "match_none",
    "match",
    "match_phrase",
    "match_phrase_prefix",
    "match_bool_prefix",
    "multi_match",
    "query_string",
    "simple_query_string",
    "term",
    "terms",
    "terms_set",
    "range",
    "exists",
    "prefix",
    "wildcard",
    "regexp",
    "fuzzy",
    "ids",
    "bool",
    "constant_score",
    "dis_max",
    "function_score",
    "boosting",
    "nested",
    "has_child",
    "has_parent",
    "geo_distance",
    "geo_bounding_box",
    "more_like_this",
];

/// Clauses whose body is `{field: ...}`.
const FIELD_KEYED_CLAUSES: &[&str] = &[
    "term",
    "terms",
    "range",
    "match",
    "match_phrase",
    "match_phrase_prefix",
    "match_bool_prefix",
    "prefix",
    "wildcard",
    "regexp",
    "fuzzy",
];

/// Where a key sits relative to the query grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Keys are clause types.
    Clause,
    /// Body of a `bool` clause.
    BoolBody,
    /// Body of a compound clause wrapping other clauses.
    Wrapper,
    Other,
}

fn child_position(position: Position, key: &str) -> Position {
    match (position, key) {
        (Position::Clause, "bool") => Position::BoolBody,
        (
            Position::Clause,
            "constant_score" | "dis_max" | "function_score" | "boosting" | "nested" | "has_child"
            | "has_parent",
        ) => Position::Wrapper,
        (Position::BoolBody, "must" | "should" | "filter" | "must_not") => Position::Clause,
        (Position::Wrapper, "filter" | "query" | "queries" | "positive" | "negative") => {
            Position::Clause
        }
        _ => Position::Other,
    }
}

fn is_permissive_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with("boost")
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

// ============================================================================
// Validation report
// ============================================================================

/// Findings of a validation walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Paths of rejected constructs
    pub violations: Vec<String>,
    /// Paths of unrecognized query clause keys (tolerated)
    pub unknown_clauses: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

// ============================================================================
// DSL Security Validator
// ============================================================================

/// Allow-list validator for compiled DSL envelopes.
#[derive(Debug, Clone)]
pub struct DslSecurityValidator {
    allowed_top_level_keys: HashSet<String>,
}

impl Default for DslSecurityValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_LEVEL_KEYS.iter().map(|k| k.to_string()))
    }
}

impl DslSecurityValidator {
    pub fn new(allowed_top_level_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_top_level_keys: allowed_top_level_keys.into_iter().collect(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.allowed_top_level_keys.iter().cloned())
    }

    /// Validate an envelope, returning every violating path on failure.
    pub fn validate(&self, dsl: &Value) -> Result<(), ValidationError> {
        let report = self.inspect(dsl);
        for path in &report.unknown_clauses {
            warn!(path = %path, "Unknown query clause type");
        }
        if report.is_clean() {
            Ok(())
        } else {
            warn!(violations = ?report.violations, "DSL rejected");
            Err(ValidationError::UnsafeDsl {
                violations: report.violations,
            })
        }
    }

    /// Walk an envelope and collect findings without failing.
    pub fn inspect(&self, dsl: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        let Value::Object(map) = dsl else {
            report.violations.push("$ (envelope is not an object)".to_string());
            return report;
        };

        for (key, value) in map {
            if self.allowed_top_level_keys.contains(key) {
                check_key(key, key, Position::Other, &mut report);
            } else {
                report.violations.push(key.clone());
            }
            let position = if key == "query" {
                Position::Clause
            } else {
                Position::Other
            };
            walk(value, key, position, &mut report);
        }

        report
    }
}

/// Whether `key` is rejected wherever it appears in an envelope.
pub(crate) fn is_forbidden_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SCRIPT_KEYS.contains(&lowered.as_str()) || MUTATION_KEYS.contains(&lowered.as_str())
}

fn check_key(key: &str, path: &str, position: Position, report: &mut ValidationReport) {
    if is_forbidden_key(key) {
        report.violations.push(path.to_string());
        return;
    }
    let known = match position {
        Position::Clause => {
            KNOWN_CLAUSES.contains(&key) || STRUCTURAL_KEYS.contains(&key) || is_permissive_key(key)
        }
        Position::BoolBody => STRUCTURAL_KEYS.contains(&key) || is_permissive_key(key),
        Position::Wrapper | Position::Other => true,
    };
    if !known {
        report.unknown_clauses.push(path.to_string());
    }
}

fn walk(value: &Value, path: &str, position: Position, report: &mut ValidationReport) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = join(path, key);
                check_key(key, &child_path, position, report);
                walk(child, &child_path, child_position(position, key), report);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &format!("{}[{}]", path, i), position, report);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Schema field check
// ============================================================================

/// Every field name the envelope references in queries, aggregations and sort.
pub fn referenced_fields(dsl: &Value) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    if let Some(query) = dsl.get("query") {
        collect_query_fields(query, Position::Clause, &mut fields);
    }
    for key in ["aggs", "aggregations"] {
        if let Some(aggs) = dsl.get(key) {
            collect_agg_fields(aggs, &mut fields);
        }
    }
    if let Some(sort) = dsl.get("sort") {
        let entries = match sort {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for entry in entries {
            match entry {
                Value::String(field) => {
                    fields.insert(field.clone());
                }
                Value::Object(map) => fields.extend(map.keys().cloned()),
                _ => {}
            }
        }
    }
    fields.retain(|f| !f.starts_with('_'));
    fields
}

fn collect_query_fields(value: &Value, position: Position, fields: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_query_fields(item, position, fields);
            }
        }
        Value::Object(map) => {
            for (key, body) in map {
                if position == Position::Clause {
                    if FIELD_KEYED_CLAUSES.contains(&key.as_str()) {
                        if let Some(body) = body.as_object() {
                            fields.extend(
                                body.keys()
                                    .filter(|k| !is_permissive_key(k))
                                    .cloned(),
                            );
                        }
                    } else if key == "exists" {
                        if let Some(field) = body.get("field").and_then(Value::as_str) {
                            fields.insert(field.to_string());
                        }
                    } else if let Some(list) = body.get("fields").and_then(Value::as_array) {
                        for field in list.iter().filter_map(Value::as_str) {
                            let name = field.split('^').next().unwrap_or(field);
                            fields.insert(name.to_string());
                        }
                    }
                }
                collect_query_fields(body, child_position(position, key), fields);
            }
        }
        _ => {}
    }
}

fn collect_agg_fields(value: &Value, fields: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("field", Value::String(field)) => {
                        fields.insert(field.clone());
                    }
                    ("filter", clause) => collect_query_fields(clause, Position::Clause, fields),
                    _ => collect_agg_fields(child, fields),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_agg_fields(item, fields);
            }
        }
        _ => {}
    }
}

/// Referenced fields absent from `schema`, sorted.
pub fn unknown_fields(dsl: &Value, schema: &IndexSchema) -> Vec<String> {
    referenced_fields(dsl)
        .into_iter()
        .filter(|f| !schema.has_field(f))
        .collect()
}
