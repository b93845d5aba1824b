//! Security and schema validation of DSL envelopes.

use serde_json::{json, Value};

use querysmith::query::{referenced_fields, unknown_fields};
use querysmith::schema::communications_schema;
use querysmith::{DslSecurityValidator, ValidationError};

fn violations(dsl: Value) -> Vec<String> {
    match DslSecurityValidator::default().validate(&dsl) {
        Ok(()) => Vec::new(),
        Err(ValidationError::UnsafeDsl { violations }) => violations,
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_match_all_passes() {
    assert!(violations(json!({"query": {"match_all": {}}})).is_empty());
}

#[test]
fn test_top_level_script_rejected() {
    let found = violations(json!({"script": {"source": "ctx._source.x = 1"}}));
    assert!(found.iter().any(|p| p.contains("script")));
}

#[test]
fn test_update_and_unknown_top_level_keys_rejected() {
    assert!(!violations(json!({"update": {"doc": {}}})).is_empty());
    assert_eq!(violations(json!({"unknownTopKey": {}})), vec!["unknownTopKey"]);
}

#[test]
fn test_deep_bool_nesting_passes() {
    let mut query = json!({"term": {"channel": "email"}});
    for depth in 0..12 {
        let occurrence = ["must", "filter", "should", "must_not"][depth % 4];
        query = json!({"bool": {occurrence: [query, {"match": {"body": "refund"}}]}});
    }
    assert!(violations(json!({"query": query, "size": 10})).is_empty());
}

#[test]
fn test_nested_script_reports_every_path() {
    let dsl = json!({
        "query": {"bool": {
            "filter": [
                {"term": {"channel": "email"}},
                {"script": {"script": {"source": "doc['x'].value > 1"}}}
            ],
            "must": [{"function_score": {"query": {"match_all": {}}, "script_score": {"script": "1"}}}]
        }},
        "aggs": {"x": {"terms": {"script": "doc['channel']"}}}
    });
    let found = violations(dsl);
    assert!(found.len() >= 3, "{found:?}");
    assert!(found.iter().any(|p| p.starts_with("query.bool.filter[1]")));
    assert!(found.iter().any(|p| p.starts_with("aggs.")));
}

#[test]
fn test_unknown_clause_types_are_tolerated() {
    let report = DslSecurityValidator::default()
        .inspect(&json!({"query": {"brand_new_clause": {"field": "x"}}}));
    assert!(report.is_clean());
    assert_eq!(report.unknown_clauses.len(), 1);
}

#[test]
fn test_schema_field_check() {
    let dsl = json!({
        "query": {"bool": {"filter": [
            {"term": {"channel": "email"}},
            {"range": {"ssn_last4": {"gte": 1}}}
        ]}},
        "sort": [{"timestamp": {"order": "desc"}}],
        "aggs": {"by_priority": {"terms": {"field": "priority"}}}
    });
    let fields = referenced_fields(&dsl);
    assert!(fields.contains("channel"));
    assert!(fields.contains("timestamp"));
    assert!(fields.contains("priority"));

    assert_eq!(unknown_fields(&dsl, &communications_schema()), vec!["ssn_last4"]);
}
