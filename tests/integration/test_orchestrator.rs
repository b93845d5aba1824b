//! End-to-end orchestrator tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use querysmith::query::NO_RESULTS_SUMMARY;
use querysmith::{
    get_metrics, CompileRequest, CompositeBranch, Config, ExecutionError, QueryOrchestrator,
    ReasoningError, RelativeTimeResolver, SearchHit, SearchResponse,
};

use crate::mocks::{MockReasoning, MockSearch};

fn orchestrator(reasoning: &Arc<MockReasoning>, search: &Arc<MockSearch>) -> QueryOrchestrator {
    QueryOrchestrator::new(Config::default(), reasoning.clone(), search.clone())
}

fn hits(total: u64) -> SearchResponse {
    SearchResponse {
        total,
        hits: vec![SearchHit {
            id: "c-1".to_string(),
            score: Some(2.0),
            source: json!({"subject": "Refund still missing", "sentiment": "negative"}),
            highlight: None,
        }],
        aggregations: None,
    }
}

const NEGATIVE_EMAILS: &str = r#"Here is the intent:
```json
{"intent": "search", "entities": {"sentiments": ["negative"], "channels": ["emails"]}, "timeRange": "last week", "confidence": 0.92}
```"#;

#[tokio::test]
async fn test_negative_emails_last_week() {
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new(
            "Show me negative sentiment emails from last week",
            "communications",
        ))
        .await
        .unwrap();

    let intent = &dsl.intent;
    assert_eq!(intent.kind.as_str(), "search");
    assert_eq!(intent.entities.sentiments, vec!["negative"]);
    assert_eq!(intent.entities.channels, vec!["email"]);
    assert!(!intent.parse_failed);

    let expected = RelativeTimeResolver::new(None).resolve("last week").unwrap();
    assert_eq!(intent.time_range.as_ref(), Some(&expected));

    let filters = dsl.dsl["query"]["bool"]["filter"].as_array().unwrap();
    assert!(filters
        .iter()
        .any(|f| f["range"]["timestamp"]["gte"] == json!(expected.from)));
    assert!(filters.iter().any(|f| f["term"]["sentiment"] == "negative"));
    assert_eq!(reasoning.call_count(), 1);
}

#[tokio::test]
async fn test_explicit_no_time_filter_is_kept() {
    let compare = r#"{"intent": "compare", "timeRange": "all"}"#;
    let refined = r#"{"intent": "compare", "timeRange": null}"#;
    let reasoning = Arc::new(MockReasoning::new(&[compare, refined]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("Compare this month to last month", "communications");
    let dsl = orch.compile(&request).await.unwrap();
    assert_eq!(dsl.intent.time_range, None);
    assert!(dsl.dsl["query"].get("match_all").is_some());

    let refined = orch
        .refine(&request, "compare by channel too", &dsl)
        .await
        .unwrap();
    assert_eq!(refined.intent.time_range, None);
}

#[tokio::test]
async fn test_missing_time_key_is_not_guessed_from_text() {
    let reply = r#"{"intent": "search", "entities": {"sentiments": ["negative"]}}"#;
    let reasoning = Arc::new(MockReasoning::new(&[reply]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("negative feedback from last week", "communications"))
        .await
        .unwrap();
    assert_eq!(dsl.intent.time_range, None);
}

#[tokio::test]
async fn test_garbled_output_degrades() {
    let reasoning = Arc::new(MockReasoning::new(&["I'm sorry, I can't help with {that"]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("what is going on", "communications"))
        .await
        .unwrap();

    assert!(dsl.intent.parse_failed);
    assert!((dsl.intent.confidence - 0.3).abs() < 1e-6);
    assert!(dsl.intent.entities.is_empty());
    assert!(dsl.intent.parse_failure_reason.is_some());
    assert!(dsl.explanation.contains("could not be fully interpreted"));
}

#[tokio::test]
async fn test_non_executable_index_rejected_before_reasoning() {
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("negative tweets", "social").executing();
    let err = orch.compile(&request).await.unwrap_err();
    assert_eq!(err.code(), "INDEX_NOT_EXECUTABLE");

    let err = orch
        .compile_and_execute(&CompileRequest::new("negative tweets", "social"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INDEX_NOT_EXECUTABLE");

    assert_eq!(reasoning.call_count(), 0);
    assert_eq!(search.search_count() + search.aggregate_count(), 0);
}

#[tokio::test]
async fn test_compile_only_allowed_on_non_executable_index() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("negative tweets", "social"))
        .await
        .unwrap();
    assert_eq!(dsl.index, "social");
    assert_eq!(dsl.dsl["sort"][0]["posted_at"]["order"], "desc");
}

#[tokio::test]
async fn test_reasoning_deadline_is_enforced() {
    let reasoning = Arc::new(
        MockReasoning::new(&[NEGATIVE_EMAILS]).with_delay(Duration::from_secs(5)),
    );
    let search = Arc::new(MockSearch::new(hits(1)));
    let mut config = Config::default();
    config.reasoning.timeout_ms = 50;
    let orch = QueryOrchestrator::new(config, reasoning.clone(), search.clone());

    let start = Instant::now();
    let err = orch
        .compile(&CompileRequest::new("negative emails", "communications"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REASONING_TIMEOUT");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_reasoning_failure_is_fatal() {
    let reasoning = Arc::new(MockReasoning::new(&[]).then_fail(ReasoningError::RateLimited));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let err = orch
        .compile(&CompileRequest::new("negative emails", "communications"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REASONING_FAILED");
}

#[tokio::test]
async fn test_zero_results_skip_summarizer() {
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS]));
    let search = Arc::new(MockSearch::new(SearchResponse::default()));
    let orch = orchestrator(&reasoning, &search);

    let response = orch
        .compile_and_execute(&CompileRequest::new(
            "Show me negative sentiment emails from last week",
            "communications",
        ))
        .await
        .unwrap();

    assert_eq!(response.summary, NO_RESULTS_SUMMARY);
    assert_eq!(response.results.total, 0);
    assert_eq!(reasoning.call_count(), 1);
    assert_eq!(search.search_count(), 1);
}

#[tokio::test]
async fn test_search_path_forwards_paging_and_summarizes() {
    let reply = r#"{"intent": "search", "entities": {"channels": ["chat"]}, "size": 5, "sort": {"field": "priority", "order": "asc"}}"#;
    let reasoning = Arc::new(MockReasoning::new(&[reply, "One unhappy chat about a refund."]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("five chats by priority", "communications")
        .with_rate_limit_key("analyst-42");
    let response = orch.compile_and_execute(&request).await.unwrap();

    assert_eq!(search.search_count(), 1);
    assert_eq!(search.aggregate_count(), 0);
    let options = search.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.size, Some(5));
    assert_eq!(options.sort.unwrap()[0]["priority"]["order"], "asc");

    assert_eq!(response.summary, "One unhappy chat about a refund.");
    assert_eq!(response.results.documents.len(), 1);
    assert_eq!(reasoning.call_count(), 2);
    assert!(reasoning.last_prompt().contains("Refund still missing"));

    let keys = reasoning.rate_limit_keys.lock().unwrap().clone();
    assert!(keys.iter().all(|k| k.as_deref() == Some("analyst-42")));
}

#[tokio::test]
async fn test_aggregation_path_is_used_for_aggregations() {
    let reply = r#"{"intent": "aggregate", "aggregations": [{"type": "terms", "field": "channel"}]}"#;
    let reasoning = Arc::new(MockReasoning::new(&[reply, "Email dominates."]));
    let search = Arc::new(MockSearch::new(SearchResponse {
        total: 9,
        hits: vec![],
        aggregations: Some(json!({"terms_channel": {"buckets": [{"key": "email", "doc_count": 9}]}})),
    }));
    let orch = orchestrator(&reasoning, &search);

    let response = orch
        .compile_and_execute(&CompileRequest::new("volume by channel", "communications"))
        .await
        .unwrap();

    assert_eq!(search.aggregate_count(), 1);
    assert_eq!(search.search_count(), 0);
    let aggs = search.last_aggs.lock().unwrap().clone().unwrap();
    assert_eq!(aggs["terms_channel"]["terms"]["field"], "channel");
    assert!(response.results.aggregations.is_some());
    assert!(reasoning.last_prompt().contains("email"));
}

#[tokio::test]
async fn test_summary_timeout_falls_back_to_template() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]).then_fail(
        ReasoningError::Timeout(10),
    ));
    let search = Arc::new(MockSearch::new(hits(12)));
    let orch = orchestrator(&reasoning, &search);

    let response = orch
        .compile_and_execute(&CompileRequest::new("all emails", "communications"))
        .await
        .unwrap();
    assert_eq!(response.summary, "Found 12 communications matching the query.");
}

#[tokio::test]
async fn test_execution_errors_propagate() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(MockSearch::failing(ExecutionError::Rejected {
        status: 400,
        message: "parsing_exception".to_string(),
    }));
    let orch = orchestrator(&reasoning, &search);

    let err = orch
        .compile_and_execute(&CompileRequest::new("all emails", "communications"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXECUTION_FAILED");
    assert!(err.to_string().contains("parsing_exception"));
    // No summary attempt after a failed search.
    assert_eq!(reasoning.call_count(), 1);
}

#[tokio::test]
async fn test_cache_hit_returns_identical_intent() {
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("Show me negative sentiment emails from last week", "communications")
        .with_history(vec!["emails from yesterday".to_string()]);
    let first = orch.compile(&request).await.unwrap();
    let second = orch.compile(&request).await.unwrap();

    assert_eq!(first.intent, second.intent);
    assert_eq!(first.dsl, second.dsl);
    assert_eq!(reasoning.call_count(), 1);
    assert!(reasoning.last_prompt().contains("emails from yesterday"));

    // A one-character change misses the cache.
    let changed = CompileRequest::new("Show me negative sentiment emails from last weak", "communications");
    let _ = orch.compile(&changed).await;
    assert_eq!(reasoning.call_count(), 2);
}

#[tokio::test]
async fn test_refine_recompiles_and_revalidates() {
    let refined_reply = r#"{"intent": "search", "entities": {"sentiments": ["negative"], "channels": ["chat"]}}"#;
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS, refined_reply]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("Show me negative sentiment emails", "communications");
    let prior = orch.compile(&request).await.unwrap();
    let refined = orch
        .refine(&request, "I meant chats, not emails", &prior)
        .await
        .unwrap();

    assert_eq!(refined.intent.entities.channels, vec!["chat"]);
    assert_ne!(refined.dsl, prior.dsl);
    let prompt = reasoning.last_prompt();
    assert!(prompt.contains("I meant chats, not emails"));
    assert!(prompt.contains("Previous interpretation"));
}

#[tokio::test]
async fn test_refine_does_not_skip_security_validation() {
    // Without track_total_hits on the allow-list every compiled envelope is
    // rejected, refined ones included.
    let mut config = Config::default();
    config
        .pipeline
        .allowed_top_level_keys
        .retain(|k| k != "track_total_hits");

    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = QueryOrchestrator::new(config, reasoning.clone(), search.clone());

    let request = CompileRequest::new("all emails", "communications");
    let prior = querysmith::GeneratedDsl {
        index: "communications".to_string(),
        dsl: json!({"query": {"match_all": {}}}),
        explanation: String::new(),
        intent: querysmith::ParsedIntent::new(querysmith::IntentKind::Search, 0.9),
    };
    let err = orch.refine(&request, "only open cases", &prior).await.unwrap_err();
    assert_eq!(err.code(), "DSL_VALIDATION_FAILED");
    assert!(err.to_string().contains("track_total_hits"));
}

#[tokio::test]
async fn test_refine_rejects_empty_feedback() {
    let reasoning = Arc::new(MockReasoning::new(&[NEGATIVE_EMAILS]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let request = CompileRequest::new("negative emails", "communications");
    let prior = orch.compile(&request).await.unwrap();
    let err = orch.refine(&request, "  ", &prior).await.unwrap_err();
    assert_eq!(err.code(), "EMPTY_QUERY");
    assert_eq!(reasoning.call_count(), 1);
}

#[tokio::test]
async fn test_composite_runs_branches_concurrently() {
    let reply = r#"{"intent": "aggregate", "aggregations": [{"type": "terms", "field": "sentiment"}]}"#;
    let reasoning = Arc::new(MockReasoning::new(&[reply]));
    let search = Arc::new(
        MockSearch::new(SearchResponse {
            total: 4,
            hits: vec![],
            aggregations: Some(json!({"terms_sentiment": {"buckets": []}})),
        })
        .with_delay(Duration::from_millis(200)),
    );
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("sentiment breakdown", "communications"))
        .await
        .unwrap();
    let branches: Vec<CompositeBranch> = ["emails", "calls", "chats"]
        .iter()
        .map(|label| CompositeBranch {
            label: label.to_string(),
            dsl: dsl.clone(),
        })
        .collect();

    let start = Instant::now();
    let results = orch.execute_composite(&branches).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(550));

    let labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["emails", "calls", "chats"]);
    assert!(results.iter().all(|r| r.total == 4));
    assert_eq!(search.aggregate_count(), 3);
}

#[tokio::test]
async fn test_composite_fails_as_a_whole() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("all posts", "social"))
        .await
        .unwrap();
    let mut communications = dsl.clone();
    communications.index = "communications".to_string();

    let branches = vec![
        CompositeBranch {
            label: "communications".to_string(),
            dsl: communications,
        },
        CompositeBranch {
            label: "social".to_string(),
            dsl,
        },
    ];
    let err = orch.execute_composite(&branches).await.unwrap_err();
    assert_eq!(err.code(), "INDEX_NOT_EXECUTABLE");
    assert_eq!(search.search_count(), 0);
}

#[tokio::test]
async fn test_composite_branch_failure_fails_the_batch() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(
        MockSearch::new(hits(2))
            .with_delay(Duration::from_millis(20))
            .fail_on_call(
                2,
                ExecutionError::Rejected {
                    status: 503,
                    message: "shard unavailable".to_string(),
                },
            ),
    );
    let orch = orchestrator(&reasoning, &search);

    let dsl = orch
        .compile(&CompileRequest::new("open tickets", "communications"))
        .await
        .unwrap();
    let branches: Vec<CompositeBranch> = ["emails", "calls", "chats"]
        .iter()
        .map(|label| CompositeBranch {
            label: label.to_string(),
            dsl: dsl.clone(),
        })
        .collect();

    let err = orch.execute_composite(&branches).await.unwrap_err();
    assert_eq!(err.code(), "EXECUTION_FAILED");
    assert!(err.to_string().contains("shard unavailable"));
    assert!(search.search_count() >= 2);
}

#[tokio::test]
async fn test_metrics_reflect_compiles_in_this_process() {
    let reasoning = Arc::new(MockReasoning::new(&[r#"{"intent": "search"}"#]));
    let search = Arc::new(MockSearch::new(hits(1)));
    let orch = orchestrator(&reasoning, &search);

    let before = get_metrics().export_json().counters;
    orch.compile(&CompileRequest::new("metrics check", "communications"))
        .await
        .unwrap();
    let after = get_metrics().export_json().counters;

    assert!(after.compile_requests_total > before.compile_requests_total);
    assert!(after.reasoning_calls_total > before.reasoning_calls_total);
    assert!(get_metrics()
        .export_prometheus()
        .contains("querysmith_compile_requests_total"));
}
