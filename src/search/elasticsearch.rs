//! Elasticsearch/OpenSearch-compatible backend over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::ExecutionError;
use crate::utils::clamp_text;

use super::backend::{SearchBackend, SearchHit, SearchOptions, SearchResponse};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Posts envelopes to `{base_url}/{physical_index}/_search`.
pub struct ElasticsearchBackend {
    client: Client,
    config: SearchConfig,
    timeout: Duration,
}

impl ElasticsearchBackend {
    pub fn from_config(config: &SearchConfig) -> Result<Self, ExecutionError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let mut config = config.clone();
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    fn url(&self, index: &str) -> String {
        format!("{}/{}/_search", self.config.base_url, self.config.physical_index(index))
    }

    async fn post(&self, index: &str, body: &Value) -> Result<SearchResponse, ExecutionError> {
        let url = self.url(index);
        debug!(url = %url, "Executing search");

        let mut request = self.client.post(&url).json(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ExecutionError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejection(status.as_u16(), &body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::MalformedResponse(e.to_string()))?;
        parse_response(&payload)
    }
}

/// Map a non-2xx reply to `Rejected`, whatever the body looks like.
fn rejection(status: u16, body: &str) -> ExecutionError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload["error"]["reason"]
                .as_str()
                .or_else(|| payload["error"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| match clamp_text(body, MAX_ERROR_BODY_CHARS) {
            text if text.is_empty() => "unknown error".to_string(),
            text => text,
        });
    ExecutionError::Rejected { status, message }
}

/// Request body for the plain search path.
pub(crate) fn search_body(query: &Value, options: &SearchOptions) -> Value {
    let mut body = Map::new();
    body.insert("query".to_string(), query.clone());
    if let Some(size) = options.size {
        body.insert("size".to_string(), json!(size));
    }
    if let Some(from) = options.from {
        body.insert("from".to_string(), json!(from));
    }
    if let Some(sort) = &options.sort {
        body.insert("sort".to_string(), sort.clone());
    }
    if let Some(source) = &options.source {
        body.insert("_source".to_string(), source.clone());
    }
    body.insert("track_total_hits".to_string(), Value::Bool(true));
    Value::Object(body)
}

/// Request body for the aggregation path. Hits are not needed.
pub(crate) fn aggregate_body(query: &Value, aggs: &Value) -> Value {
    json!({
        "query": query,
        "aggs": aggs,
        "size": 0,
        "track_total_hits": true
    })
}

/// Map a raw `_search` response.
pub(crate) fn parse_response(payload: &Value) -> Result<SearchResponse, ExecutionError> {
    let hits = payload
        .get("hits")
        .ok_or_else(|| ExecutionError::MalformedResponse("missing 'hits'".to_string()))?;

    let total = match &hits["total"] {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Object(t) => t.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };

    let documents = hits["hits"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|hit| SearchHit {
                    id: hit["_id"].as_str().unwrap_or_default().to_string(),
                    score: hit["_score"].as_f64(),
                    source: hit.get("_source").cloned().unwrap_or(Value::Null),
                    highlight: hit.get("highlight").cloned(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(SearchResponse {
        total,
        hits: documents,
        aggregations: payload.get("aggregations").cloned(),
    })
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn search(
        &self,
        index: &str,
        query: &Value,
        options: &SearchOptions,
    ) -> Result<SearchResponse, ExecutionError> {
        self.post(index, &search_body(query, options)).await
    }

    async fn aggregate(
        &self,
        index: &str,
        query: &Value,
        aggs: &Value,
    ) -> Result<SearchResponse, ExecutionError> {
        self.post(index, &aggregate_body(query, aggs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_url_uses_physical_index() {
        let config = SearchConfig {
            base_url: "http://es:9200/".to_string(),
            index_names: HashMap::from([(
                "communications".to_string(),
                "cx-communications-v2".to_string(),
            )]),
            ..Default::default()
        };
        let backend = ElasticsearchBackend::from_config(&config).unwrap();
        assert_eq!(backend.url("communications"), "http://es:9200/cx-communications-v2/_search");
        assert_eq!(backend.url("social"), "http://es:9200/social/_search");
    }

    #[test]
    fn test_search_body() {
        let options = SearchOptions {
            size: Some(10),
            from: None,
            sort: Some(json!([{"timestamp": {"order": "desc"}}])),
            source: None,
        };
        let body = search_body(&json!({"match_all": {}}), &options);
        assert_eq!(body["size"], 10);
        assert!(body.get("from").is_none());
        assert_eq!(body["sort"][0]["timestamp"]["order"], "desc");
    }

    #[test]
    fn test_aggregate_body_has_no_hits() {
        let body = aggregate_body(&json!({"match_all": {}}), &json!({"c": {"terms": {"field": "channel"}}}));
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["c"]["terms"]["field"], "channel");
    }

    #[test]
    fn test_rejection_keeps_status_for_any_body() {
        let html = "<html><body><h1>502 Bad Gateway</h1></body></html>";
        assert_eq!(
            rejection(502, html),
            ExecutionError::Rejected {
                status: 502,
                message: html.to_string(),
            }
        );

        let es = r#"{"error": {"type": "parsing_exception", "reason": "unknown query [mtch]"}, "status": 400}"#;
        assert_eq!(
            rejection(400, es),
            ExecutionError::Rejected {
                status: 400,
                message: "unknown query [mtch]".to_string(),
            }
        );

        assert_eq!(
            rejection(401, r#"{"error": "unauthorized"}"#),
            ExecutionError::Rejected {
                status: 401,
                message: "unauthorized".to_string(),
            }
        );

        match rejection(503, "   ") {
            ExecutionError::Rejected { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "unknown error");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match rejection(500, &"x".repeat(1000)) {
            ExecutionError::Rejected { message, .. } => {
                assert_eq!(message.chars().count(), MAX_ERROR_BODY_CHARS)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_response() {
        let payload = json!({
            "took": 3,
            "hits": {
                "total": {"value": 42, "relation": "eq"},
                "hits": [
                    {"_id": "a1", "_score": 1.5, "_source": {"subject": "Refund"}, "highlight": {"subject": ["<em>Refund</em>"]}},
                    {"_id": "a2", "_score": null, "_source": {"subject": "Late"}}
                ]
            },
            "aggregations": {"by_channel": {"buckets": []}}
        });
        let response = parse_response(&payload).unwrap();
        assert_eq!(response.total, 42);
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].score, Some(1.5));
        assert!(response.hits[0].highlight.is_some());
        assert_eq!(response.hits[1].score, None);
        assert!(response.aggregations.is_some());
    }

    #[test]
    fn test_parse_legacy_total_and_missing_hits() {
        let response = parse_response(&json!({"hits": {"total": 7, "hits": []}})).unwrap();
        assert_eq!(response.total, 7);
        assert!(parse_response(&json!({"error": "boom"})).is_err());
    }
}
