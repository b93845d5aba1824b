//! Search backend trait and response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

/// Options forwarded on the plain search path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub size: Option<usize>,
    pub from: Option<usize>,
    pub sort: Option<Value>,
    pub source: Option<Value>,
}

/// A single matching document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub source: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Value>,
}

/// Backend response, shared by the search and aggregate paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
}

/// Document store able to run validated query envelopes.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run a plain search with paging, sort and source filtering.
    async fn search(
        &self,
        index: &str,
        query: &Value,
        options: &SearchOptions,
    ) -> Result<SearchResponse, ExecutionError>;

    /// Run an aggregation-bearing query.
    async fn aggregate(
        &self,
        index: &str,
        query: &Value,
        aggs: &Value,
    ) -> Result<SearchResponse, ExecutionError>;
}
