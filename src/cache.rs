//! Short-lived cache of normalized intents.
//!
//! Keys are SHA-256 digests of a canonical serialization of the request, so
//! they cannot be guessed or enumerated from query text. Values carry their
//! own TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::metrics::get_metrics;
use crate::query::{CompileRequest, ParsedIntent};
use crate::utils::squash_whitespace;

/// Key-value store for normalized intents.
#[async_trait]
pub trait IntentCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<ParsedIntent>;

    async fn set(&self, key: &str, value: ParsedIntent, ttl: Duration);
}

/// Fields that identify a request for caching purposes.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    query: String,
    context: Option<String>,
    index: &'a str,
    timezone: Option<&'a str>,
    history: Vec<String>,
}

/// Fixed-length hex cache key over the query text, context, index, timezone
/// and the trailing `history_window` prior queries.
pub fn cache_key(request: &CompileRequest, history_window: usize) -> String {
    let material = KeyMaterial {
        query: squash_whitespace(&request.query),
        context: request
            .context
            .as_deref()
            .map(squash_whitespace)
            .filter(|c| !c.is_empty()),
        index: request.index.trim(),
        timezone: request.timezone.as_deref().map(str::trim).filter(|t| !t.is_empty()),
        history: request
            .recent_history(history_window)
            .iter()
            .map(|h| squash_whitespace(h))
            .collect(),
    };
    // Serializing a plain struct of strings cannot fail.
    let canonical = serde_json::to_vec(&material).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

#[derive(Clone)]
struct CachedIntent {
    intent: Arc<ParsedIntent>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedIntent> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedIntent,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// moka-backed intent cache.
#[derive(Clone)]
pub struct QueryCache {
    cache: Cache<String, CachedIntent>,
    enabled: bool,
}

impl QueryCache {
    /// Create a new query cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            enabled: config.enabled,
        }
    }
}

#[async_trait]
impl IntentCache for QueryCache {
    async fn get(&self, key: &str) -> Option<ParsedIntent> {
        if !self.enabled {
            return None;
        }

        let result = self.cache.get(key).await;
        let metrics = get_metrics();
        if result.is_some() {
            metrics.cache_hits_total.inc();
        } else {
            metrics.cache_misses_total.inc();
        }

        result.map(|entry| (*entry.intent).clone())
    }

    async fn set(&self, key: &str, value: ParsedIntent, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }
        let entry = CachedIntent {
            intent: Arc::new(value),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
    }
}
