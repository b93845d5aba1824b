//! Test doubles for the reasoning service and search backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use querysmith::reasoning::PromptOptions;
use querysmith::{ExecutionError, ReasoningError, ReasoningService, SearchBackend};
use querysmith::{SearchOptions, SearchResponse};

/// Replies with scripted outputs in order, recording every prompt.
pub struct MockReasoning {
    replies: Mutex<VecDeque<Result<String, ReasoningError>>>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub rate_limit_keys: Mutex<Vec<Option<String>>>,
}

impl MockReasoning {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            rate_limit_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_fail(self, error: ReasoningError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for MockReasoning {
    async fn prompt(
        &self,
        text: &str,
        _system_prompt: Option<&str>,
        options: &PromptOptions,
    ) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(text.to_string());
        self.rate_limit_keys
            .lock()
            .unwrap()
            .push(options.rate_limit_key.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ReasoningError::Api("no scripted reply".to_string())))
    }
}

/// Returns a fixed response and counts calls per path.
pub struct MockSearch {
    response: Result<SearchResponse, ExecutionError>,
    /// Error returned by the nth backend call (1-based), counting both paths.
    fail_on: Option<(usize, ExecutionError)>,
    delay: Duration,
    calls: AtomicUsize,
    pub searches: AtomicUsize,
    pub aggregations: AtomicUsize,
    pub last_options: Mutex<Option<SearchOptions>>,
    pub last_aggs: Mutex<Option<Value>>,
}

impl MockSearch {
    pub fn new(response: SearchResponse) -> Self {
        Self::with_result(Ok(response))
    }

    pub fn failing(error: ExecutionError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(response: Result<SearchResponse, ExecutionError>) -> Self {
        Self {
            response,
            fail_on: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            aggregations: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            last_aggs: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_on_call(mut self, call: usize, error: ExecutionError) -> Self {
        self.fail_on = Some((call, error));
        self
    }

    async fn reply(&self) -> Result<SearchResponse, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail_on {
            Some((n, error)) if *n == call => Err(error.clone()),
            _ => self.response.clone(),
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    async fn search(
        &self,
        _index: &str,
        _query: &Value,
        options: &SearchOptions,
    ) -> Result<SearchResponse, ExecutionError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        self.reply().await
    }

    async fn aggregate(
        &self,
        _index: &str,
        _query: &Value,
        aggs: &Value,
    ) -> Result<SearchResponse, ExecutionError> {
        self.aggregations.fetch_add(1, Ordering::SeqCst);
        *self.last_aggs.lock().unwrap() = Some(aggs.clone());
        self.reply().await
    }
}
