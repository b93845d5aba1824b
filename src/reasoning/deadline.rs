//! Deadline-bounded reasoning calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ReasoningError;
use crate::metrics::get_metrics;

use super::traits::{PromptOptions, ReasoningService};

/// An owned prompt, so the call can outlive the caller on timeout.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub text: String,
    pub system_prompt: Option<String>,
    pub options: PromptOptions,
}

impl PromptRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_options(mut self, options: PromptOptions) -> Self {
        self.options = options;
        self
    }
}

/// Run a reasoning call against a deadline; whichever settles first wins.
///
/// The call runs as a spawned task. On expiry the task is detached rather
/// than aborted, so the remote side may still complete: a timeout means
/// "unknown outcome". The call is never retried here.
pub async fn call_with_deadline(
    service: Arc<dyn ReasoningService>,
    request: PromptRequest,
    deadline: Duration,
) -> Result<String, ReasoningError> {
    let metrics = get_metrics();
    metrics.reasoning_calls_total.inc();
    let start = Instant::now();

    let handle = tokio::spawn(async move {
        service
            .prompt(
                &request.text,
                request.system_prompt.as_deref(),
                &request.options,
            )
            .await
    });

    let outcome = tokio::time::timeout(deadline, handle).await;
    metrics
        .reasoning_duration_seconds
        .observe(start.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(result)) => {
            debug!(elapsed_ms = start.elapsed().as_millis() as u64, ok = result.is_ok(), "Reasoning call settled");
            result
        }
        Ok(Err(join_error)) => Err(ReasoningError::Aborted(join_error.to_string())),
        Err(_) => {
            metrics.reasoning_timeouts_total.inc();
            let ms = deadline.as_millis() as u64;
            warn!(deadline_ms = ms, "Reasoning call exceeded deadline");
            Err(ReasoningError::Timeout(ms))
        }
    }
}
