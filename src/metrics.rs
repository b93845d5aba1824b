//! Prometheus-compatible metrics for the query pipeline.
//!
//! A single global [`Metrics`] instance is shared by the orchestrator, the
//! cache and the reasoning deadline wrapper.

use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Latency buckets in seconds, 5ms to 60s. Reasoning calls dominate.
fn default_latency_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0,
    ]
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(format!("querysmith_{}", name), help).expect("failed to create counter")
}

fn histogram(name: &str, help: &str) -> Histogram {
    Histogram::with_opts(
        HistogramOpts::new(format!("querysmith_{}", name), help).buckets(default_latency_buckets()),
    )
    .expect("failed to create histogram")
}

/// All pipeline metrics.
pub struct Metrics {
    /// Prometheus registry for all metrics.
    pub registry: Registry,

    // =========================================================================
    // Counters
    // =========================================================================
    pub compile_requests_total: IntCounter,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub reasoning_calls_total: IntCounter,
    pub reasoning_timeouts_total: IntCounter,
    /// Reasoning output that could not be parsed into an intent.
    pub parse_degradations_total: IntCounter,
    /// Requests rejected by index, security or schema validation.
    pub validation_failures_total: IntCounter,
    pub executions_total: IntCounter,
    pub execution_errors_total: IntCounter,
    /// Summaries replaced by the templated fallback.
    pub summary_fallbacks_total: IntCounter,

    // =========================================================================
    // Gauges
    // =========================================================================
    pub uptime_seconds: IntGauge,

    // =========================================================================
    // Histograms (durations in seconds)
    // =========================================================================
    pub compile_duration_seconds: Histogram,
    pub reasoning_duration_seconds: Histogram,
    pub execution_duration_seconds: Histogram,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let metrics = Self {
            compile_requests_total: counter(
                "compile_requests_total",
                "Total number of compile requests",
            ),
            cache_hits_total: counter("cache_hits_total", "Total number of intent cache hits"),
            cache_misses_total: counter(
                "cache_misses_total",
                "Total number of intent cache misses",
            ),
            reasoning_calls_total: counter(
                "reasoning_calls_total",
                "Total number of reasoning service calls",
            ),
            reasoning_timeouts_total: counter(
                "reasoning_timeouts_total",
                "Total number of reasoning calls that exceeded their deadline",
            ),
            parse_degradations_total: counter(
                "parse_degradations_total",
                "Total number of degraded intents from unparseable reasoning output",
            ),
            validation_failures_total: counter(
                "validation_failures_total",
                "Total number of requests rejected by validation",
            ),
            executions_total: counter("executions_total", "Total number of executed queries"),
            execution_errors_total: counter(
                "execution_errors_total",
                "Total number of search backend errors",
            ),
            summary_fallbacks_total: counter(
                "summary_fallbacks_total",
                "Total number of templated summaries used after a summarization failure",
            ),
            uptime_seconds: IntGauge::new("querysmith_uptime_seconds", "Process uptime in seconds")
                .expect("failed to create gauge"),
            compile_duration_seconds: histogram(
                "compile_duration_seconds",
                "End-to-end compile duration in seconds",
            ),
            reasoning_duration_seconds: histogram(
                "reasoning_duration_seconds",
                "Reasoning call duration in seconds",
            ),
            execution_duration_seconds: histogram(
                "execution_duration_seconds",
                "Search execution duration in seconds",
            ),
            registry,
            start_time: Instant::now(),
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.compile_requests_total.clone()),
            Box::new(metrics.cache_hits_total.clone()),
            Box::new(metrics.cache_misses_total.clone()),
            Box::new(metrics.reasoning_calls_total.clone()),
            Box::new(metrics.reasoning_timeouts_total.clone()),
            Box::new(metrics.parse_degradations_total.clone()),
            Box::new(metrics.validation_failures_total.clone()),
            Box::new(metrics.executions_total.clone()),
            Box::new(metrics.execution_errors_total.clone()),
            Box::new(metrics.summary_fallbacks_total.clone()),
            Box::new(metrics.uptime_seconds.clone()),
            Box::new(metrics.compile_duration_seconds.clone()),
            Box::new(metrics.reasoning_duration_seconds.clone()),
            Box::new(metrics.execution_duration_seconds.clone()),
        ];
        for collector in collectors {
            metrics
                .registry
                .register(collector)
                .expect("failed to register metric");
        }

        metrics
    }

    /// Update the uptime gauge.
    pub fn update_uptime(&self) {
        let uptime = self.start_time.elapsed();
        self.uptime_seconds.set(uptime.as_secs() as i64);
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        self.update_uptime();
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Export metrics as JSON.
    pub fn export_json(&self) -> MetricsSnapshot {
        self.update_uptime();
        MetricsSnapshot {
            counters: MetricsCounters {
                compile_requests_total: self.compile_requests_total.get(),
                cache_hits_total: self.cache_hits_total.get(),
                cache_misses_total: self.cache_misses_total.get(),
                reasoning_calls_total: self.reasoning_calls_total.get(),
                reasoning_timeouts_total: self.reasoning_timeouts_total.get(),
                parse_degradations_total: self.parse_degradations_total.get(),
                validation_failures_total: self.validation_failures_total.get(),
                executions_total: self.executions_total.get(),
                execution_errors_total: self.execution_errors_total.get(),
                summary_fallbacks_total: self.summary_fallbacks_total.get(),
            },
            uptime_seconds: self.uptime_seconds.get(),
            histograms: MetricsHistograms {
                compile_duration_seconds: HistogramSnapshot::from_prometheus(
                    &self.compile_duration_seconds,
                ),
                reasoning_duration_seconds: HistogramSnapshot::from_prometheus(
                    &self.reasoning_duration_seconds,
                ),
                execution_duration_seconds: HistogramSnapshot::from_prometheus(
                    &self.execution_duration_seconds,
                ),
            },
        }
    }

    /// Start a timer that observes `histogram` when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Snapshot of all metrics for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: MetricsCounters,
    pub uptime_seconds: i64,
    pub histograms: MetricsHistograms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsCounters {
    pub compile_requests_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub reasoning_calls_total: u64,
    pub reasoning_timeouts_total: u64,
    pub parse_degradations_total: u64,
    pub validation_failures_total: u64,
    pub executions_total: u64,
    pub execution_errors_total: u64,
    pub summary_fallbacks_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsHistograms {
    pub compile_duration_seconds: HistogramSnapshot,
    pub reasoning_duration_seconds: HistogramSnapshot,
    pub execution_duration_seconds: HistogramSnapshot,
}

/// Snapshot of a histogram for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
}

impl HistogramSnapshot {
    /// Create a snapshot from a prometheus histogram.
    pub fn from_prometheus(h: &Histogram) -> Self {
        let count = h.get_sample_count();
        let sum = h.get_sample_sum();
        Self {
            count,
            sum,
            mean: (count > 0).then(|| sum / count as f64),
        }
    }
}
