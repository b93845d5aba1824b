//! Querysmith: natural-language questions to safe search DSL.
//!
//! Turns an analyst's question about customer-experience data into a
//! validated Elasticsearch-compatible query, optionally executes it and
//! summarizes the results. An external reasoning service extracts intent;
//! everything after that is deterministic.

pub mod cache;
pub mod config;
pub mod error;
pub mod glossary;
pub mod metrics;
pub mod query;
pub mod reasoning;
pub mod schema;
pub mod search;
pub mod temporal;
pub mod utils;

pub use cache::{cache_key, IntentCache, QueryCache};
pub use config::Config;
pub use error::{ConfigError, ExecutionError, QueryError, ReasoningError, Result, ValidationError};
pub use glossary::GlossaryMapper;
pub use metrics::{get_metrics, Metrics, MetricsSnapshot};
pub use query::{
    CompileRequest, CompositeBranch, CompositeResult, DslCompiler, DslSecurityValidator,
    ExecutionResponse, ExecutionResult, GeneratedDsl, IntentKind, IntentNormalizer,
    NormalizedIntent, ParsedIntent, PipelineStage, QueryOrchestrator,
};
pub use reasoning::{call_with_deadline, ApiReasoningClient, PromptOptions, ReasoningService};
pub use schema::{FieldSchema, FieldType, IndexSchema, SchemaProvider, StaticSchemaRegistry};
pub use search::{ElasticsearchBackend, SearchBackend, SearchHit, SearchOptions, SearchResponse};
pub use temporal::{RelativeTimeResolver, TimeRange};
