//! Query orchestration.
//!
//! Sequences the compile pipeline for one request:
//!
//! ```text
//! Validating -> (CacheHit | Reasoning -> Normalizing) -> Compiling
//!   -> SecurityValidating -> [SchemaValidating] -> [Executing] -> [Summarizing] -> Done
//! ```
//!
//! Any stage may end in `Error`. Index checks run before any reasoning call,
//! and every DSL (including refined ones) is security-validated before it is
//! returned or executed.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, IntentCache, QueryCache};
use crate::config::Config;
use crate::error::{QueryError, Result, ValidationError};
use crate::glossary::GlossaryMapper;
use crate::metrics::{get_metrics, Metrics};
use crate::reasoning::{
    call_with_deadline, ApiReasoningClient, PromptOptions, PromptRequest, ReasoningService,
};
use crate::schema::{IndexSchema, SchemaProvider, StaticSchemaRegistry};
use crate::search::{ElasticsearchBackend, SearchBackend, SearchOptions, SearchResponse};
use crate::temporal::{format_instant, RelativeTimeResolver};

use super::compiler::DslCompiler;
use super::normalizer::IntentNormalizer;
use super::prompt::{
    build_intent_prompt, build_refinement_prompt, build_summary_prompt, fallback_summary,
    INTENT_SYSTEM_PROMPT, NO_RESULTS_SUMMARY, SUMMARY_SYSTEM_PROMPT,
};
use super::types::*;
use super::validator::{unknown_fields, DslSecurityValidator};

const COMMUNICATIONS_EXAMPLES: &[&str] = &[
    "Show me negative sentiment emails from last week",
    "How many critical priority cases were escalated this month?",
    "Average response time by channel over the last 30 days",
    "Complaints about billing from enterprise customers yesterday",
    "Trend of negative sentiment per week this year",
];

const SOCIAL_EXAMPLES: &[&str] = &[
    "Negative tweets about the mobile app this week",
    "Which products were mentioned most on social media last month?",
    "Sentiment breakdown of social posts in EMEA over the past 7 days",
];

const SURVEY_EXAMPLES: &[&str] = &[
    "Average NPS by region this quarter",
    "Survey comments with low CSAT from last month",
    "Distribution of sentiment in survey responses this year",
];

/// Drives the natural-language-to-DSL pipeline.
pub struct QueryOrchestrator {
    config: Arc<Config>,
    reasoning: Arc<dyn ReasoningService>,
    search: Arc<dyn SearchBackend>,
    schemas: Arc<dyn SchemaProvider>,
    cache: Arc<dyn IntentCache>,
    normalizer: IntentNormalizer,
    compiler: DslCompiler,
    validator: DslSecurityValidator,
    glossary: GlossaryMapper,
    metrics: Arc<Metrics>,
}

impl QueryOrchestrator {
    /// Create an orchestrator with the built-in schemas and a cache built
    /// from `config.cache`.
    pub fn new(
        config: Config,
        reasoning: Arc<dyn ReasoningService>,
        search: Arc<dyn SearchBackend>,
    ) -> Self {
        let cache: Arc<dyn IntentCache> = Arc::new(QueryCache::new(&config.cache));
        Self {
            normalizer: IntentNormalizer::from_config(&config.pipeline),
            compiler: DslCompiler::from_config(&config.pipeline),
            validator: DslSecurityValidator::from_config(&config.pipeline),
            glossary: GlossaryMapper::new(),
            schemas: Arc::new(StaticSchemaRegistry::with_defaults()),
            cache,
            reasoning,
            search,
            config: Arc::new(config),
            metrics: get_metrics(),
        }
    }

    /// Create an orchestrator wired to the HTTP reasoning and search
    /// adapters described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let reasoning = Arc::new(ApiReasoningClient::from_config(&config.reasoning)?);
        let search = Arc::new(ElasticsearchBackend::from_config(&config.search)?);
        Ok(Self::new(config, reasoning, search))
    }

    pub fn with_schema_provider(mut self, schemas: Arc<dyn SchemaProvider>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn IntentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Static example questions for an index; empty for unknown indexes.
    pub fn example_queries(index: &str) -> &'static [&'static str] {
        match index {
            "communications" => COMMUNICATIONS_EXAMPLES,
            "social" => SOCIAL_EXAMPLES,
            "surveys" => SURVEY_EXAMPLES,
            _ => &[],
        }
    }

    // ========================================================================
    // Public surface
    // ========================================================================

    /// Compile a request into a validated DSL.
    pub async fn compile(&self, request: &CompileRequest) -> Result<GeneratedDsl> {
        self.metrics.compile_requests_total.inc();
        let _timer = Metrics::start_timer(&self.metrics.compile_duration_seconds);
        self.compile_inner(request)
            .await
            .inspect_err(|e| self.log_failure(&request.index, e))
    }

    /// Compile, execute and summarize.
    pub async fn compile_and_execute(&self, request: &CompileRequest) -> Result<ExecutionResponse> {
        let start = Instant::now();
        let mut request = request.clone();
        request.execute = true;

        let dsl = self.compile(&request).await?;
        let results = self
            .run(&request, &dsl)
            .await
            .inspect_err(|e| self.log_failure(&request.index, e))?;

        stage(PipelineStage::Done, &request.index);
        Ok(ExecutionResponse {
            summary: results.summary.clone(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            dsl,
            results,
        })
    }

    /// Ask for a corrected intent given analyst feedback on a prior DSL.
    /// The refined DSL goes through the same validation as a fresh one.
    pub async fn refine(
        &self,
        prior_request: &CompileRequest,
        feedback: &str,
        prior_dsl: &GeneratedDsl,
    ) -> Result<GeneratedDsl> {
        self.refine_inner(prior_request, feedback, prior_dsl)
            .await
            .inspect_err(|e| self.log_failure(&prior_request.index, e))
    }

    /// Run an already-compiled DSL against the backend.
    ///
    /// The DSL is re-validated here, so envelopes that did not come from
    /// [`compile`](Self::compile) are held to the same rules.
    pub async fn execute(&self, dsl: &GeneratedDsl) -> Result<SearchResponse> {
        if !self.config.pipeline.is_executable_index(&dsl.index) {
            self.metrics.validation_failures_total.inc();
            return Err(ValidationError::IndexNotExecutable(dsl.index.clone()).into());
        }
        self.security_check(dsl)?;

        stage(PipelineStage::Executing, &dsl.index);
        self.metrics.executions_total.inc();
        let _timer = Metrics::start_timer(&self.metrics.execution_duration_seconds);

        let outcome = match dsl.aggregations() {
            Some(aggs) => self.search.aggregate(&dsl.index, dsl.query(), aggs).await,
            None => {
                let options = SearchOptions {
                    size: dsl.size(),
                    from: dsl.from(),
                    sort: dsl.sort().cloned(),
                    source: dsl.source().cloned(),
                };
                self.search.search(&dsl.index, dsl.query(), &options).await
            }
        };

        outcome.map_err(|e| {
            self.metrics.execution_errors_total.inc();
            QueryError::from(e)
        })
    }

    /// Execute several compiled DSLs concurrently. Fails as a whole if any
    /// branch fails; results come back in branch order.
    pub async fn execute_composite(&self, branches: &[CompositeBranch]) -> Result<Vec<CompositeResult>> {
        for branch in branches {
            if !self.config.pipeline.is_executable_index(&branch.dsl.index) {
                self.metrics.validation_failures_total.inc();
                return Err(ValidationError::IndexNotExecutable(branch.dsl.index.clone()).into());
            }
            self.security_check(&branch.dsl)?;
        }

        let futures = branches.iter().map(|branch| async move {
            let response = self.execute(&branch.dsl).await?;
            Ok::<_, QueryError>(CompositeResult {
                label: branch.label.clone(),
                index: branch.dsl.index.clone(),
                total: response.total,
                aggregations: response.aggregations,
            })
        });
        try_join_all(futures).await
    }

    /// Summarize an execution result. Never fails: zero results produce a
    /// fixed string without any call, and failed calls fall back to a
    /// template.
    pub async fn summarize(&self, request: &CompileRequest, response: &SearchResponse) -> String {
        if response.total == 0 {
            return NO_RESULTS_SUMMARY.to_string();
        }

        stage(PipelineStage::Summarizing, &request.index);
        let pipeline = &self.config.pipeline;
        let prompt = build_summary_prompt(
            &request.query,
            response.total,
            &response.hits,
            response.aggregations.as_ref(),
            pipeline.summary_sample_size,
            pipeline.summary_snippet_chars,
        );
        let call = PromptRequest::new(prompt)
            .with_system_prompt(SUMMARY_SYSTEM_PROMPT)
            .with_options(self.prompt_options(request));

        match call_with_deadline(
            self.reasoning.clone(),
            call,
            self.config.reasoning.summary_timeout(),
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty summary".to_string(),
                };
                warn!(index = %request.index, reason = %reason, "Summary failed, using template");
                self.metrics.summary_fallbacks_total.inc();
                fallback_summary(&request.index, response.total)
            }
        }
    }

    // ========================================================================
    // Pipeline stages
    // ========================================================================

    async fn compile_inner(&self, request: &CompileRequest) -> Result<GeneratedDsl> {
        stage(PipelineStage::Validating, &request.index);
        self.validate_request(request, request.execute)?;
        let schema = self.schema_for(&request.index)?;

        let resolver = RelativeTimeResolver::new(request.timezone.as_deref());
        let intent = self.resolve_intent(request, &schema, &resolver).await?;

        stage(PipelineStage::Compiling, &request.index);
        let dsl = self.compiler.compile(&intent, &request.index, &schema);
        self.check_dsl(&dsl, &schema)?;

        info!(
            index = %request.index,
            intent = intent.kind.as_str(),
            confidence = intent.confidence,
            degraded = intent.parse_failed,
            "Compiled query"
        );
        Ok(dsl)
    }

    async fn run(&self, request: &CompileRequest, dsl: &GeneratedDsl) -> Result<ExecutionResult> {
        let start = Instant::now();
        let response = self.execute(dsl).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let summary = self.summarize(request, &response).await;

        Ok(ExecutionResult {
            total: response.total,
            documents: response.hits,
            aggregations: response.aggregations,
            elapsed_ms,
            summary,
        })
    }

    async fn refine_inner(
        &self,
        prior_request: &CompileRequest,
        feedback: &str,
        prior_dsl: &GeneratedDsl,
    ) -> Result<GeneratedDsl> {
        stage(PipelineStage::Validating, &prior_request.index);
        self.validate_request(prior_request, false)?;
        if feedback.trim().is_empty() {
            self.metrics.validation_failures_total.inc();
            return Err(ValidationError::EmptyQuery.into());
        }
        let schema = self.schema_for(&prior_request.index)?;
        let resolver = RelativeTimeResolver::new(prior_request.timezone.as_deref());

        stage(PipelineStage::Reasoning, &prior_request.index);
        let prompt = build_refinement_prompt(
            prior_request,
            feedback,
            prior_dsl,
            &schema,
            &self.glossary,
            &format_instant(resolver.now()),
        );
        let raw = self.reason(prior_request, prompt).await?;

        stage(PipelineStage::Normalizing, &prior_request.index);
        let intent = self.normalize(&raw, &resolver);

        stage(PipelineStage::Compiling, &prior_request.index);
        let dsl = self.compiler.compile(&intent, &prior_request.index, &schema);
        self.check_dsl(&dsl, &schema)?;
        Ok(dsl)
    }

    fn validate_request(&self, request: &CompileRequest, execute: bool) -> Result<()> {
        let pipeline = &self.config.pipeline;
        let outcome = if request.query.trim().is_empty() {
            Err(ValidationError::EmptyQuery)
        } else if !pipeline.is_allowed_index(&request.index) {
            Err(ValidationError::UnknownIndex)
        } else if execute && !pipeline.is_executable_index(&request.index) {
            Err(ValidationError::IndexNotExecutable(request.index.clone()))
        } else {
            Ok(())
        };
        if outcome.is_err() {
            self.metrics.validation_failures_total.inc();
        }
        outcome.map_err(QueryError::from)
    }

    fn schema_for(&self, index: &str) -> Result<IndexSchema> {
        self.schemas
            .schema(index)
            .ok_or_else(|| ValidationError::MissingSchema(index.to_string()).into())
    }

    async fn resolve_intent(
        &self,
        request: &CompileRequest,
        schema: &IndexSchema,
        resolver: &RelativeTimeResolver,
    ) -> Result<ParsedIntent> {
        let key = cache_key(request, self.config.pipeline.history_window);
        if let Some(intent) = self.cache.get(&key).await {
            debug!(stage = %PipelineStage::CacheHit, index = %request.index, cache_key = &key[..12], "Intent cache hit");
            return Ok(intent);
        }

        stage(PipelineStage::Reasoning, &request.index);
        let prompt = build_intent_prompt(
            request,
            schema,
            &self.glossary,
            self.config.pipeline.history_window,
            &format_instant(resolver.now()),
        );
        let raw = self.reason(request, prompt).await?;

        stage(PipelineStage::Normalizing, &request.index);
        let intent = self.normalize(&raw, resolver);

        // A missing time range means "no time filter"; it is never guessed
        // from the query text.
        if intent.parse_failed {
            return Ok(intent);
        }
        self.cache.set(&key, intent.clone(), self.config.cache.ttl()).await;
        Ok(intent)
    }

    async fn reason(&self, request: &CompileRequest, prompt: String) -> Result<String> {
        let call = PromptRequest::new(prompt)
            .with_system_prompt(INTENT_SYSTEM_PROMPT)
            .with_options(self.prompt_options(request));
        Ok(call_with_deadline(self.reasoning.clone(), call, self.config.reasoning.timeout()).await?)
    }

    fn normalize(&self, raw: &str, resolver: &RelativeTimeResolver) -> ParsedIntent {
        let normalized = self.normalizer.normalize(raw, resolver);
        if let NormalizedIntent::Degraded { reason, .. } = &normalized {
            warn!(reason = %reason, "Reasoning output degraded to a broad search");
            self.metrics.parse_degradations_total.inc();
        }
        normalized.into_intent()
    }

    fn prompt_options(&self, request: &CompileRequest) -> PromptOptions {
        PromptOptions::default().with_rate_limit_key(request.rate_limit_key.clone())
    }

    fn security_check(&self, dsl: &GeneratedDsl) -> Result<()> {
        stage(PipelineStage::SecurityValidating, &dsl.index);
        self.validator.validate(&dsl.dsl).map_err(|e| {
            self.metrics.validation_failures_total.inc();
            QueryError::from(e)
        })
    }

    fn check_dsl(&self, dsl: &GeneratedDsl, schema: &IndexSchema) -> Result<()> {
        self.security_check(dsl)?;

        stage(PipelineStage::SchemaValidating, &dsl.index);
        let unknown = unknown_fields(&dsl.dsl, schema);
        if unknown.is_empty() {
            return Ok(());
        }
        warn!(index = %dsl.index, fields = ?unknown, "DSL references fields outside the schema");
        if self.config.pipeline.strict_schema {
            self.metrics.validation_failures_total.inc();
            return Err(ValidationError::UnknownFields { fields: unknown }.into());
        }
        Ok(())
    }

    fn log_failure(&self, index: &str, error: &QueryError) {
        debug!(stage = %PipelineStage::Error, index = %index, code = error.code(), "Pipeline failed");
    }
}

fn stage(stage: PipelineStage, index: &str) {
    debug!(stage = %stage, index = %index, "Pipeline stage");
}
