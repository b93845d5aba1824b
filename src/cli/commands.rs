//! CLI command dispatcher.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use querysmith::query::unknown_fields;
use querysmith::{
    get_metrics, CompileRequest, Config, DslSecurityValidator, GeneratedDsl, QueryOrchestrator,
    RelativeTimeResolver, SchemaProvider, StaticSchemaRegistry,
};

use super::output;

/// Run the compile command, executing the DSL when asked. Metrics are
/// process-local, so they can only be reported from the same run.
pub async fn run_compile(
    config: Config,
    query: String,
    index: String,
    context: Option<String>,
    timezone: Option<String>,
    execute: bool,
    metrics: bool,
) -> Result<()> {
    let orchestrator = QueryOrchestrator::from_config(config)?;
    let mut request = CompileRequest::new(query, index);
    request.context = context;
    request.timezone = timezone;

    let printed = if execute {
        let response = orchestrator.compile_and_execute(&request).await;
        response.map_err(anyhow::Error::from).and_then(|r| output::print_json(&r))
    } else {
        let dsl = orchestrator.compile(&request).await;
        dsl.map_err(anyhow::Error::from).and_then(|d| output::print_json(&d))
    };

    if metrics {
        output::print_metrics(&get_metrics().export_prometheus());
    }
    printed
}

/// Run the refine command against a previously generated DSL file.
pub async fn run_refine(
    config: Config,
    query: String,
    index: String,
    feedback: String,
    dsl_path: &Path,
) -> Result<()> {
    let content = std::fs::read_to_string(dsl_path)
        .with_context(|| format!("Failed to read {}", dsl_path.display()))?;
    let prior: GeneratedDsl =
        serde_json::from_str(&content).context("DSL file is not a generated query")?;

    let orchestrator = QueryOrchestrator::from_config(config)?;
    let request = CompileRequest::new(query, index);
    let refined = orchestrator.refine(&request, &feedback, &prior).await?;
    output::print_json(&refined)
}

/// Run the security validator (and, with an index, the schema check) on a
/// DSL file. Accepts either a bare envelope or a generated query.
pub fn run_validate(config: &Config, dsl_path: &Path, index: Option<String>) -> Result<()> {
    let content = std::fs::read_to_string(dsl_path)
        .with_context(|| format!("Failed to read {}", dsl_path.display()))?;
    let value: Value = serde_json::from_str(&content)?;
    let envelope = match value.get("dsl") {
        Some(dsl) if value.get("index").is_some() => dsl.clone(),
        _ => value,
    };

    let report = DslSecurityValidator::from_config(&config.pipeline).inspect(&envelope);
    let unknown = match &index {
        Some(index) => {
            let schema = StaticSchemaRegistry::with_defaults()
                .schema(index)
                .with_context(|| format!("No schema for index '{}'", index))?;
            unknown_fields(&envelope, &schema)
        }
        None => Vec::new(),
    };

    output::print_json(&json!({
        "valid": report.is_clean(),
        "violations": report.violations,
        "unknown_clauses": report.unknown_clauses,
        "unknown_fields": unknown,
    }))?;

    if !report.is_clean() {
        bail!("DSL failed security validation");
    }
    Ok(())
}

/// Resolve a relative time phrase in the given timezone.
pub fn run_resolve_time(phrase: String, timezone: Option<String>) -> Result<()> {
    let resolver = RelativeTimeResolver::new(timezone.as_deref());
    let range = resolver.resolve(&phrase);
    output::print_json(&json!({
        "phrase": phrase,
        "timeRange": range,
    }))
}

pub fn run_examples(index: String) -> Result<()> {
    output::print_json(QueryOrchestrator::example_queries(&index))
}
