//! Prompt construction for the reasoning service.

use serde_json::{Map, Value};

use crate::glossary::GlossaryMapper;
use crate::schema::IndexSchema;
use crate::search::SearchHit;
use crate::utils::clamp_text;

use super::types::{CompileRequest, GeneratedDsl};

/// Buckets listed per aggregation in summary prompts.
const MAX_BUCKETS: usize = 5;

/// Fixed summary for empty result sets. Produced without any reasoning call.
pub const NO_RESULTS_SUMMARY: &str = "No matching records were found for this query.";

pub const INTENT_SYSTEM_PROMPT: &str = r#"You translate analyst questions about customer communications into a structured search intent.
Respond with a single JSON object and nothing else, using this shape:
{
  "intent": "search" | "aggregate" | "analyze" | "compare" | "trend",
  "entities": {
    "customers": [], "channels": [], "sentiments": [], "topics": [], "categories": [],
    "priorities": [], "regions": [], "products": [], "statuses": []
  },
  "filters": [{"field": "<schema field>", "operator": "eq|ne|gt|gte|lt|lte|in|contains|exists", "value": <value>}],
  "aggregations": [{"type": "count|avg|sum|min|max|terms|date_histogram|percentiles", "field": "<schema field>", "name": "<label>", "options": {}}],
  "timeRange": "<relative phrase such as 'last week' or 'last 3 days'>" | {"from": "<ISO 8601>", "to": "<ISO 8601>"} | null,
  "sort": {"field": "<schema field>", "order": "asc|desc"} | null,
  "size": <number> | null,
  "confidence": <0.0 to 1.0>
}
Only reference fields listed in the index schema. Use canonical glossary values for entities."#;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize search results for a customer-experience analyst. \
Write two to four plain sentences. Mention notable counts, sentiment and channels. \
Do not invent facts that are not in the data.";

/// Prompt for the initial intent extraction.
pub fn build_intent_prompt(
    request: &CompileRequest,
    schema: &IndexSchema,
    glossary: &GlossaryMapper,
    history_window: usize,
    now: &str,
) -> String {
    let mut prompt = format!(
        "Target index: {}\nCurrent time: {}\n\nIndex schema:\n{}\n\n{}\n",
        request.index,
        now,
        schema.describe(),
        glossary.prompt_text()
    );

    let history = request.recent_history(history_window);
    if !history.is_empty() {
        prompt.push_str("Previous questions in this session (oldest first):\n");
        for (i, previous) in history.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, previous.trim()));
        }
        prompt.push('\n');
    }

    if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("Additional context: {}\n\n", context.trim()));
    }

    prompt.push_str(&format!("Question: {}\n", request.query.trim()));
    prompt
}

/// Prompt asking for a corrected intent given the previous interpretation.
pub fn build_refinement_prompt(
    request: &CompileRequest,
    feedback: &str,
    prior: &GeneratedDsl,
    schema: &IndexSchema,
    glossary: &GlossaryMapper,
    now: &str,
) -> String {
    let prior_intent = serde_json::to_string(&prior.intent).unwrap_or_default();
    format!(
        "Target index: {}\nCurrent time: {}\n\nIndex schema:\n{}\n\n{}\n\
         Original question: {}\n\
         Previous interpretation: {}\n\
         Previous intent JSON: {}\n\
         Analyst feedback: {}\n\n\
         Return a corrected intent JSON object that addresses the feedback.\n",
        request.index,
        now,
        schema.describe(),
        glossary.prompt_text(),
        request.query.trim(),
        prior.explanation,
        prior_intent,
        feedback.trim()
    )
}

/// Prompt for summarizing an executed query.
pub fn build_summary_prompt(
    query: &str,
    total: u64,
    hits: &[SearchHit],
    aggregations: Option<&Value>,
    sample_size: usize,
    snippet_chars: usize,
) -> String {
    let mut prompt = format!("Question: {}\nTotal matching records: {}\n", query.trim(), total);

    let sample: Vec<&SearchHit> = hits.iter().take(sample_size).collect();
    if !sample.is_empty() {
        prompt.push_str(&format!("\nSample of {} record(s):\n", sample.len()));
        for hit in sample {
            let source = clamp_strings(&hit.source, snippet_chars);
            prompt.push_str(&format!("- {}\n", source));
        }
    }

    if let Some(aggs) = aggregations {
        let lines = summarize_aggregations(aggs);
        if !lines.is_empty() {
            prompt.push_str("\nAggregations:\n");
            for line in lines {
                prompt.push_str(&format!("- {}\n", line));
            }
        }
    }

    prompt.push_str("\nSummarize these results for the analyst.");
    prompt
}

/// Templated summary used when the summarization call fails.
pub fn fallback_summary(index: &str, total: u64) -> String {
    let noun = match index {
        "communications" => "communications",
        "social" => "social posts",
        "surveys" => "survey responses",
        _ => "documents",
    };
    if total == 1 {
        format!("Found 1 {} matching the query.", noun.trim_end_matches('s'))
    } else {
        format!("Found {} {} matching the query.", total, noun)
    }
}

/// One compact line per aggregation: top buckets or metric values.
pub fn summarize_aggregations(aggs: &Value) -> Vec<String> {
    let Some(map) = aggs.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(name, body)| summarize_aggregation(name, body))
        .collect()
}

fn summarize_aggregation(name: &str, body: &Value) -> Option<String> {
    if let Some(buckets) = body.get("buckets").and_then(Value::as_array) {
        let top: Vec<String> = buckets
            .iter()
            .take(MAX_BUCKETS)
            .map(|b| {
                let key = b
                    .get("key_as_string")
                    .or_else(|| b.get("key"))
                    .map(scalar_text)
                    .unwrap_or_default();
                let count = b.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
                format!("{} ({})", key, count)
            })
            .collect();
        let more = buckets.len().saturating_sub(MAX_BUCKETS);
        let suffix = if more > 0 { format!(", +{} more", more) } else { String::new() };
        return Some(format!("{}: {}{}", name, top.join(", "), suffix));
    }
    if let Some(values) = body.get("values").and_then(Value::as_object) {
        let parts: Vec<String> = values
            .iter()
            .map(|(p, v)| format!("p{}={}", p.trim_end_matches(".0"), scalar_text(v)))
            .collect();
        return Some(format!("{}: {}", name, parts.join(", ")));
    }
    if let Some(value) = body.get("value") {
        return Some(format!("{}: {}", name, scalar_text(value)));
    }
    body.get("doc_count")
        .and_then(Value::as_u64)
        .map(|count| format!("{}: {} documents", name, count))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() != 0.0 => format!("{:.2}", f),
            Some(f) if n.is_f64() => format!("{:.0}", f),
            _ => n.to_string(),
        },
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}

/// Copy of `value` with every string clamped to `max_chars`.
fn clamp_strings(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) => Value::String(clamp_text(s, max_chars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| clamp_strings(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), clamp_strings(v, max_chars)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}
