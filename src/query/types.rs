//! Types for the natural language query compiler.

use serde::{Deserialize, Serialize};

use crate::search::SearchHit;
use crate::temporal::TimeRange;

// ============================================================================
// Intent Kind
// ============================================================================

/// What the user wants done with the matching documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    #[default]
    Search,
    Aggregate,
    Analyze,
    Compare,
    Trend,
}

impl IntentKind {
    /// Lenient parse; anything unrecognized is a plain search.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "aggregate" | "aggregation" | "count" => Self::Aggregate,
            "analyze" | "analyse" | "analysis" => Self::Analyze,
            "compare" | "comparison" => Self::Compare,
            "trend" | "trends" => Self::Trend,
            _ => Self::Search,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Aggregate => "aggregate",
            Self::Analyze => "analyze",
            Self::Compare => "compare",
            Self::Trend => "trend",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Search => "Search",
            Self::Aggregate => "Aggregate",
            Self::Analyze => "Analyze",
            Self::Compare => "Compare",
            Self::Trend => "Trend",
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Entity categories recognized in intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Customers,
    Channels,
    Sentiments,
    Topics,
    Categories,
    Priorities,
    Regions,
    Products,
    Statuses,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 9] = [
        Self::Customers,
        Self::Channels,
        Self::Sentiments,
        Self::Topics,
        Self::Categories,
        Self::Priorities,
        Self::Regions,
        Self::Products,
        Self::Statuses,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Channels => "channels",
            Self::Sentiments => "sentiments",
            Self::Topics => "topics",
            Self::Categories => "categories",
            Self::Priorities => "priorities",
            Self::Regions => "regions",
            Self::Products => "products",
            Self::Statuses => "statuses",
        }
    }

    /// Accepts plural or singular keys.
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "customers" | "customer" => Some(Self::Customers),
            "channels" | "channel" => Some(Self::Channels),
            "sentiments" | "sentiment" => Some(Self::Sentiments),
            "topics" | "topic" => Some(Self::Topics),
            "categories" | "category" => Some(Self::Categories),
            "priorities" | "priority" => Some(Self::Priorities),
            "regions" | "region" => Some(Self::Regions),
            "products" | "product" => Some(Self::Products),
            "statuses" | "status" => Some(Self::Statuses),
            _ => None,
        }
    }

    /// Singular noun used in explanations.
    pub fn singular(self) -> &'static str {
        match self {
            Self::Customers => "customer",
            Self::Channels => "channel",
            Self::Sentiments => "sentiment",
            Self::Topics => "topic",
            Self::Categories => "category",
            Self::Priorities => "priority",
            Self::Regions => "region",
            Self::Products => "product",
            Self::Statuses => "status",
        }
    }
}

/// Entity values per category. Every category is always present; values are
/// unique within a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    pub customers: Vec<String>,
    pub channels: Vec<String>,
    pub sentiments: Vec<String>,
    pub topics: Vec<String>,
    pub categories: Vec<String>,
    pub priorities: Vec<String>,
    pub regions: Vec<String>,
    pub products: Vec<String>,
    pub statuses: Vec<String>,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: EntityCategory) -> &[String] {
        match category {
            EntityCategory::Customers => &self.customers,
            EntityCategory::Channels => &self.channels,
            EntityCategory::Sentiments => &self.sentiments,
            EntityCategory::Topics => &self.topics,
            EntityCategory::Categories => &self.categories,
            EntityCategory::Priorities => &self.priorities,
            EntityCategory::Regions => &self.regions,
            EntityCategory::Products => &self.products,
            EntityCategory::Statuses => &self.statuses,
        }
    }

    fn get_mut(&mut self, category: EntityCategory) -> &mut Vec<String> {
        match category {
            EntityCategory::Customers => &mut self.customers,
            EntityCategory::Channels => &mut self.channels,
            EntityCategory::Sentiments => &mut self.sentiments,
            EntityCategory::Topics => &mut self.topics,
            EntityCategory::Categories => &mut self.categories,
            EntityCategory::Priorities => &mut self.priorities,
            EntityCategory::Regions => &mut self.regions,
            EntityCategory::Products => &mut self.products,
            EntityCategory::Statuses => &mut self.statuses,
        }
    }

    /// Add a value unless it is empty or already present.
    pub fn insert(&mut self, category: EntityCategory, value: impl Into<String>) -> bool {
        let value = value.into();
        let values = self.get_mut(category);
        if value.is_empty() || values.contains(&value) {
            return false;
        }
        values.push(value);
        true
    }

    pub fn with(mut self, category: EntityCategory, value: impl Into<String>) -> Self {
        self.insert(category, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        EntityCategory::ALL.iter().all(|c| self.get(*c).is_empty())
    }

    /// Non-empty categories in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityCategory, &[String])> {
        EntityCategory::ALL
            .into_iter()
            .map(|c| (c, self.get(c)))
            .filter(|(_, values)| !values.is_empty())
    }
}

// ============================================================================
// Filters, Aggregations, Sort
// ============================================================================

/// Comparison operator of an explicit filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    Exists,
}

impl FilterOperator {
    /// Lenient parse; unknown operators default to `Eq`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ne" | "!=" | "neq" | "not" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "in" => Self::In,
            "contains" | "match" | "like" => Self::Contains,
            "exists" => Self::Exists,
            _ => Self::Eq,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Exists => "exists",
        }
    }

    /// Phrase used in explanations.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Eq => "is",
            Self::Ne => "is not",
            Self::Gt => "greater than",
            Self::Gte => "at least",
            Self::Lt => "less than",
            Self::Lte => "at most",
            Self::In => "is one of",
            Self::Contains => "contains",
            Self::Exists => "exists",
        }
    }
}

/// Explicit field filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl IntentFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Aggregation function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    #[default]
    Count,
    Avg,
    Sum,
    Min,
    Max,
    Terms,
    DateHistogram,
    Percentiles,
}

impl AggregationType {
    /// Lenient parse; unknown types default to `Count`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "avg" | "average" | "mean" => Self::Avg,
            "sum" | "total" => Self::Sum,
            "min" | "minimum" => Self::Min,
            "max" | "maximum" => Self::Max,
            "terms" | "group_by" | "breakdown" => Self::Terms,
            "date_histogram" | "histogram" | "over_time" => Self::DateHistogram,
            "percentiles" | "percentile" => Self::Percentiles,
            _ => Self::Count,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Terms => "terms",
            Self::DateHistogram => "date_histogram",
            Self::Percentiles => "percentiles",
        }
    }

    /// Whether the aggregation needs a numeric field.
    pub fn is_metric(self) -> bool {
        matches!(
            self,
            Self::Avg | Self::Sum | Self::Min | Self::Max | Self::Percentiles
        )
    }
}

/// Requested aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAggregation {
    #[serde(rename = "type")]
    pub agg_type: AggregationType,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl IntentAggregation {
    pub fn new(agg_type: AggregationType, field: Option<&str>) -> Self {
        Self {
            agg_type,
            field: field.map(str::to_string),
            name: None,
            options: serde_json::Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" | "oldest" => Self::Asc,
            _ => Self::Desc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

// ============================================================================
// Parsed Intent
// ============================================================================

/// Structured interpretation of a natural language request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    #[serde(rename = "intent")]
    pub kind: IntentKind,
    pub entities: Entities,
    pub filters: Vec<IntentFilter>,
    pub aggregations: Vec<IntentAggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    /// Confidence in the interpretation (0.0 to 1.0)
    pub confidence: f32,
    pub parse_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_failure_reason: Option<String>,
}

impl ParsedIntent {
    pub fn new(kind: IntentKind, confidence: f32) -> Self {
        Self {
            kind,
            entities: Entities::default(),
            filters: Vec::new(),
            aggregations: Vec::new(),
            time_range: None,
            sort: None,
            size: None,
            from: None,
            confidence,
            parse_failed: false,
            parse_failure_reason: None,
        }
    }

    /// Low-confidence search with empty collections, flagged as failed.
    pub fn degraded(reason: impl Into<String>, confidence: f32) -> Self {
        Self {
            parse_failed: true,
            parse_failure_reason: Some(reason.into()),
            ..Self::new(IntentKind::Search, confidence)
        }
    }

    pub fn with_entities(mut self, entities: Entities) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_filter(mut self, filter: IntentFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_aggregation(mut self, aggregation: IntentAggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

/// Outcome of normalizing untrusted reasoning output: either a fully typed
/// intent or an explicit degraded marker.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedIntent {
    Parsed(ParsedIntent),
    Degraded { reason: String, confidence: f32 },
}

impl NormalizedIntent {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Collapse into the pipeline representation. Degraded outcomes become a
    /// low-confidence search with `parse_failed` set.
    pub fn into_intent(self) -> ParsedIntent {
        match self {
            Self::Parsed(intent) => intent,
            Self::Degraded { reason, confidence } => ParsedIntent::degraded(reason, confidence),
        }
    }
}

// ============================================================================
// Generated DSL
// ============================================================================

/// A compiled query envelope plus its human-readable interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDsl {
    /// Logical index the DSL targets
    pub index: String,
    /// Envelope: `{query, aggs?, sort?, size?, from?, _source?, track_total_hits?}`
    pub dsl: serde_json::Value,
    /// Interpretation shown to the user and fed back into refinement
    pub explanation: String,
    /// The intent the DSL was compiled from
    pub intent: ParsedIntent,
}

impl GeneratedDsl {
    pub fn query(&self) -> &serde_json::Value {
        &self.dsl["query"]
    }

    /// The aggregation block, if present and non-empty.
    pub fn aggregations(&self) -> Option<&serde_json::Value> {
        ["aggs", "aggregations"]
            .iter()
            .filter_map(|k| self.dsl.get(*k))
            .find(|v| v.as_object().is_some_and(|o| !o.is_empty()))
    }

    pub fn size(&self) -> Option<usize> {
        self.dsl
            .get("size")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    pub fn from(&self) -> Option<usize> {
        self.dsl
            .get("from")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    pub fn sort(&self) -> Option<&serde_json::Value> {
        self.dsl.get("sort")
    }

    pub fn source(&self) -> Option<&serde_json::Value> {
        self.dsl.get("_source")
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// A natural language query request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileRequest {
    /// Free-text question
    pub query: String,
    /// Logical index key
    pub index: String,
    /// Additional caller-supplied context (e.g. the case being viewed)
    pub context: Option<String>,
    /// `UTC` or a fixed `±HH:MM` offset
    pub timezone: Option<String>,
    /// Prior query texts in the session, oldest first
    pub history: Vec<String>,
    /// Execute the compiled DSL
    pub execute: bool,
    /// Forwarded to the reasoning service for per-caller rate limiting
    pub rate_limit_key: Option<String>,
}

impl CompileRequest {
    pub fn new(query: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            index: index.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn with_rate_limit_key(mut self, key: impl Into<String>) -> Self {
        self.rate_limit_key = Some(key.into());
        self
    }

    pub fn executing(mut self) -> Self {
        self.execute = true;
        self
    }

    /// The trailing `window` history entries.
    pub fn recent_history(&self, window: usize) -> &[String] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}

/// Result of executing a compiled DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub total: u64,
    pub documents: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<serde_json::Value>,
    pub elapsed_ms: u64,
    /// Always populated; falls back to a template when summarization fails
    pub summary: String,
}

/// Response of `compile_and_execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub dsl: GeneratedDsl,
    pub results: ExecutionResult,
    pub execution_time_ms: u64,
    pub summary: String,
}

/// One branch of a composite (multi-index) query.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeBranch {
    pub label: String,
    pub dsl: GeneratedDsl,
}

/// Result of one composite branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub label: String,
    pub index: String,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<serde_json::Value>,
}

// ============================================================================
// Pipeline Stage
// ============================================================================

/// Orchestrator state machine stages, used for tracing and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validating,
    CacheHit,
    Reasoning,
    Normalizing,
    Compiling,
    SecurityValidating,
    SchemaValidating,
    Executing,
    Summarizing,
    Done,
    Error,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::CacheHit => "cache_hit",
            Self::Reasoning => "reasoning",
            Self::Normalizing => "normalizing",
            Self::Compiling => "compiling",
            Self::SecurityValidating => "security_validating",
            Self::SchemaValidating => "schema_validating",
            Self::Executing => "executing",
            Self::Summarizing => "summarizing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_enums() {
        assert_eq!(IntentKind::parse_lenient("TREND"), IntentKind::Trend);
        assert_eq!(IntentKind::parse_lenient("summon"), IntentKind::Search);
        assert_eq!(FilterOperator::parse_lenient(">="), FilterOperator::Gte);
        assert_eq!(FilterOperator::parse_lenient("between"), FilterOperator::Eq);
        assert_eq!(
            AggregationType::parse_lenient("date-histogram"),
            AggregationType::DateHistogram
        );
        assert_eq!(AggregationType::parse_lenient("median"), AggregationType::Count);
        assert_eq!(SortOrder::parse_lenient("ASC"), SortOrder::Asc);
        assert_eq!(SortOrder::parse_lenient("sideways"), SortOrder::Desc);
    }

    #[test]
    fn test_entities_dedup() {
        let mut entities = Entities::new();
        assert!(entities.insert(EntityCategory::Channels, "email"));
        assert!(!entities.insert(EntityCategory::Channels, "email"));
        assert!(!entities.insert(EntityCategory::Channels, ""));
        assert_eq!(entities.channels, vec!["email"]);
        assert!(!entities.is_empty());

        let listed: Vec<_> = entities.iter().map(|(c, _)| c).collect();
        assert_eq!(listed, vec![EntityCategory::Channels]);
    }

    #[test]
    fn test_entity_category_parse() {
        assert_eq!(EntityCategory::parse("Sentiment"), Some(EntityCategory::Sentiments));
        assert_eq!(EntityCategory::parse("statuses"), Some(EntityCategory::Statuses));
        assert_eq!(EntityCategory::parse("weather"), None);
    }

    #[test]
    fn test_degraded_intent() {
        let intent = NormalizedIntent::Degraded {
            reason: "no JSON object found".to_string(),
            confidence: 0.3,
        }
        .into_intent();
        assert!(intent.parse_failed);
        assert_eq!(intent.kind, IntentKind::Search);
        assert!(intent.entities.is_empty());
        assert!(intent.filters.is_empty());
        assert!(intent.aggregations.is_empty());
        assert_eq!(intent.confidence, 0.3);
    }

    #[test]
    fn test_generated_dsl_accessors() {
        let dsl = GeneratedDsl {
            index: "communications".to_string(),
            dsl: json!({"query": {"match_all": {}}, "size": 0, "aggs": {"by_channel": {}}}),
            explanation: String::new(),
            intent: ParsedIntent::new(IntentKind::Aggregate, 0.9),
        };
        assert!(dsl.aggregations().is_some());
        assert_eq!(dsl.size(), Some(0));
        assert_eq!(dsl.query(), &json!({"match_all": {}}));

        let empty_aggs = GeneratedDsl {
            dsl: json!({"query": {"match_all": {}}, "aggs": {}}),
            ..dsl
        };
        assert!(empty_aggs.aggregations().is_none());
    }

    #[test]
    fn test_recent_history() {
        let request = CompileRequest::new("q", "communications").with_history(
            ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        );
        assert_eq!(request.recent_history(2), &["c".to_string(), "d".to_string()]);
        assert_eq!(request.recent_history(10).len(), 4);
    }

    #[test]
    fn test_parsed_intent_serializes_intent_key() {
        let value = serde_json::to_value(ParsedIntent::new(IntentKind::Trend, 0.8)).unwrap();
        assert_eq!(value["intent"], "trend");
        assert!(value["entities"]["channels"].as_array().unwrap().is_empty());
    }
}
