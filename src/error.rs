//! Error types for the querysmith pipeline.

use thiserror::Error;

/// Main error type for query compilation and execution.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Stable, machine-readable code surfaced to callers instead of the
    /// internal error text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(e) => e.code(),
            Self::Reasoning(e) => e.code(),
            Self::Execution(_) => "EXECUTION_FAILED",
            Self::Io(_) | Self::Serialization(_) => "INTERNAL_ERROR",
        }
    }
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Request and DSL validation failures.
///
/// Messages name the offending value or path only; they never enumerate the
/// configured allow-lists.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown or unsupported index")]
    UnknownIndex,

    #[error("Index '{0}' does not support query execution")]
    IndexNotExecutable(String),

    #[error("Query text is empty")]
    EmptyQuery,

    #[error("No schema available for index '{0}'")]
    MissingSchema(String),

    #[error("Disallowed DSL construct(s): {}", .violations.join(", "))]
    UnsafeDsl { violations: Vec<String> },

    #[error("DSL references unknown field(s): {}", .fields.join(", "))]
    UnknownFields { fields: Vec<String> },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownIndex | Self::MissingSchema(_) => "INVALID_INDEX",
            Self::IndexNotExecutable(_) => "INDEX_NOT_EXECUTABLE",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::UnsafeDsl { .. } => "DSL_VALIDATION_FAILED",
            Self::UnknownFields { .. } => "SCHEMA_VALIDATION_FAILED",
        }
    }

    /// Violating paths, if this is a DSL violation.
    pub fn violations(&self) -> &[String] {
        match self {
            Self::UnsafeDsl { violations } => violations,
            Self::UnknownFields { fields } => fields,
            _ => &[],
        }
    }
}

/// Reasoning-service call failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("Reasoning call timed out after {0}ms")]
    Timeout(u64),

    #[error("Rate limited")]
    RateLimited,

    #[error("API error: {0}")]
    Api(String),

    #[error("Empty response from reasoning service")]
    EmptyResponse,

    #[error("Reasoning task aborted: {0}")]
    Aborted(String),
}

impl ReasoningError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "REASONING_TIMEOUT",
            _ => "REASONING_FAILED",
        }
    }
}

/// Search backend failures. Propagated as-is, never swallowed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Backend rejected query ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias for querysmith operations.
pub type Result<T> = std::result::Result<T, QueryError>;
