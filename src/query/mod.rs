//! Natural-language query compilation.
//!
//! - [`types`]: intent, DSL and request models
//! - [`normalizer`]: reasoning output to [`ParsedIntent`]
//! - [`compiler`]: intent to search DSL
//! - [`validator`]: DSL security and schema checks
//! - [`prompt`]: prompt construction and summary fallbacks
//! - [`orchestrator`]: the end-to-end pipeline

pub mod compiler;
pub mod normalizer;
pub mod orchestrator;
pub mod prompt;
pub mod types;
pub mod validator;

pub use compiler::DslCompiler;
pub use normalizer::{clamp_confidence, extract_json_object, IntentNormalizer};
pub use orchestrator::QueryOrchestrator;
pub use prompt::{fallback_summary, NO_RESULTS_SUMMARY};
pub use types::*;
pub use validator::{referenced_fields, unknown_fields, DslSecurityValidator, ValidationReport};
