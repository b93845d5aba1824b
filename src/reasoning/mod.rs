//! Reasoning service access.
//!
//! The reasoning service turns prompts into text. The pipeline only ever
//! talks to it through [`call_with_deadline`], which bounds every call by a
//! hard timeout.

mod api;
mod deadline;
mod traits;

pub use api::ApiReasoningClient;
pub use deadline::{call_with_deadline, PromptRequest};
pub use traits::{PromptOptions, ReasoningService};
