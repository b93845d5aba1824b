//! Search execution.
//!
//! [`SearchBackend`] is the boundary to the document store. Queries reach it
//! only after security validation.

mod backend;
mod elasticsearch;

pub use backend::{SearchBackend, SearchHit, SearchOptions, SearchResponse};
pub use elasticsearch::ElasticsearchBackend;
