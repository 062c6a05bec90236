//! Search request compilation / 搜索请求编译
//!
//! Turns a validated request into a single ranked query against the
//! claims index: filters are mandatory and non-scoring, text clauses
//! gate inclusion, scoring functions are summed on top.

pub mod filters;
pub mod query;
pub mod scoring;
pub mod special;
pub mod types;

pub use types::{AutoCompleteRequest, SearchRequest, SearchType};
