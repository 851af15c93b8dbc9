//! Context tools.
//!
//! Keyword-gated retrieval helpers that run during context assembly:
//! [`TimeQueryTool`] answers "what happened on day X" by filtering chat
//! history to detected dates, [`SummaryQueryTool`] answers "summarize
//! what we've talked about" with a broad, date-free pull.

pub mod summary_query;
pub mod time_query;

pub use summary_query::SummaryQueryTool;
pub use time_query::TimeQueryTool;
