//! Retrieval collaborator contract — the external memory/RAG service.
//!
//! The retrieval service owns long-term storage. Minne talks to it through
//! a question/answer HTTP contract: ingest text with metadata, query back
//! semantically relevant documents, optionally scoped by calendar date.
//! Documents are read-only to this runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RetrievalError;

/// Metadata attached to a retrieved document.
///
/// All fields are optional — the store accepts free-form metadata and
/// older documents may predate any given key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Calendar date the content refers to (YYYY-MM-DD).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Full ISO timestamp of ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Content category, e.g. "chat" or "file".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Memory category, e.g. "conversation".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<String>,

    /// Any further metadata keys the store returned.
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A document returned by the retrieval collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// The document text.
    pub text: String,

    /// Associated metadata.
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl RetrievedDocument {
    /// True when the metadata marks this document as a chat conversation.
    pub fn is_conversational(&self) -> bool {
        self.metadata.content_type.as_deref() == Some("chat")
            || self.metadata.memory_type.as_deref() == Some("conversation")
    }

    /// Timestamp for recency sorting. Missing timestamps sort as
    /// epoch-minimum so they land last under a descending sort.
    pub fn sort_timestamp(&self) -> &str {
        self.metadata.timestamp.as_deref().unwrap_or("1970-01-01")
    }
}

/// A date scope for a retrieval query: one day or several (OR semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateFilter {
    Single(String),
    Many(Vec<String>),
}

impl DateFilter {
    /// Collapse a list of ISO dates into the narrowest filter, or `None`
    /// when the list is empty.
    pub fn from_dates(dates: Vec<String>) -> Option<Self> {
        match dates.len() {
            0 => None,
            1 => Some(Self::Single(dates.into_iter().next().expect("len checked"))),
            _ => Some(Self::Many(dates)),
        }
    }

    /// The dates in this filter as a slice-like Vec.
    pub fn dates(&self) -> Vec<&str> {
        match self {
            Self::Single(d) => vec![d.as_str()],
            Self::Many(ds) => ds.iter().map(String::as_str).collect(),
        }
    }
}

/// A query against the retrieval collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// User / collection key the documents belong to.
    pub user_id: String,

    /// Free-text search question.
    pub question: String,

    /// Maximum number of documents to return.
    #[serde(default = "default_n_results")]
    pub n_results: usize,

    /// Optional calendar-date scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<DateFilter>,

    /// Optional metadata equality filter (e.g. `content_type = "file"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_filter: Option<HashMap<String, String>>,
}

fn default_n_results() -> usize {
    10
}

impl RetrievalQuery {
    pub fn new(user_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            question: question.into(),
            n_results: default_n_results(),
            date_filter: None,
            metadata_filter: None,
        }
    }

    pub fn with_n_results(mut self, n: usize) -> Self {
        self.n_results = n;
        self
    }

    pub fn with_date_filter(mut self, filter: Option<DateFilter>) -> Self {
        self.date_filter = filter;
        self
    }

    pub fn with_metadata_filter(mut self, filter: Option<HashMap<String, String>>) -> Self {
        self.metadata_filter = filter;
        self
    }
}

/// The retrieval collaborator trait.
///
/// Implementations: the Brain HTTP client, in-memory stubs for tests.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// A human-readable name for this retriever.
    fn name(&self) -> &str;

    /// Fast semantic search — documents only, no answer synthesis.
    async fn search(
        &self,
        query: RetrievalQuery,
    ) -> std::result::Result<Vec<RetrievedDocument>, RetrievalError>;

    /// Ingest content for a user. Best-effort: callers treat failure as
    /// "not persisted this time", never as fatal.
    async fn ingest(
        &self,
        user_id: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> std::result::Result<(), RetrievalError>;

    /// Health check — can we reach the store?
    async fn health_check(&self) -> std::result::Result<bool, RetrievalError> {
        Ok(true)
    }
}
