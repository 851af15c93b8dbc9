//! Brain HTTP client — the long-term memory store.
//!
//! Brain exposes a question/answer contract over HTTP: `/search` for fast
//! document lookup, `/ingest` for writing, `/collections/{id}` for stats,
//! `/health` for liveness. Documents come back under a `sources` array
//! whose entries carry the text under either `content` or `text`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use minne_core::document::{
    DocumentMetadata, RetrievalQuery, RetrievedDocument, Retriever,
};
use minne_core::error::RetrievalError;
use minne_config::BrainConfig;

pub struct BrainClient {
    client: reqwest::Client,
    base_url: String,
    search_timeout: Duration,
    ingest_timeout: Duration,
}

#[derive(Serialize)]
struct SearchPayload<'a> {
    customer_id: &'a str,
    question: &'a str,
    n_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata_filter: Option<Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

/// One hit in a search response. Older store versions put the text under
/// `text` instead of `content`.
#[derive(Deserialize)]
struct SourceEntry {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    metadata: DocumentMetadata,
}

#[derive(Serialize)]
struct IngestPayload<'a> {
    customer_id: &'a str,
    content: &'a str,
    metadata: &'a DocumentMetadata,
}

/// Collection statistics from `/collections/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub document_count: u64,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl BrainClient {
    pub fn new(config: &BrainConfig) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RetrievalError::Network(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_timeout: Duration::from_secs(config.search_timeout_secs),
            ingest_timeout: Duration::from_secs(config.ingest_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Collection statistics for a user, or `None` when the collection
    /// does not exist yet.
    pub async fn collection_info(
        &self,
        user_id: &str,
    ) -> Result<Option<CollectionInfo>, RetrievalError> {
        let resp = self
            .client
            .get(self.url(&format!("/collections/{user_id}")))
            .timeout(self.search_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.search_timeout))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(RetrievalError::QueryFailed(format!(
                "collection info returned status {}",
                resp.status()
            )));
        }
        let info = resp
            .json::<CollectionInfo>()
            .await
            .map_err(|e| RetrievalError::QueryFailed(e.to_string()))?;
        Ok(Some(info))
    }
}

#[async_trait]
impl Retriever for BrainClient {
    fn name(&self) -> &str {
        "brain"
    }

    async fn search(
        &self,
        query: RetrievalQuery,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let payload = SearchPayload {
            customer_id: &query.user_id,
            question: &query.question,
            n_results: query.n_results,
            metadata_filter: build_metadata_filter(&query),
        };

        let resp = self
            .client
            .post(self.url("/search"))
            .timeout(self.search_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.search_timeout))?;
        if !resp.status().is_success() {
            return Err(RetrievalError::QueryFailed(format!(
                "search returned status {}",
                resp.status()
            )));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| RetrievalError::QueryFailed(e.to_string()))?;

        let docs: Vec<RetrievedDocument> = body
            .sources
            .into_iter()
            .filter_map(|entry| {
                let text = entry.content.or(entry.text)?;
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(RetrievedDocument {
                    text: trimmed.to_string(),
                    metadata: entry.metadata,
                })
            })
            .collect();
        debug!(user_id = %query.user_id, hits = docs.len(), "Brain search complete");
        Ok(docs)
    }

    async fn ingest(
        &self,
        user_id: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> Result<(), RetrievalError> {
        let payload = IngestPayload {
            customer_id: user_id,
            content,
            metadata: &metadata,
        };
        let resp = self
            .client
            .post(self.url("/ingest"))
            .timeout(self.ingest_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.ingest_timeout))?;
        if !resp.status().is_success() {
            return Err(RetrievalError::IngestFailed(format!(
                "ingest returned status {}",
                resp.status()
            )));
        }
        debug!(user_id, bytes = content.len(), "Content ingested");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, RetrievalError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Duration::from_secs(2)))?;
        Ok(resp.status().is_success())
    }
}

/// Fold the query's date scope and metadata equality constraints into the
/// single `metadata_filter` object the store expects. A one-day scope is
/// sent as a bare string, a multi-day scope as an array (OR semantics).
fn build_metadata_filter(query: &RetrievalQuery) -> Option<Value> {
    let mut filter = serde_json::Map::new();
    if let Some(date_filter) = &query.date_filter {
        let value = match date_filter.dates().as_slice() {
            [single] => Value::String((*single).to_string()),
            many => Value::Array(many.iter().map(|d| Value::String((*d).to_string())).collect()),
        };
        filter.insert("date".into(), value);
    }
    if let Some(meta) = &query.metadata_filter {
        for (key, value) in meta {
            filter.insert(key.clone(), Value::String(value.clone()));
        }
    }
    if filter.is_empty() {
        None
    } else {
        Some(Value::Object(filter))
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> RetrievalError {
    if e.is_timeout() {
        RetrievalError::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    } else {
        RetrievalError::Network(e.to_string())
    }
}
