//! Broad history summarization lookup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use minne_core::document::{RetrievalQuery, Retriever};
use minne_core::error::ToolError;
use minne_core::tool::ContextTool;

/// Words that mark a message as asking for a summary of past topics.
const SUMMARY_WORDS: &[&str] = &[
    "sammanfatta",
    "sammanfattning",
    "summera",
    "vad har vi pratat om",
    "vad har jag pratat om",
    "vad har jag sagt",
    "viktiga områden",
    "fokus",
    "vad vet du om mig",
    "tidigare",
    "historik",
];

const POOL_SIZE: usize = 10;

/// Fetches a broad, date-free sample of a user's history as dated
/// bullet lines for the model to summarize.
pub struct SummaryQueryTool {
    retriever: Arc<dyn Retriever>,
}

impl SummaryQueryTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    fn has_summary_intent(message: &str) -> bool {
        let lower = message.to_lowercase();
        SUMMARY_WORDS.iter().any(|w| lower.contains(w))
    }
}

#[async_trait]
impl ContextTool for SummaryQueryTool {
    fn name(&self) -> &str {
        "summary_query"
    }

    async fn maybe_run(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<Option<String>, ToolError> {
        if !Self::has_summary_intent(message) {
            return Ok(None);
        }

        let query = RetrievalQuery::new(
            user_id,
            "user previous conversation topics and interests; summarise",
        )
        .with_n_results(POOL_SIZE);
        let docs = self
            .retriever
            .search(query)
            .await
            .map_err(|e| ToolError::InvocationFailed {
                tool_name: "summary_query".into(),
                reason: e.to_string(),
            })?;

        let bullets: Vec<String> = docs
            .iter()
            .take(POOL_SIZE)
            .filter(|doc| !doc.text.is_empty())
            .map(|doc| {
                let date = doc
                    .metadata
                    .date
                    .as_deref()
                    .or(doc.metadata.timestamp.as_deref());
                match date {
                    Some(d) => format!("- ({d}) {}", doc.text),
                    None => format!("- {}", doc.text),
                }
            })
            .collect();

        if bullets.is_empty() {
            return Ok(None);
        }
        debug!(user_id, bullets = bullets.len(), "Summary query matched");
        Ok(Some(format!("[SUMMARY_QUERY]\n{}", bullets.join("\n"))))
    }
}
