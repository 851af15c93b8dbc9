//! Date-scoped conversation lookup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tracing::debug;

use minne_core::document::{RetrievalQuery, Retriever};
use minne_core::error::ToolError;
use minne_core::tool::ContextTool;
use minne_memory::dates::detect_dates;

/// Words that mark a message as asking about a specific day or date.
const TIME_WORDS: &[&str] = &[
    "idag",
    "igår",
    "imorgon",
    "vilken dag",
    "datum",
    "den ",
    "januari",
    "februari",
    "mars",
    "april",
    "maj",
    "juni",
    "juli",
    "augusti",
    "september",
    "oktober",
    "november",
    "december",
];

/// Pool fetched before local date filtering.
const POOL_SIZE: usize = 20;
/// Lines kept in the produced block.
const MAX_LINES: usize = 8;

/// Fetches conversations for the date(s) a message mentions.
///
/// The date filter is applied locally over a broad pull rather than
/// pushed to the store, so documents with slightly different metadata
/// shapes still match.
pub struct TimeQueryTool {
    retriever: Arc<dyn Retriever>,
}

impl TimeQueryTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    fn has_time_intent(message: &str) -> bool {
        let lower = message.to_lowercase();
        TIME_WORDS.iter().any(|w| lower.contains(w))
    }
}

#[async_trait]
impl ContextTool for TimeQueryTool {
    fn name(&self) -> &str {
        "time_query"
    }

    async fn maybe_run(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<Option<String>, ToolError> {
        if !Self::has_time_intent(message) {
            return Ok(None);
        }
        let target_dates = detect_dates(message, Local::now().date_naive());

        let query = RetrievalQuery::new(user_id, "conversation chat discussion today yesterday")
            .with_n_results(POOL_SIZE);
        let docs = self
            .retriever
            .search(query)
            .await
            .map_err(|e| ToolError::InvocationFailed {
                tool_name: "time_query".into(),
                reason: e.to_string(),
            })?;

        let mut lines: Vec<String> = Vec::new();
        for doc in &docs {
            if doc.text.is_empty() {
                continue;
            }
            match &doc.metadata.date {
                Some(date) => {
                    if !target_dates.is_empty() && !target_dates.iter().any(|d| d == date) {
                        continue;
                    }
                    lines.push(format!("- ({date}) {}", doc.text));
                }
                None => {
                    if !target_dates.is_empty() {
                        continue;
                    }
                    lines.push(format!("- {}", doc.text));
                }
            }
            if lines.len() >= MAX_LINES {
                break;
            }
        }
        if lines.is_empty() {
            return Ok(None);
        }
        debug!(user_id, hits = lines.len(), "Time query matched");
        Ok(Some(format!(
            "[TIME_QUERY]\nHämtade konversationer relaterade till begärt datum:\n{}",
            lines.join("\n")
        )))
    }
}
