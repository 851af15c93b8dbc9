//! Context assembly.
//!
//! Builds the single context string handed to generation. Ordered
//! sections, each omitted when empty:
//!
//! 1. conversation history — the thread transcript when chatting in a
//!    thread, otherwise the short-term turn buffer
//! 2. persona digest
//! 3. retrieved memory
//!
//! The retrieved-memory step is where the decision gate, date filters,
//! intent-steered search terms, context tools, and fallbacks live. Every
//! failure along the way degrades to "skip this source"; compose always
//! returns a string, empty meaning "proceed without context".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use minne_core::document::{DateFilter, RetrievalQuery, RetrievedDocument, Retriever};
use minne_core::generation::ContextDecision;
use minne_core::tool::ContextTool;
use minne_config::MemoryConfig;

use crate::intents;
use crate::store::MemoryStore;
use crate::dates::detect_dates;

const THREAD_SECTION: &str = "## Konversationshistorik:";
const PERSONA_SECTION: &str = "## Om användaren:";
const RETRIEVED_SECTION: &str = "## Vector store data:";
const RECENT_SECTION: &str = "## Senaste konversationer:";

/// Short-term turns included in the recent-conversations section.
const RECENT_TURN_LIMIT: usize = 3;
/// Documents requested per retrieval query.
const SEARCH_POOL: usize = 10;
/// Days in the recency-biased date window.
const RECENT_WINDOW_DAYS: u64 = 2;
/// Days in the widened retry window.
const WIDE_WINDOW_DAYS: u64 = 7;

pub struct ContextComposer {
    retriever: Arc<dyn Retriever>,
    decision: Arc<dyn ContextDecision>,
    store: MemoryStore,
    tools: Vec<Arc<dyn ContextTool>>,
    max_snippets: usize,
    tool_timeout: Duration,
}

impl ContextComposer {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        decision: Arc<dyn ContextDecision>,
        store: MemoryStore,
        tools: Vec<Arc<dyn ContextTool>>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            retriever,
            decision,
            store,
            tools,
            max_snippets: config.max_context_snippets,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }

    /// Assemble the context for one request. `thread_history` replaces
    /// the short-term section when the request runs inside a thread.
    pub async fn compose(
        &self,
        user_id: &str,
        message: &str,
        thread_history: Option<&str>,
    ) -> String {
        let memory = self.store.snapshot(user_id).await;
        let mut sections: Vec<String> = Vec::new();

        match thread_history {
            Some(history) if !history.is_empty() => {
                sections.push(format!("{THREAD_SECTION}\n{history}"));
            }
            _ => {
                let recent = self.store.recent_turns(user_id, RECENT_TURN_LIMIT).await;
                if !recent.is_empty() {
                    sections.push(format!("{RECENT_SECTION}\n{recent}"));
                }
            }
        }

        if let Some(persona) = memory.persona_digest.as_deref() {
            if !persona.is_empty() {
                sections.push(format!("{PERSONA_SECTION}\n{persona}"));
            }
        }

        let retrieved = self.retrieved_block(user_id, message).await;
        if !retrieved.is_empty() {
            sections.push(format!("{RETRIEVED_SECTION}\n{retrieved}"));
        }

        let context = sections.join("\n\n");
        // An empty composition must not clobber a useful cached context.
        if !context.is_empty() {
            self.store.set_last_context(user_id, context.clone()).await;
        }
        debug!(user_id, chars = context.len(), "Context composed");
        context
    }

    /// The retrieved-memory block: decision gate, context tools, then
    /// the intent-steered search with its fallback ladder.
    async fn retrieved_block(&self, user_id: &str, message: &str) -> String {
        let needs = match self.decision.needs_context(message).await {
            Ok(v) => v,
            Err(e) => {
                // Fail open toward more context.
                warn!(error = %e, "Context decision failed, assuming context is needed");
                true
            }
        };
        if !needs {
            debug!(user_id, "Decision: no retrieval needed");
            return String::new();
        }

        for tool in &self.tools {
            match timeout(self.tool_timeout, tool.maybe_run(user_id, message)).await {
                Ok(Ok(Some(block))) => {
                    info!(tool = tool.name(), "Context tool produced block");
                    return block;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(tool = tool.name(), error = %e, "Context tool failed"),
                Err(_) => warn!(tool = tool.name(), "Context tool timed out"),
            }
        }

        let today = Local::now().date_naive();
        let analyzed = intents::analyze(message);
        let mut date_filter = DateFilter::from_dates(detect_dates(message, today));
        if date_filter.is_none() && analyzed.recency {
            date_filter = DateFilter::from_dates(day_window(today, RECENT_WINDOW_DAYS));
        }
        let metadata_filter = analyzed.file.then(|| {
            HashMap::from([("content_type".to_string(), "file".to_string())])
        });

        let had_date_filter = date_filter.is_some();
        let query = RetrievalQuery::new(user_id, &analyzed.search_terms)
            .with_n_results(SEARCH_POOL)
            .with_date_filter(date_filter)
            .with_metadata_filter(metadata_filter);

        match self.retriever.search(query).await {
            Ok(mut docs) => {
                if analyzed.recency {
                    docs.sort_by(|a, b| b.sort_timestamp().cmp(a.sort_timestamp()));
                }
                let block = join_snippets(&docs, self.max_snippets);
                if !block.is_empty() {
                    return block;
                }
            }
            Err(e) => {
                warn!(user_id, error = %e, "Retrieval failed");
                return self.short_term_fallback(user_id).await;
            }
        }

        // Empty result with a date filter: retry once with a widened
        // window before giving up on the store.
        if had_date_filter {
            let retry = RetrievalQuery::new(user_id, &analyzed.search_terms)
                .with_n_results(SEARCH_POOL)
                .with_date_filter(DateFilter::from_dates(day_window(today, WIDE_WINDOW_DAYS)));
            if let Ok(docs) = self.retriever.search(retry).await {
                let block = join_snippets(&docs, self.max_snippets);
                if !block.is_empty() {
                    info!(user_id, "Widened date window produced results");
                    return block;
                }
            }
        }

        self.short_term_fallback(user_id).await
    }

    async fn short_term_fallback(&self, user_id: &str) -> String {
        let memory = self.store.snapshot(user_id).await;
        if !memory.last_composed_context.is_empty() {
            info!(user_id, "Falling back to cached short-term context");
        }
        memory.last_composed_context
    }
}

/// Today and the preceding `days - 1` days as ISO strings, newest first.
fn day_window(today: NaiveDate, days: u64) -> Vec<String> {
    (0..days)
        .filter_map(|d| today.checked_sub_days(Days::new(d)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect()
}

/// Join up to `max` non-empty document texts with blank lines.
fn join_snippets(docs: &[RetrievedDocument], max: usize) -> String {
    docs.iter()
        .filter(|d| !d.text.is_empty())
        .take(max)
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use minne_core::document::DocumentMetadata;
    use minne_core::error::{ProviderError, RetrievalError};

    struct FixedDecision(Result<bool, ()>);

    #[async_trait]
    impl ContextDecision for FixedDecision {
        async fn needs_context(&self, _message: &str) -> Result<bool, ProviderError> {
            self.0
                .map_err(|_| ProviderError::Timeout("decision".into()))
        }
    }

    /// Returns scripted responses in order and records queries.
    struct ScriptedRetriever {
        responses: Mutex<VecDeque<Vec<RetrievedDocument>>>,
        queries: Mutex<Vec<RetrievalQuery>>,
    }

    impl ScriptedRetriever {
        fn new(responses: Vec<Vec<RetrievedDocument>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn search(
            &self,
            query: RetrievalQuery,
        ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
            self.queries.lock().expect("lock").push(query);
            Ok(self
                .responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_default())
        }

        async fn ingest(
            &self,
            _user_id: &str,
            _content: &str,
            _metadata: DocumentMetadata,
        ) -> Result<(), RetrievalError> {
            Ok(())
        }
    }

    fn doc(text: &str) -> RetrievedDocument {
        RetrievedDocument {
            text: text.to_string(),
            metadata: DocumentMetadata::default(),
        }
    }

    fn composer(
        retriever: Arc<ScriptedRetriever>,
        decision: FixedDecision,
        store: MemoryStore,
    ) -> ContextComposer {
        ContextComposer::new(
            retriever,
            Arc::new(decision),
            store,
            Vec::new(),
            &MemoryConfig::default(),
        )
    }

    #[tokio::test]
    async fn short_term_buffer_feeds_followup_context() {
        let store = MemoryStore::new(5);
        store.record_turn("u1", "Hej, jag heter Jonas", "Hej Jonas! Trevligt!").await;

        let retriever = Arc::new(ScriptedRetriever::new(vec![]));
        let c = composer(retriever, FixedDecision(Ok(false)), store);

        let context = c.compose("u1", "Vad heter jag?", None).await;
        assert!(context.contains(RECENT_SECTION));
        assert!(context.contains("Jonas"));
        assert!(!context.contains(RETRIEVED_SECTION));
    }

    #[tokio::test]
    async fn decision_failure_fails_open() {
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![doc("minne om kaffe")]]));
        let c = composer(retriever.clone(), FixedDecision(Err(())), MemoryStore::new(5));

        let context = c.compose("u1", "vad tycker jag om kaffe?", None).await;
        assert!(context.contains(RETRIEVED_SECTION));
        assert!(context.contains("minne om kaffe"));
        assert_eq!(retriever.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snippet_cap_is_enforced() {
        let docs: Vec<_> = (0..10).map(|i| doc(&format!("minne {i}"))).collect();
        let retriever = Arc::new(ScriptedRetriever::new(vec![docs]));
        let c = composer(retriever, FixedDecision(Ok(true)), MemoryStore::new(5));

        let context = c.compose("u1", "vad vet du om projektet?", None).await;
        assert!(context.contains("minne 5"));
        assert!(!context.contains("minne 6"));
    }

    #[tokio::test]
    async fn empty_result_with_date_filter_retries_widened() {
        let retriever = Arc::new(ScriptedRetriever::new(vec![
            vec![],
            vec![doc("samtal från i tisdags")],
        ]));
        let c = composer(retriever.clone(), FixedDecision(Ok(true)), MemoryStore::new(5));

        let context = c.compose("u1", "vad sa jag igår?", None).await;
        assert!(context.contains("samtal från i tisdags"));

        let queries = retriever.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        // First query scoped to yesterday, retry widened to a week.
        assert!(matches!(queries[0].date_filter, Some(DateFilter::Single(_))));
        match &queries[1].date_filter {
            Some(DateFilter::Many(dates)) => assert_eq!(dates.len(), 7),
            other => panic!("expected widened window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn everything_empty_falls_back_to_cached_context() {
        let store = MemoryStore::new(5);
        store
            .set_last_context("u1", "## Senaste konversationer:\nAnvändare: hej".into())
            .await;
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![], vec![]]));
        let c = composer(retriever, FixedDecision(Ok(true)), store);

        let context = c.compose("u1", "vad sa jag igår?", None).await;
        assert!(context.contains("Användare: hej"));
    }

    #[tokio::test]
    async fn empty_composition_keeps_previous_cache() {
        let store = MemoryStore::new(5);
        store
            .set_last_context("u1", "## Om användaren:\ngillar kaffe".into())
            .await;
        let retriever = Arc::new(ScriptedRetriever::new(vec![]));
        let c = composer(retriever, FixedDecision(Ok(false)), store.clone());

        // No turns, no persona, decision says no retrieval: nothing to say.
        let context = c.compose("u1", "ok", None).await;
        assert_eq!(context, "");
        let memory = store.snapshot("u1").await;
        assert_eq!(memory.last_composed_context, "## Om användaren:\ngillar kaffe");
    }

    #[tokio::test]
    async fn nothing_available_yields_empty_string() {
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![]]));
        let c = composer(retriever, FixedDecision(Ok(true)), MemoryStore::new(5));

        let context = c.compose("u1", "vad tycker du?", None).await;
        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn thread_history_replaces_recent_section() {
        let store = MemoryStore::new(5);
        store.record_turn("u1", "gammal fråga", "gammalt svar").await;
        let retriever = Arc::new(ScriptedRetriever::new(vec![]));
        let c = composer(retriever, FixedDecision(Ok(false)), store);

        let context = c
            .compose("u1", "fortsätt", Some("Användare: hej\n\nAssistent: hejsan"))
            .await;
        assert!(context.contains(THREAD_SECTION));
        assert!(!context.contains(RECENT_SECTION));
        assert!(!context.contains("gammal fråga"));
    }

    #[tokio::test]
    async fn persona_section_between_history_and_retrieval() {
        let store = MemoryStore::new(5);
        store.record_turn("u1", "hej", "hejsan").await;
        store.set_persona("u1", "Gillar espresso och bouldering".into()).await;
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![doc("minne")]]));
        let c = composer(retriever, FixedDecision(Ok(true)), store);

        let context = c.compose("u1", "vad vet du om mig?", None).await;
        let recent_at = context.find(RECENT_SECTION).unwrap();
        let persona_at = context.find(PERSONA_SECTION).unwrap();
        let retrieved_at = context.find(RETRIEVED_SECTION).unwrap();
        assert!(recent_at < persona_at && persona_at < retrieved_at);
        assert!(context.contains("espresso"));
    }

    #[tokio::test]
    async fn recency_phrasing_scopes_to_last_days_and_sorts() {
        let mut old = doc("gammalt samtal");
        old.metadata.timestamp = Some("2025-08-10T09:00:00".into());
        let mut fresh = doc("färskt samtal");
        fresh.metadata.timestamp = Some("2025-08-15T09:00:00".into());

        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![old, fresh]]));
        let c = composer(retriever.clone(), FixedDecision(Ok(true)), MemoryStore::new(5));

        let context = c.compose("u1", "vad pratade vi om sist?", None).await;
        let fresh_at = context.find("färskt samtal").unwrap();
        let old_at = context.find("gammalt samtal").unwrap();
        assert!(fresh_at < old_at);

        let queries = retriever.queries.lock().unwrap();
        match &queries[0].date_filter {
            Some(DateFilter::Many(dates)) => assert_eq!(dates.len(), 2),
            other => panic!("expected two-day window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_phrasing_constrains_to_file_content() {
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![doc("rapportinnehåll")]]));
        let c = composer(retriever.clone(), FixedDecision(Ok(true)), MemoryStore::new(5));

        c.compose("u1", "vad står det i rapporten?", None).await;
        let queries = retriever.queries.lock().unwrap();
        let filter = queries[0].metadata_filter.as_ref().unwrap();
        assert_eq!(filter.get("content_type").map(String::as_str), Some("file"));
    }

    #[tokio::test]
    async fn subject_question_enriches_search_terms() {
        let retriever = Arc::new(ScriptedRetriever::new(vec![vec![]]));
        let c = composer(retriever.clone(), FixedDecision(Ok(true)), MemoryStore::new(5));

        c.compose("u1", "Vad vet du om bygger.ai?", None).await;
        let queries = retriever.queries.lock().unwrap();
        assert!(queries[0].question.starts_with("bygger.ai "));
        assert!(queries[0].question.contains("projekt"));
    }
}
