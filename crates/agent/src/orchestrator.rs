//! The chat flow.
//!
//! One request runs: router plan → context composition → tool invocation
//! → generation stream, forwarded chunk by chunk. Persistence (short-term
//! turn append, long-term ingest, persona refresh) happens after the
//! stream completes, in a detached task coordinated per user so
//! overlapping requests never double-write. Nothing in the background
//! path ever blocks or fails the response.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use minne_config::AppConfig;
use minne_core::document::{DateFilter, DocumentMetadata, RetrievalQuery, Retriever};
use minne_core::error::ProviderError;
use minne_core::generation::{GenerationRequest, Generator};
use minne_core::router::ToolDefinition;
use minne_core::{Result, Role};
use minne_memory::composer::ContextComposer;
use minne_memory::coordinator::TaskCoordinator;
use minne_memory::persona::{build_persona, PERSONA_POOL_SIZE, PERSONA_QUERY};
use minne_memory::store::MemoryStore;
use minne_memory::threads::ThreadStore;
use minne_router::{augment_prompt, ToolRouter};

/// Buffer for the forwarded response channel.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ChatOrchestrator {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    composer: Arc<ContextComposer>,
    router: Arc<ToolRouter>,
    store: MemoryStore,
    threads: ThreadStore,
    coordinator: TaskCoordinator,
    system_prompt: String,
    persona_max_age: Duration,
    persona_window_days: i64,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        composer: Arc<ContextComposer>,
        router: Arc<ToolRouter>,
        store: MemoryStore,
        threads: ThreadStore,
        coordinator: TaskCoordinator,
        config: &AppConfig,
    ) -> Self {
        Self {
            generator,
            retriever,
            composer,
            router,
            store,
            threads,
            coordinator,
            system_prompt: config.system_prompt.clone(),
            persona_max_age: Duration::from_secs(config.memory.persona_max_age_secs),
            persona_window_days: config.memory.persona_window_days,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    pub fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    /// One chat request. Returns the live response stream; the channel
    /// closes when generation finishes. Persistence is scheduled after
    /// the last chunk and never delays the stream.
    pub async fn chat(
        &self,
        user_id: &str,
        message: &str,
        ad_hoc_tools: &[ToolDefinition],
    ) -> Result<mpsc::Receiver<std::result::Result<String, ProviderError>>> {
        let plan = self.router.plan(message, ad_hoc_tools).await;

        let context = if plan.use_retrieval {
            self.composer.compose(user_id, message, None).await
        } else {
            debug!(user_id, "Plan skipped retrieval, generating without context");
            String::new()
        };

        let prompt = if plan.tool_calls.is_empty() {
            message.to_string()
        } else {
            let results = self
                .router
                .invoke(user_id, message, &plan.tool_calls, ad_hoc_tools)
                .await;
            augment_prompt(message, &results)
        };

        let request = GenerationRequest::new(prompt)
            .with_context(Some(context))
            .with_system_prompt(Some(self.system_prompt.clone()));
        let mut inner = self.generator.stream(request).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let orchestrator = self.clone();
        let user_id = user_id.to_string();
        let message = message.to_string();
        tokio::spawn(async move {
            let mut reply = String::new();
            let mut interrupted = false;
            while let Some(item) = inner.recv().await {
                match item {
                    Ok(chunk) => {
                        reply.push_str(&chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Receiver gone; stop reading, skip persistence.
                            interrupted = true;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Generation stream failed mid-response");
                        let _ = tx.send(Err(e)).await;
                        interrupted = true;
                        break;
                    }
                }
            }
            if !interrupted && !reply.is_empty() {
                orchestrator.schedule_persistence(&user_id, &message, &reply);
            }
        });
        Ok(rx)
    }

    /// Chat inside a persisted thread: both turns land in the thread, and
    /// the thread transcript replaces the short-term buffer as the
    /// history section. Returns the complete assistant reply.
    pub async fn chat_in_thread(
        &self,
        thread_id: &str,
        user_id: &str,
        message: &str,
    ) -> Result<String> {
        let thread = self.threads.get_owned_thread(thread_id, user_id).await?;
        let system_prompt = thread
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.system_prompt.clone());

        self.threads.add_message(thread_id, Role::User, message).await?;
        let history = self.threads.thread_context(thread_id).await?;
        let context = self.composer.compose(user_id, message, Some(&history)).await;

        let request = GenerationRequest::new(message)
            .with_context(Some(context))
            .with_system_prompt(Some(system_prompt));
        let reply = self.generator.complete(request).await?;

        self.threads.add_message(thread_id, Role::Assistant, &reply).await?;
        self.schedule_persistence(user_id, message, &reply);
        Ok(reply)
    }

    /// Schedule the after-response work: short-term append, long-term
    /// ingest, persona refresh when stale. One task per user at a time;
    /// a busy key means an earlier exchange is still persisting and this
    /// one is skipped.
    pub fn schedule_persistence(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let store = self.store.clone();
        let retriever = Arc::clone(&self.retriever);
        let persona_max_age = self.persona_max_age;
        let persona_window_days = self.persona_window_days;
        let user_id_owned = user_id.to_string();
        let user_message = user_message.to_string();
        let assistant_reply = assistant_reply.to_string();

        self.coordinator.run_exclusive(user_id, async move {
            let user_id = user_id_owned;
            store.record_turn(&user_id, &user_message, &assistant_reply).await;

            let content = format!(
                "{}: {user_message}\n{}: {assistant_reply}",
                Role::User.label(),
                Role::Assistant.label()
            );
            if let Err(e) = retriever
                .ingest(&user_id, &content, conversation_metadata(&user_id))
                .await
            {
                warn!(user_id, error = %e, "Conversation ingest failed, not persisted this turn");
            } else {
                debug!(user_id, "Conversation persisted to long-term memory");
            }

            if store.persona_is_stale(&user_id, persona_max_age).await {
                refresh_persona(&store, retriever.as_ref(), &user_id, persona_window_days).await;
            }
        })
    }
}

/// Metadata stamped on every persisted conversation turn.
fn conversation_metadata(user_id: &str) -> DocumentMetadata {
    let now = Local::now();
    let mut metadata = DocumentMetadata {
        date: Some(now.format("%Y-%m-%d").to_string()),
        timestamp: Some(now.to_rfc3339()),
        content_type: Some("chat".to_string()),
        memory_type: Some("conversation".to_string()),
        ..Default::default()
    };
    metadata.extra.insert("source".into(), "chat".into());
    metadata.extra.insert("user_id".into(), user_id.into());
    metadata
        .extra
        .insert("time".into(), now.format("%H:%M").to_string().into());
    metadata
        .extra
        .insert("day_of_week".into(), now.format("%A").to_string().into());
    metadata
        .extra
        .insert("month".into(), now.format("%B").to_string().into());
    metadata
}

/// Rebuild the persona digest from a recency-windowed document pool.
/// Failures leave the previous digest in place.
async fn refresh_persona(
    store: &MemoryStore,
    retriever: &dyn Retriever,
    user_id: &str,
    window_days: i64,
) {
    let cutoff = (Local::now() - chrono::Duration::days(window_days))
        .format("%Y-%m-%d")
        .to_string();
    let query = RetrievalQuery::new(user_id, PERSONA_QUERY)
        .with_n_results(PERSONA_POOL_SIZE)
        .with_date_filter(Some(DateFilter::Single(cutoff)));

    match retriever.search(query).await {
        Ok(documents) => {
            if let Some(digest) = build_persona(&documents) {
                info!(user_id, chars = digest.len(), "Persona digest refreshed");
                store.set_persona(user_id, digest).await;
            } else {
                debug!(user_id, "Persona pool empty, keeping previous digest");
            }
        }
        Err(e) => {
            warn!(user_id, error = %e, "Persona refresh query failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        drain, test_config, wait_until_idle, RecordingRetriever, SequentialMockGenerator,
        SequentialMockPlanner, StaticDecision,
    };
    use minne_core::generation::{ContextDecision, QuickCompletion};
    use minne_router::ToolRegistry;

    fn orchestrator(
        generator: Arc<SequentialMockGenerator>,
        retriever: Arc<RecordingRetriever>,
        planner: Arc<SequentialMockPlanner>,
        decision_needs_context: bool,
    ) -> ChatOrchestrator {
        let config = test_config();
        let store = MemoryStore::new(config.memory.short_term_capacity);
        let decision: Arc<dyn ContextDecision> = Arc::new(StaticDecision(decision_needs_context));
        let composer = Arc::new(ContextComposer::new(
            retriever.clone(),
            decision,
            store.clone(),
            Vec::new(),
            &config.memory,
        ));
        let router = Arc::new(ToolRouter::new(
            planner as Arc<dyn QuickCompletion>,
            ToolRegistry::new(),
            &config.router,
        ));
        ChatOrchestrator::new(
            generator,
            retriever,
            composer,
            router,
            store,
            ThreadStore::new(),
            TaskCoordinator::new(),
            &config,
        )
    }

    fn no_brain_planner() -> Arc<SequentialMockPlanner> {
        Arc::new(SequentialMockPlanner::always(
            r#"{"use_brain": false, "tool_calls": []}"#,
        ))
    }

    #[tokio::test]
    async fn chat_streams_the_generated_reply() {
        let generator = Arc::new(SequentialMockGenerator::single(&["Hej ", "Jonas!"]));
        let agent = orchestrator(
            generator,
            Arc::new(RecordingRetriever::empty()),
            no_brain_planner(),
            false,
        );
        let rx = agent.chat("u1", "Hej, jag heter Jonas", &[]).await.unwrap();
        assert_eq!(drain(rx).await, "Hej Jonas!");
    }

    #[tokio::test]
    async fn name_from_one_exchange_reaches_the_next_context() {
        let generator = Arc::new(SequentialMockGenerator::scripted(vec![
            vec!["Hej Jonas! Trevligt att träffas."],
            vec!["Du heter Jonas."],
        ]));
        let agent = orchestrator(
            generator.clone(),
            Arc::new(RecordingRetriever::empty()),
            Arc::new(SequentialMockPlanner::always(
                r#"{"use_brain": true, "tool_calls": []}"#,
            )),
            false,
        );

        let rx = agent.chat("u1", "Hej, jag heter Jonas", &[]).await.unwrap();
        drain(rx).await;
        wait_until_idle(agent.coordinator(), "u1").await;

        let rx = agent.chat("u1", "Vad heter jag?", &[]).await.unwrap();
        assert_eq!(drain(rx).await, "Du heter Jonas.");

        let requests = generator.requests();
        let context = requests[1].context.as_deref().unwrap_or("");
        assert!(context.contains("Jonas"), "context was: {context}");
        assert!(context.contains("## Senaste konversationer:"));
    }

    #[tokio::test]
    async fn plan_without_retrieval_skips_context() {
        let generator = Arc::new(SequentialMockGenerator::scripted(vec![
            vec!["Hej!"],
            vec!["Hejsan igen!"],
        ]));
        let agent = orchestrator(
            generator.clone(),
            Arc::new(RecordingRetriever::empty()),
            no_brain_planner(),
            true,
        );

        let rx = agent.chat("u1", "Hej, jag heter Jonas", &[]).await.unwrap();
        drain(rx).await;
        wait_until_idle(agent.coordinator(), "u1").await;

        // Second turn: buffer has content, but the plan said no retrieval.
        let rx = agent.chat("u1", "Hej igen", &[]).await.unwrap();
        drain(rx).await;
        assert!(generator.requests()[1].context.is_none());
    }

    #[tokio::test]
    async fn completed_exchange_is_ingested_with_chat_metadata() {
        let retriever = Arc::new(RecordingRetriever::empty());
        let generator = Arc::new(SequentialMockGenerator::single(&["Hej Jonas!"]));
        let agent = orchestrator(generator, retriever.clone(), no_brain_planner(), false);

        let rx = agent.chat("u1", "Hej, jag heter Jonas", &[]).await.unwrap();
        drain(rx).await;
        wait_until_idle(agent.coordinator(), "u1").await;

        let ingested = retriever.ingested();
        assert_eq!(ingested.len(), 1);
        let (user_id, content, metadata) = &ingested[0];
        assert_eq!(user_id, "u1");
        assert!(content.contains("Användare: Hej, jag heter Jonas"));
        assert!(content.contains("Assistent: Hej Jonas!"));
        assert_eq!(metadata.content_type.as_deref(), Some("chat"));
        assert_eq!(metadata.memory_type.as_deref(), Some("conversation"));
        assert!(metadata.extra.contains_key("day_of_week"));
    }

    #[tokio::test]
    async fn persona_is_refreshed_from_the_document_pool() {
        let retriever = Arc::new(RecordingRetriever::with_documents(vec![
            ("Jag gillar att vandra i fjällen", "chat"),
            ("Jobbar som snickare i Umeå", "chat"),
        ]));
        let generator = Arc::new(SequentialMockGenerator::single(&["Hej!"]));
        let agent = orchestrator(generator, retriever.clone(), no_brain_planner(), false);

        let rx = agent.chat("u1", "Hej på dig", &[]).await.unwrap();
        drain(rx).await;
        wait_until_idle(agent.coordinator(), "u1").await;

        let memory = agent.store().snapshot("u1").await;
        let persona = memory.persona_digest.expect("persona built");
        assert!(persona.contains("vandra"));
        assert!(persona.contains("snickare"));
        let persona_query = retriever
            .searches()
            .into_iter()
            .find(|q| q.question == PERSONA_QUERY)
            .expect("persona pool queried");
        assert!(persona_query.date_filter.is_some());
    }

    #[tokio::test]
    async fn unknown_planned_tool_does_not_break_the_stream() {
        let generator = Arc::new(SequentialMockGenerator::single(&["Svar utan verktyg."]));
        let agent = orchestrator(
            generator.clone(),
            Arc::new(RecordingRetriever::empty()),
            Arc::new(SequentialMockPlanner::always(
                r#"{"use_brain": false, "tool_calls": [{"name": "saknas"}]}"#,
            )),
            false,
        );
        let rx = agent.chat("u1", "kör verktyget", &[]).await.unwrap();
        assert_eq!(drain(rx).await, "Svar utan verktyg.");
        // Failed invocation contributes nothing to the prompt.
        assert_eq!(agent.router().registry().list().await.len(), 0);
        assert_eq!(generator.requests()[0].prompt, "kör verktyget");
    }

    #[tokio::test]
    async fn stream_error_is_forwarded_and_turn_not_persisted() {
        let retriever = Arc::new(RecordingRetriever::empty());
        let generator = Arc::new(SequentialMockGenerator::failing_after(
            &["Det bör"],
            ProviderError::StreamInterrupted("connection reset".into()),
        ));
        let agent = orchestrator(generator, retriever.clone(), no_brain_planner(), false);

        let mut rx = agent.chat("u1", "hej", &[]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "Det bör");
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());

        wait_until_idle(agent.coordinator(), "u1").await;
        assert!(retriever.ingested().is_empty());
        assert_eq!(agent.store().recent_turns("u1", 5).await, "");
    }

    #[tokio::test]
    async fn thread_chat_persists_both_turns_and_uses_the_transcript() {
        let generator = Arc::new(SequentialMockGenerator::scripted(vec![
            vec!["Hej Jonas!"],
            vec!["Du heter Jonas."],
        ]));
        let agent = orchestrator(
            generator.clone(),
            Arc::new(RecordingRetriever::empty()),
            no_brain_planner(),
            false,
        );

        let thread = agent.threads().create_thread("u1", None, None).await;
        let reply = agent
            .chat_in_thread(&thread.thread_id, "u1", "Hej, jag heter Jonas")
            .await
            .unwrap();
        assert_eq!(reply, "Hej Jonas!");
        wait_until_idle(agent.coordinator(), "u1").await;

        let reply = agent
            .chat_in_thread(&thread.thread_id, "u1", "Vad heter jag?")
            .await
            .unwrap();
        assert_eq!(reply, "Du heter Jonas.");

        let messages = agent
            .threads()
            .thread_messages(&thread.thread_id, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 4);

        let context = generator.requests()[1].context.clone().unwrap();
        assert!(context.contains("## Konversationshistorik:"));
        assert!(context.contains("Jonas"));
    }

    #[tokio::test]
    async fn thread_chat_rejects_foreign_user() {
        let generator = Arc::new(SequentialMockGenerator::single(&["aldrig"]));
        let agent = orchestrator(
            generator,
            Arc::new(RecordingRetriever::empty()),
            no_brain_planner(),
            false,
        );
        let thread = agent.threads().create_thread("u1", None, None).await;
        let err = agent
            .chat_in_thread(&thread.thread_id, "inkräktare", "hej")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }
}
