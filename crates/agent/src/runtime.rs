//! Concrete wiring.
//!
//! Builds the production object graph from configuration: Ollama for
//! generation and decisions, Brain for retrieval, the built-in context
//! tools, and the orchestrator on top. Also the home of the operational
//! odds and ends a host process needs: warm-up, health, diagnostics.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use minne_config::AppConfig;
use minne_core::error::ProviderError;
use minne_core::{Generator, Retriever};
use minne_core::tool::ContextTool;
use minne_core::Result;
use minne_memory::composer::ContextComposer;
use minne_memory::coordinator::TaskCoordinator;
use minne_memory::store::{MemoryStats, MemoryStore};
use minne_memory::threads::ThreadStore;
use minne_providers::brain::{BrainClient, CollectionInfo};
use minne_providers::ollama::OllamaClient;
use minne_router::{ToolRegistry, ToolRouter};
use minne_tools::{SummaryQueryTool, TimeQueryTool};

use crate::orchestrator::ChatOrchestrator;

/// Reachability of the two external collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generation: bool,
    pub retrieval: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.generation && self.retrieval
    }
}

/// The assembled runtime. Owns the concrete clients so operational
/// calls (warm-up, model listing, collection info) stay available next
/// to the trait-typed chat flow.
pub struct Runtime {
    orchestrator: ChatOrchestrator,
    ollama: Arc<OllamaClient>,
    brain: Arc<BrainClient>,
}

impl Runtime {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let ollama = Arc::new(OllamaClient::new(&config.ollama)?);
        let brain = Arc::new(BrainClient::new(&config.brain)?);
        let store = MemoryStore::new(config.memory.short_term_capacity);

        let tools: Vec<Arc<dyn ContextTool>> = vec![
            Arc::new(TimeQueryTool::new(brain.clone())),
            Arc::new(SummaryQueryTool::new(brain.clone())),
        ];
        let composer = Arc::new(ContextComposer::new(
            brain.clone(),
            ollama.clone(),
            store.clone(),
            tools,
            &config.memory,
        ));
        let router = Arc::new(ToolRouter::new(
            ollama.clone(),
            ToolRegistry::new(),
            &config.router,
        ));
        let orchestrator = ChatOrchestrator::new(
            ollama.clone(),
            brain.clone(),
            composer,
            router,
            store,
            ThreadStore::new(),
            TaskCoordinator::new(),
            config,
        );

        info!(
            model = %config.ollama.model,
            decision_model = %config.ollama.decision_model,
            brain = %config.brain.base_url,
            "Runtime assembled"
        );
        Ok(Self {
            orchestrator,
            ollama,
            brain,
        })
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    /// Pre-load the generation models so the first request does not pay
    /// the model-load latency. Rate-limited internally; best-effort.
    pub async fn warmup(&self) {
        self.ollama.warmup(false).await;
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            generation: self.ollama.health_check().await.unwrap_or(false),
            retrieval: self.brain.health_check().await.unwrap_or(false),
        }
    }

    /// Models available on the generation backend.
    pub async fn available_models(&self) -> Result<Vec<String>> {
        Ok(self.ollama.list_models().await?)
    }

    /// Embedding vector for arbitrary text, via the configured
    /// embedding model.
    pub async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        self.ollama.embed(text).await
    }

    /// Long-term collection info for a user, `None` when the user has no
    /// collection yet.
    pub async fn collection_info(&self, user_id: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.brain.collection_info(user_id).await?)
    }

    /// In-process memory diagnostics for a user.
    pub async fn memory_stats(&self, user_id: &str) -> MemoryStats {
        self.orchestrator.store().stats(user_id).await
    }
}
