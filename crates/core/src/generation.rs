//! Generation collaborator contract — the abstraction over the LLM backend.
//!
//! A Generator takes a prompt plus optional context and system prompt and
//! yields a live sequence of text fragments over an mpsc channel, terminated
//! by channel close. Fragments must be consumable incrementally — the whole
//! point of the runtime is minimal time-to-first-visible-token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A request for text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's message.
    pub prompt: String,

    /// Assembled context (persona, memory, thread history). `None` means
    /// "generate without context" — never an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Optional system prompt controlling tone and behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            system_prompt: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.is_empty());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }
}

/// The generation collaborator trait.
///
/// Implementations: the Ollama NDJSON streaming client, scripted mocks.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this generator (e.g. "ollama").
    fn name(&self) -> &str;

    /// Stream a response. Reasoning markup is already filtered out of the
    /// chunks this channel delivers; the stream ends when the sender side
    /// closes.
    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<String, ProviderError>>,
        ProviderError,
    >;

    /// Generate a complete response by draining the stream.
    async fn complete(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<String, ProviderError> {
        let mut rx = self.stream(request).await?;
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// The lightweight "needs richer context?" decision capability.
///
/// Treated as unreliable/best-effort: callers time-box the call and
/// default to "needed" on any failure (fail open toward more context).
#[async_trait]
pub trait ContextDecision: Send + Sync {
    async fn needs_context(&self, message: &str) -> std::result::Result<bool, ProviderError>;
}

/// One-shot completion against the lightweight decision model.
///
/// Used for structured decisions (router plans) where the caller parses
/// the raw response itself and supplies its own fallback on failure.
#[async_trait]
pub trait QuickCompletion: Send + Sync {
    async fn quick_completion(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, ProviderError>;
}
