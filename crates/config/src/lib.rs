//! Configuration loading, validation, and management for Minne.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The root configuration structure.
///
/// Maps directly to `minne.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Retrieval (vector store) settings
    #[serde(default)]
    pub brain: BrainConfig,

    /// Memory and context-assembly settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// The standing system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Main generation model.
    #[serde(default = "default_model")]
    pub model: String,

    /// Lightweight model used for routing and context decisions.
    #[serde(default = "default_decision_model")]
    pub decision_model: String,

    /// Embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Whether to strip `<think>...</think>` sections from live output.
    #[serde(default = "default_true")]
    pub strip_think: bool,

    /// Request timeout for generation, seconds.
    #[serde(default = "default_generation_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for the context-decision call, seconds.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Base URL of the retrieval API.
    #[serde(default = "default_brain_url")]
    pub base_url: String,

    /// Timeout for fast search queries, seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Timeout for ingestion, seconds.
    #[serde(default = "default_ingest_timeout")]
    pub ingest_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term turn buffer capacity per user.
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,

    /// Persona digest staleness threshold, seconds.
    #[serde(default = "default_persona_max_age")]
    pub persona_max_age_secs: u64,

    /// How far back the persona pool query looks, days.
    #[serde(default = "default_persona_window")]
    pub persona_window_days: i64,

    /// Maximum retrieved snippets concatenated into one context block.
    #[serde(default = "default_max_snippets")]
    pub max_context_snippets: usize,

    /// Timeout for per-tool context fetches inside composition, seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Timeout for the plan call, seconds.
    #[serde(default = "default_plan_timeout")]
    pub plan_timeout_secs: u64,

    /// Per-tool callback timeout, seconds.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "qwen3:14b".into()
}
fn default_decision_model() -> String {
    "qwen3:1.7b".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_brain_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_true() -> bool {
    true
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_decision_timeout() -> u64 {
    3
}
fn default_search_timeout() -> u64 {
    5
}
fn default_ingest_timeout() -> u64 {
    30
}
fn default_short_term_capacity() -> usize {
    5
}
fn default_persona_max_age() -> u64 {
    600
}
fn default_persona_window() -> i64 {
    14
}
fn default_max_snippets() -> usize {
    6
}
fn default_tool_timeout() -> u64 {
    3
}
fn default_plan_timeout() -> u64 {
    6
}
fn default_callback_timeout() -> u64 {
    20
}

fn default_system_prompt() -> String {
    "Du är Minne – en varm, nyfiken och pålitlig samtalspartner. Du svarar alltid på svenska.\n\
     \n\
     Samtalsstil:\n\
     - Håll det kort: 1–3 meningar. Använd enkel Markdown sparsamt.\n\
     - Var ett bollplank: svara, relatera kort till något relevant från minnet, \
     och ställ 1 fokuserad följdfråga.\n\
     - Sammanfatta inte allt om det inte efterfrågas.\n\
     \n\
     Minne du kan använda:\n\
     - Kortsiktigt minne: senaste utbytena i konversationen.\n\
     - Långsiktigt minne: tidigare konversationer/anteckningar per användare (med datum).\n\
     \n\
     Transparens:\n\
     - Avslöja inte interna processer. Visa bara slutsvaret.\n\
     - Om inget relevant minne hittas: säg kort att du inte hittar något och \
     ställ en framåtriktad fråga."
        .into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            brain: BrainConfig::default(),
            memory: MemoryConfig::default(),
            router: RouterConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_model(),
            decision_model: default_decision_model(),
            embedding_model: default_embedding_model(),
            strip_think: true,
            request_timeout_secs: default_generation_timeout(),
            decision_timeout_secs: default_decision_timeout(),
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            base_url: default_brain_url(),
            search_timeout_secs: default_search_timeout(),
            ingest_timeout_secs: default_ingest_timeout(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: default_short_term_capacity(),
            persona_max_age_secs: default_persona_max_age(),
            persona_window_days: default_persona_window(),
            max_context_snippets: default_max_snippets(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            plan_timeout_secs: default_plan_timeout(),
            callback_timeout_secs: default_callback_timeout(),
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("ollama", &self.ollama)
            .field("brain", &self.brain)
            .field("memory", &self.memory)
            .field("router", &self.router)
            .field("system_prompt", &format!("<{} chars>", self.system_prompt.len()))
            .finish()
    }
}

impl AppConfig {
    /// Load config from a TOML file, falling back to defaults when the
    /// file does not exist. Environment overrides are applied afterwards.
    pub fn load(path: &Path) -> minne_core::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| minne_core::Error::Config {
                message: format!("Failed to read {}: {e}", path.display()),
            })?;
            toml::from_str(&raw).map_err(|e| minne_core::Error::Config {
                message: format!("Failed to parse {}: {e}", path.display()),
            })?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MINNE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MINNE_OLLAMA_BASE_URL") {
            self.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("MINNE_LLM_MODEL") {
            self.ollama.model = model;
        }
        if let Ok(model) = std::env::var("MINNE_DECISION_MODEL") {
            self.ollama.decision_model = model;
        }
        if let Ok(url) = std::env::var("MINNE_BRAIN_API_URL") {
            self.brain.base_url = url;
        }
        if let Ok(v) = std::env::var("MINNE_STRIP_THINK") {
            self.ollama.strip_think = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(prompt) = std::env::var("MINNE_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
    }

    /// Validate settings. Called at startup so misconfiguration fails fast.
    pub fn validate(&self) -> minne_core::Result<()> {
        for (name, url) in [
            ("ollama.base_url", &self.ollama.base_url),
            ("brain.base_url", &self.brain.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(minne_core::Error::Config {
                    message: format!("{name} must start with http:// or https://, got '{url}'"),
                });
            }
        }
        if self.memory.short_term_capacity == 0 {
            return Err(minne_core::Error::Config {
                message: "memory.short_term_capacity must be at least 1".into(),
            });
        }
        if self.memory.max_context_snippets == 0 {
            return Err(minne_core::Error::Config {
                message: "memory.max_context_snippets must be at least 1".into(),
            });
        }
        Ok(())
    }
}
