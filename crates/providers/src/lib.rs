//! Collaborator clients for Minne.
//!
//! - [`OllamaClient`] — streaming text generation, context decisions, and
//!   one-shot small-model completions against an Ollama server.
//! - [`BrainClient`] — the retrieval (vector store) HTTP client.
//! - [`ThinkTagFilter`] — the stateful stream filter that strips model
//!   reasoning markup from live output.

pub mod brain;
pub mod ollama;
pub mod think_filter;

pub use brain::BrainClient;
pub use ollama::OllamaClient;
pub use think_filter::{filter_stream, ThinkTagFilter};
