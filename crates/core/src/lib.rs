//! # Minne Core
//!
//! Domain types, traits, and error definitions for the Minne memory-chat
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (generation, retrieval, context decision) is
//! defined as a trait here. Implementations live in their respective crates.
//! This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod generation;
pub mod router;
pub mod thread;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use document::{
    DateFilter, DocumentMetadata, RetrievalQuery, RetrievedDocument, Retriever,
};
pub use error::{Error, Result};
pub use generation::{ContextDecision, GenerationRequest, Generator, QuickCompletion};
pub use router::{RouterPlan, ToolCall, ToolDefinition, ToolInvocationResult};
pub use thread::{Role, Thread, ThreadMessage};
pub use tool::ContextTool;
