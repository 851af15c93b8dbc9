//! # Minne Agent
//!
//! The orchestration layer: ties the router, context composer, generation
//! stream, and background persistence into one chat flow. [`Runtime`]
//! wires the concrete collaborators from configuration;
//! [`ChatOrchestrator`] runs the per-request flow against the trait seams
//! so tests can script every collaborator.

pub mod orchestrator;
pub mod runtime;

pub use orchestrator::ChatOrchestrator;
pub use runtime::{HealthReport, Runtime};

#[cfg(test)]
mod test_helpers;
