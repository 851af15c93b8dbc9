//! Per-user memory and context assembly.
//!
//! The memory subsystem owns everything between "a message arrived" and
//! "here is the context string for generation": the short-term turn
//! buffer, the persona digest, Swedish date-expression parsing, message
//! intent detection, the context composer, conversation threads, and the
//! background-task coordinator that keeps external writes exclusive per
//! user.

pub mod composer;
pub mod coordinator;
pub mod dates;
pub mod intents;
pub mod persona;
pub mod store;
pub mod threads;

pub use composer::ContextComposer;
pub use coordinator::TaskCoordinator;
pub use store::{MemoryContext, MemoryStats, MemoryStore};
pub use threads::ThreadStore;
