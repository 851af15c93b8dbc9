//! Context tool contract.
//!
//! Context tools run inside context assembly: each inspects the incoming
//! message and, when its intent matches, fetches a ready-made context
//! block. They are distinct from callback tools (see [`crate::router`]),
//! which are external HTTP endpoints planned by the router.

use async_trait::async_trait;

use crate::error::ToolError;

#[async_trait]
pub trait ContextTool: Send + Sync {
    /// Unique tool name, used in logs.
    fn name(&self) -> &str;

    /// Run if the message matches this tool's intent. `Ok(None)` means
    /// "not my kind of message" or "nothing found" — both are normal.
    async fn maybe_run(
        &self,
        user_id: &str,
        message: &str,
    ) -> std::result::Result<Option<String>, ToolError>;
}
