//! Router domain types — tool catalog entries, invocation plans, results.
//!
//! Tools are external HTTP callbacks: the runtime never executes code on a
//! tool's behalf, it POSTs `(user_id, message, arguments)` to the tool's
//! callback endpoint and captures text content or an error. Ad-hoc tools
//! supplied per request and registry tools are two sources populating the
//! same lookup table.

use serde::{Deserialize, Serialize};

/// A tool the router may call: either registered process-wide or supplied
/// ad-hoc with a single request (request-scoped, never persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique key within the catalog.
    pub name: String,

    /// Description shown to the planning model.
    pub description: String,

    /// HTTP endpoint invoked with `(user_id, message, arguments)`.
    pub callback_url: String,

    /// Optional hint about expected input shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hint: Option<String>,
}

/// A planned call to a named tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// The outcome of one tool invocation. Request-scoped, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub name: String,
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocationResult {
    pub fn success(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// The router's plan for one request. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterPlan {
    /// Whether to fetch context from the retrieval collaborator.
    pub use_retrieval: bool,

    /// Tools to invoke, in order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl RouterPlan {
    /// The fail-open default: more context, no tools.
    pub fn fallback() -> Self {
        Self {
            use_retrieval: true,
            tool_calls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_plan_fails_open() {
        let plan = RouterPlan::fallback();
        assert!(plan.use_retrieval);
        assert!(plan.tool_calls.is_empty());
    }

    #[test]
    fn invocation_result_constructors() {
        let ok = ToolInvocationResult::success("weather", "Soligt, 22 grader");
        assert!(ok.ok);
        assert_eq!(ok.content.as_deref(), Some("Soligt, 22 grader"));
        assert!(ok.error.is_none());

        let err = ToolInvocationResult::failure("missing", "tool_not_found");
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("tool_not_found"));
    }

    #[test]
    fn plan_deserializes_with_missing_tool_calls() {
        let plan: RouterPlan = serde_json::from_str(r#"{"use_retrieval": false}"#).unwrap();
        assert!(!plan.use_retrieval);
        assert!(plan.tool_calls.is_empty());
    }
}
