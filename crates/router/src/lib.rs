//! Tool routing.
//!
//! The router asks the lightweight decision model for a plan — should
//! retrieval run, which callback tools should be invoked — and then
//! dispatches each planned call as an HTTP POST to the tool's callback
//! endpoint. Planning fails open: any failure to obtain or parse a plan
//! yields "use retrieval, call nothing". Invocation isolates failures
//! per call: an unknown name, timeout, or transport error never aborts
//! sibling calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use minne_core::generation::QuickCompletion;
use minne_core::router::{RouterPlan, ToolCall, ToolDefinition, ToolInvocationResult};
use minne_config::RouterConfig;

/// Token budget for the plan completion.
const PLAN_MAX_TOKENS: u32 = 200;

/// Process-wide tool registry, mutable at runtime.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, ToolDefinition>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_or_update(&self, tool: ToolDefinition) {
        self.tools.write().await.insert(tool.name.clone(), tool);
    }

    pub async fn remove(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.values().cloned().collect()
    }
}

/// Body POSTed to a tool's callback endpoint.
#[derive(Serialize)]
struct CallbackPayload<'a> {
    user_id: &'a str,
    message: &'a str,
    arguments: Value,
}

pub struct ToolRouter {
    planner: Arc<dyn QuickCompletion>,
    registry: ToolRegistry,
    client: reqwest::Client,
    plan_timeout: Duration,
    callback_timeout: Duration,
}

impl ToolRouter {
    pub fn new(
        planner: Arc<dyn QuickCompletion>,
        registry: ToolRegistry,
        config: &RouterConfig,
    ) -> Self {
        Self {
            planner,
            registry,
            client: reqwest::Client::new(),
            plan_timeout: Duration::from_secs(config.plan_timeout_secs),
            callback_timeout: Duration::from_secs(config.callback_timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Produce a plan for one message. The catalog shown to the model is
    /// the union of registered and request-scoped ad-hoc tools.
    pub async fn plan(&self, message: &str, ad_hoc_tools: &[ToolDefinition]) -> RouterPlan {
        let mut catalog = ad_hoc_tools.to_vec();
        catalog.extend(self.registry.list().await);
        let prompt = plan_prompt(message, &catalog);

        let raw = match timeout(
            self.plan_timeout,
            self.planner.quick_completion(&prompt, PLAN_MAX_TOKENS),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "Plan completion failed, using fallback plan");
                return RouterPlan::fallback();
            }
            Err(_) => {
                warn!("Plan completion timed out, using fallback plan");
                return RouterPlan::fallback();
            }
        };
        let plan = parse_plan(&raw);
        debug!(
            use_retrieval = plan.use_retrieval,
            tool_calls = plan.tool_calls.len(),
            "Plan produced"
        );
        plan
    }

    /// Invoke the planned calls in order. Each call resolves its name
    /// against registry ∪ ad-hoc tools and runs under its own timeout.
    pub async fn invoke(
        &self,
        user_id: &str,
        message: &str,
        calls: &[ToolCall],
        ad_hoc_tools: &[ToolDefinition],
    ) -> Vec<ToolInvocationResult> {
        let mut available: HashMap<String, ToolDefinition> = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        for tool in ad_hoc_tools {
            available.insert(tool.name.clone(), tool.clone());
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(tool) = available.get(&call.name) else {
                results.push(ToolInvocationResult::failure(&call.name, "tool_not_found"));
                continue;
            };
            results.push(self.invoke_one(user_id, message, call, tool).await);
        }
        results
    }

    async fn invoke_one(
        &self,
        user_id: &str,
        message: &str,
        call: &ToolCall,
        tool: &ToolDefinition,
    ) -> ToolInvocationResult {
        let payload = CallbackPayload {
            user_id,
            message,
            arguments: call.arguments.clone().unwrap_or(Value::Object(Default::default())),
        };
        let request = self
            .client
            .post(&tool.callback_url)
            .timeout(self.callback_timeout)
            .json(&payload)
            .send();

        match timeout(self.callback_timeout, request).await {
            Ok(Ok(resp)) if resp.status().is_success() => match resp.text().await {
                Ok(content) => ToolInvocationResult::success(&call.name, content),
                Err(e) => ToolInvocationResult::failure(&call.name, e.to_string()),
            },
            Ok(Ok(resp)) => ToolInvocationResult::failure(
                &call.name,
                format!("callback returned status {}", resp.status()),
            ),
            Ok(Err(e)) => ToolInvocationResult::failure(&call.name, e.to_string()),
            Err(_) => ToolInvocationResult::failure(
                &call.name,
                format!("timed out after {}s", self.callback_timeout.as_secs()),
            ),
        }
    }
}

/// The Swedish planning prompt shown to the decision model.
fn plan_prompt(message: &str, catalog: &[ToolDefinition]) -> String {
    let tools_spec = if catalog.is_empty() {
        "- (inga verktyg registrerade)".to_string()
    } else {
        catalog
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Du är en router som får ett användarmeddelande och en lista med verktyg (funktioner).\n\
         Bestäm en plan:\n\
         - use_brain: true/false om vi bör hämta kontext från minnesdatabasen\n\
         - tool_calls: en lista på verktyg som ska anropas (kan vara tom). \
         Skriv bara verktygsnamn som finns i listan.\n\n\
         Verktyg:\n{tools_spec}\n\n\
         Meddelande: \"{message}\"\n\n\
         Svara ENDAST med JSON på formen:\n\
         {{\"use_brain\": true|false, \"tool_calls\": [{{\"name\": \"...\"}}]}}"
    )
}

/// Parse the model's plan JSON. Anything unparseable yields the
/// fail-open fallback; missing keys take their defaults.
fn parse_plan(raw: &str) -> RouterPlan {
    let parsed: Option<Value> = serde_json::from_str(raw)
        .ok()
        .or_else(|| extract_json_object(raw).and_then(|s| serde_json::from_str(s).ok()));
    let Some(value) = parsed else {
        return RouterPlan::fallback();
    };

    let use_retrieval = value
        .get("use_brain")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let tool_calls = value
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc.get("name")?.as_str()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    Some(ToolCall {
                        name: name.to_string(),
                        arguments: tc.get("arguments").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    RouterPlan {
        use_retrieval,
        tool_calls,
    }
}

/// The outermost `{...}` span in a response that wraps its JSON in prose.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Join the successful, non-empty results into the block appended to the
/// outbound generation prompt. `None` when nothing usable came back.
pub fn join_successful(results: &[ToolInvocationResult]) -> Option<String> {
    let blocks: Vec<String> = results
        .iter()
        .filter(|r| r.ok)
        .filter_map(|r| {
            let content = r.content.as_deref()?.trim();
            (!content.is_empty()).then(|| format!("[TOOL:{}]\n{content}", r.name))
        })
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

/// Append tool results to the user's message for generation.
pub fn augment_prompt(message: &str, results: &[ToolInvocationResult]) -> String {
    match join_successful(results) {
        Some(joined) => {
            format!("{message}\n\nAnvänd följande verktygsresultat i ditt svar:\n{joined}")
        }
        None => message.to_string(),
    }
}
