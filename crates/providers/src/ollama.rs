//! Ollama HTTP client.
//!
//! Implements three collaborator capabilities against one server:
//! [`Generator`] (NDJSON streaming generation on the main model),
//! [`ContextDecision`] (JA/NEJ context gate on the lightweight model), and
//! [`QuickCompletion`] (one-shot structured decisions, also on the
//! lightweight model). Also provides warmup, embeddings, and model listing.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use minne_core::error::ProviderError;
use minne_core::generation::{ContextDecision, GenerationRequest, Generator, QuickCompletion};
use minne_config::OllamaConfig;

use crate::think_filter::filter_stream;

/// Keep the main model resident between requests.
const KEEP_ALIVE: &str = "10m";
/// The decision model can be evicted sooner.
const DECISION_KEEP_ALIVE: &str = "5m";
/// Minimum interval between warmup pings.
const WARMUP_INTERVAL: Duration = Duration::from_secs(30);

const NUM_PREDICT: u32 = 1024;
const NUM_CTX: u32 = 2048;

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    decision_model: String,
    embedding_model: String,
    strip_think: bool,
    decision_timeout: Duration,
    last_warmup: Mutex<Option<Instant>>,
}

#[derive(Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    think: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    num_ctx: u32,
}

/// One NDJSON line of a streaming `/api/generate` response.
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Body of a non-streaming `/api/generate` response.
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct EmbeddingPayload<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            decision_model: config.decision_model.clone(),
            embedding_model: config.embedding_model.clone(),
            strip_think: config.strip_think,
            decision_timeout: Duration::from_secs(config.decision_timeout_secs),
            last_warmup: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Ping the main model so the first real request doesn't pay the load
    /// cost. Re-warms at most every 30 seconds; failures are logged, never
    /// propagated.
    pub async fn warmup(&self, force: bool) {
        let mut last = self.last_warmup.lock().await;
        if !force {
            if let Some(at) = *last {
                if at.elapsed() < WARMUP_INTERVAL {
                    return;
                }
            }
        }
        let payload = GeneratePayload {
            model: &self.model,
            prompt: "OK",
            stream: false,
            keep_alive: KEEP_ALIVE,
            think: false,
            options: GenerateOptions {
                temperature: 0.0,
                num_predict: 1,
                num_ctx: NUM_CTX,
            },
            system: None,
        };
        match self
            .client
            .post(self.url("/api/generate"))
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                *last = Some(Instant::now());
                debug!(model = %self.model, "Model warmed up");
            }
            Ok(resp) => {
                warn!(model = %self.model, status = %resp.status(), "Warmup returned non-success");
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Warmup failed");
            }
        }
    }

    /// Generate an embedding vector for the given text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let payload = EmbeddingPayload {
            model: &self.embedding_model,
            prompt: text,
        };
        let resp = self
            .client
            .post(self.url("/api/embeddings"))
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !resp.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: resp.status().as_u16(),
                message: "embedding request failed".into(),
            });
        }
        let body: EmbeddingResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(body.embedding)
    }

    /// List the model names known to the server.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !resp.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: resp.status().as_u16(),
                message: "model listing failed".into(),
            });
        }
        let body: TagsResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    /// One-shot completion against the decision model.
    async fn decision_completion(
        &self,
        prompt: &str,
        max_tokens: u32,
        num_ctx: u32,
    ) -> Result<String, ProviderError> {
        let payload = GeneratePayload {
            model: &self.decision_model,
            prompt,
            stream: false,
            keep_alive: DECISION_KEEP_ALIVE,
            think: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: max_tokens,
                num_ctx,
            },
            system: None,
        };
        let resp = self
            .client
            .post(self.url("/api/generate"))
            .timeout(self.decision_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !resp.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: resp.status().as_u16(),
                message: "decision request failed".into(),
            });
        }
        let body: GenerateResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(body.response.trim().to_string())
    }
}

#[async_trait]
impl Generator for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        let prompt = build_prompt(&request.prompt, request.context.as_deref());
        let system = build_system(request.system_prompt.as_deref());
        let payload = GeneratePayload {
            model: &self.model,
            prompt: &prompt,
            stream: true,
            keep_alive: KEEP_ALIVE,
            think: false,
            options: GenerateOptions {
                temperature: 0.7,
                num_predict: NUM_PREDICT,
                num_ctx: NUM_CTX,
            },
            system: Some(&system),
        };

        let resp = self
            .client
            .post(self.url("/api/generate"))
            .json(&payload)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !resp.status().is_success() {
            let status_code = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(ProviderError::ApiError {
                status_code,
                message,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut line_buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StreamChunk>(line) {
                        Ok(parsed) => {
                            if !parsed.response.is_empty()
                                && tx.send(Ok(parsed.response)).await.is_err()
                            {
                                return;
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "Skipping malformed stream line");
                        }
                    }
                }
            }
        });

        Ok(filter_stream(rx, self.strip_think))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Ok(resp.status().is_success())
    }
}

#[async_trait]
impl ContextDecision for OllamaClient {
    async fn needs_context(&self, message: &str) -> Result<bool, ProviderError> {
        // Trivially short messages never need memory lookup.
        if message.trim().chars().count() < 2 {
            return Ok(false);
        }
        let prompt = decision_prompt(message);
        let answer = self.decision_completion(&prompt, 10, 1024).await?;
        Ok(parse_decision(&answer))
    }
}

#[async_trait]
impl QuickCompletion for OllamaClient {
    async fn quick_completion(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        self.decision_completion(prompt, max_tokens, NUM_CTX).await
    }
}

/// Assemble the outbound prompt. Context (when present) is prepended as a
/// labeled block so the model can separate memory from the live turn.
fn build_prompt(message: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => {
            format!("Context: {ctx}\n\nAnvändare: {message}\nAssistent:")
        }
        _ => format!("Användare: {message}\nAssistent:"),
    }
}

/// The system prompt always carries today's date so the model can resolve
/// relative Swedish time words ("idag", "igår") correctly.
fn build_system(configured: Option<&str>) -> String {
    let today = chrono::Local::now().format("%Y-%m-%d");
    match configured {
        Some(s) if !s.is_empty() => format!("{s}\n\nDagens datum: {today}"),
        _ => format!("Dagens datum: {today}"),
    }
}

fn decision_prompt(message: &str) -> String {
    format!(
        "Du ska avgöra om följande meddelande behöver information från en \
         historisk databas eller kan besvaras direkt.\n\n\
         Meddelande: \"{message}\"\n\n\
         Svara NEJ endast för enkla hälsningar och allmänna fraser som \
         \"Hej\", \"Tack\", \"Hur mår du?\".\n\n\
         Svara JA för frågor om åsikter, produkter, specifika namn eller \
         projekt, tidigare diskussioner, uppföljningsfrågor och allt som \
         kan referera till tidigare konversation.\n\n\
         Exempel:\n\
         \"Vad tycker du om produkten?\" → JA\n\
         \"Vad vet du om bygger.ai?\" → JA\n\
         \"Vilken plattform?\" → JA\n\
         \"Hej\" → NEJ\n\n\
         Svara endast JA eller NEJ:"
    )
}

/// Interpret the decision model's answer. Anything containing "JA" counts
/// as yes; garbage counts as no here, the caller applies its own fail-open
/// policy on transport errors.
fn parse_decision(answer: &str) -> bool {
    answer.to_uppercase().contains("JA")
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}
