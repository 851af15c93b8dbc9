//! Scripted mock collaborators for orchestrator tests.
//!
//! Mocks return pre-programmed responses in sequence and record what they
//! were asked, so tests can assert on the exact requests the flow
//! produced. Panics on over-consumption — a test that generates more
//! than it scripted is a broken test.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use minne_config::AppConfig;
use minne_core::document::{
    DocumentMetadata, RetrievalQuery, RetrievedDocument, Retriever,
};
use minne_core::error::{ProviderError, RetrievalError};
use minne_core::generation::{ContextDecision, GenerationRequest, Generator, QuickCompletion};
use minne_memory::coordinator::TaskCoordinator;

/// Generator that plays back scripted chunk sequences, one per call,
/// recording every request it receives.
pub struct SequentialMockGenerator {
    scripts: Mutex<Vec<Vec<Result<String, ProviderError>>>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl SequentialMockGenerator {
    pub fn scripted(scripts: Vec<Vec<&str>>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|chunks| chunks.into_iter().map(|c| Ok(c.to_string())).collect())
            .collect();
        Self {
            scripts: Mutex::new(scripts),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A generator scripted for exactly one call.
    pub fn single(chunks: &[&str]) -> Self {
        Self::scripted(vec![chunks.to_vec()])
    }

    /// One call that streams `chunks` and then fails with `error`.
    pub fn failing_after(chunks: &[&str], error: ProviderError) -> Self {
        let mut script: Vec<Result<String, ProviderError>> =
            chunks.iter().map(|c| Ok(c.to_string())).collect();
        script.push(Err(error));
        Self {
            scripts: Mutex::new(vec![script]),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for SequentialMockGenerator {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<Result<String, ProviderError>>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = {
            let mut count = self.call_count.lock().unwrap();
            let scripts = self.scripts.lock().unwrap();
            let script = scripts
                .get(*count)
                .unwrap_or_else(|| {
                    panic!("SequentialMockGenerator exhausted after {} calls", *count)
                })
                .clone();
            *count += 1;
            script
        };
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for item in script {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Context decision with a fixed answer.
pub struct StaticDecision(pub bool);

#[async_trait]
impl ContextDecision for StaticDecision {
    async fn needs_context(&self, _message: &str) -> Result<bool, ProviderError> {
        Ok(self.0)
    }
}

/// Planner that answers every quick completion with the same text.
pub struct SequentialMockPlanner {
    response: String,
}

impl SequentialMockPlanner {
    pub fn always(response: &str) -> Self {
        Self {
            response: response.to_string(),
        }
    }
}

#[async_trait]
impl QuickCompletion for SequentialMockPlanner {
    async fn quick_completion(
        &self,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, ProviderError> {
        Ok(self.response.clone())
    }
}

/// Retriever that serves a fixed document pool and records every search
/// and ingest it sees.
pub struct RecordingRetriever {
    documents: Vec<RetrievedDocument>,
    searches: Mutex<Vec<RetrievalQuery>>,
    ingested: Mutex<Vec<(String, String, DocumentMetadata)>>,
}

impl RecordingRetriever {
    pub fn empty() -> Self {
        Self::from_documents(Vec::new())
    }

    /// Pool entries as `(text, content_type)` pairs.
    pub fn with_documents(entries: Vec<(&str, &str)>) -> Self {
        let documents = entries
            .into_iter()
            .map(|(text, content_type)| RetrievedDocument {
                text: text.to_string(),
                metadata: DocumentMetadata {
                    content_type: Some(content_type.to_string()),
                    ..Default::default()
                },
            })
            .collect();
        Self::from_documents(documents)
    }

    fn from_documents(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            searches: Mutex::new(Vec::new()),
            ingested: Mutex::new(Vec::new()),
        }
    }

    pub fn searches(&self) -> Vec<RetrievalQuery> {
        self.searches.lock().unwrap().clone()
    }

    pub fn ingested(&self) -> Vec<(String, String, DocumentMetadata)> {
        self.ingested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for RecordingRetriever {
    fn name(&self) -> &str {
        "recording_mock"
    }

    async fn search(
        &self,
        query: RetrievalQuery,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        self.searches.lock().unwrap().push(query);
        Ok(self.documents.clone())
    }

    async fn ingest(
        &self,
        user_id: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> Result<(), RetrievalError> {
        self.ingested
            .lock()
            .unwrap()
            .push((user_id.to_string(), content.to_string(), metadata));
        Ok(())
    }
}

/// Default config for orchestrator tests.
pub fn test_config() -> AppConfig {
    AppConfig::default()
}

/// Collect a response stream into one string. Panics on stream errors.
pub async fn drain(mut rx: mpsc::Receiver<Result<String, ProviderError>>) -> String {
    let mut out = String::new();
    while let Some(item) = rx.recv().await {
        out.push_str(&item.expect("stream chunk"));
    }
    out
}

/// Wait for the background task holding `key` to finish. The stream
/// channel closes only after the task was scheduled, so polling here is
/// race-free.
pub async fn wait_until_idle(coordinator: &TaskCoordinator, key: &str) {
    for _ in 0..400 {
        if !coordinator.is_busy(key) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("background task for {key} never finished");
}
