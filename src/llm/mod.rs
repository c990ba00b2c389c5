pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
    Timeout(Duration),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
            LlmError::Timeout(deadline) => {
                write!(f, "LLM call exceeded its {}s deadline", deadline.as_secs_f64())
            }
        }
    }
}

impl Error for LlmError {}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the backend for a JSON object reply when it supports that.
    pub json: bool,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    fn name(&self) -> &str;

    /// Providers that can never answer let callers skip straight to their fallback.
    fn is_available(&self) -> bool {
        true
    }
}

/// Result of one deadline-bounded call to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(String),
    Failed(LlmError),
    TimedOut(Duration),
}

impl CompletionOutcome {
    pub fn into_result(self) -> Result<String, LlmError> {
        match self {
            CompletionOutcome::Completed(text) => Ok(text),
            CompletionOutcome::Failed(err) => Err(err),
            CompletionOutcome::TimedOut(deadline) => Err(LlmError::Timeout(deadline)),
        }
    }
}

pub struct LlmManager {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
    calls: AtomicU64,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Arc<dyn CompletionProvider> = match config.backend.as_str() {
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            "offline" => Arc::new(providers::offline::OfflineProvider::new()),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self::with_provider(provider, config.timeout()))
    }

    pub fn with_provider(provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            calls: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Number of calls that actually reached the provider.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Issues one call bounded by the configured deadline. Never retries.
    pub async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome {
        if !self.provider.is_available() {
            return CompletionOutcome::Failed(LlmError::ConfigError(format!(
                "{} backend is not available",
                self.provider.name()
            )));
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!("Sending completion request to {}", self.provider.name());

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(text)) => {
                info!("Completion received from {} ({} chars)", self.provider.name(), text.len());
                CompletionOutcome::Completed(text)
            }
            Ok(Err(err)) => {
                warn!("Completion failed on {}: {}", self.provider.name(), err);
                CompletionOutcome::Failed(err)
            }
            Err(_) => {
                warn!(
                    "Completion on {} timed out after {:?}",
                    self.provider.name(),
                    self.timeout
                );
                CompletionOutcome::TimedOut(self.timeout)
            }
        }
    }
}

/// Strips a surrounding markdown code fence (```json, ```sql or bare ```), if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
