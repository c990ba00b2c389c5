use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
use async_trait::async_trait;

/// Backend used when no completion service is configured. Every caller takes its
/// deterministic fallback path, or reports a generation error where none exists.
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OfflineProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for OfflineProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::ConfigError(
            "No completion backend configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "offline"
    }

    fn is_available(&self) -> bool {
        false
    }
}
