use crate::config::LlmConfig;
use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// OpenAI-compatible chat completions endpoint.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct PromptRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for remote LLM provider".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for remote LLM provider".to_string())
        })?;

        // The manager enforces the call deadline; this only bounds a stuck socket.
        let client = reqwest::Client::builder()
            .timeout(config.timeout() * 2)
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> PromptRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.user.clone(),
        });

        PromptRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: request.json.then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[async_trait]
impl CompletionProvider for RemoteLlmProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = self.build_request(request);
        debug!("Sending chat completion to {} with model {}", self.api_url, self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            error!("Completion API responded with status code: {}", response.status());
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                response.status()
            )));
        }

        let prompt_response: PromptResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            backend: "remote".to_string(),
            api_url: Some("http://localhost:9/v1/chat/completions".to_string()),
            api_key: Some("test-key".to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn requires_url_and_key() {
        let mut missing_key = config();
        missing_key.api_key = None;
        assert!(matches!(
            RemoteLlmProvider::new(&missing_key),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[test]
    fn json_requests_ask_for_a_json_object() {
        let provider = RemoteLlmProvider::new(&config()).unwrap();
        let body = provider.build_request(&CompletionRequest {
            system: "classify".to_string(),
            user: "Query: show users".to_string(),
            json: true,
        });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"].as_array().unwrap().len(), 2);
        assert_eq!(value["response_format"]["type"], "json_object");

        let plain = provider.build_request(&CompletionRequest {
            system: String::new(),
            user: "hi".to_string(),
            json: false,
        });
        let value = serde_json::to_value(&plain).unwrap();
        assert_eq!(value["messages"].as_array().unwrap().len(), 1);
        assert!(value.get("response_format").is_none());
    }
}
