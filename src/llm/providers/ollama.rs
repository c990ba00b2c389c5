use crate::config::LlmConfig;
use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    prompt: String,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        let client = reqwest::Client::builder()
            .timeout(config.timeout() * 2)
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> OllamaRequest {
        // Ollama's generate endpoint takes a single prompt
        let prompt = if request.system.is_empty() {
            request.user.clone()
        } else {
            format!("{}\n\n{}", request.system, request.user)
        };

        OllamaRequest {
            model: self.model.clone(),
            prompt,
            temperature: self.temperature,
            stream: false,
            format: request.json.then_some("json"),
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = self.build_request(request);

        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}",
                status
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response from Ollama: {}", response_text);

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {}", e);
            LlmError::ResponseError(format!("Failed to parse Ollama response: {}", e))
        })?;

        debug!(
            "Ollama reply from {:?} (done: {:?})",
            ollama_response.model, ollama_response.done
        );

        if ollama_response.response.trim().is_empty() {
            return Err(LlmError::ResponseError("Empty response from Ollama".to_string()));
        }

        Ok(ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_user_text_share_one_prompt() {
        let provider = OllamaProvider::new(&LlmConfig {
            backend: "ollama".to_string(),
            ..LlmConfig::default()
        })
        .unwrap();

        let body = provider.build_request(&CompletionRequest {
            system: "You classify questions.".to_string(),
            user: "Query: count users".to_string(),
            json: true,
        });

        assert_eq!(provider.api_url, "http://localhost:11434/api/generate");
        assert!(body.prompt.starts_with("You classify questions."));
        assert!(body.prompt.ends_with("Query: count users"));
        assert_eq!(body.format, Some("json"));
        assert!(!body.stream);
    }
}
