//! Minimal Anthropic messages-API client.

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmRequest, LlmResponse};
use crate::{EngineError, Result};

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            default_model: "claude-3-5-sonnet-latest".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut body = json!({
            "model": model,
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(EngineError::HttpError {
                status: status.as_u16(),
                body: raw.to_string(),
            });
        }

        let text = raw["content"][0]["text"].as_str().unwrap_or_default().to_string();

        Ok(LlmResponse { text, model, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_claude_3_5_sonnet() {
        let client = AnthropicClient::new("sk-ant-test");
        assert_eq!(client.default_model, "claude-3-5-sonnet-latest");
    }
}
