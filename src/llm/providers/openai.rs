//! Minimal OpenAI chat-completions client.

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmRequest, LlmResponse};
use crate::{EngineError, Result};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": model,
            "messages": messages,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let text = raw["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(LlmResponse { text, model, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_gpt_4o_mini() {
        let client = OpenAiClient::new("sk-test");
        assert_eq!(client.default_model, "gpt-4o-mini");
    }
}
