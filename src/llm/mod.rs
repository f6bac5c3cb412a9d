//! The minimal LLM client used by `llm_call` steps (§4.5). Trimmed down
//! from a multi-provider router to the single trait the dispatcher needs;
//! provider selection happens once at startup based on which API key is
//! configured.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// What the dispatcher sends to a provider for an `llm_call` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

/// What a provider returns, folded into the step's `output` (§4.5:
/// `{response, prompt, system_prompt, model, raw_response}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// A client that always fails. Used when no provider API key is
/// configured so the engine still starts; an `llm_call` step simply fails
/// with a clear error instead of the process refusing to boot.
pub struct UnconfiguredLlmClient;

#[async_trait]
impl LlmClient for UnconfiguredLlmClient {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(crate::EngineError::Validation(
            "no LLM provider configured: set OPENAI_API_KEY or ANTHROPIC_API_KEY".into(),
        ))
    }
}
