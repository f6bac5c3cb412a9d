//! Provider clients backing [`crate::llm::LlmClient`].

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
