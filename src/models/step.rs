//! Step definitions — the unit of work inside a workflow.
//!
//! A [`Step`] carries a `step_type` tag plus an untyped `config` object, the
//! same way the wire format in the workflow definition does (config schema
//! depends on `step_type`). [`StepConfig::parse`] projects the untyped JSON
//! into one of the typed config structs so the dispatcher never matches on
//! raw JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Result};

/// Which kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ApiCall,
    PythonScript,
    Condition,
    Approval,
    Notification,
    DataTransform,
}

/// Retry policy attached to a step. Consulted by the graph engine around the
/// dispatcher call (`engine::graph`), not by the dispatcher itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_seconds: 0,
        }
    }
}

/// A single step in a workflow's ordered step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub workflow_id: String,
    pub order: i64,
    pub name: String,
    pub step_type: StepType,
    pub config: serde_json::Value,
    /// Required for `python_script`, ignored otherwise.
    #[serde(default)]
    pub code: Option<String>,
    /// local name -> workflow variable name
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// workflow variable name -> "output.path.to.key"
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    /// Optional per-step gate expression, evaluated before dispatch.
    #[serde(default)]
    pub condition: Option<String>,
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Step {}

impl PartialOrd for Step {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Step {
    /// Steps are ordered by `order`; ties broken by `id` (§3). Order need
    /// not be contiguous.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order).then_with(|| self.id.cmp(&other.id))
    }
}

// ---- per-step-type config schemas (§6) ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    Query,
    Header,
}

/// Authentication parameters for an `api_call` step (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    ApiKey {
        key: String,
        #[serde(rename = "in", default = "default_api_key_location")]
        location: ApiKeyLocation,
        #[serde(default = "default_api_key_name")]
        name: String,
    },
    OAuth {
        token: String,
    },
    Jwt {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

fn default_api_key_location() -> ApiKeyLocation {
    ApiKeyLocation::Header
}
fn default_api_key_name() -> String {
    "api_key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub delay_seconds: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,
}

fn default_backoff_factor() -> f64 {
    1.0
}
fn default_retry_on_status() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for ApiRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_seconds: 0.0,
            backoff_factor: default_backoff_factor(),
            retry_on_status: default_retry_on_status(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: default_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTransform {
    pub extract: Option<String>,
    pub map: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallConfig {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub query_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: ApiRetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub response: Option<ResponseTransform>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PythonScriptConfig {
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallConfig {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub condition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub message: Option<String>,
    pub approvers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Email,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Remaining textual fields (`to`, `subject`, `message`, ...), each run
    /// through the variable formatter before dispatch.
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    pub target: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTransformConfig {
    pub rules: Vec<TransformRule>,
}

/// Typed projection of [`Step::config`], selected by [`StepType`].
#[derive(Debug, Clone)]
pub enum StepConfig {
    LlmCall(LlmCallConfig),
    ApiCall(ApiCallConfig),
    PythonScript(PythonScriptConfig),
    Condition(ConditionConfig),
    Approval(ApprovalConfig),
    Notification(NotificationConfig),
    DataTransform(DataTransformConfig),
}

impl StepConfig {
    pub fn parse(step_type: StepType, config: &serde_json::Value) -> Result<Self> {
        let err = |e: serde_json::Error| {
            EngineError::Validation(format!("invalid config for {:?}: {}", step_type, e))
        };
        Ok(match step_type {
            StepType::LlmCall => StepConfig::LlmCall(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::ApiCall => StepConfig::ApiCall(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::PythonScript => StepConfig::PythonScript(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::Condition => StepConfig::Condition(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::Approval => StepConfig::Approval(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::Notification => StepConfig::Notification(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
            StepType::DataTransform => StepConfig::DataTransform(
                serde_json::from_value(config.clone()).map_err(err)?,
            ),
        })
    }
}
