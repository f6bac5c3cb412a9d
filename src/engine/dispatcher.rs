//! Step Dispatcher (C5, §4.5): one entry point, `dispatch_step`, that
//! branches on `step_type` and returns a uniform result shape so
//! `output_mapping` can address any step's result the same way.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::engine::api_client::ApiClient;
use crate::engine::condition::evaluate_condition;
use crate::engine::format::format_template;
use crate::engine::notifications::NotificationTransport;
use crate::engine::sandbox::ScriptSandbox;
use crate::llm::{LlmClient, LlmRequest};
use crate::models::step::{NotificationKind, Step, StepConfig, StepType};

/// `{ success, output: { … step-specific …, error? }, error?, logs? }`
/// (§4.5, §6).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl StepOutcome {
    fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            logs: Vec::new(),
        }
    }

    fn fail(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::json!({"error": error}),
            error: Some(error),
            logs: Vec::new(),
        }
    }
}

/// The collaborators a dispatch call needs. Held by the runner/graph and
/// threaded through one call at a time; none of them carry per-execution
/// state (§5's shared-resource policy).
pub struct DispatchContext {
    pub api_client: Arc<ApiClient>,
    pub sandbox: Arc<ScriptSandbox>,
    pub notifications: Arc<dyn NotificationTransport>,
    pub llm: Arc<dyn LlmClient>,
}

/// Computes the per-step input view `V'` (§4.5): `variables` merged with,
/// for each `(local, workflow)` in `input_mapping`, `V'[local] =
/// variables[workflow]`. Missing workflow names are tolerated.
pub fn project_inputs(
    variables: &serde_json::Map<String, serde_json::Value>,
    input_mapping: &HashMap<String, String>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut projected = variables.clone();
    for (local, workflow_name) in input_mapping {
        match variables.get(workflow_name) {
            Some(value) => {
                projected.insert(local.clone(), value.clone());
            }
            None => {
                tracing::warn!(local, workflow_name, "input_mapping: source variable not found");
            }
        }
    }
    projected
}

#[instrument(skip(step, view, ctx), fields(step_id = %step.id, step_type = ?step.step_type))]
pub async fn dispatch_step(
    step: &Step,
    view: &serde_json::Map<String, serde_json::Value>,
    ctx: &DispatchContext,
) -> StepOutcome {
    let config = match StepConfig::parse(step.step_type, &step.config) {
        Ok(c) => c,
        Err(e) => return StepOutcome::fail(e.to_string()),
    };

    match (step.step_type, config) {
        (StepType::PythonScript, StepConfig::PythonScript(_)) => {
            let code = match &step.code {
                Some(code) => code,
                None => return StepOutcome::fail("python_script step has no code".into()),
            };
            match ctx.sandbox.run(code, view).await {
                Ok(result) => StepOutcome {
                    success: result.success,
                    output: result.output,
                    error: result.error,
                    logs: result.logs,
                },
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        }

        (StepType::ApiCall, StepConfig::ApiCall(cfg)) => {
            let result = ctx.api_client.call(&cfg, view).await;
            StepOutcome {
                success: result.success,
                output: serde_json::to_value(&result.output).unwrap_or(serde_json::Value::Null),
                error: result.output.error.clone(),
                logs: Vec::new(),
            }
        }

        (StepType::LlmCall, StepConfig::LlmCall(cfg)) => {
            let prompt = format_template(&cfg.prompt, view);
            let system_prompt = cfg.system_prompt.as_ref().map(|s| format_template(s, view));
            let request = LlmRequest {
                prompt: prompt.clone(),
                system_prompt: system_prompt.clone(),
                model: cfg.model.clone(),
            };
            match ctx.llm.complete(request).await {
                Ok(response) => StepOutcome::ok(serde_json::json!({
                    "response": response.text,
                    "prompt": prompt,
                    "system_prompt": system_prompt,
                    "model": response.model,
                    "raw_response": response.raw,
                })),
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        }

        (StepType::Condition, StepConfig::Condition(cfg)) => {
            match evaluate_condition(&cfg.condition, view) {
                Ok(condition_met) => StepOutcome::ok(serde_json::json!({ "condition_met": condition_met })),
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        }

        (StepType::Approval, StepConfig::Approval(cfg)) => StepOutcome::ok(serde_json::json!({
            "waiting_approval": true,
            "message": cfg.message,
            "approvers": cfg.approvers,
        })),

        (StepType::Notification, StepConfig::Notification(cfg)) => {
            let subject = cfg
                .fields
                .get("subject")
                .and_then(|v| v.as_str())
                .map(|s| format_template(s, view))
                .unwrap_or_default();
            let message = cfg
                .fields
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| format_template(s, view))
                .unwrap_or_default();
            match cfg.kind {
                NotificationKind::Log | NotificationKind::Email => {
                    match ctx.notifications.send(&subject, &message).await {
                        Ok(()) => StepOutcome::ok(serde_json::json!({"dispatched": true})),
                        Err(e) => {
                            // Notification failures are reported but non-fatal by default (§4.5).
                            let mut outcome = StepOutcome::ok(serde_json::json!({"dispatched": false}));
                            outcome.error = Some(e.to_string());
                            outcome
                        }
                    }
                }
            }
        }

        (StepType::DataTransform, StepConfig::DataTransform(cfg)) => {
            let mut out = serde_json::Map::new();
            for rule in &cfg.rules {
                match evaluate_transform_expression(&rule.expression, view) {
                    Ok(value) => {
                        out.insert(rule.target.clone(), value);
                    }
                    Err(e) => return StepOutcome::fail(e.to_string()),
                }
            }
            StepOutcome::ok(serde_json::Value::Object(out))
        }

        (step_type, _) => StepOutcome::fail(format!("config did not match declared step_type {step_type:?}")),
    }
}

/// `data_transform` rules are deterministic projections/renames (§4.5): a
/// rule's expression is either a bare variable reference (rename) or a
/// template string to format. This keeps the transform's grammar tiny and
/// reuses the formatter rather than inventing a second evaluator.
fn evaluate_transform_expression(
    expression: &str,
    view: &serde_json::Map<String, serde_json::Value>,
) -> crate::Result<serde_json::Value> {
    let trimmed = expression.trim();
    let is_bare_name = !trimmed.is_empty()
        && trimmed.chars().next().unwrap().is_alphabetic()
        && trimmed.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_bare_name {
        return Ok(view.get(trimmed).cloned().unwrap_or(serde_json::Value::Null));
    }
    Ok(serde_json::Value::String(format_template(expression, view)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_inputs_merges_local_names_and_tolerates_missing() {
        let mut variables = serde_json::Map::new();
        variables.insert("workflow_var".into(), serde_json::json!(5));
        let mut mapping = HashMap::new();
        mapping.insert("local".to_string(), "workflow_var".to_string());
        mapping.insert("missing_local".to_string(), "no_such_var".to_string());
        let projected = project_inputs(&variables, &mapping);
        assert_eq!(projected.get("local"), Some(&serde_json::json!(5)));
        assert!(projected.get("missing_local").is_none());
        assert_eq!(projected.get("workflow_var"), Some(&serde_json::json!(5)));
    }

    #[test]
    fn transform_expression_renames_bare_variable() {
        let mut view = serde_json::Map::new();
        view.insert("n".into(), serde_json::json!(42));
        let v = evaluate_transform_expression("n", &view).unwrap();
        assert_eq!(v, serde_json::json!(42));
    }

    #[test]
    fn transform_expression_formats_templates() {
        let mut view = serde_json::Map::new();
        view.insert("name".into(), serde_json::json!("alpha"));
        let v = evaluate_transform_expression("hello {name}", &view).unwrap();
        assert_eq!(v, serde_json::json!("hello alpha"));
    }
}
