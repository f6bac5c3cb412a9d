//! Script Sandbox (C4, §4.4): executes an untrusted `python_script` step
//! body in an isolated child process and captures its result as structured
//! JSON.
//!
//! Security stance (§4.4): this isolates the parent process from crashes
//! and runaway loops. It does not attempt to contain malicious code.

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

pub struct ScriptSandbox {
    interpreter: String,
    timeout: Duration,
}

impl ScriptSandbox {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Runs `code` with `variables` available via `--variables-file` (§4.4
    /// protocol). Always removes both temp files on the way out, success or
    /// failure — `tempfile::NamedTempFile` ties that cleanup to drop.
    pub async fn run(
        &self,
        code: &str,
        variables: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<SandboxResult> {
        let mut script_file = tempfile::Builder::new()
            .prefix("step-")
            .suffix(".py")
            .tempfile()
            .map_err(EngineError::from)?;
        script_file
            .write_all(code.as_bytes())
            .map_err(EngineError::from)?;
        let script_path = script_file.path().to_owned();

        let mut vars_file = tempfile::Builder::new()
            .prefix("vars-")
            .suffix(".json")
            .tempfile()
            .map_err(EngineError::from)?;
        let vars_json = serde_json::to_vec(variables)?;
        vars_file.write_all(&vars_json).map_err(EngineError::from)?;
        let vars_path = vars_file.path().to_owned();

        let mut child = Command::new(&self.interpreter)
            .arg(&script_path)
            .arg("--variables-file")
            .arg(&vars_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::ScriptFailure(format!("failed to spawn interpreter: {e}")))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");

        let io_fut = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (stdout_res, stderr_res, status_res) = tokio::join!(
                stdout_pipe.read_to_end(&mut stdout_buf),
                stderr_pipe.read_to_end(&mut stderr_buf),
                child.wait(),
            );
            stdout_res.ok();
            stderr_res.ok();
            let status = status_res.map_err(|e| {
                EngineError::ScriptFailure(format!("failed to wait on interpreter: {e}"))
            })?;
            Ok::<_, EngineError>((stdout_buf, stderr_buf, status))
        };

        let outcome = timeout(self.timeout, io_fut).await;

        // script_file/vars_file are dropped (and thus deleted) here regardless
        // of outcome.
        let (stdout_buf, stderr_buf, status) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(interpreter = %self.interpreter, "script sandbox timed out, killing process tree");
                return Ok(SandboxResult {
                    success: false,
                    output: serde_json::Value::Null,
                    error: Some(format!(
                        "script timed out after {:.0}s",
                        self.timeout.as_secs_f64()
                    )),
                    logs: Vec::new(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_buf).trim().to_string();
        let stderr = String::from_utf8_lossy(&stderr_buf).to_string();
        let logs: Vec<String> = stderr.lines().map(str::to_string).collect();

        if !status.success() {
            let tail: String = logs.iter().rev().take(20).cloned().collect::<Vec<_>>().join("\n");
            return Ok(SandboxResult {
                success: false,
                output: serde_json::Value::Null,
                error: Some(if tail.is_empty() {
                    format!("interpreter exited with status {}", status)
                } else {
                    tail
                }),
                logs,
            });
        }

        let output = if stdout.is_empty() {
            serde_json::json!({"result": ""})
        } else {
            match serde_json::from_str::<serde_json::Value>(&stdout) {
                Ok(v) => v,
                Err(_) => {
                    info!("script stdout was not valid JSON, wrapping as raw result");
                    serde_json::json!({"result": stdout})
                }
            }
        };

        Ok(SandboxResult {
            success: true,
            output,
            error: None,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new("python3", Duration::from_secs(5))
    }

    #[tokio::test]
    #[ignore = "requires a python3 interpreter on PATH"]
    async fn runs_a_script_and_parses_json_stdout() {
        let code = r#"
import json
print(json.dumps({"n": 2}))
"#;
        let result = sandbox().run(code, &serde_json::Map::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, serde_json::json!({"n": 2}));
    }

    #[tokio::test]
    #[ignore = "requires a python3 interpreter on PATH"]
    async fn non_json_stdout_wraps_as_raw_result() {
        let code = r#"print("not json")"#;
        let result = sandbox().run(code, &serde_json::Map::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, serde_json::json!({"result": "not json"}));
    }

    #[tokio::test]
    #[ignore = "requires a python3 interpreter on PATH"]
    async fn nonzero_exit_reports_failure() {
        let code = r#"
import sys
sys.stderr.write("boom")
sys.exit(1)
"#;
        let result = sandbox().run(code, &serde_json::Map::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("boom"));
    }
}
