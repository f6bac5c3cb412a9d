//! Environment-driven configuration, read once at startup (§A). Centralizes
//! the `env::var` calls that would otherwise be scattered across the
//! binaries.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub log_level: String,
    /// Default timeout for a `python_script` step (§4.4: default 300s).
    pub sandbox_timeout: Duration,
    /// Interpreter used to run `python_script` step bodies.
    pub sandbox_interpreter: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            sandbox_timeout: Duration::from_secs(
                env::var("SANDBOX_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            sandbox_interpreter: env::var("SANDBOX_INTERPRETER")
                .unwrap_or_else(|_| "python3".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
