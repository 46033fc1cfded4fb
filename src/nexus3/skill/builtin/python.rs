//! Python snippet execution skill.
//!
//! Runs a code string through the interpreter with the same sanitized
//! environment, timeout, and process-group kill contract as the shell
//! skills. The code is passed via `python3 -c`, argv mode, so nothing is
//! shell-interpreted.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::nexus3::skill::builtin::bash::check_permission_level;
use crate::nexus3::skill::builtin::process::{run_command, SpawnMode, DEFAULT_TIMEOUT_SECS};
use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::Skill;
use crate::nexus3::types::ToolResult;

pub struct RunPythonSkill {
    services: Arc<ServiceContainer>,
}

impl RunPythonSkill {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Skill for RunPythonSkill {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "Run a Python code snippet and return its output"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to execute",
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 300)",
                    "default": DEFAULT_TIMEOUT_SECS,
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        if let Some(refusal) = check_permission_level(&self.services, self.name()) {
            return refusal;
        }

        let code = match args.get("code").and_then(Value::as_str) {
            Some(code) if !code.is_empty() => code,
            _ => return ToolResult::error("Code is required"),
        };
        let timeout = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        if self.services.permission_level().requires_confirmation() {
            let preview: String = code.chars().take(120).collect();
            if !self
                .services
                .confirm(&format!("Run Python code: {}", preview))
                .await
            {
                return ToolResult::error("Confirmation declined for run_python");
            }
        }

        // argv mode would re-tokenize the code string, so build the argv
        // by hand through shell-words-safe quoting: pass the code as one
        // argument to the interpreter.
        let command = format!("python3 -c {}", shell_words::quote(code));
        let token = self.services.turn_token();
        let cwd = self.services.cwd().to_path_buf();
        match run_command(SpawnMode::Argv, &command, Some(&cwd), timeout, Some(&token)).await {
            Ok(output) => ToolResult::success(output.render()),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// Factory for `run_python`. Yields nothing for sandboxed agents.
pub fn run_python_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    if !services.permission_level().allows_execution() {
        return None;
    }
    Some(Arc::new(RunPythonSkill::new(Arc::clone(services))))
}
