//! Shell execution skills.
//!
//! Two skills with different security models:
//!
//! - `bash_safe`: POSIX tokenization + direct exec (no shell
//!   interpretation). Shell operators (`|`, `&&`, `>`, ...) do NOT work.
//!   Recommended for most use cases.
//! - `shell_UNSAFE`: hands the string to the system shell. Shell operators
//!   work; the name is intentionally alarming.
//!
//! Both share the permission settings: YOLO runs without prompting, TRUSTED
//! always asks for confirmation, SANDBOXED never gets them registered and,
//! as a defense-in-depth measure, both re-check the level at execution time
//! and refuse before anything is spawned.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::nexus3::permissions::PermissionLevel;
use crate::nexus3::skill::builtin::process::{run_command, SpawnMode, DEFAULT_TIMEOUT_SECS};
use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::Skill;
use crate::nexus3::types::ToolResult;

/// Execution-time permission re-check shared by every execution skill.
///
/// Returns the refusal result for sandboxed agents, or `None` when the
/// skill may proceed.
pub(crate) fn check_permission_level(
    services: &ServiceContainer,
    skill_name: &str,
) -> Option<ToolResult> {
    if services.permission_level() == PermissionLevel::Sandboxed {
        return Some(ToolResult::error(format!(
            "{} is disabled in SANDBOXED mode. This is a defense-in-depth \
             check - the skill should not be registered for sandboxed agents.",
            skill_name
        )));
    }
    None
}

fn command_parameters(command_description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": command_description,
            },
            "timeout": {
                "type": "integer",
                "description": "Timeout in seconds (default: 30, max: 300)",
                "default": DEFAULT_TIMEOUT_SECS,
            },
            "cwd": {
                "type": "string",
                "description": "Working directory for command (default: current)",
            }
        },
        "required": ["command"]
    })
}

/// Shared execute body for both spawn modes.
async fn execute_command_skill(
    services: &ServiceContainer,
    skill_name: &str,
    mode: SpawnMode,
    args: Value,
) -> ToolResult {
    if let Some(refusal) = check_permission_level(services, skill_name) {
        return refusal;
    }

    let command = match args.get("command").and_then(Value::as_str) {
        Some(cmd) if !cmd.is_empty() => cmd,
        _ => return ToolResult::error("Command is required"),
    };
    let timeout = args
        .get("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let cwd = args
        .get("cwd")
        .and_then(Value::as_str)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| services.cwd().to_path_buf());

    if services.permission_level().requires_confirmation() {
        let approved = services
            .confirm(&format!("Run command ({}): {}", skill_name, command))
            .await;
        if !approved {
            return ToolResult::error(format!("Confirmation declined for {}", skill_name));
        }
    }

    let token = services.turn_token();
    match run_command(mode, command, Some(&cwd), timeout, Some(&token)).await {
        Ok(output) => ToolResult::success(output.render()),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

/// Safe shell skill: commands are tokenized and executed without a shell.
///
/// Works: `ls -la /tmp`, `git status`, `python script.py --arg value`.
/// Does not work: pipes, chaining, redirects, variable expansion.
pub struct BashSafeSkill {
    services: Arc<ServiceContainer>,
}

impl BashSafeSkill {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Skill for BashSafeSkill {
    fn name(&self) -> &str {
        "bash_safe"
    }

    fn description(&self) -> &str {
        "Execute a command safely (no shell operators like | && >)"
    }

    fn parameters(&self) -> Value {
        command_parameters("Command to execute (shell operators like | && > do NOT work)")
    }

    async fn execute(&self, args: Value) -> ToolResult {
        execute_command_skill(&self.services, self.name(), SpawnMode::Argv, args).await
    }
}

/// UNSAFE shell skill: full shell interpretation.
///
/// Pipes, redirects, substitution, and glob expansion all work, which also
/// means malicious input can chain arbitrary commands. Registered only for
/// sufficiently privileged agents; the name is meant to make callers stop
/// and think.
pub struct ShellUnsafeSkill {
    services: Arc<ServiceContainer>,
}

impl ShellUnsafeSkill {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Skill for ShellUnsafeSkill {
    fn name(&self) -> &str {
        "shell_UNSAFE"
    }

    fn description(&self) -> &str {
        "Execute shell command with full shell features (pipes, redirects) - USE WITH CAUTION"
    }

    fn parameters(&self) -> Value {
        command_parameters("Shell command (supports | && > etc. but UNSAFE with untrusted input)")
    }

    async fn execute(&self, args: Value) -> ToolResult {
        execute_command_skill(&self.services, self.name(), SpawnMode::Shell, args).await
    }
}

/// Factory for `bash_safe`. Yields nothing for sandboxed agents.
pub fn bash_safe_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    if !services.permission_level().allows_execution() {
        return None;
    }
    Some(Arc::new(BashSafeSkill::new(Arc::clone(services))))
}

/// Factory for `shell_UNSAFE`. Yields nothing for sandboxed agents.
pub fn shell_unsafe_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    if !services.permission_level().allows_execution() {
        return None;
    }
    Some(Arc::new(ShellUnsafeSkill::new(Arc::clone(services))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn services(level: PermissionLevel) -> Arc<ServiceContainer> {
        Arc::new(ServiceContainer::for_level(PathBuf::from("/tmp"), level))
    }

    #[tokio::test]
    async fn test_sandboxed_refusal_names_skill_and_mode() {
        // Exercise the defense-in-depth path by constructing the skill
        // directly, as if it had been registered by mistake.
        let skill = ShellUnsafeSkill::new(services(PermissionLevel::Sandboxed));
        let result = skill.execute(json!({"command": "echo hi"})).await;
        assert!(result.is_error());
        assert!(result.text().contains("shell_UNSAFE"));
        assert!(result.text().contains("SANDBOXED"));
    }

    #[tokio::test]
    async fn test_factories_skip_sandboxed() {
        assert!(bash_safe_factory(&services(PermissionLevel::Sandboxed)).is_none());
        assert!(shell_unsafe_factory(&services(PermissionLevel::Sandboxed)).is_none());
        assert!(bash_safe_factory(&services(PermissionLevel::Trusted)).is_some());
        assert!(shell_unsafe_factory(&services(PermissionLevel::Yolo)).is_some());
    }

    #[tokio::test]
    async fn test_bash_safe_runs_command() {
        let skill = BashSafeSkill::new(services(PermissionLevel::Yolo));
        let result = skill.execute(json!({"command": "echo hello"})).await;
        assert!(!result.is_error());
        assert!(result.text().contains("hello"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let skill = BashSafeSkill::new(services(PermissionLevel::Yolo));
        let result = skill.execute(json!({"command": ""})).await;
        assert!(result.is_error());
    }
}
