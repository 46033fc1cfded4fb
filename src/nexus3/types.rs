//! Core result type shared by every skill.
//!
//! A skill's `execute()` never returns `Err`: every outcome, including bad
//! arguments, permission refusals, and upstream API failures, is reported
//! through [`ToolResult`] so the agent can relay it to the model verbatim.

use serde::{Deserialize, Serialize};

/// Outcome of one skill invocation.
///
/// Two shapes only: plain-text success output or a plain-text error. No
/// structured payload is carried; skills format whatever the model should
/// see into the string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResult {
    /// The skill completed; `output` is fed back to the model.
    Success { output: String },
    /// The skill failed; `error` is fed back to the model.
    Failure { error: String },
}

impl ToolResult {
    /// Convenience constructor for successful execution.
    pub fn success(output: impl Into<String>) -> Self {
        ToolResult::Success {
            output: output.into(),
        }
    }

    /// Convenience constructor for failed execution.
    pub fn error(error: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
        }
    }

    /// True when this result is the failure shape.
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Failure { .. })
    }

    /// The text the model should see, regardless of shape.
    pub fn text(&self) -> &str {
        match self {
            ToolResult::Success { output } => output,
            ToolResult::Failure { error } => error,
        }
    }
}
