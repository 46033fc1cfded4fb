//! Agent permission levels.
//!
//! Every agent is bound to a [`PermissionLevel`] at creation time and keeps
//! it for its whole life. The level gates three classes of operations:
//!
//! | Level       | Writes outside cwd | Command execution | Network skills |
//! |-------------|--------------------|-------------------|----------------|
//! | `Sandboxed` | no                 | no                | no             |
//! | `Trusted`   | with confirmation  | with confirmation | yes            |
//! | `Yolo`      | yes                | yes               | yes            |
//!
//! The sandbox check is applied in three places: at registration time
//! (execution skills are simply not registered for sandboxed agents), at
//! dispatch time, and again inside each execution skill right before the
//! subprocess is spawned. All three checks must stay in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse privilege level bound to an agent at creation.
///
/// Ordered by privilege: `Sandboxed < Trusted < Yolo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
    /// No filesystem writes outside the agent cwd, no command execution,
    /// no network-using skills.
    Sandboxed,
    /// Privileged operations are allowed after an interactive confirmation.
    Trusted,
    /// Everything allowed without prompting.
    Yolo,
}

impl PermissionLevel {
    /// Whether execution skills (subprocess spawning) may ever run at this level.
    pub fn allows_execution(&self) -> bool {
        !matches!(self, PermissionLevel::Sandboxed)
    }

    /// Whether network-using external skills (e.g. GitLab) are available.
    pub fn allows_network(&self) -> bool {
        !matches!(self, PermissionLevel::Sandboxed)
    }

    /// Whether privileged operations need an interactive confirmation first.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, PermissionLevel::Trusted)
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Sandboxed => write!(f, "SANDBOXED"),
            PermissionLevel::Trusted => write!(f, "TRUSTED"),
            PermissionLevel::Yolo => write!(f, "YOLO"),
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandboxed" => Ok(PermissionLevel::Sandboxed),
            "trusted" => Ok(PermissionLevel::Trusted),
            "yolo" => Ok(PermissionLevel::Yolo),
            other => Err(format!("unknown permission level: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_monotone_in_privilege() {
        assert!(PermissionLevel::Sandboxed < PermissionLevel::Trusted);
        assert!(PermissionLevel::Trusted < PermissionLevel::Yolo);
    }

    #[test]
    fn test_parse_roundtrip() {
        for level in [
            PermissionLevel::Sandboxed,
            PermissionLevel::Trusted,
            PermissionLevel::Yolo,
        ] {
            let parsed: PermissionLevel = level.to_string().parse().unwrap();
            assert_eq!(parsed, level);
        }
    }

    #[test]
    fn test_sandboxed_gates() {
        assert!(!PermissionLevel::Sandboxed.allows_execution());
        assert!(!PermissionLevel::Sandboxed.allows_network());
        assert!(PermissionLevel::Trusted.requires_confirmation());
        assert!(!PermissionLevel::Yolo.requires_confirmation());
    }
}
