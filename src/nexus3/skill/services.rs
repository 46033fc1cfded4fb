//! Shared services handed to skill factories.
//!
//! Skills do not read global state: everything they need (working
//! directory, permission level, external-API configuration, confirmation
//! channel) travels in one [`ServiceContainer`] built per agent at creation
//! time and shared by reference afterwards.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::nexus3::permissions::PermissionLevel;
use crate::nexus3::skill::vcs::config::GitLabConfig;

/// Asks the user to approve one privileged operation.
///
/// The terminal implementation goes through the pause/resume rendezvous in
/// [`terminal`](crate::nexus3::terminal); headless servers install a policy
/// implementation instead.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Returns true when the user approved the described action.
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Denies every confirmation request.
///
/// The default for server-mode agents: a TRUSTED agent with nobody at the
/// terminal cannot have its privileged operations approved.
pub struct DenyAll;

#[async_trait]
impl Confirmer for DenyAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Approves every confirmation request. Test and YOLO-preset helper.
pub struct ApproveAll;

#[async_trait]
impl Confirmer for ApproveAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Per-agent service container.
pub struct ServiceContainer {
    cwd: PathBuf,
    permission: PermissionLevel,
    gitlab: Option<GitLabConfig>,
    confirmer: Arc<dyn Confirmer>,
    /// Extra directories (besides cwd) the agent may write into without
    /// triggering the outside-cwd gate.
    allowed_write_paths: Vec<PathBuf>,
    /// Cancellation signal of the turn currently in flight. Replaced by the
    /// agent at the start of every turn; skills clone it so long-running
    /// work (subprocess, HTTP) can be abandoned mid-call.
    turn_cancel: Mutex<CancellationToken>,
}

impl ServiceContainer {
    pub fn new(
        cwd: PathBuf,
        permission: PermissionLevel,
        gitlab: Option<GitLabConfig>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            cwd,
            permission,
            gitlab,
            confirmer,
            allowed_write_paths: Vec::new(),
            turn_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Extend the writable area beyond the cwd (builder pattern).
    pub fn with_allowed_write_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.allowed_write_paths = paths;
        self
    }

    /// Minimal container for tests and standalone skill use.
    pub fn for_level(cwd: PathBuf, permission: PermissionLevel) -> Self {
        Self::new(cwd, permission, None, Arc::new(ApproveAll))
    }

    /// The agent's working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// The agent's permission level (fixed for its whole life).
    pub fn permission_level(&self) -> PermissionLevel {
        self.permission
    }

    /// GitLab configuration, if any instance is configured.
    pub fn gitlab_config(&self) -> Option<&GitLabConfig> {
        self.gitlab.as_ref()
    }

    /// Directories writable without the outside-cwd gate, besides cwd.
    pub fn allowed_write_paths(&self) -> &[PathBuf] {
        &self.allowed_write_paths
    }

    /// Ask for approval of a privileged operation.
    ///
    /// YOLO agents are approved without asking; everyone else goes through
    /// the configured [`Confirmer`].
    pub async fn confirm(&self, prompt: &str) -> bool {
        if self.permission == PermissionLevel::Yolo {
            return true;
        }
        self.confirmer.confirm(prompt).await
    }

    /// Install the cancellation token for a new turn.
    pub fn set_turn_token(&self, token: CancellationToken) {
        *self.turn_cancel.lock().unwrap() = token;
    }

    /// Clone of the current turn's cancellation token.
    pub fn turn_token(&self) -> CancellationToken {
        self.turn_cancel.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yolo_skips_confirmer() {
        let services = ServiceContainer::new(
            PathBuf::from("/tmp"),
            PermissionLevel::Yolo,
            None,
            Arc::new(DenyAll),
        );
        assert!(services.confirm("rm -rf /").await);
    }

    #[tokio::test]
    async fn test_trusted_consults_confirmer() {
        let services = ServiceContainer::new(
            PathBuf::from("/tmp"),
            PermissionLevel::Trusted,
            None,
            Arc::new(DenyAll),
        );
        assert!(!services.confirm("write file").await);
    }
}
