//! Shared plumbing for GitLab skills.
//!
//! Every GitLab skill is a thin action layered over [`GitLabSkillBase`],
//! which provides instance resolution (explicit parameter, then git-remote
//! detection, then the configured default), project resolution from the git
//! remote, client caching, "me" shorthand resolution, and uniform
//! translation of API errors into [`ToolResult`] failures.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::process::Command;
use url::Url;

use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::vcs::config::{GitLabConfig, GitLabInstance};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::skill::Skill;
use crate::nexus3::types::ToolResult;

/// Process-wide cache of clients, one per instance URL.
///
/// Connection pools are expensive to build and are meant to be shared by
/// every skill talking to the same instance; they live until shutdown.
static CLIENT_POOL: Lazy<DashMap<String, Arc<GitLabClient>>> = Lazy::new(DashMap::new);

/// One sub-operation family of the GitLab surface (issues, branches, ...).
///
/// Implementations receive an authenticated client and the raw argument
/// object; they may return `Err(GitLabApiError)` freely, the wrapper
/// translates it.
#[async_trait]
pub trait GitLabAction: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;

    async fn run(
        &self,
        base: &GitLabSkillBase,
        instance: &GitLabInstance,
        client: &GitLabClient,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError>;
}

/// Shared helpers and caches behind every GitLab skill.
pub struct GitLabSkillBase {
    services: Arc<ServiceContainer>,
    config: GitLabConfig,
    /// Result of the one git-remote instance detection, cached for the
    /// lifetime of the skill (the cwd never changes under an agent).
    detected_instance: Mutex<Option<Option<GitLabInstance>>>,
}

impl GitLabSkillBase {
    pub fn new(services: Arc<ServiceContainer>, config: GitLabConfig) -> Self {
        Self {
            services,
            config,
            detected_instance: Mutex::new(None),
        }
    }

    pub fn services(&self) -> &ServiceContainer {
        &self.services
    }

    /// Which GitLab instance to use.
    ///
    /// Priority: explicit `instance` parameter, then detection from the git
    /// remote of the agent cwd, then the configured default.
    pub async fn resolve_instance(
        &self,
        instance_name: Option<&str>,
    ) -> Result<GitLabInstance, String> {
        if let Some(name) = instance_name {
            return self
                .config
                .get_instance(Some(name))
                .cloned()
                .ok_or_else(|| format!("GitLab instance '{}' not configured", name));
        }

        if let Some(detected) = self.detect_instance_from_remote().await {
            return Ok(detected);
        }

        self.config
            .get_instance(None)
            .cloned()
            .ok_or_else(|| "No GitLab instance configured".to_string())
    }

    /// Find a configured instance whose host matches the git remote.
    async fn detect_instance_from_remote(&self) -> Option<GitLabInstance> {
        if let Some(cached) = self.detected_instance.lock().unwrap().clone() {
            return cached;
        }
        let detected = match self.git_remote_url().await {
            Some(remote) => {
                let remote_host = extract_host(&remote);
                self.config
                    .instances
                    .values()
                    .find(|instance| instance.host().as_deref() == Some(remote_host.as_str()))
                    .cloned()
            }
            None => None,
        };
        *self.detected_instance.lock().unwrap() = Some(detected.clone());
        detected
    }

    /// `git remote get-url origin` in the agent cwd, 5 s budget.
    async fn git_remote_url(&self) -> Option<String> {
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            Command::new("git")
                .args(["remote", "get-url", "origin"])
                .current_dir(self.services.cwd())
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .ok()?
        .ok()?;
        if !output.status.success() {
            return None;
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if url.is_empty() {
            None
        } else {
            Some(url)
        }
    }

    /// Shared client for an instance, from the process-wide pool.
    pub fn get_client(&self, instance: &GitLabInstance) -> Arc<GitLabClient> {
        CLIENT_POOL
            .entry(instance.url.clone())
            .or_insert_with(|| {
                debug!("creating GitLab client for {}", instance.url);
                Arc::new(GitLabClient::new(instance.clone()))
            })
            .clone()
    }

    /// Resolve the project path: explicit parameter first, then the git
    /// remote of the agent cwd.
    pub async fn resolve_project(&self, project: Option<&str>) -> Result<String, String> {
        match project {
            // "this" forces remote detection even where a bare parameter
            // would have been taken verbatim.
            Some(p) if !p.is_empty() && p != "this" => Ok(p.to_string()),
            _ => match self.git_remote_url().await {
                Some(remote) => Ok(extract_project_path(&remote)),
                None => {
                    Err("No project specified and could not detect from git remote".to_string())
                }
            },
        }
    }

    /// Resolve the `me` shorthand to a username for list filters.
    ///
    /// Config username wins; otherwise `GET /user`.
    pub async fn resolve_me_username(
        &self,
        instance: &GitLabInstance,
        client: &GitLabClient,
    ) -> Result<String, GitLabApiError> {
        if let Some(username) = &instance.username {
            return Ok(username.clone());
        }
        let user = client.get_current_user().await?;
        user.get("username")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GitLabApiError::new(0, "Malformed /user response"))
    }

    /// Resolve the `me` shorthand to a numeric user id.
    ///
    /// Config user_id, then a lookup of the config username, then `GET /user`.
    pub async fn resolve_me_user_id(
        &self,
        instance: &GitLabInstance,
        client: &GitLabClient,
    ) -> Result<u64, GitLabApiError> {
        if let Some(user_id) = instance.user_id {
            return Ok(user_id);
        }
        if let Some(username) = &instance.username {
            return client.lookup_user(username).await;
        }
        let user = client.get_current_user().await?;
        user.get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| GitLabApiError::new(0, "Malformed /user response"))
    }

    /// Resolve usernames (including `me`) to numeric user ids.
    pub async fn resolve_user_ids(
        &self,
        instance: &GitLabInstance,
        client: &GitLabClient,
        usernames: &[String],
    ) -> Result<Vec<u64>, GitLabApiError> {
        let mut ids = Vec::with_capacity(usernames.len());
        for username in usernames {
            if username.eq_ignore_ascii_case("me") {
                ids.push(self.resolve_me_user_id(instance, client).await?);
            } else {
                ids.push(client.lookup_user(username).await?);
            }
        }
        Ok(ids)
    }
}

/// Hostname from a git URL, supporting SSH and HTTPS forms.
pub fn extract_host(remote_url: &str) -> String {
    // SSH form: git@gitlab.com:group/repo.git
    if let Some(rest) = remote_url.strip_prefix("git@") {
        return rest.split(':').next().unwrap_or(rest).to_string();
    }
    Url::parse(remote_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Project path from a git URL, with the `.git` suffix stripped.
pub fn extract_project_path(remote_url: &str) -> String {
    let path = if remote_url.starts_with("git@") {
        remote_url.splitn(2, ':').nth(1).unwrap_or("").to_string()
    } else {
        Url::parse(remote_url)
            .map(|u| u.path().trim_start_matches('/').to_string())
            .unwrap_or_default()
    };
    path.strip_suffix(".git").unwrap_or(&path).to_string()
}

/// A registered GitLab skill: one action wrapped with instance resolution,
/// error translation, and cooperative cancellation.
pub struct GitLabSkill<A: GitLabAction> {
    base: GitLabSkillBase,
    action: A,
}

impl<A: GitLabAction> GitLabSkill<A> {
    pub fn new(base: GitLabSkillBase, action: A) -> Self {
        Self { base, action }
    }
}

#[async_trait]
impl<A: GitLabAction + 'static> Skill for GitLabSkill<A> {
    fn name(&self) -> &str {
        self.action.name()
    }

    fn description(&self) -> &str {
        self.action.description()
    }

    fn parameters(&self) -> Value {
        self.action.parameters()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let token = self.base.services.turn_token();
        let work = async {
            let instance_name = args.get("instance").and_then(Value::as_str);
            let instance = match self.base.resolve_instance(instance_name).await {
                Ok(instance) => instance,
                Err(message) => return ToolResult::error(message),
            };
            let client = self.base.get_client(&instance);
            match self.action.run(&self.base, &instance, &client, &args).await {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            }
        };
        // Dropping an in-flight request aborts the connection; no retry
        // runs after cancellation.
        tokio::select! {
            result = work => result,
            _ = token.cancelled() => ToolResult::error("Cancelled"),
        }
    }
}

/// Optional argument helpers shared by the action implementations.
pub fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn arg_str_list(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

/// Required-parameter error in the wording every action uses.
pub fn missing(param: &str, action: &str) -> ToolResult {
    ToolResult::error(format!("{} parameter required for {} action", param, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host_ssh_and_https() {
        assert_eq!(extract_host("git@gitlab.com:group/repo.git"), "gitlab.com");
        assert_eq!(
            extract_host("https://gitlab.example.com/group/repo.git"),
            "gitlab.example.com"
        );
    }

    #[test]
    fn test_extract_project_path() {
        assert_eq!(
            extract_project_path("git@gitlab.com:group/sub/repo.git"),
            "group/sub/repo"
        );
        assert_eq!(
            extract_project_path("https://gitlab.com/group/repo.git"),
            "group/repo"
        );
        assert_eq!(
            extract_project_path("https://gitlab.com/group/repo"),
            "group/repo"
        );
    }
}
