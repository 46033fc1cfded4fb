//! Configuration models for VCS integrations.

use std::env;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::nexus3::url_validator::{validate_url, UrlSecurityError};

/// Configuration for a single GitLab instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitLabInstance {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
}

impl GitLabInstance {
    /// Validate the instance URL through the SSRF policy.
    ///
    /// `allow_localhost` stays on so local development instances work;
    /// private ranges stay rejected.
    pub fn validate(&self) -> Result<(), UrlSecurityError> {
        validate_url(&self.url, true, false).map(|_| ())
    }

    /// Resolve the access token.
    ///
    /// Resolution order: direct token value, then the environment variable
    /// named by `token_env`, then nothing (the client reports 401).
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            if !token.is_empty() {
                return Some(token.clone());
            }
        }
        if let Some(var) = &self.token_env {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Hostname part of the instance URL, for git-remote matching.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// GitLab configuration with multiple named instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitLabConfig {
    #[serde(default)]
    pub instances: std::collections::BTreeMap<String, GitLabInstance>,
    #[serde(default)]
    pub default_instance: Option<String>,
}

impl GitLabConfig {
    /// Validate every instance URL and the default-instance reference.
    ///
    /// When no default is set but instances exist, the first one becomes
    /// the default.
    pub fn validate(&mut self) -> Result<(), String> {
        for (name, instance) in &self.instances {
            instance
                .validate()
                .map_err(|e| format!("instance '{}': {}", name, e))?;
        }
        if let Some(default) = &self.default_instance {
            if !self.instances.contains_key(default) {
                return Err(format!(
                    "default_instance '{}' not found in instances",
                    default
                ));
            }
        } else if let Some(first) = self.instances.keys().next() {
            self.default_instance = Some(first.clone());
        }
        Ok(())
    }

    /// Instance by name, or the default instance when no name is given.
    pub fn get_instance(&self, name: Option<&str>) -> Option<&GitLabInstance> {
        match name {
            Some(name) => self.instances.get(name),
            None => self
                .default_instance
                .as_deref()
                .and_then(|d| self.instances.get(d)),
        }
    }
}

/// Parse GitLab config from the raw config document.
///
/// Returns `Ok(None)` when no `gitlab` section is present.
pub fn load_gitlab_config(raw: &serde_json::Value) -> Result<Option<GitLabConfig>, String> {
    let section = match raw.get("gitlab") {
        Some(section) if !section.is_null() => section,
        _ => return Ok(None),
    };
    let mut config: GitLabConfig =
        serde_json::from_value(section.clone()).map_err(|e| format!("gitlab config: {}", e))?;
    config.validate()?;
    if config.instances.is_empty() {
        return Ok(None);
    }
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_absent_section() {
        assert!(load_gitlab_config(&json!({})).unwrap().is_none());
    }

    #[test]
    fn test_default_instance_falls_back_to_first() {
        let config = load_gitlab_config(&json!({
            "gitlab": {
                "instances": {
                    "main": {"url": "https://gitlab.com"}
                }
            }
        }))
        .unwrap()
        .unwrap();
        assert_eq!(config.default_instance.as_deref(), Some("main"));
        assert!(config.get_instance(None).is_some());
    }

    #[test]
    fn test_bad_default_reference_rejected() {
        let err = load_gitlab_config(&json!({
            "gitlab": {
                "instances": {"main": {"url": "https://gitlab.com"}},
                "default_instance": "missing"
            }
        }))
        .unwrap_err();
        assert!(err.contains("missing"));
    }

    #[test]
    fn test_ssrf_check_applies_at_load() {
        let err = load_gitlab_config(&json!({
            "gitlab": {
                "instances": {"evil": {"url": "http://169.254.169.254/latest"}}
            }
        }))
        .unwrap_err();
        assert!(err.contains("evil"));
    }

    #[test]
    fn test_token_resolution_order() {
        let instance = GitLabInstance {
            url: "https://gitlab.com".to_string(),
            token: Some("direct".to_string()),
            token_env: Some("NEXUS3_TEST_GL_TOKEN".to_string()),
            username: None,
            email: None,
            user_id: None,
        };
        assert_eq!(instance.resolve_token().as_deref(), Some("direct"));

        let instance = GitLabInstance {
            token: None,
            ..instance
        };
        std::env::set_var("NEXUS3_TEST_GL_TOKEN", "from-env");
        assert_eq!(instance.resolve_token().as_deref(), Some("from-env"));
        std::env::remove_var("NEXUS3_TEST_GL_TOKEN");
        assert!(instance.resolve_token().is_none());
    }
}
