//! Configuration loading and the init commands.
//!
//! Persisted layout:
//!
//! - Per-user: `~/.nexus3/{NEXUS.md, config.json, mcp.json, sessions/}`
//! - Per-project: `<cwd>/.nexus3/{NEXUS.md, config.json, mcp.json}`
//!
//! Project config shallow-merges over the global one. Every file written
//! by the init commands goes through [`write_guarded`], which refuses to
//! write through a symlink and leaves the symlink target untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::nexus3::skill::vcs::config::{load_gitlab_config, GitLabConfig};

/// Name of both the global and per-project configuration directories.
pub const CONFIG_DIR_NAME: &str = ".nexus3";
/// Environment variable consulted for the server API key.
pub const API_KEY_ENV: &str = "NEXUS3_API_KEY";
/// Environment variable consulted for the provider key when the config
/// does not name one.
pub const PROVIDER_KEY_ENV: &str = "NEXUS3_PROVIDER_KEY";

const NEXUS_MD_TEMPLATE: &str = "# Project Configuration

## Overview
<!-- Describe this project and how the agent should approach it -->

## Key Files
<!-- List important files and their purposes -->

## Conventions
<!-- Project-specific conventions, coding standards, etc. -->

## Notes
<!-- Any other context the agent should know -->
";

const GLOBAL_NEXUS_MD_TEMPLATE: &str =
    "# Personal Configuration\n\nYou are NEXUS3, an AI-powered CLI assistant.\n";

const CONFIG_JSON_TEMPLATE: &str = r#"{
  "_comment": "Project-specific NEXUS3 configuration. All fields optional - extends global config.",
  "provider": {
    "_comment": "Override model settings for this project"
  },
  "permissions": {
    "_comment": "Project-specific permission overrides"
  }
}
"#;

const MCP_JSON_TEMPLATE: &str = "{\n  \"servers\": []\n}\n";

/// Provider (LLM endpoint) settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Resolve the provider key: direct value, then the named environment
    /// variable, then the default environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        let var = self.api_key_env.as_deref().unwrap_or(PROVIDER_KEY_ENV);
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

/// Merged configuration seen by the server.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub provider: ProviderConfig,
    /// Bearer credential for the control plane.
    pub api_key: Option<String>,
    pub gitlab: Option<GitLabConfig>,
}

/// The global configuration directory (`~/.nexus3`), if a home exists.
pub fn global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME))
}

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("ignoring malformed config {}: {}", path.display(), e);
            None
        }
    }
}

/// Shallow merge: keys of `overlay` replace keys of `base`.
fn shallow_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Load the merged configuration for a working directory.
///
/// Missing or malformed files are skipped; an empty [`Config`] is always
/// returned rather than an error.
pub fn load_config(cwd: &Path) -> Result<Config, String> {
    let mut merged = Value::Object(Map::new());
    if let Some(global) = global_config_dir() {
        if let Some(value) = read_json(&global.join("config.json")) {
            merged = shallow_merge(merged, value);
        }
    }
    let project = cwd.join(CONFIG_DIR_NAME).join("config.json");
    if let Some(value) = read_json(&project) {
        merged = shallow_merge(merged, value);
    }

    let provider: ProviderConfig = merged
        .get("provider")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("provider config: {}", e))?
        .unwrap_or_default();
    let api_key = merged
        .get("api_key")
        .and_then(Value::as_str)
        .map(str::to_string);
    let gitlab = load_gitlab_config(&merged)?;

    Ok(Config {
        provider,
        api_key,
        gitlab,
    })
}

/// Server API key discovery: explicit flag, then environment, then config.
pub fn discover_api_key(flag: Option<&str>, config: &Config) -> Option<String> {
    if let Some(key) = flag {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            return Some(key);
        }
    }
    config.api_key.clone()
}

/// Write a file, refusing symlink targets.
///
/// If the target exists and is a symlink the write fails and the file the
/// link points at is left bitwise unchanged. The error message names the
/// requested path only, never the resolved target.
pub fn write_guarded(path: &Path, contents: &str) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!(
                    "refusing to write through a symlink: {}",
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                ),
            ));
        }
        _ => {}
    }
    fs::write(path, contents)
}

/// Initialize the global `~/.nexus3/` directory with default files.
///
/// Refuses when the directory exists and `force` is not set.
pub fn init_global(force: bool) -> Result<String, String> {
    let global_dir =
        global_config_dir().ok_or_else(|| "cannot determine home directory".to_string())?;
    init_dir(
        &global_dir,
        GLOBAL_NEXUS_MD_TEMPLATE,
        "{}\n",
        force,
        true,
    )
}

/// Initialize a project-local `./.nexus3/` directory with templates.
pub fn init_local(cwd: &Path, force: bool) -> Result<String, String> {
    let target_dir = cwd.join(CONFIG_DIR_NAME);
    init_dir(&target_dir, NEXUS_MD_TEMPLATE, CONFIG_JSON_TEMPLATE, force, false)
}

fn init_dir(
    target_dir: &Path,
    nexus_md: &str,
    config_json: &str,
    force: bool,
    with_sessions: bool,
) -> Result<String, String> {
    if target_dir.exists() && !force {
        return Err(format!(
            "Directory already exists: {}\nUse --force to overwrite.",
            target_dir.display()
        ));
    }

    fs::create_dir_all(target_dir).map_err(|e| format!("Failed to create directory: {}", e))?;

    for (name, contents) in [
        ("NEXUS.md", nexus_md),
        ("config.json", config_json),
        ("mcp.json", MCP_JSON_TEMPLATE),
    ] {
        write_guarded(&target_dir.join(name), contents)
            .map_err(|e| format!("Failed to write {}: {}", name, e))?;
    }
    if with_sessions {
        fs::create_dir_all(target_dir.join("sessions"))
            .map_err(|e| format!("Failed to create sessions dir: {}", e))?;
    }

    debug!("initialized configuration at {}", target_dir.display());
    Ok(format!(
        "Initialized configuration at {}",
        target_dir.display()
    ))
}
