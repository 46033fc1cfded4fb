//! Sanitized environments for subprocess execution.
//!
//! Children spawned on behalf of an agent never inherit the parent
//! environment wholesale. Only an explicit allowlist of names is copied
//! through, which keeps API keys, tokens, and database credentials out of
//! anything the model asks us to run.

use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Environment variables safe to pass to subprocesses.
///
/// Essential for process execution but expected to never contain secrets.
/// Names containing TOKEN, SECRET, KEY, or PASSWORD must never be added
/// here.
pub const SAFE_ENV_VARS: &[&str] = &[
    // Path and execution
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "PWD",
    // Locale settings
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "LC_COLLATE",
    "LC_MESSAGES",
    "TZ",
    // Terminal settings
    "TERM",
    "COLORTERM",
    "COLUMNS",
    "LINES",
    // Temp directories
    "TMPDIR",
    "TMP",
    "TEMP",
    // Windows equivalents
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "PATHEXT",
    "SYSTEMROOT",
    "COMSPEC",
];

/// Fallback PATH when the parent has none (platform-aware).
#[cfg(windows)]
pub const DEFAULT_PATH: &str = r"C:\Windows\System32;C:\Windows;C:\Windows\System32\Wbem";
#[cfg(not(windows))]
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/local/sbin:/usr/sbin:/sbin";

/// Build a sanitized environment for a child process.
///
/// Copies only the allowlisted variables that exist in the parent. If `cwd`
/// is given, `PWD` is overwritten with it. `PATH` is guaranteed to be
/// non-empty so executables can be found.
pub fn safe_env(cwd: Option<&Path>) -> HashMap<String, String> {
    let mut child_env: HashMap<String, String> = HashMap::new();

    for name in SAFE_ENV_VARS {
        if let Ok(value) = env::var(name) {
            child_env.insert((*name).to_string(), value);
        }
    }

    if let Some(dir) = cwd {
        child_env.insert("PWD".to_string(), dir.to_string_lossy().into_owned());
    }

    let path_missing = child_env
        .get("PATH")
        .map(|p| p.is_empty())
        .unwrap_or(true);
    if path_missing {
        child_env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
    }

    child_env
}
