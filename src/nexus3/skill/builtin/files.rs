//! File access skills.
//!
//! `read_file` is available at every permission level. `write_file` is
//! permission-gated: sandboxed agents may only write inside their cwd,
//! trusted agents need confirmation for anything outside it, and writes
//! through symlinks are always refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::nexus3::config::write_guarded;
use crate::nexus3::permissions::PermissionLevel;
use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::Skill;
use crate::nexus3::types::ToolResult;

/// Resolve a possibly-relative path against the agent cwd.
fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

/// Whether `path` falls inside the agent cwd after normalization.
fn inside_cwd(cwd: &Path, path: &Path) -> bool {
    let canonical_cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    // The file itself may not exist yet; canonicalize the parent.
    let parent = path.parent().unwrap_or(path);
    let canonical_parent = parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf());
    canonical_parent.starts_with(&canonical_cwd)
}

pub struct ReadFileSkill {
    services: Arc<ServiceContainer>,
}

impl ReadFileSkill {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Skill for ReadFileSkill {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (relative paths resolve against the agent cwd)",
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = match args.get("path").and_then(Value::as_str) {
            Some(p) if !p.is_empty() => resolve(self.services.cwd(), p),
            _ => return ToolResult::error("Path is required"),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => ToolResult::success(contents),
            Err(e) => ToolResult::error(format!("Failed to read {}: {}", path.display(), e)),
        }
    }
}

pub struct WriteFileSkill {
    services: Arc<ServiceContainer>,
}

impl WriteFileSkill {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Skill for WriteFileSkill {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file, creating parent directories as needed"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (relative paths resolve against the agent cwd)",
                },
                "content": {
                    "type": "string",
                    "description": "Full file contents to write",
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = match args.get("path").and_then(Value::as_str) {
            Some(p) if !p.is_empty() => resolve(self.services.cwd(), p),
            _ => return ToolResult::error("Path is required"),
        };
        let content = match args.get("content").and_then(Value::as_str) {
            Some(c) => c,
            None => return ToolResult::error("Content is required"),
        };

        let outside = !inside_cwd(self.services.cwd(), &path)
            && !self
                .services
                .allowed_write_paths()
                .iter()
                .any(|allowed| inside_cwd(allowed, &path));
        if outside {
            match self.services.permission_level() {
                PermissionLevel::Sandboxed => {
                    return ToolResult::error(
                        "write_file outside the working directory is disabled in SANDBOXED mode",
                    );
                }
                PermissionLevel::Trusted => {
                    let approved = self
                        .services
                        .confirm(&format!("Write outside cwd: {}", path.display()))
                        .await;
                    if !approved {
                        return ToolResult::error("Confirmation declined for write_file");
                    }
                }
                PermissionLevel::Yolo => {}
            }
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directories: {}", e));
            }
        }
        match write_guarded(&path, content) {
            Ok(()) => ToolResult::success(format!("Wrote {} bytes", content.len())),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}

pub fn read_file_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    Some(Arc::new(ReadFileSkill::new(Arc::clone(services))))
}

pub fn write_file_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    Some(Arc::new(WriteFileSkill::new(Arc::clone(services))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let services = Arc::new(ServiceContainer::for_level(
            dir.path().to_path_buf(),
            PermissionLevel::Yolo,
        ));
        let write = WriteFileSkill::new(Arc::clone(&services));
        let read = ReadFileSkill::new(services);

        let result = write
            .execute(json!({"path": "notes.txt", "content": "remember"}))
            .await;
        assert!(!result.is_error(), "{}", result.text());

        let result = read.execute(json!({"path": "notes.txt"})).await;
        assert_eq!(result.text(), "remember");
    }

    #[tokio::test]
    async fn test_sandboxed_cannot_write_outside_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let services = Arc::new(ServiceContainer::for_level(
            dir.path().to_path_buf(),
            PermissionLevel::Sandboxed,
        ));
        let write = WriteFileSkill::new(services);
        let target = other.path().join("escape.txt");
        let result = write
            .execute(json!({"path": target.to_str().unwrap(), "content": "x"}))
            .await;
        assert!(result.is_error());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_sandboxed_can_write_inside_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let services = Arc::new(ServiceContainer::for_level(
            dir.path().to_path_buf(),
            PermissionLevel::Sandboxed,
        ));
        let write = WriteFileSkill::new(services);
        let result = write
            .execute(json!({"path": "inside.txt", "content": "ok"}))
            .await;
        assert!(!result.is_error(), "{}", result.text());
    }
}
