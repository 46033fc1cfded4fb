//! GitLab label management skill.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::skill::vcs::gitlab::base::{
    arg_str, arg_u64, missing, GitLabAction, GitLabSkillBase,
};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::types::ToolResult;

pub struct LabelAction;

#[async_trait]
impl GitLabAction for LabelAction {
    fn name(&self) -> &'static str {
        "gitlab_label"
    }

    fn description(&self) -> &'static str {
        "Manage GitLab project labels. Actions: list, create, update, delete. \
         Project is auto-detected from git remote if omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "create", "update", "delete"],
                    "description": "Action to perform",
                },
                "instance": {
                    "type": "string",
                    "description": "GitLab instance name (uses default if omitted)",
                },
                "project": {
                    "type": "string",
                    "description": "Project path (auto-detected from git remote if omitted)",
                },
                "name": {
                    "type": "string",
                    "description": "Label name (required for create/update/delete)",
                },
                "new_name": {
                    "type": "string",
                    "description": "New label name (update action)",
                },
                "color": {
                    "type": "string",
                    "description": "Label color, e.g. '#d9534f' (create/update)",
                },
                "label_description": {
                    "type": "string",
                    "description": "Label description (create/update)",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default: 20)",
                },
            },
            "required": ["action"],
        })
    }

    async fn run(
        &self,
        base: &GitLabSkillBase,
        _instance: &GitLabInstance,
        client: &GitLabClient,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError> {
        let project = match base.resolve_project(arg_str(args, "project")).await {
            Ok(path) => GitLabClient::encode_path(&path),
            Err(message) => return Ok(ToolResult::error(message)),
        };

        match arg_str(args, "action").unwrap_or("") {
            "list" => {
                let limit = arg_u64(args, "limit").unwrap_or(20) as usize;
                let labels = client
                    .collect_pages(&format!("/projects/{}/labels", project), Vec::new(), limit)
                    .await?;
                if labels.is_empty() {
                    return Ok(ToolResult::success("No labels found"));
                }
                let mut lines = vec![format!("Found {} label(s):", labels.len())];
                for label in &labels {
                    lines.push(format!(
                        "  {} ({}): {}",
                        label["name"].as_str().unwrap_or(""),
                        label["color"].as_str().unwrap_or(""),
                        label["description"].as_str().unwrap_or("")
                    ));
                }
                Ok(ToolResult::success(lines.join("\n")))
            }
            "create" => {
                let name = match arg_str(args, "name") {
                    Some(name) => name,
                    None => return Ok(missing("name", "create")),
                };
                let color = arg_str(args, "color").unwrap_or("#428bca");
                let mut data = Map::new();
                data.insert("name".to_string(), Value::from(name));
                data.insert("color".to_string(), Value::from(color));
                if let Some(description) = arg_str(args, "label_description") {
                    data.insert("description".to_string(), Value::from(description));
                }
                let label = client
                    .post(&format!("/projects/{}/labels", project), Value::Object(data))
                    .await?;
                Ok(ToolResult::success(format!(
                    "Created label {}",
                    label["name"].as_str().unwrap_or(name)
                )))
            }
            "update" => {
                let name = match arg_str(args, "name") {
                    Some(name) => name,
                    None => return Ok(missing("name", "update")),
                };
                let mut data = Map::new();
                if let Some(new_name) = arg_str(args, "new_name") {
                    data.insert("new_name".to_string(), Value::from(new_name));
                }
                if let Some(color) = arg_str(args, "color") {
                    data.insert("color".to_string(), Value::from(color));
                }
                if let Some(description) = arg_str(args, "label_description") {
                    data.insert("description".to_string(), Value::from(description));
                }
                if data.is_empty() {
                    return Ok(ToolResult::error("No fields to update"));
                }
                let label = client
                    .put(
                        &format!(
                            "/projects/{}/labels/{}",
                            project,
                            urlencoding::encode(name)
                        ),
                        Value::Object(data),
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Updated label {}",
                    label["name"].as_str().unwrap_or(name)
                )))
            }
            "delete" => {
                let name = match arg_str(args, "name") {
                    Some(name) => name,
                    None => return Ok(missing("name", "delete")),
                };
                client
                    .delete(&format!(
                        "/projects/{}/labels/{}",
                        project,
                        urlencoding::encode(name)
                    ))
                    .await?;
                Ok(ToolResult::success(format!("Deleted label {}", name)))
            }
            other => Ok(ToolResult::error(format!("Unknown action: {}", other))),
        }
    }
}
