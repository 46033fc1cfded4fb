//! GitLab project/repository skill.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::skill::vcs::gitlab::base::{arg_str, arg_u64, GitLabAction, GitLabSkillBase};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::types::ToolResult;

pub struct RepoAction;

#[async_trait]
impl GitLabAction for RepoAction {
    fn name(&self) -> &'static str {
        "gitlab_repo"
    }

    fn description(&self) -> &'static str {
        "View and search GitLab projects. Actions: get, list. \
         Get auto-detects the project from git remote if omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get", "list"],
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
                "search": {
                    "type": "string",
                    "description": "Search term (list action)",
                },
                "owned": {
                    "type": "boolean",
                    "description": "Only list owned projects",
                },
                "membership": {
                    "type": "boolean",
                    "description": "Only list projects you are a member of",
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
        match arg_str(args, "action").unwrap_or("") {
            "get" => {
                let project = match base.resolve_project(arg_str(args, "project")).await {
                    Ok(path) => path,
                    Err(message) => return Ok(ToolResult::error(message)),
                };
                let repo = client.get_project(&project).await?;
                let lines = vec![
                    format!("# {}", repo["path_with_namespace"].as_str().unwrap_or("")),
                    format!(
                        "Default branch: {} | Visibility: {} | Stars: {}",
                        repo["default_branch"].as_str().unwrap_or("?"),
                        repo["visibility"].as_str().unwrap_or("?"),
                        repo["star_count"]
                    ),
                    repo["description"]
                        .as_str()
                        .filter(|d| !d.is_empty())
                        .unwrap_or("(no description)")
                        .to_string(),
                    format!("Web URL: {}", repo["web_url"].as_str().unwrap_or("")),
                ];
                Ok(ToolResult::success(lines.join("\n")))
            }
            "list" => {
                let mut params: Vec<(String, String)> = Vec::new();
                if let Some(search) = arg_str(args, "search") {
                    params.push(("search".to_string(), search.to_string()));
                }
                if args.get("owned").and_then(Value::as_bool).unwrap_or(false) {
                    params.push(("owned".to_string(), "true".to_string()));
                }
                if args
                    .get("membership")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    params.push(("membership".to_string(), "true".to_string()));
                }
                let limit = arg_u64(args, "limit").unwrap_or(20) as usize;
                let projects = client.collect_pages("/projects", params, limit).await?;
                if projects.is_empty() {
                    return Ok(ToolResult::success("No projects found"));
                }
                let mut lines = vec![format!("Found {} project(s):", projects.len())];
                for project in &projects {
                    lines.push(format!(
                        "  {}: {}",
                        project["path_with_namespace"].as_str().unwrap_or(""),
                        project["description"].as_str().unwrap_or("")
                    ));
                }
                Ok(ToolResult::success(lines.join("\n")))
            }
            other => Ok(ToolResult::error(format!("Unknown action: {}", other))),
        }
    }
}
