//! GitLab branch management skill.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::skill::vcs::gitlab::base::{
    arg_str, arg_u64, missing, GitLabAction, GitLabSkillBase,
};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::types::ToolResult;

pub struct BranchAction;

#[async_trait]
impl GitLabAction for BranchAction {
    fn name(&self) -> &'static str {
        "gitlab_branch"
    }

    fn description(&self) -> &'static str {
        "Manage GitLab branches. Actions: list, get, create, delete. \
         Project is auto-detected from git remote if omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get", "create", "delete"],
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
                "branch": {
                    "type": "string",
                    "description": "Branch name (required for get/create/delete)",
                },
                "ref": {
                    "type": "string",
                    "description": "Source branch or commit to create from (create action)",
                },
                "search": {
                    "type": "string",
                    "description": "Filter branches by name (list action)",
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
        let action = arg_str(args, "action").unwrap_or("");

        match action {
            "list" => {
                let mut params: Vec<(String, String)> = Vec::new();
                if let Some(search) = arg_str(args, "search") {
                    params.push(("search".to_string(), search.to_string()));
                }
                let limit = arg_u64(args, "limit").unwrap_or(20) as usize;
                let branches = client
                    .collect_pages(
                        &format!("/projects/{}/repository/branches", project),
                        params,
                        limit,
                    )
                    .await?;
                if branches.is_empty() {
                    return Ok(ToolResult::success("No branches found"));
                }
                let mut lines = vec![format!("Found {} branch(es):", branches.len())];
                for branch in &branches {
                    let default = if branch["default"].as_bool().unwrap_or(false) {
                        " (default)"
                    } else {
                        ""
                    };
                    lines.push(format!(
                        "  {}{}: {}",
                        branch["name"].as_str().unwrap_or(""),
                        default,
                        branch["commit"]["short_id"].as_str().unwrap_or("")
                    ));
                }
                Ok(ToolResult::success(lines.join("\n")))
            }
            "get" => {
                let name = match arg_str(args, "branch") {
                    Some(name) => name,
                    None => return Ok(missing("branch", "get")),
                };
                let branch = client
                    .get(
                        &format!(
                            "/projects/{}/repository/branches/{}",
                            project,
                            urlencoding::encode(name)
                        ),
                        &[],
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Branch {}\nCommit: {} {}\nProtected: {}",
                    branch["name"].as_str().unwrap_or(""),
                    branch["commit"]["short_id"].as_str().unwrap_or(""),
                    branch["commit"]["title"].as_str().unwrap_or(""),
                    branch["protected"]
                )))
            }
            "create" => {
                let name = match arg_str(args, "branch") {
                    Some(name) => name,
                    None => return Ok(missing("branch", "create")),
                };
                let source = match arg_str(args, "ref") {
                    Some(source) => source,
                    None => return Ok(missing("ref", "create")),
                };
                let branch = client
                    .post(
                        &format!("/projects/{}/repository/branches", project),
                        json!({"branch": name, "ref": source}),
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Created branch {} from {}",
                    branch["name"].as_str().unwrap_or(name),
                    source
                )))
            }
            "delete" => {
                let name = match arg_str(args, "branch") {
                    Some(name) => name,
                    None => return Ok(missing("branch", "delete")),
                };
                client
                    .delete(&format!(
                        "/projects/{}/repository/branches/{}",
                        project,
                        urlencoding::encode(name)
                    ))
                    .await?;
                Ok(ToolResult::success(format!("Deleted branch {}", name)))
            }
            other => Ok(ToolResult::error(format!("Unknown action: {}", other))),
        }
    }
}
