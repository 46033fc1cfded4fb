//! GitLab merge-request skill.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::skill::vcs::gitlab::base::{
    arg_str, arg_u64, missing, GitLabAction, GitLabSkillBase,
};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::types::ToolResult;

pub struct MergeRequestAction;

#[async_trait]
impl GitLabAction for MergeRequestAction {
    fn name(&self) -> &'static str {
        "gitlab_mr"
    }

    fn description(&self) -> &'static str {
        "Create, view, and manage GitLab merge requests. \
         Actions: list, get, create, merge, close, comment. \
         Project is auto-detected from git remote if omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get", "create", "merge", "close", "comment"],
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
                "iid": {
                    "type": "integer",
                    "description": "Merge request IID (required for get/merge/close/comment)",
                },
                "title": {
                    "type": "string",
                    "description": "MR title (required for create)",
                },
                "description": {
                    "type": "string",
                    "description": "MR description (markdown supported)",
                },
                "source_branch": {
                    "type": "string",
                    "description": "Source branch (required for create)",
                },
                "target_branch": {
                    "type": "string",
                    "description": "Target branch (required for create)",
                },
                "assignees": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "GitLab usernames to assign. Use 'me' for yourself.",
                },
                "state": {
                    "type": "string",
                    "enum": ["opened", "closed", "merged", "all"],
                    "description": "Filter by state (list action, default: opened)",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default: 20)",
                },
                "body": {
                    "type": "string",
                    "description": "Comment body (for comment action)",
                },
            },
            "required": ["action"],
        })
    }

    async fn run(
        &self,
        base: &GitLabSkillBase,
        instance: &GitLabInstance,
        client: &GitLabClient,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError> {
        let project = match base.resolve_project(arg_str(args, "project")).await {
            Ok(path) => GitLabClient::encode_path(&path),
            Err(message) => return Ok(ToolResult::error(message)),
        };

        match arg_str(args, "action").unwrap_or("") {
            "list" => {
                let mut params: Vec<(String, String)> = Vec::new();
                if let Some(state) = arg_str(args, "state") {
                    params.push(("state".to_string(), state.to_string()));
                }
                let limit = arg_u64(args, "limit").unwrap_or(20) as usize;
                let mrs = client
                    .collect_pages(
                        &format!("/projects/{}/merge_requests", project),
                        params,
                        limit,
                    )
                    .await?;
                if mrs.is_empty() {
                    return Ok(ToolResult::success("No merge requests found"));
                }
                let mut lines = vec![format!("Found {} merge request(s):", mrs.len())];
                for mr in &mrs {
                    lines.push(format!(
                        "  [{}] !{}: {} ({} -> {})",
                        mr["state"].as_str().unwrap_or(""),
                        mr["iid"],
                        mr["title"].as_str().unwrap_or(""),
                        mr["source_branch"].as_str().unwrap_or(""),
                        mr["target_branch"].as_str().unwrap_or("")
                    ));
                }
                Ok(ToolResult::success(lines.join("\n")))
            }
            "get" => {
                let iid = match arg_u64(args, "iid") {
                    Some(iid) => iid,
                    None => return Ok(missing("iid", "get")),
                };
                let mr = client
                    .get(&format!("/projects/{}/merge_requests/{}", project, iid), &[])
                    .await?;
                let lines = vec![
                    format!("# {}", mr["title"].as_str().unwrap_or("")),
                    format!(
                        "IID: !{} | State: {} | Author: @{}",
                        mr["iid"],
                        mr["state"].as_str().unwrap_or(""),
                        mr["author"]["username"].as_str().unwrap_or("")
                    ),
                    format!(
                        "Branches: {} -> {}",
                        mr["source_branch"].as_str().unwrap_or(""),
                        mr["target_branch"].as_str().unwrap_or("")
                    ),
                    mr["description"]
                        .as_str()
                        .filter(|d| !d.is_empty())
                        .unwrap_or("(no description)")
                        .to_string(),
                    format!("Web URL: {}", mr["web_url"].as_str().unwrap_or("")),
                ];
                Ok(ToolResult::success(lines.join("\n")))
            }
            "create" => {
                let title = match arg_str(args, "title") {
                    Some(title) => title,
                    None => return Ok(missing("title", "create")),
                };
                let source = match arg_str(args, "source_branch") {
                    Some(source) => source,
                    None => return Ok(missing("source_branch", "create")),
                };
                let target = match arg_str(args, "target_branch") {
                    Some(target) => target,
                    None => return Ok(missing("target_branch", "create")),
                };
                let mut data = Map::new();
                data.insert("title".to_string(), Value::from(title));
                data.insert("source_branch".to_string(), Value::from(source));
                data.insert("target_branch".to_string(), Value::from(target));
                if let Some(description) = arg_str(args, "description") {
                    data.insert("description".to_string(), Value::from(description));
                }
                if let Some(assignees) = args.get("assignees").and_then(Value::as_array) {
                    let usernames: Vec<String> = assignees
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                    if !usernames.is_empty() {
                        let ids = base.resolve_user_ids(instance, client, &usernames).await?;
                        data.insert("assignee_ids".to_string(), json!(ids));
                    }
                }
                let mr = client
                    .post(
                        &format!("/projects/{}/merge_requests", project),
                        Value::Object(data),
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Created merge request !{}: {}\n{}",
                    mr["iid"],
                    mr["title"].as_str().unwrap_or(""),
                    mr["web_url"].as_str().unwrap_or("")
                )))
            }
            "merge" => {
                let iid = match arg_u64(args, "iid") {
                    Some(iid) => iid,
                    None => return Ok(missing("iid", "merge")),
                };
                let mr = client
                    .put(
                        &format!("/projects/{}/merge_requests/{}/merge", project, iid),
                        json!({}),
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Merged !{} ({})",
                    mr["iid"],
                    mr["state"].as_str().unwrap_or("merged")
                )))
            }
            "close" => {
                let iid = match arg_u64(args, "iid") {
                    Some(iid) => iid,
                    None => return Ok(missing("iid", "close")),
                };
                client
                    .put(
                        &format!("/projects/{}/merge_requests/{}", project, iid),
                        json!({"state_event": "close"}),
                    )
                    .await?;
                Ok(ToolResult::success(format!("Closed merge request !{}", iid)))
            }
            "comment" => {
                let iid = match arg_u64(args, "iid") {
                    Some(iid) => iid,
                    None => return Ok(missing("iid", "comment")),
                };
                let body = match arg_str(args, "body") {
                    Some(body) => body,
                    None => return Ok(missing("body", "comment")),
                };
                client
                    .post(
                        &format!("/projects/{}/merge_requests/{}/notes", project, iid),
                        json!({"body": body}),
                    )
                    .await?;
                Ok(ToolResult::success(format!(
                    "Added comment to merge request !{}",
                    iid
                )))
            }
            other => Ok(ToolResult::error(format!("Unknown action: {}", other))),
        }
    }
}
