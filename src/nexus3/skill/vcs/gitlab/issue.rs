//! GitLab issue management skill.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::skill::vcs::gitlab::base::{
    arg_str, arg_str_list, arg_u64, missing, GitLabAction, GitLabSkillBase,
};
use crate::nexus3::skill::vcs::gitlab::client::{GitLabApiError, GitLabClient};
use crate::nexus3::types::ToolResult;

const DEFAULT_LIST_LIMIT: usize = 20;

/// Create, view, update, and manage GitLab issues.
///
/// Actions: list, get, create, update, close, reopen, comment. List works
/// cross-project when the project is omitted; other actions auto-detect the
/// project from the git remote.
pub struct IssueAction;

#[async_trait]
impl GitLabAction for IssueAction {
    fn name(&self) -> &'static str {
        "gitlab_issue"
    }

    fn description(&self) -> &'static str {
        "Create, view, update, and manage GitLab issues. \
         Actions: list, get, create, update, close, reopen, comment. \
         List works cross-project when project is omitted (e.g., \
         'list all issues assigned to me'). Other actions auto-detect \
         project from git remote if omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get", "create", "update", "close", "reopen", "comment"],
                    "description": "Action to perform",
                },
                "instance": {
                    "type": "string",
                    "description": "GitLab instance name (uses default if omitted)",
                },
                "project": {
                    "type": "string",
                    "description": "Project path (e.g., 'group/repo'). \
                        Auto-detected from git remote if omitted. \
                        For list: omit for cross-project search, \
                        or pass 'this' to infer from git remote.",
                },
                "iid": {
                    "type": "integer",
                    "description": "Issue IID (required for get/update/close/reopen/comment)",
                },
                "title": {
                    "type": "string",
                    "description": "Issue title (required for create)",
                },
                "description": {
                    "type": "string",
                    "description": "Issue description (markdown supported)",
                },
                "labels": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Labels to apply",
                },
                "assignees": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "GitLab usernames to assign (not emails). Use 'me' for yourself.",
                },
                "assignee_username": {
                    "type": "string",
                    "description": "Filter issues by assignee username (list action). \
                        Use 'me' for yourself, or 'None' for unassigned.",
                },
                "author_username": {
                    "type": "string",
                    "description": "Filter issues by author username (list action). Use 'me' for yourself.",
                },
                "state": {
                    "type": "string",
                    "enum": ["opened", "closed", "all"],
                    "description": "Filter by state (default: opened)",
                },
                "search": {
                    "type": "string",
                    "description": "Search in title and description",
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
        let action = arg_str(args, "action").unwrap_or("");

        // List supports cross-project queries, so the project stays optional.
        if action == "list" {
            let project = match arg_str(args, "project") {
                Some(raw) => match base.resolve_project(Some(raw)).await {
                    Ok(path) => Some(GitLabClient::encode_path(&path)),
                    Err(message) => return Ok(ToolResult::error(message)),
                },
                None => None,
            };
            return self.list(base, instance, client, project.as_deref(), args).await;
        }

        // Every other action requires a project.
        let project = match base.resolve_project(arg_str(args, "project")).await {
            Ok(path) => GitLabClient::encode_path(&path),
            Err(message) => return Ok(ToolResult::error(message)),
        };

        match action {
            "get" => match arg_u64(args, "iid") {
                Some(iid) => self.get(client, &project, iid).await,
                None => Ok(missing("iid", "get")),
            },
            "create" => match arg_str(args, "title") {
                Some(_) => self.create(base, instance, client, &project, args).await,
                None => Ok(missing("title", "create")),
            },
            "update" => match arg_u64(args, "iid") {
                Some(iid) => self.update(base, instance, client, &project, iid, args).await,
                None => Ok(missing("iid", "update")),
            },
            "close" => match arg_u64(args, "iid") {
                Some(iid) => self.set_state(client, &project, iid, "close").await,
                None => Ok(missing("iid", "close")),
            },
            "reopen" => match arg_u64(args, "iid") {
                Some(iid) => self.set_state(client, &project, iid, "reopen").await,
                None => Ok(missing("iid", "reopen")),
            },
            "comment" => {
                let iid = match arg_u64(args, "iid") {
                    Some(iid) => iid,
                    None => return Ok(missing("iid", "comment")),
                };
                let body = match arg_str(args, "body") {
                    Some(body) => body,
                    None => return Ok(missing("body", "comment")),
                };
                self.comment(client, &project, iid, body).await
            }
            other => Ok(ToolResult::error(format!("Unknown action: {}", other))),
        }
    }
}

impl IssueAction {
    async fn list(
        &self,
        base: &GitLabSkillBase,
        instance: &GitLabInstance,
        client: &GitLabClient,
        project: Option<&str>,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError> {
        let mut params: Vec<(String, String)> = Vec::new();

        if let Some(state) = arg_str(args, "state") {
            params.push(("state".to_string(), state.to_string()));
        }
        if let Some(search) = arg_str(args, "search") {
            params.push(("search".to_string(), search.to_string()));
        }
        if let Some(labels) = arg_str_list(args, "labels") {
            if !labels.is_empty() {
                params.push(("labels".to_string(), labels.join(",")));
            }
        }
        if let Some(assignee) = arg_str(args, "assignee_username") {
            let resolved = if assignee.eq_ignore_ascii_case("me") {
                base.resolve_me_username(instance, client).await?
            } else {
                assignee.to_string()
            };
            params.push(("assignee_username".to_string(), resolved));
        }
        if let Some(author) = arg_str(args, "author_username") {
            let resolved = if author.eq_ignore_ascii_case("me") {
                base.resolve_me_username(instance, client).await?
            } else {
                author.to_string()
            };
            params.push(("author_username".to_string(), resolved));
        }

        let limit = arg_u64(args, "limit").unwrap_or(DEFAULT_LIST_LIMIT as u64) as usize;

        let endpoint = match project {
            Some(project) => format!("/projects/{}/issues", project),
            None => {
                // The global endpoint defaults to scope=created_by_me,
                // which is too restrictive for cross-project filters.
                if !params.iter().any(|(k, _)| k == "scope") {
                    params.push(("scope".to_string(), "all".to_string()));
                }
                "/issues".to_string()
            }
        };

        let issues = client.collect_pages(&endpoint, params, limit).await?;
        if issues.is_empty() {
            return Ok(ToolResult::success("No issues found"));
        }

        let mut lines = vec![format!("Found {} issue(s):", issues.len())];
        for issue in &issues {
            let state = issue["state"].as_str().unwrap_or("unknown");
            let marker = if state == "opened" { "open" } else { "closed" };
            let labels = issue["labels"]
                .as_array()
                .filter(|l| !l.is_empty())
                .map(|l| {
                    let names: Vec<&str> = l.iter().filter_map(Value::as_str).collect();
                    format!(" [{}]", names.join(", "))
                })
                .unwrap_or_default();
            // Cross-project listings show the full reference.
            let reference = if project.is_none() {
                issue["references"]["full"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("#{}", issue["iid"]))
            } else {
                format!("#{}", issue["iid"])
            };
            lines.push(format!(
                "  [{}] {}: {}{}",
                marker,
                reference,
                issue["title"].as_str().unwrap_or(""),
                labels
            ));
        }
        Ok(ToolResult::success(lines.join("\n")))
    }

    async fn get(
        &self,
        client: &GitLabClient,
        project: &str,
        iid: u64,
    ) -> Result<ToolResult, GitLabApiError> {
        let issue = client
            .get(&format!("/projects/{}/issues/{}", project, iid), &[])
            .await?;

        let mut lines = vec![
            format!("# {}", issue["title"].as_str().unwrap_or("")),
            String::new(),
            format!(
                "IID: #{} | State: {} | Author: @{}",
                issue["iid"],
                issue["state"].as_str().unwrap_or(""),
                issue["author"]["username"].as_str().unwrap_or("")
            ),
            format!(
                "Created: {} | Updated: {}",
                issue["created_at"].as_str().unwrap_or(""),
                issue["updated_at"].as_str().unwrap_or("")
            ),
        ];

        if let Some(labels) = issue["labels"].as_array().filter(|l| !l.is_empty()) {
            let names: Vec<&str> = labels.iter().filter_map(Value::as_str).collect();
            lines.push(format!("Labels: {}", names.join(", ")));
        }
        if let Some(assignees) = issue["assignees"].as_array().filter(|a| !a.is_empty()) {
            let names: Vec<String> = assignees
                .iter()
                .filter_map(|a| a["username"].as_str())
                .map(|u| format!("@{}", u))
                .collect();
            lines.push(format!("Assignees: {}", names.join(", ")));
        }
        if let Some(milestone) = issue["milestone"]["title"].as_str() {
            lines.push(format!("Milestone: {}", milestone));
        }
        if let Some(due) = issue["due_date"].as_str() {
            lines.push(format!("Due: {}", due));
        }

        lines.push(String::new());
        lines.push(
            issue["description"]
                .as_str()
                .filter(|d| !d.is_empty())
                .unwrap_or("(no description)")
                .to_string(),
        );
        lines.push(String::new());
        lines.push(format!(
            "Web URL: {}",
            issue["web_url"].as_str().unwrap_or("")
        ));

        Ok(ToolResult::success(lines.join("\n")))
    }

    async fn create(
        &self,
        base: &GitLabSkillBase,
        instance: &GitLabInstance,
        client: &GitLabClient,
        project: &str,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError> {
        let mut data = Map::new();
        data.insert("title".to_string(), args["title"].clone());

        if let Some(description) = arg_str(args, "description") {
            data.insert("description".to_string(), Value::from(description));
        }
        if let Some(labels) = arg_str_list(args, "labels") {
            if !labels.is_empty() {
                data.insert("labels".to_string(), Value::from(labels.join(",")));
            }
        }
        if let Some(assignees) = arg_str_list(args, "assignees") {
            if !assignees.is_empty() {
                let ids = base.resolve_user_ids(instance, client, &assignees).await?;
                data.insert("assignee_ids".to_string(), json!(ids));
            }
        }

        let issue = client
            .post(&format!("/projects/{}/issues", project), Value::Object(data))
            .await?;
        Ok(ToolResult::success(format!(
            "Created issue #{}: {}\n{}",
            issue["iid"],
            issue["title"].as_str().unwrap_or(""),
            issue["web_url"].as_str().unwrap_or("")
        )))
    }

    async fn update(
        &self,
        base: &GitLabSkillBase,
        instance: &GitLabInstance,
        client: &GitLabClient,
        project: &str,
        iid: u64,
        args: &Value,
    ) -> Result<ToolResult, GitLabApiError> {
        let mut data = Map::new();

        if let Some(title) = arg_str(args, "title") {
            data.insert("title".to_string(), Value::from(title));
        }
        if let Some(description) = arg_str(args, "description") {
            data.insert("description".to_string(), Value::from(description));
        }
        if let Some(labels) = arg_str_list(args, "labels") {
            if !labels.is_empty() {
                data.insert("labels".to_string(), Value::from(labels.join(",")));
            }
        }
        // An explicitly empty assignee list clears the assignees.
        if let Some(assignees) = arg_str_list(args, "assignees") {
            if assignees.is_empty() {
                data.insert("assignee_ids".to_string(), json!([]));
            } else {
                let ids = base.resolve_user_ids(instance, client, &assignees).await?;
                data.insert("assignee_ids".to_string(), json!(ids));
            }
        }

        if data.is_empty() {
            return Ok(ToolResult::error("No fields to update"));
        }

        let issue = client
            .put(
                &format!("/projects/{}/issues/{}", project, iid),
                Value::Object(data),
            )
            .await?;
        Ok(ToolResult::success(format!(
            "Updated issue #{}: {}",
            issue["iid"],
            issue["title"].as_str().unwrap_or("")
        )))
    }

    async fn set_state(
        &self,
        client: &GitLabClient,
        project: &str,
        iid: u64,
        state_event: &str,
    ) -> Result<ToolResult, GitLabApiError> {
        let issue = client
            .put(
                &format!("/projects/{}/issues/{}", project, iid),
                json!({"state_event": state_event}),
            )
            .await?;
        let verb = if state_event == "close" {
            "Closed"
        } else {
            "Reopened"
        };
        Ok(ToolResult::success(format!(
            "{} issue #{}",
            verb, issue["iid"]
        )))
    }

    async fn comment(
        &self,
        client: &GitLabClient,
        project: &str,
        iid: u64,
        body: &str,
    ) -> Result<ToolResult, GitLabApiError> {
        client
            .post(
                &format!("/projects/{}/issues/{}/notes", project, iid),
                json!({"body": body}),
            )
            .await?;
        Ok(ToolResult::success(format!(
            "Added comment to issue #{}",
            iid
        )))
    }
}
