//! Async HTTP client for the GitLab REST API.
//!
//! One client per configured instance, created lazily and shared by every
//! GitLab skill of that instance. Provides:
//!
//! - SSRF re-validation of every request URL (defense in depth on top of
//!   the config-load check)
//! - Retry with exponential backoff for server errors and timeouts
//! - `Retry-After`-aware rate-limit handling (clamped to 60 s)
//! - Automatic pagination as a stream of items
//! - No redirect following

use std::fmt;
use std::time::Duration;

use futures_util::stream::{self, Stream, TryStreamExt};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::nexus3::skill::vcs::config::GitLabInstance;
use crate::nexus3::url_validator::validate_url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 100;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BACKOFF: f64 = 1.5;
/// Upper bound honored for `Retry-After`.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// GitLab API error with upstream status code and message.
///
/// `status_code` 0 marks transport-level failures (timeout after all
/// retries, connection refused, malformed response body).
#[derive(Debug)]
pub struct GitLabApiError {
    pub status_code: u16,
    pub message: String,
    pub body: Option<Value>,
}

impl GitLabApiError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            body: None,
        }
    }

    fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }
}

impl fmt::Display for GitLabApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GitLab API error {}: {}", self.status_code, self.message)
    }
}

impl std::error::Error for GitLabApiError {}

/// Seconds to honor from a `Retry-After` header: default 5, never more
/// than [`MAX_RETRY_AFTER_SECS`].
fn clamp_retry_after(header: Option<u64>) -> u64 {
    header.unwrap_or(5).min(MAX_RETRY_AFTER_SECS)
}

/// Extract the most useful message from a GitLab error body.
fn parse_error_body(text: &str) -> (String, Option<Value>) {
    match serde_json::from_str::<Value>(text) {
        Ok(body) => {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| body.to_string());
            (message, Some(body))
        }
        Err(_) => (text.to_string(), None),
    }
}

/// Async client for one GitLab instance.
pub struct GitLabClient {
    instance: GitLabInstance,
    base_url: String,
    timeout: Duration,
    // Connection pool and auth header are materialized on first request.
    http: OnceCell<reqwest::Client>,
    /// Set for tests against in-process stubs on private addresses.
    allow_private: bool,
}

impl GitLabClient {
    pub fn new(instance: GitLabInstance) -> Self {
        Self::with_timeout(instance, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(instance: GitLabInstance, timeout: Duration) -> Self {
        let base_url = format!("{}/api/v4", instance.url.trim_end_matches('/'));
        Self {
            instance,
            base_url,
            timeout,
            http: OnceCell::new(),
            allow_private: false,
        }
    }

    /// Permit private/link-local request targets (stub servers in tests).
    pub fn allow_private_addresses(mut self) -> Self {
        self.allow_private = true;
        self
    }

    /// URL-encode a project or group path as one opaque segment
    /// (`group/sub/repo` becomes `group%2Fsub%2Frepo`).
    pub fn encode_path(project_or_group: &str) -> String {
        urlencoding::encode(project_or_group).into_owned()
    }

    /// Lazily build the pooled HTTP client, resolving the token first.
    fn ensure_client(&self) -> Result<&reqwest::Client, GitLabApiError> {
        self.http.get_or_try_init(|| {
            let token = self
                .instance
                .resolve_token()
                .ok_or_else(|| GitLabApiError::new(401, "No GitLab token configured"))?;
            let mut headers = HeaderMap::new();
            let mut token_value = HeaderValue::from_str(&token)
                .map_err(|_| GitLabApiError::new(401, "Invalid token value"))?;
            token_value.set_sensitive(true);
            headers.insert("PRIVATE-TOKEN", token_value);
            reqwest::Client::builder()
                .timeout(self.timeout)
                .default_headers(headers)
                .user_agent("NEXUS3-GitLab-Client/1.0")
                // Never follow redirects (security).
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| GitLabApiError::transport(format!("Failed to build client: {}", e)))
        })
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs_f64(RETRY_BACKOFF.powi(attempt as i32))
    }

    /// Perform one API request with the full retry policy.
    ///
    /// Returns `Ok(None)` for `204 No Content`, the parsed JSON otherwise.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, GitLabApiError> {
        let client = self.ensure_client()?;
        let url = format!("{}{}", self.base_url, path);

        // Re-validate before every request (defense in depth).
        validate_url(&url, true, self.allow_private)
            .map_err(|e| GitLabApiError::transport(e.to_string()))?;

        let mut attempt: u32 = 0;
        loop {
            let mut request = client.request(method.clone(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(GitLabApiError::transport("Request timeout"));
                }
                Err(e) => {
                    return Err(GitLabApiError::transport(format!("Request failed: {}", e)))
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_RETRIES {
                    let header = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    let wait = clamp_retry_after(header);
                    debug!("rate limited on {} {}, waiting {}s", method, path, wait);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                    continue;
                }
                return Err(GitLabApiError::new(429, "Rate limit exceeded"));
            }

            if status.is_server_error() && attempt < MAX_RETRIES {
                warn!("{} {} returned {}, retrying", method, path, status);
                tokio::time::sleep(Self::backoff(attempt)).await;
                attempt += 1;
                continue;
            }

            if status.as_u16() >= 400 {
                let text = response.text().await.unwrap_or_default();
                let (message, body) = parse_error_body(&text);
                return Err(GitLabApiError {
                    status_code: status.as_u16(),
                    message,
                    body,
                });
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }
            return response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| GitLabApiError::transport(format!("Invalid JSON response: {}", e)));
        }
    }

    /// GET request; `204` comes back as `Value::Null`.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value, GitLabApiError> {
        self.request(Method::GET, path, query, None)
            .await
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// POST request with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> Result<Value, GitLabApiError> {
        self.request(Method::POST, path, &[], Some(&body))
            .await
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// PUT request with a JSON body.
    pub async fn put(&self, path: &str, body: Value) -> Result<Value, GitLabApiError> {
        self.request(Method::PUT, path, &[], Some(&body))
            .await
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// DELETE request.
    pub async fn delete(&self, path: &str) -> Result<Value, GitLabApiError> {
        self.request(Method::DELETE, path, &[], None)
            .await
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// Auto-paginate through results, yielding items until `limit`.
    ///
    /// Fetches batches of up to [`MAX_PER_PAGE`] and terminates on a short
    /// page or when the limit is reached.
    pub fn paginate<'a>(
        &'a self,
        path: &'a str,
        params: Vec<(String, String)>,
        limit: usize,
    ) -> impl Stream<Item = Result<Value, GitLabApiError>> + 'a {
        struct PageState {
            params: Vec<(String, String)>,
            page: usize,
            yielded: usize,
            done: bool,
        }

        let per_page = limit.clamp(1, MAX_PER_PAGE);
        let state = PageState {
            params,
            page: 1,
            yielded: 0,
            done: limit == 0,
        };

        stream::try_unfold(state, move |mut state| async move {
            if state.done || state.yielded >= limit {
                return Ok(None);
            }
            let mut query = state.params.clone();
            query.push(("page".to_string(), state.page.to_string()));
            query.push(("per_page".to_string(), per_page.to_string()));

            let value = self.get(path, &query).await?;
            let items = match value {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            if items.is_empty() {
                return Ok(None);
            }
            state.done = items.len() < per_page;
            let take = items.len().min(limit - state.yielded);
            state.yielded += take;
            state.page += 1;
            let page_items: Vec<Result<Value, GitLabApiError>> =
                items.into_iter().take(take).map(Ok).collect();
            Ok(Some((stream::iter(page_items), state)))
        })
        .try_flatten()
    }

    /// Paginate and collect into a vector (what most skills want).
    pub async fn collect_pages(
        &self,
        path: &str,
        params: Vec<(String, String)>,
        limit: usize,
    ) -> Result<Vec<Value>, GitLabApiError> {
        self.paginate(path, params, limit).try_collect().await
    }

    /// `GET /user`: the authenticated user.
    pub async fn get_current_user(&self) -> Result<Value, GitLabApiError> {
        self.get("/user", &[]).await
    }

    /// Resolve a username to its numeric user id.
    pub async fn lookup_user(&self, username: &str) -> Result<u64, GitLabApiError> {
        let users = self
            .get("/users", &[("username".to_string(), username.to_string())])
            .await?;
        users
            .as_array()
            .and_then(|list| list.first())
            .and_then(|user| user.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| GitLabApiError::new(404, format!("User not found: {}", username)))
    }

    /// `GET /projects/:id` by path or numeric id.
    pub async fn get_project(&self, project: &str) -> Result<Value, GitLabApiError> {
        self.get(&format!("/projects/{}", Self::encode_path(project)), &[])
            .await
    }
}
