//! Agent registry: the single-process map behind the control plane.
//!
//! Owns every live [`Agent`], routes the JSON-RPC methods to them, and
//! shares one [`EventHub`] across all of them. Agent ids are unique;
//! creating a duplicate is an error, destroying cancels any in-flight turn
//! without waiting for the provider.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::nexus3::agent::{Agent, AgentError};
use crate::nexus3::client_wrapper::ClientWrapper;
use crate::nexus3::event_hub::EventHub;
use crate::nexus3::permissions::PermissionLevel;
use crate::nexus3::session::{Session, DEFAULT_MAX_TOKENS};
use crate::nexus3::skill::builtin::builtin_factories;
use crate::nexus3::skill::services::{Confirmer, DenyAll, ServiceContainer};
use crate::nexus3::skill::vcs::config::GitLabConfig;
use crate::nexus3::skill::vcs::gitlab::gitlab_factories;
use crate::nexus3::skill::SkillRegistry;

/// Builds a provider client, honoring an optional per-agent model override.
pub type ClientFactory = Arc<dyn Fn(Option<&str>) -> Arc<dyn ClientWrapper> + Send + Sync>;

/// Default system prompt for fresh agents.
const DEFAULT_SYSTEM_PROMPT: &str = "You are NEXUS3, an AI-powered CLI assistant.";

/// Parameters of the `create` method.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateParams {
    pub agent_id: String,
    /// Permission preset: "sandboxed", "trusted", or "yolo".
    pub preset: PermissionLevel,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub allowed_write_paths: Vec<PathBuf>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Errors surfaced through the control plane.
#[derive(Debug)]
pub enum RegistryError {
    DuplicateAgent(String),
    NotFound(String),
    Timeout(u64),
    Agent(AgentError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateAgent(id) => write!(f, "agent '{}' already exists", id),
            RegistryError::NotFound(id) => write!(f, "agent '{}' not found", id),
            RegistryError::Timeout(secs) => write!(f, "request timed out after {}s", secs),
            RegistryError::Agent(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    hub: Arc<EventHub>,
    client_factory: ClientFactory,
    gitlab: Option<GitLabConfig>,
    confirmer: Arc<dyn Confirmer>,
}

impl AgentRegistry {
    pub fn new(hub: Arc<EventHub>, client_factory: ClientFactory) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            hub,
            client_factory,
            gitlab: None,
            confirmer: Arc::new(DenyAll),
        }
    }

    /// Provide GitLab configuration to new agents (builder pattern).
    pub fn with_gitlab(mut self, gitlab: Option<GitLabConfig>) -> Self {
        self.gitlab = gitlab;
        self
    }

    /// Replace the confirmation channel handed to new agents.
    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Create a new agent. Duplicate ids are refused.
    pub async fn create(&self, params: CreateParams) -> Result<Value, RegistryError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&params.agent_id) {
            return Err(RegistryError::DuplicateAgent(params.agent_id));
        }

        let cwd = params
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let services = Arc::new(
            ServiceContainer::new(
                cwd,
                params.preset,
                self.gitlab.clone(),
                Arc::clone(&self.confirmer),
            )
            .with_allowed_write_paths(params.allowed_write_paths.clone()),
        );

        let mut factories = builtin_factories();
        factories.extend(gitlab_factories());
        let skills = SkillRegistry::from_factories(&factories, &services);

        let client = (self.client_factory)(params.model.as_deref());
        let session = Session::new(client, DEFAULT_SYSTEM_PROMPT.to_string(), DEFAULT_MAX_TOKENS);

        let agent = Arc::new(Agent::new(
            params.agent_id.clone(),
            services,
            session,
            skills,
            Arc::clone(&self.hub),
        ));
        agents.insert(params.agent_id.clone(), Arc::clone(&agent));
        drop(agents);

        info!(
            "created agent '{}' ({}, {} skills)",
            params.agent_id,
            params.preset,
            agent.skill_names().len()
        );

        if let Some(message) = params.initial_message {
            // Fire the first turn without holding up the create reply; its
            // outcome is visible on the event stream.
            let first_turn = Arc::clone(&agent);
            tokio::spawn(async move {
                let _ = first_turn.send(&message).await;
            });
        }

        Ok(agent.status())
    }

    /// Destroy an agent: cancel its turn, drop it from the map, forget its
    /// event history. Never waits on the provider.
    pub async fn destroy(&self, agent_id: &str) -> Result<(), RegistryError> {
        let agent = self
            .agents
            .write()
            .await
            .remove(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        agent.cancel_current();
        self.hub.forget_agent(agent_id);
        info!("destroyed agent '{}'", agent_id);
        Ok(())
    }

    /// Ids of all live agents, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn get(&self, agent_id: &str) -> Result<Arc<Agent>, RegistryError> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))
    }

    /// Run one turn; with a timeout the turn is cancelled when it elapses.
    pub async fn send(
        &self,
        agent_id: &str,
        content: &str,
        timeout_secs: Option<u64>,
    ) -> Result<String, RegistryError> {
        let agent = self.get(agent_id).await?;
        match timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), agent.send(content)).await {
                    Ok(result) => result.map_err(RegistryError::Agent),
                    Err(_) => {
                        agent.cancel_current();
                        Err(RegistryError::Timeout(secs))
                    }
                }
            }
            None => agent.send(content).await.map_err(RegistryError::Agent),
        }
    }

    /// Cancel a turn by request id; silently no-ops on a mismatch.
    pub async fn cancel(&self, agent_id: &str, request_id: &str) -> Result<bool, RegistryError> {
        let agent = self.get(agent_id).await?;
        Ok(agent.cancel(request_id))
    }

    pub async fn status(&self, agent_id: &str) -> Result<Value, RegistryError> {
        Ok(self.get(agent_id).await?.status())
    }

    pub async fn compact(&self, agent_id: &str) -> Result<Value, RegistryError> {
        Ok(self.get(agent_id).await?.compact().await)
    }

    /// Whether any agent currently runs a turn. Used with
    /// [`EventHub::total_subscriber_count`] for idle accounting.
    pub async fn any_busy(&self) -> bool {
        self.agents.read().await.values().any(|a| a.is_busy())
    }

    /// Cancel every live turn. Called on shutdown.
    pub async fn cancel_all(&self) {
        for agent in self.agents.read().await.values() {
            agent.cancel_current();
        }
    }
}
