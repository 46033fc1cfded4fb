//! Skill abstraction layer.
//!
//! A skill is a named operation the model can call through the dispatcher.
//! Skills declare a JSON-shaped parameter schema and implement an async
//! `execute()` that returns a [`ToolResult`] without ever raising: bad
//! arguments, permission refusals, and upstream failures are all reported
//! as the failure shape.
//!
//! # Architecture
//!
//! ```text
//! Agent -> SkillRegistry -> Skill -> Subprocess runner / GitLab client / ...
//! ```
//!
//! Each agent gets its own registry, seeded at creation time from a factory
//! table. Factories receive a [`ServiceContainer`](services::ServiceContainer)
//! and yield nothing when the capability they need is absent in the current
//! configuration (no GitLab instances, sandboxed permission level, ...), so
//! registration is best-effort by design.

pub mod builtin;
pub mod services;
pub mod vcs;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::types::ToolResult;

/// A named operation callable by the model.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Stable name the model addresses this skill by.
    fn name(&self) -> &str;

    /// One-line description surfaced in the tool listing given to the model.
    fn description(&self) -> &str;

    /// JSON-Schema-shaped parameter descriptor.
    ///
    /// The dispatcher checks the `required` list before invoking; anything
    /// richer is up to the skill itself.
    fn parameters(&self) -> Value;

    /// Run the skill.
    ///
    /// Must not panic and must not error out of band: every failure is a
    /// [`ToolResult::Failure`]. Long-running work is expected to be
    /// cancellable at its suspension points.
    async fn execute(&self, args: Value) -> ToolResult;
}

/// Factory that builds one skill for an agent, or yields nothing when the
/// capability it needs is not available under the agent's configuration.
pub type SkillFactory = fn(&Arc<ServiceContainer>) -> Option<Arc<dyn Skill>>;

/// Per-agent skill registry and dispatcher.
///
/// Holds the skill set snapshotted at agent creation. Dispatch never fails
/// out of band; unknown names and missing required parameters come back as
/// `ToolResult::Failure`.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a factory table.
    ///
    /// Factories returning `None` are skipped silently.
    pub fn from_factories(factories: &[SkillFactory], services: &Arc<ServiceContainer>) -> Self {
        let mut registry = Self::new();
        for factory in factories {
            if let Some(skill) = factory(services) {
                registry.register(skill);
            }
        }
        registry
    }

    /// Insert or replace a skill.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        debug!("registering skill '{}'", skill.name());
        self.skills.insert(skill.name().to_string(), skill);
    }

    /// Borrow a skill by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    /// Names of all registered skills, sorted for stable listings.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered skills.
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether no skills are registered.
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Tool definitions for the model, in OpenAI function-calling shape.
    pub fn tool_definitions(&self) -> Vec<Value> {
        let mut defs: Vec<Value> = self
            .skills
            .values()
            .map(|skill| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": skill.name(),
                        "description": skill.description(),
                        "parameters": skill.parameters(),
                    }
                })
            })
            .collect();
        defs.sort_by(|a, b| {
            a["function"]["name"]
                .as_str()
                .cmp(&b["function"]["name"].as_str())
        });
        defs
    }

    /// Resolve a tool call to a skill and run it.
    ///
    /// Validates that `args` is an object carrying every parameter the
    /// skill's schema marks required. All failure modes come back as
    /// `ToolResult::Failure`.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResult {
        let skill = match self.skills.get(name) {
            Some(skill) => skill,
            None => return ToolResult::error(format!("Unknown skill: {}", name)),
        };

        if !args.is_object() {
            return ToolResult::error(format!(
                "Invalid arguments for {}: expected a JSON object",
                name
            ));
        }

        if let Some(missing) = missing_required(&skill.parameters(), &args) {
            return ToolResult::error(format!(
                "Missing required parameter '{}' for {}",
                missing, name
            ));
        }

        skill.execute(args).await
    }
}

/// First required parameter absent from `args`, if any.
fn missing_required(schema: &Value, args: &Value) -> Option<String> {
    let required = schema.get("required")?.as_array()?;
    for name in required {
        let name = name.as_str()?;
        if args.get(name).map(|v| v.is_null()).unwrap_or(true) {
            return Some(name.to_string());
        }
    }
    None
}
