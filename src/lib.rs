// src/lib.rs

// Import the top-level `nexus3` module.
pub mod nexus3;

// Re-exporting key items for easier external access.
pub use nexus3::agent::Agent;
pub use nexus3::client_wrapper::{ClientWrapper, LlmResponse, Message, Role, TokenUsage};
pub use nexus3::event_hub::{EventHub, Subscription};
pub use nexus3::permissions::PermissionLevel;
pub use nexus3::registry::AgentRegistry;
pub use nexus3::types::ToolResult;
