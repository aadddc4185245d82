//! Request and response bodies exchanged with the AgentDeck backend.

use serde::{Deserialize, Serialize};

use super::config::AgentConfig;

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Meta entries produced by the client itself; never sent to the backend.
    System,
}

/// One entry of the history sent with a chat turn (role and content only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// An agent as reported by `GET /api/agents`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(default)]
    pub config_id: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Container status collapsed to the three states the panel distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Stopped,
    Missing,
}

impl AgentInfo {
    pub fn normalized_status(&self) -> AgentStatus {
        match self.status.as_str() {
            "running" => AgentStatus::Running,
            "stopped" | "exited" | "created" => AgentStatus::Stopped,
            _ => AgentStatus::Missing,
        }
    }

    pub fn is_running(&self) -> bool {
        self.normalized_status() == AgentStatus::Running
    }

    /// Name shown in listings: the config id when known, else the agent id.
    pub fn display_name(&self) -> &str {
        self.config_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.agent_id)
    }
}

#[derive(Debug, Serialize)]
pub struct LaunchRequest<'a> {
    pub config: &'a AgentConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_env: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchResponse {
    pub agent_id: String,
    pub session_id: String,
    pub session_token: String,
    #[serde(default)]
    pub config_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    #[serde(rename = "sessionId")]
    pub session_id: &'a str,
    pub messages: &'a [WireMessage],
}

#[derive(Debug, Serialize)]
pub struct ConfigPatch<'a> {
    pub config: &'a AgentConfig,
}

/// Answer to a successful config PATCH: the rotated session pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigReloadResponse {
    pub session_id: String,
    pub session_token: String,
    #[serde(default)]
    pub agent: Option<AgentInfo>,
}

#[derive(Debug, Serialize)]
pub struct BlueprintRequest<'a> {
    pub prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlueprintResponse {
    pub config: AgentConfig,
}

#[derive(Debug, Serialize)]
pub struct IntentRequest<'a> {
    pub user_text: &'a str,
    pub assistant_text: &'a str,
}

/// Tools the intent endpoint thinks the last exchange would have benefited from.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolSuggestion {
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
