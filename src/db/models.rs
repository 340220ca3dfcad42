use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client the advisor can switch between. Loaded once from configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub id: String,
    pub label: String,
    pub holdings: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Which agents took part in answering a query.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AgentActivity {
    pub planner_used: bool,
    pub portfolio_used: bool,
    pub market_used: bool,
    pub collaboration_used: bool,
    pub validator_used: bool,
}

impl AgentActivity {
    /// Names of the agents that were used, in pipeline order.
    pub fn active_agents(&self) -> Vec<&'static str> {
        [
            (self.planner_used, "planner"),
            (self.portfolio_used, "portfolio"),
            (self.market_used, "market"),
            (self.collaboration_used, "collaboration"),
            (self.validator_used, "validator"),
        ]
        .into_iter()
        .filter_map(|(used, name)| used.then_some(name))
        .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_activity: Option<AgentActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<serde_json::Value>,
}

/// One conversational turn. Never edited after it is appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, metadata: Option<MessageMetadata>) -> Self {
        Self {
            metadata,
            ..Self::new(Role::Assistant, content)
        }
    }
}

pub fn encode_conversation(messages: &[Message]) -> serde_json::Result<String> {
    serde_json::to_string(messages)
}

pub fn decode_conversation(raw: &str) -> serde_json::Result<Vec<Message>> {
    serde_json::from_str(raw)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User preferences bag, stored as one JSON value.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    pub sidebar_collapsed: bool,
    pub show_agent_activity: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            sidebar_collapsed: false,
            show_agent_activity: true,
        }
    }
}
