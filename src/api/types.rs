use crate::db::models::{AgentActivity, Message, MessageMetadata, Role};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as the API exchanges it in `conversation_history`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            timestamp: Some(message.created_at.to_rfc3339()),
        }
    }
}

impl WireMessage {
    /// Convert to a local message. Entries with an unknown role are dropped.
    pub fn into_message(self) -> Option<Message> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => return None,
        };
        let mut message = Message::new(role, self.content);
        if let Some(at) = self.timestamp.as_deref().and_then(parse_timestamp) {
            message.created_at = at;
        }
        Some(message)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// The most recent `limit` messages, in order, as wire history.
pub fn wire_history(messages: &[Message], limit: usize) -> Vec<WireMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..].iter().map(WireMessage::from).collect()
}

#[derive(Debug, Serialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub client_id: String,
    pub session_id: Option<String>,
    pub conversation_history: Vec<WireMessage>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ClarificationRequest {
    pub session_id: String,
    pub clarification: String,
    pub original_query: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryMetadata {
    #[serde(default)]
    pub query_time_ms: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_message: Option<String>,
    #[serde(default, alias = "agent_state")]
    pub agent_activity: Option<AgentActivity>,
    #[serde(default)]
    pub metadata: Option<QueryMetadata>,
    #[serde(default)]
    pub visualization: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub content: String,
    pub session_id: Option<String>,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClarificationPrompt {
    pub prompt: String,
    pub original_query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Answer(Answer),
    Clarification(ClarificationPrompt),
}

impl QueryOutcome {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            QueryOutcome::Answer(answer) => answer.session_id.as_deref(),
            QueryOutcome::Clarification(prompt) => prompt.session_id.as_deref(),
        }
    }
}

impl QueryResponse {
    fn text(&self) -> Option<&str> {
        self.response
            .as_deref()
            .or(self.message.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    /// Classify the response. `original_query` is kept verbatim for a follow-up clarification.
    pub fn into_outcome(self, original_query: &str) -> QueryOutcome {
        if self.needs_clarification {
            let prompt = self
                .clarification_message
                .clone()
                .filter(|text| !text.trim().is_empty())
                .or_else(|| self.text().map(str::to_string))
                .unwrap_or_else(|| "Could you clarify your question?".to_string());
            return QueryOutcome::Clarification(ClarificationPrompt {
                prompt,
                original_query: original_query.to_string(),
                session_id: self.session_id,
            });
        }

        let content = self.text().unwrap_or_default().to_string();
        QueryOutcome::Answer(Answer {
            content,
            session_id: self.session_id,
            metadata: MessageMetadata {
                agent_activity: self.agent_activity,
                query_time_ms: self.metadata.and_then(|m| m.query_time_ms),
                visualization: self.visualization,
            },
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<WireMessage>,
}

impl SessionSnapshot {
    pub fn messages(self) -> Vec<Message> {
        self.conversation_history
            .into_iter()
            .filter_map(WireMessage::into_message)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Holding {
    pub symbol: String,
    #[serde(default)]
    pub security_name: String,
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub sector: String,
    pub quantity: f64,
    pub purchase_price: f64,
    #[serde(default)]
    pub purchase_date: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Portfolio {
    pub client_id: String,
    #[serde(default)]
    pub total_holdings: usize,
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub active_sessions: Option<u64>,
}
