//! Agent activity push feed.
//!
//! The API broadcasts `{"type": "agent_status", "agent": ..., "status": ...}`
//! frames on `/ws/{session_id}` while a query runs. The feed is best-effort:
//! connection failures and malformed frames only end or skip the feed.

use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub agent: String,
    pub status: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum FeedFrame {
    #[serde(rename = "agent_status")]
    AgentStatus { agent: String, status: String },
    #[serde(other)]
    Other,
}

pub fn parse_frame(text: &str) -> Option<AgentStatus> {
    match serde_json::from_str::<FeedFrame>(text) {
        Ok(FeedFrame::AgentStatus { agent, status }) => Some(AgentStatus { agent, status }),
        Ok(FeedFrame::Other) => None,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed feed frame");
            None
        }
    }
}

/// `http://host:8000` + `abc` -> `ws://host:8000/ws/abc`
pub fn feed_url(ws_base_url: &str, session_id: &str) -> String {
    let base = ws_base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    match Url::parse(&base) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().push("ws").push(session_id);
            }
            url.into()
        }
        _ => format!("{}/ws/{}", base, session_id),
    }
}

/// A running feed. Dropping it stops the background reader.
pub struct AgentFeed {
    pub events: mpsc::Receiver<AgentStatus>,
    task: JoinHandle<()>,
}

impl Drop for AgentFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn subscribe(url: &str) -> Result<AgentFeed, tokio_tungstenite::tungstenite::Error> {
    let (stream, _) = connect_async(url).await?;
    tracing::debug!(url, "agent feed connected");
    let (_write, mut read) = stream.split();
    let (tx, events) = mpsc::channel(64);

    let task = tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(status) = parse_frame(text.as_str()) {
                        if tx.send(status).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "agent feed closed");
                    break;
                }
            }
        }
    });

    Ok(AgentFeed { events, task })
}
