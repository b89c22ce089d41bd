//! Presence store protocol
//!
//! The server-side presence store is reached over a realtime messaging
//! channel. Outbound commands and inbound updates are JSON objects tagged by
//! `event` with their payload under `data`:
//!
//! ```json
//! {"event": "set_agent_status", "data": {"token": "t", "status": "after-call"}}
//! {"event": "agent_status_updated", "data": {"status": "busy"}}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::status::AgentStatus;

/// Commands sent to the presence store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PresenceCommand {
    SetAgentStatus { token: String, status: AgentStatus },
    GetAgentStatus { token: String },
}

/// Status reports pushed by the presence store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PresenceUpdate {
    /// Reply to `get_agent_status`
    AgentStatus { status: AgentStatus },
    /// Unsolicited change made elsewhere (another tab, a supervisor)
    AgentStatusUpdated { status: AgentStatus },
}

impl PresenceUpdate {
    pub fn status(&self) -> AgentStatus {
        match self {
            PresenceUpdate::AgentStatus { status } | PresenceUpdate::AgentStatusUpdated { status } => *status,
        }
    }
}

/// Outbound side of the presence channel
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn send(&self, command: PresenceCommand) -> CoordinatorResult<()>;

    async fn set_agent_status(&self, token: &str, status: AgentStatus) -> CoordinatorResult<()> {
        self.send(PresenceCommand::SetAgentStatus {
            token: token.to_string(),
            status,
        })
        .await
    }

    /// Ask the store to report the current status; the answer arrives as a
    /// [`PresenceUpdate::AgentStatus`] on the inbound side
    async fn request_agent_status(&self, token: &str) -> CoordinatorResult<()> {
        self.send(PresenceCommand::GetAgentStatus { token: token.to_string() }).await
    }
}

/// [`PresenceStore`] that writes JSON frames into a channel drained by the
/// realtime socket task
#[derive(Debug, Clone)]
pub struct ChannelPresenceStore {
    frames: mpsc::UnboundedSender<String>,
}

impl ChannelPresenceStore {
    pub fn new(frames: mpsc::UnboundedSender<String>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl PresenceStore for ChannelPresenceStore {
    async fn send(&self, command: PresenceCommand) -> CoordinatorResult<()> {
        let frame = serde_json::to_string(&command)?;
        debug!(frame = %frame, "Emitting presence command");
        self.frames
            .send(frame)
            .map_err(|_| CoordinatorError::presence("realtime channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_wire_format() {
        let command = PresenceCommand::SetAgentStatus {
            token: "abc".into(),
            status: AgentStatus::AfterCall,
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({"event": "set_agent_status", "data": {"token": "abc", "status": "after-call"}})
        );
    }

    #[test]
    fn parses_both_inbound_events() {
        let reply: PresenceUpdate =
            serde_json::from_value(json!({"event": "agent_status", "data": {"status": "break"}})).unwrap();
        assert_eq!(reply.status(), AgentStatus::Break);

        let pushed: PresenceUpdate =
            serde_json::from_value(json!({"event": "agent_status_updated", "data": {"status": "busy"}})).unwrap();
        assert_eq!(pushed, PresenceUpdate::AgentStatusUpdated { status: AgentStatus::Busy });
    }

    #[tokio::test]
    async fn channel_store_writes_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = ChannelPresenceStore::new(tx);

        store.request_agent_status("abc").await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "get_agent_status");

        drop(rx);
        let err = store.set_agent_status("abc", AgentStatus::Available).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Presence { .. }));
    }
}
