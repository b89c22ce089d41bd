//! Agent presence types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoordinatorError;

/// Availability classification of an agent
///
/// Serialized in the kebab-case form the presence store uses
/// (`"after-call"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Available,
    Busy,
    AfterCall,
    Break,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::AfterCall => "after-call",
            AgentStatus::Break => "break",
            AgentStatus::Offline => "offline",
        }
    }

    /// Statuses that take the agent out of the conference and the client offline
    pub fn is_away(&self) -> bool {
        matches!(self, AgentStatus::Offline | AgentStatus::Break)
    }

    /// Statuses that keep the client and conference as they are
    pub fn is_engaged(&self) -> bool {
        matches!(self, AgentStatus::Busy | AgentStatus::AfterCall)
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Offline
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(AgentStatus::Available),
            "busy" => Ok(AgentStatus::Busy),
            "after-call" | "after_call" | "aftercall" => Ok(AgentStatus::AfterCall),
            "break" => Ok(AgentStatus::Break),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(CoordinatorError::invalid_state(format!("unknown agent status '{}'", other))),
        }
    }
}

/// Snapshot of the agent's presence as shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AgentPresence {
    pub status: AgentStatus,
    /// A local status change is in flight ("connecting")
    pub is_transitioning: bool,
    /// Terminal error from the last failed transition
    pub last_error: Option<String>,
    /// Transient progress text such as "Connecting... (attempt 2/5)"
    pub progress: Option<String>,
}

impl AgentPresence {
    pub fn new(status: AgentStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}
