//! Conference and participant types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConferenceKind {
    /// An agent's personal conference
    Agent,
    /// A conference hosted by an AI agent
    Ai,
    /// A holding conference
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConferenceStatus {
    Active,
    Ended,
}

/// A server-hosted bridge the agent sits in while available
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conference {
    pub name: String,
    pub kind: ConferenceKind,
    pub owner_id: String,
    pub status: ConferenceStatus,
    /// Server-side record id, when the routing API returns one
    pub remote_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Conference {
    pub fn agent(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConferenceKind::Agent,
            owner_id: owner_id.into(),
            status: ConferenceStatus::Active,
            remote_id: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConferenceStatus::Active
    }

    pub fn end(&mut self) {
        if self.status != ConferenceStatus::Ended {
            self.status = ConferenceStatus::Ended;
            self.ended_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Customer,
    Agent,
    Ai,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Joining,
    Active,
    Left,
    Muted,
}

/// One roster entry; entries are never removed, only marked `left`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: String,
    pub kind: ParticipantKind,
    pub status: ParticipantStatus,
    pub call_sid: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub speaking: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, kind: ParticipantKind, status: ParticipantStatus) -> Self {
        let joined_at = matches!(status, ParticipantStatus::Active | ParticipantStatus::Muted).then(Utc::now);
        Self {
            id: id.into(),
            kind,
            status,
            call_sid: None,
            joined_at,
            left_at: None,
            duration_secs: None,
            speaking: false,
        }
    }

    pub fn with_call_sid(mut self, call_sid: impl Into<String>) -> Self {
        self.call_sid = Some(call_sid.into());
        self
    }

    pub fn is_present(&self) -> bool {
        self.status != ParticipantStatus::Left
    }

    pub fn join(&mut self) {
        self.status = ParticipantStatus::Active;
        self.left_at = None;
        self.duration_secs = None;
        if self.joined_at.is_none() {
            self.joined_at = Some(Utc::now());
        }
    }

    pub fn leave(&mut self) {
        if self.status == ParticipantStatus::Left {
            return;
        }
        let now = Utc::now();
        self.status = ParticipantStatus::Left;
        self.left_at = Some(now);
        self.speaking = false;
        self.duration_secs = self.joined_at.map(|at| (now - at).num_seconds());
    }

    pub fn set_muted(&mut self, muted: bool) {
        if muted && self.is_present() {
            self.status = ParticipantStatus::Muted;
        } else if !muted && self.status == ParticipantStatus::Muted {
            self.status = ParticipantStatus::Active;
        }
    }
}
