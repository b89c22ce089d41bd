//! Conference membership
//!
//! While available, an agent sits in a personal conference on the server.
//! Inbound customers are routed into it and outbound calls are bridged into
//! it. [`ConferenceManager`] joins and leaves that conference through the
//! telephony client and keeps the local copy of its roster.
//!
//! `join` and `leave` return immediately when already in the target state, so
//! callers can invoke them speculatively. Retrying a failed join is the
//! caller's business: the status controller owns the retry policy.

pub mod api;
pub mod types;

pub use api::{ConferenceApi, DialOutRequest, DialOutResponse, EndCallResponse, HttpConferenceApi, ResourceAddress};
pub use types::{Conference, ConferenceKind, ConferenceStatus, Participant, ParticipantKind, ParticipantStatus};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::call::CallContext;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::telephony::{TelephonyCall, TelephonySession};

#[derive(Default)]
struct ConferenceState {
    conference: Option<Conference>,
    roster: Vec<Participant>,
    call: Option<Arc<dyn TelephonyCall>>,
    joined: bool,
}

/// Local owner of the agent's personal conference
pub struct ConferenceManager {
    agent_id: String,
    api: Arc<dyn ConferenceApi>,
    join_guard: tokio::sync::Mutex<()>,
    state: Mutex<ConferenceState>,
}

impl ConferenceManager {
    pub fn new(agent_id: impl Into<String>, api: Arc<dyn ConferenceApi>) -> Self {
        Self {
            agent_id: agent_id.into(),
            api,
            join_guard: tokio::sync::Mutex::new(()),
            state: Mutex::new(ConferenceState::default()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether the agent is currently bridged into an active conference
    pub fn is_joined(&self) -> bool {
        let state = self.state.lock();
        state.joined && state.conference.as_ref().map(|c| c.is_active()).unwrap_or(false)
    }

    pub fn conference(&self) -> Option<Conference> {
        self.state.lock().conference.clone()
    }

    /// Name of the active conference, if joined
    pub fn active_conference_name(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .conference
            .as_ref()
            .filter(|c| state.joined && c.is_active())
            .map(|c| c.name.clone())
    }

    /// Every participant ever seen in the current or last conference
    pub fn roster(&self) -> Vec<Participant> {
        self.state.lock().roster.clone()
    }

    pub fn present_participants(&self) -> Vec<Participant> {
        self.state.lock().roster.iter().filter(|p| p.is_present()).cloned().collect()
    }

    /// Whether the agent is listed as joining or active in the roster
    pub fn agent_is_participant(&self) -> bool {
        let state = self.state.lock();
        state
            .roster
            .iter()
            .any(|p| p.kind == ParticipantKind::Agent && p.id == self.agent_id && p.is_present())
    }

    /// The agent's own conference call leg
    pub fn agent_call(&self) -> Option<Arc<dyn TelephonyCall>> {
        self.state.lock().call.clone()
    }

    /// Whether an event tagged with `conference_name` belongs to this agent
    pub fn owns(&self, conference_name: &str) -> bool {
        self.state
            .lock()
            .conference
            .as_ref()
            .map(|c| c.name == conference_name)
            .unwrap_or(false)
    }

    /// Dial into the agent's conference
    pub async fn join(&self, session: &Arc<dyn TelephonySession>) -> CoordinatorResult<Conference> {
        if let Some(conference) = self.joined_conference() {
            debug!(conference = %conference.name, "Already in conference");
            return Ok(conference);
        }

        let _guard = self.join_guard.lock().await;
        if let Some(conference) = self.joined_conference() {
            return Ok(conference);
        }

        let address = self.api.resource_address(&self.agent_id).await?;
        info!(
            agent_id = %self.agent_id,
            conference = %address.conference_name,
            dial_address = %address.dial_address,
            "Joining agent conference"
        );

        let mut context = CallContext::new();
        context.insert("agent_id".into(), self.agent_id.clone().into());
        context.insert("conference_name".into(), address.conference_name.clone().into());

        let call = session.dial(&address.dial_address, &context).await.map_err(as_join_failure)?;
        if let Err(e) = call.start().await {
            if let Err(hangup_err) = call.hangup().await {
                debug!(error = %hangup_err, "Hangup after failed conference start also failed");
            }
            return Err(as_join_failure(e));
        }

        let mut conference = Conference::agent(&address.conference_name, &self.agent_id);
        conference.remote_id = address.conference_id;

        let agent = Participant::new(&self.agent_id, ParticipantKind::Agent, ParticipantStatus::Joining)
            .with_call_sid(call.id());

        let mut state = self.state.lock();
        if state.conference.as_ref().map(|c| c.name != conference.name).unwrap_or(true) {
            state.roster.clear();
        }
        upsert(&mut state.roster, agent);
        state.conference = Some(conference.clone());
        state.call = Some(call);
        state.joined = true;
        Ok(conference)
    }

    fn joined_conference(&self) -> Option<Conference> {
        let state = self.state.lock();
        if !state.joined {
            return None;
        }
        state.conference.clone().filter(|c| c.is_active())
    }

    /// Hang up the conference leg and mark the conference ended
    ///
    /// Never fails: an already-gone call is treated as left.
    pub async fn leave(&self) -> CoordinatorResult<()> {
        let call = {
            let mut state = self.state.lock();
            if !state.joined {
                return Ok(());
            }
            state.joined = false;
            if let Some(conference) = state.conference.as_mut() {
                conference.end();
            }
            for participant in state.roster.iter_mut() {
                participant.leave();
            }
            state.call.take()
        };

        if let Some(call) = call {
            if let Err(e) = call.hangup().await {
                warn!(error = %e, "Conference hangup failed; treating conference as left");
            }
        }
        info!(agent_id = %self.agent_id, "Left agent conference");
        Ok(())
    }

    /// Ask the server to dial `phone_number` into the active conference
    pub async fn dial_out(&self, request: &DialOutRequest) -> CoordinatorResult<DialOutResponse> {
        let name = self
            .active_conference_name()
            .ok_or_else(|| CoordinatorError::invalid_state("no active conference to dial out from"))?;
        self.api.dial_out(&name, request).await
    }

    /// Merge a remote join event; returns false if the event is not ours
    pub fn apply_participant_joined(&self, conference_name: &str, participant: Participant) -> bool {
        let mut state = self.state.lock();
        if !owns(&state, conference_name) {
            return false;
        }
        debug!(conference = conference_name, participant = %participant.id, kind = ?participant.kind, "Participant joined");
        upsert(&mut state.roster, participant);
        true
    }

    /// Merge a remote leave event
    pub fn apply_participant_left(&self, conference_name: &str, participant_id: &str) -> Option<Participant> {
        let mut state = self.state.lock();
        if !owns(&state, conference_name) {
            return None;
        }
        let participant = state
            .roster
            .iter_mut()
            .find(|p| p.id == participant_id || p.call_sid.as_deref() == Some(participant_id))?;
        participant.leave();
        debug!(conference = conference_name, participant = participant_id, "Participant left");
        Some(participant.clone())
    }

    pub fn apply_participant_speaking(&self, conference_name: &str, participant_id: &str, speaking: bool) -> bool {
        let mut state = self.state.lock();
        if !owns(&state, conference_name) {
            return false;
        }
        match state
            .roster
            .iter_mut()
            .find(|p| p.id == participant_id || p.call_sid.as_deref() == Some(participant_id))
        {
            Some(participant) => {
                participant.speaking = speaking;
                true
            }
            None => false,
        }
    }

    /// Merge a remote conference status; an `ended` status drops membership
    pub fn apply_conference_status(&self, conference_name: &str, status: ConferenceStatus) -> bool {
        let mut state = self.state.lock();
        if !owns(&state, conference_name) {
            return false;
        }
        if status == ConferenceStatus::Ended {
            info!(conference = conference_name, "Conference ended remotely");
            state.joined = false;
            state.call = None;
            if let Some(conference) = state.conference.as_mut() {
                conference.end();
            }
            for participant in state.roster.iter_mut() {
                participant.leave();
            }
        }
        true
    }

    /// Mark the agent's own roster entry muted or unmuted
    pub fn set_agent_muted(&self, muted: bool) {
        let mut state = self.state.lock();
        let agent_id = self.agent_id.clone();
        if let Some(agent) = state.roster.iter_mut().find(|p| p.id == agent_id) {
            agent.set_muted(muted);
        }
    }
}

fn owns(state: &ConferenceState, conference_name: &str) -> bool {
    state.conference.as_ref().map(|c| c.name == conference_name).unwrap_or(false)
}

fn upsert(roster: &mut Vec<Participant>, incoming: Participant) {
    match roster.iter_mut().find(|p| p.id == incoming.id) {
        Some(existing) => {
            existing.kind = incoming.kind;
            if incoming.call_sid.is_some() {
                existing.call_sid = incoming.call_sid;
            }
            match incoming.status {
                ParticipantStatus::Active => existing.join(),
                ParticipantStatus::Left => existing.leave(),
                status => existing.status = status,
            }
        }
        None => roster.push(incoming),
    }
}

fn as_join_failure(err: CoordinatorError) -> CoordinatorError {
    match err {
        CoordinatorError::PermissionDenied { .. } | CoordinatorError::ConferenceJoinFailure { .. } => err,
        other => CoordinatorError::join_failed(other.to_string()),
    }
}
