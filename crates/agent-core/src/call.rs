//! Call session management
//!
//! [`CallSessionManager`] tracks the one call an agent can have at a time.
//! The session moves through `idle -> ringing -> active -> ending -> idle`:
//!
//! ```text
//!   inbound notification ─┐            answer()          call.state ending/ended
//!   outbound dial ────────┴─► Ringing ─────────► Active ───────────────────────► Ending
//!                              │  call.state active/answered ▲                   │
//!                              │  customer routed (relayed) ─┘                   │ destroy / hangup
//!                              └──────────── reject() / hangup() ────────────────┴─► Idle
//! ```
//!
//! Direct calls are hung up through their SDK handle. Relayed calls have no
//! local handle, so their customer leg is ended through the routing API.
//! Remote hangup failures are logged and never keep a session alive: local
//! state is always cleared.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::conference::ConferenceApi;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::telephony::{TelephonyCall, TelephonyCallState};

/// Free-form call context forwarded to the SDK and the routing API
pub type CallContext = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Ringing,
    Active,
    Ending,
}

/// How the call's media reaches the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRoute {
    /// Signaled by the local telephony client
    Direct,
    /// Bridged into the agent's conference by the server
    Conference,
}

/// The agent's current call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSession {
    /// SDK call id for direct calls, remote leg id for relayed calls
    pub id: String,
    pub direction: CallDirection,
    pub state: CallState,
    /// Remote party (caller number for inbound, target for outbound)
    pub caller_id: String,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub context: CallContext,
    pub route: CallRoute,
    pub muted: bool,
}

impl CallSession {
    fn new(
        id: impl Into<String>,
        direction: CallDirection,
        caller_id: impl Into<String>,
        context: CallContext,
        route: CallRoute,
    ) -> Self {
        Self {
            id: id.into(),
            direction,
            state: CallState::Ringing,
            caller_id: caller_id.into(),
            started_at: Utc::now(),
            answered_at: None,
            context,
            route,
            muted: false,
        }
    }

    /// Seconds since the call was answered
    pub fn talk_time_secs(&self) -> Option<i64> {
        self.answered_at.map(|at| (Utc::now() - at).num_seconds())
    }
}

#[derive(Default)]
struct CallSlot {
    session: Option<CallSession>,
    handle: Option<Arc<dyn TelephonyCall>>,
}

/// Owner of the agent's single call session
pub struct CallSessionManager {
    slot: Mutex<CallSlot>,
    state_tx: watch::Sender<Option<CallSession>>,
    remote_legs: Option<Arc<dyn ConferenceApi>>,
}

impl CallSessionManager {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            slot: Mutex::new(CallSlot::default()),
            state_tx,
            remote_legs: None,
        }
    }

    /// End relayed calls through `api` when they are hung up or rejected
    pub fn with_conference_api(mut self, api: Arc<dyn ConferenceApi>) -> Self {
        self.remote_legs = Some(api);
        self
    }

    pub fn current(&self) -> Option<CallSession> {
        self.slot.lock().session.clone()
    }

    pub fn state(&self) -> CallState {
        self.slot.lock().session.as_ref().map(|s| s.state).unwrap_or(CallState::Idle)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == CallState::Idle
    }

    /// SDK handle of the current call, if it is a direct call
    pub fn handle(&self) -> Option<Arc<dyn TelephonyCall>> {
        self.slot.lock().handle.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CallSession>> {
        self.state_tx.subscribe()
    }

    fn publish(&self, session: Option<CallSession>) {
        self.state_tx.send_replace(session);
    }

    fn install(&self, session: CallSession, handle: Option<Arc<dyn TelephonyCall>>) -> CoordinatorResult<CallSession> {
        {
            let mut slot = self.slot.lock();
            if let Some(existing) = &slot.session {
                return Err(CoordinatorError::invalid_state(format!(
                    "call {} is already {:?}",
                    existing.id, existing.state
                )));
            }
            slot.session = Some(session.clone());
            slot.handle = handle;
        }
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Mutate the current session if `call_id` matches it
    fn update<F>(&self, call_id: &str, f: F) -> Option<CallSession>
    where
        F: FnOnce(&mut CallSession) -> bool,
    {
        let updated = {
            let mut slot = self.slot.lock();
            let session = slot.session.as_mut().filter(|s| s.id == call_id)?;
            if !f(session) {
                return None;
            }
            session.clone()
        };
        self.publish(Some(updated.clone()));
        Some(updated)
    }

    fn clear(&self) -> Option<(CallSession, Option<Arc<dyn TelephonyCall>>)> {
        let taken = {
            let mut slot = self.slot.lock();
            let session = slot.session.take()?;
            Some((session, slot.handle.take()))
        };
        self.publish(None);
        taken
    }

    /// An inbound call rang the local telephony client
    pub fn on_incoming(
        &self,
        call: Arc<dyn TelephonyCall>,
        caller_id: impl Into<String>,
        context: CallContext,
    ) -> CoordinatorResult<CallSession> {
        let session = CallSession::new(call.id(), CallDirection::Inbound, caller_id, context, CallRoute::Direct);
        let session = self.install(session, Some(call))?;
        info!(call_id = %session.id, caller = %session.caller_id, "Inbound call ringing");
        Ok(session)
    }

    /// The server bridged a customer into the agent's conference
    ///
    /// Completes a relayed outbound call that is still ringing, otherwise
    /// presents the customer as a new inbound call.
    pub fn on_customer_routed(
        &self,
        leg_id: &str,
        caller_id: &str,
        context: CallContext,
    ) -> CoordinatorResult<CallSession> {
        let ringing_outbound = {
            let slot = self.slot.lock();
            slot.session.as_ref().map(|s| {
                (s.id.clone(), s.route == CallRoute::Conference && s.direction == CallDirection::Outbound && s.state == CallState::Ringing)
            })
        };

        match ringing_outbound {
            Some((id, true)) => {
                let updated = self.update(&id, |s| {
                    s.state = CallState::Active;
                    s.answered_at = Some(Utc::now());
                    s.id = leg_id.to_string();
                    true
                });
                updated.ok_or_else(|| CoordinatorError::internal("call vanished while connecting"))
            }
            Some((id, false)) => Err(CoordinatorError::invalid_state(format!(
                "customer {} routed while call {} is in progress",
                leg_id, id
            ))),
            None => {
                let session = CallSession::new(leg_id, CallDirection::Inbound, caller_id, context, CallRoute::Conference);
                let session = self.install(session, None)?;
                info!(call_id = %session.id, caller = %session.caller_id, "Customer routed to conference");
                Ok(session)
            }
        }
    }

    /// Register an outbound call that has just been placed
    pub fn begin_outbound(
        &self,
        id: impl Into<String>,
        target: impl Into<String>,
        context: CallContext,
        route: CallRoute,
        handle: Option<Arc<dyn TelephonyCall>>,
    ) -> CoordinatorResult<CallSession> {
        let session = CallSession::new(id, CallDirection::Outbound, target, context, route);
        let session = self.install(session, handle)?;
        info!(call_id = %session.id, target = %session.caller_id, route = ?session.route, "Outbound call ringing");
        Ok(session)
    }

    /// Replace a provisional call id with the one the remote side assigned
    pub fn rebind(&self, call_id: &str, new_id: &str) -> Option<CallSession> {
        self.update(call_id, |s| {
            s.id = new_id.to_string();
            true
        })
    }

    /// Answer the ringing inbound call
    pub async fn answer(&self) -> CoordinatorResult<CallSession> {
        let (id, handle) = {
            let slot = self.slot.lock();
            match &slot.session {
                Some(s) if s.direction == CallDirection::Inbound && s.state == CallState::Ringing => {
                    (s.id.clone(), slot.handle.clone())
                }
                Some(s) => {
                    return Err(CoordinatorError::invalid_state(format!("call {} is not ringing", s.id)));
                }
                None => return Err(CoordinatorError::invalid_state("no call to answer")),
            }
        };

        if let Some(handle) = handle {
            handle.answer().await?;
        }

        self.update(&id, |s| {
            s.state = CallState::Active;
            s.answered_at = Some(Utc::now());
            true
        })
        .ok_or_else(|| CoordinatorError::invalid_state("call ended before it was answered"))
    }

    /// Decline the ringing inbound call
    pub async fn reject(&self) -> CoordinatorResult<Option<CallSession>> {
        let ringing = {
            let slot = self.slot.lock();
            slot.session.as_ref().map(|s| s.state == CallState::Ringing && s.direction == CallDirection::Inbound)
        };
        match ringing {
            Some(true) => Ok(self.terminate("reject").await),
            Some(false) => Err(CoordinatorError::invalid_state("only a ringing inbound call can be rejected")),
            None => Ok(None),
        }
    }

    /// Hang up whatever call is in progress; a no-op when idle
    pub async fn hangup(&self) -> Option<CallSession> {
        self.terminate("hangup").await
    }

    async fn terminate(&self, reason: &str) -> Option<CallSession> {
        let id = self.current()?.id;
        self.update(&id, |s| {
            s.state = CallState::Ending;
            true
        });

        let (session, handle) = self.clear()?;
        match (handle, &self.remote_legs) {
            (Some(handle), _) => {
                if let Err(e) = handle.hangup().await {
                    warn!(call_id = %session.id, error = %e, "Remote hangup failed; local call state cleared anyway");
                }
            }
            (None, Some(api)) if session.route == CallRoute::Conference => {
                if let Err(e) = api.end_call(&session.id).await {
                    warn!(call_id = %session.id, error = %e, "Ending relayed call leg failed; local call state cleared anyway");
                }
            }
            (None, _) => {}
        }
        info!(call_id = %session.id, reason = reason, "Call ended");
        Some(session)
    }

    /// Apply a `call.state` event from the SDK
    pub fn on_call_state(&self, call_id: &str, state: TelephonyCallState) -> Option<CallSession> {
        let updated = self.update(call_id, |s| match (s.state, state) {
            (CallState::Ringing, TelephonyCallState::Active | TelephonyCallState::Answered) => {
                s.state = CallState::Active;
                s.answered_at = Some(Utc::now());
                true
            }
            (CallState::Ringing | CallState::Active, TelephonyCallState::Ending | TelephonyCallState::Ended) => {
                s.state = CallState::Ending;
                true
            }
            _ => false,
        });
        if let Some(session) = &updated {
            debug!(call_id = call_id, state = ?session.state, "Call state updated");
        }
        updated
    }

    /// The SDK destroyed the call object, or the remote leg left the conference
    pub fn on_destroyed(&self, call_id: &str) -> Option<CallSession> {
        if self.current().map(|s| s.id != call_id).unwrap_or(true) {
            return None;
        }
        let (session, _) = self.clear()?;
        info!(call_id = call_id, "Call destroyed");
        Some(session)
    }

    pub fn set_muted(&self, muted: bool) -> Option<CallSession> {
        let id = self.current()?.id;
        self.update(&id, |s| {
            s.muted = muted;
            true
        })
    }
}

impl Default for CallSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimConferenceApi};

    #[tokio::test]
    async fn inbound_answer_then_hangup() {
        let manager = CallSessionManager::new();
        let call = Arc::new(SimCall::new("c1"));

        let session = manager.on_incoming(call.clone(), "+15551230000", CallContext::new()).unwrap();
        assert_eq!(session.state, CallState::Ringing);

        let session = manager.answer().await.unwrap();
        assert_eq!(session.state, CallState::Active);
        assert!(call.answered());

        let ended = manager.hangup().await.unwrap();
        assert_eq!(ended.id, "c1");
        assert!(manager.is_idle());
        assert_eq!(call.hangups(), 1);
    }

    #[tokio::test]
    async fn second_call_is_refused_while_one_is_live() {
        let manager = CallSessionManager::new();
        manager.on_incoming(Arc::new(SimCall::new("c1")), "a", CallContext::new()).unwrap();
        let err = manager
            .begin_outbound("c2", "b", CallContext::new(), CallRoute::Direct, None)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
        assert_eq!(manager.current().unwrap().id, "c1");
    }

    #[tokio::test]
    async fn hangup_failure_still_clears_local_state() {
        let manager = CallSessionManager::new();
        let call = Arc::new(SimCall::new("c1"));
        call.fail_hangup();
        manager.on_incoming(call, "a", CallContext::new()).unwrap();

        assert!(manager.hangup().await.is_some());
        assert!(manager.is_idle());
        assert!(manager.hangup().await.is_none());
    }

    #[tokio::test]
    async fn outbound_driven_by_sdk_events() {
        let manager = CallSessionManager::new();
        manager
            .begin_outbound("c9", "+1555", CallContext::new(), CallRoute::Direct, Some(Arc::new(SimCall::new("c9"))))
            .unwrap();

        assert!(manager.on_call_state("other", TelephonyCallState::Active).is_none());
        assert_eq!(manager.on_call_state("c9", TelephonyCallState::Answered).unwrap().state, CallState::Active);
        // A repeated active event changes nothing
        assert!(manager.on_call_state("c9", TelephonyCallState::Active).is_none());
        assert_eq!(manager.on_call_state("c9", TelephonyCallState::Ending).unwrap().state, CallState::Ending);
        assert!(manager.on_destroyed("c9").is_some());
        assert_eq!(manager.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn relayed_outbound_connects_when_customer_is_routed() {
        let manager = CallSessionManager::new();
        manager
            .begin_outbound("CA100", "+1555", CallContext::new(), CallRoute::Conference, None)
            .unwrap();

        let session = manager.on_customer_routed("CA100", "+1555", CallContext::new()).unwrap();
        assert_eq!(session.state, CallState::Active);
        assert!(session.answered_at.is_some());

        assert!(manager.on_customer_routed("CA200", "+1666", CallContext::new()).is_err());
    }

    #[tokio::test]
    async fn routed_customer_rings_as_inbound_when_idle() {
        let manager = CallSessionManager::new();
        let mut rx = manager.subscribe();

        let session = manager.on_customer_routed("CA7", "+1777", CallContext::new()).unwrap();
        assert_eq!(session.direction, CallDirection::Inbound);
        assert_eq!(session.route, CallRoute::Conference);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|s| s.state), Some(CallState::Ringing));

        // No SDK handle for relayed calls; answering only flips local state
        assert_eq!(manager.answer().await.unwrap().state, CallState::Active);
    }

    #[tokio::test]
    async fn hangup_ends_relayed_leg_through_api() {
        let api = Arc::new(SimConferenceApi::new());
        let manager = CallSessionManager::new().with_conference_api(api.clone());

        manager.on_customer_routed("CA7", "+1777", CallContext::new()).unwrap();
        manager.answer().await.unwrap();
        assert_eq!(manager.hangup().await.unwrap().id, "CA7");
        assert_eq!(api.ended_calls(), vec!["CA7".to_string()]);

        // Direct calls never touch the routing API
        manager.on_incoming(Arc::new(SimCall::new("c1")), "a", CallContext::new()).unwrap();
        manager.hangup().await.unwrap();
        assert_eq!(api.ended_calls().len(), 1);
    }

    #[tokio::test]
    async fn relayed_end_failure_still_clears_local_state() {
        let api = Arc::new(SimConferenceApi::new());
        api.fail_end_call(CoordinatorError::ConferenceApi {
            status: Some(404),
            message: "Call not found".into(),
        });
        let manager = CallSessionManager::new().with_conference_api(api.clone());

        manager.on_customer_routed("CA8", "+1888", CallContext::new()).unwrap();
        let rejected = manager.reject().await.unwrap().unwrap();
        assert_eq!(rejected.id, "CA8");
        assert_eq!(api.ended_calls(), vec!["CA8".to_string()]);
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn reject_requires_ringing_inbound() {
        let manager = CallSessionManager::new();
        assert_eq!(manager.reject().await.unwrap(), None);

        manager.on_incoming(Arc::new(SimCall::new("c1")), "a", CallContext::new()).unwrap();
        manager.answer().await.unwrap();
        assert!(manager.reject().await.is_err());
    }
}
