//! Agent status controller
//!
//! [`StatusController`] owns the agent's [`AgentPresence`] and is the only
//! thing that mutates it. Status changes drive the telephony client and the
//! conference as side effects:
//!
//! | to-status          | telephony client   | conference          | presence store |
//! |--------------------|--------------------|---------------------|----------------|
//! | available          | online if needed   | join with retry     | update         |
//! | busy / after-call  | unchanged          | unchanged           | update         |
//! | offline / break    | offline if online  | leave if joined     | update         |
//!
//! While the telephony client is not ready an `available` request is parked
//! in a single pending slot (a newer request overwrites it) and runs exactly
//! once when readiness arrives. Every request bumps a generation counter; an
//! in-flight transition that sees a newer generation stops and leaves the
//! outcome to the newer request.
//!
//! Join failures during an `available` transition go through a linear retry
//! ladder and, once exhausted, leave the status at `available` with a
//! terminal `last_error`. Any other failure of the transition reverts the
//! agent to `offline`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::conference::ConferenceManager;
use crate::config::JoinRetryConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::lifecycle::ClientLifecycle;
use crate::presence::PresenceStore;
use crate::recovery::{retry_with_backoff_notify, with_timeout};
use crate::status::{AgentPresence, AgentStatus};
use crate::store::SessionStore;

const WAITING_FOR_CLIENT: &str = "Waiting for telephony client...";
const CONNECTING: &str = "Connecting...";

#[derive(Debug, Default)]
struct ControllerState {
    presence: AgentPresence,
    pending: Option<AgentStatus>,
    generation: u64,
    /// Target of the newest request; `None` after a cancel
    requested: Option<AgentStatus>,
    restored_intent: Option<AgentStatus>,
    has_attempted_auto_rejoin: bool,
}

/// Owner of the agent's presence
pub struct StatusController {
    agent_id: String,
    presence_token: String,
    lifecycle: Arc<ClientLifecycle>,
    conference: Arc<ConferenceManager>,
    presence_store: Arc<dyn PresenceStore>,
    session_store: Arc<dyn SessionStore>,
    join_retry: JoinRetryConfig,
    state: Mutex<ControllerState>,
    presence_tx: watch::Sender<AgentPresence>,
}

impl StatusController {
    pub fn new(
        agent_id: impl Into<String>,
        presence_token: impl Into<String>,
        lifecycle: Arc<ClientLifecycle>,
        conference: Arc<ConferenceManager>,
        presence_store: Arc<dyn PresenceStore>,
        session_store: Arc<dyn SessionStore>,
        join_retry: JoinRetryConfig,
    ) -> Self {
        let (presence_tx, _) = watch::channel(AgentPresence::default());
        Self {
            agent_id: agent_id.into(),
            presence_token: presence_token.into(),
            lifecycle,
            conference,
            presence_store,
            session_store,
            join_retry,
            state: Mutex::new(ControllerState::default()),
            presence_tx,
        }
    }

    pub fn presence(&self) -> AgentPresence {
        self.state.lock().presence.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().presence.status
    }

    pub fn is_transitioning(&self) -> bool {
        self.state.lock().presence.is_transitioning
    }

    /// The status request parked until the client is ready
    pub fn pending(&self) -> Option<AgentStatus> {
        self.state.lock().pending
    }

    pub fn has_attempted_auto_rejoin(&self) -> bool {
        self.state.lock().has_attempted_auto_rejoin
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentPresence> {
        self.presence_tx.subscribe()
    }

    fn publish(&self, presence: AgentPresence) {
        self.presence_tx.send_replace(presence);
    }

    /// Mutate presence if `generation` is still the newest request
    fn update_if_current<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut AgentPresence),
    {
        let snapshot = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            f(&mut state.presence);
            state.presence.clone()
        };
        self.publish(snapshot);
        true
    }

    fn ensure_current(&self, generation: u64) -> CoordinatorResult<()> {
        if self.state.lock().generation == generation {
            Ok(())
        } else {
            Err(CoordinatorError::Superseded)
        }
    }

    /// Load the persisted intent
    ///
    /// A restored `available` is intent only: it is shown, but the
    /// conference is rejoined once when the client becomes ready.
    pub async fn restore(&self) -> CoordinatorResult<Option<AgentStatus>> {
        let restored = match self.session_store.load_status().await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable persisted presence");
                None
            }
        };

        let Some(status) = restored else {
            return Ok(None);
        };
        let snapshot = {
            let mut state = self.state.lock();
            state.presence = AgentPresence::new(status);
            state.restored_intent = Some(status);
            state.presence.clone()
        };
        self.publish(snapshot);
        info!(agent_id = %self.agent_id, status = %status, "Restored persisted agent status");
        Ok(Some(status))
    }

    /// Request a status change
    pub async fn set_status(&self, status: AgentStatus) -> CoordinatorResult<()> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.requested = Some(status);
            state.generation
        };
        info!(agent_id = %self.agent_id, status = %status, generation = generation, "Status change requested");

        let result = if self.lifecycle.is_ready() {
            self.apply(status, generation).await
        } else {
            self.apply_before_ready(status, generation).await
        };

        match result {
            Err(CoordinatorError::Superseded) => {
                debug!(status = %status, generation = generation, "Status change superseded");
                Ok(())
            }
            other => other,
        }
    }

    async fn apply_before_ready(&self, status: AgentStatus, generation: u64) -> CoordinatorResult<()> {
        if status == AgentStatus::Available {
            let snapshot = {
                let mut state = self.state.lock();
                state.pending = Some(status);
                state.presence.is_transitioning = true;
                state.presence.last_error = None;
                state.presence.progress = Some(WAITING_FOR_CLIENT.to_string());
                state.presence.clone()
            };
            self.publish(snapshot);
            debug!(generation = generation, "Client not ready; status change queued");
            return Ok(());
        }

        // Nothing to prepare a client for; only the store is told
        let snapshot = {
            let mut state = self.state.lock();
            state.pending = None;
            state.presence = AgentPresence::new(status);
            state.presence.clone()
        };
        self.publish(snapshot);
        self.record(status).await;
        Ok(())
    }

    /// Run the parked request, or the one-shot auto-rejoin, now that the
    /// client is ready
    pub async fn on_ready(&self) -> CoordinatorResult<()> {
        enum Action {
            Pending(AgentStatus, u64),
            Rejoin(u64),
            Nothing,
        }

        let action = {
            let mut state = self.state.lock();
            if let Some(status) = state.pending.take() {
                // A queued request is the user's latest intent and replaces
                // the restored one
                state.has_attempted_auto_rejoin = true;
                Action::Pending(status, state.generation)
            } else if !state.has_attempted_auto_rejoin
                && state.restored_intent == Some(AgentStatus::Available)
                && state.presence.status == AgentStatus::Available
                && !self.conference.is_joined()
            {
                state.has_attempted_auto_rejoin = true;
                Action::Rejoin(state.generation)
            } else {
                Action::Nothing
            }
        };

        let result = match action {
            Action::Pending(status, generation) => {
                info!(status = %status, "Client ready; running queued status change");
                self.apply(status, generation).await
            }
            Action::Rejoin(generation) => self.auto_rejoin(generation).await,
            Action::Nothing => Ok(()),
        };

        match result {
            Err(CoordinatorError::Superseded) => Ok(()),
            other => other,
        }
    }

    async fn apply(&self, status: AgentStatus, generation: u64) -> CoordinatorResult<()> {
        match status {
            AgentStatus::Available => self.go_available(generation).await,
            AgentStatus::Busy | AgentStatus::AfterCall => {
                if !self.update_if_current(generation, |p| *p = AgentPresence::new(status)) {
                    return Err(CoordinatorError::Superseded);
                }
                self.record(status).await;
                Ok(())
            }
            AgentStatus::Offline | AgentStatus::Break => {
                self.release().await;
                self.ensure_current(generation)?;
                self.update_if_current(generation, |p| *p = AgentPresence::new(status));
                self.record(status).await;
                Ok(())
            }
        }
    }

    async fn go_available(&self, generation: u64) -> CoordinatorResult<()> {
        let started = self.update_if_current(generation, |p| {
            p.status = AgentStatus::Available;
            p.is_transitioning = true;
            p.last_error = None;
            p.progress = Some(CONNECTING.to_string());
        });
        if !started {
            return Err(CoordinatorError::Superseded);
        }

        if let Err(e) = self.lifecycle.online().await {
            return self.revert(generation, e).await;
        }
        self.ensure_current(generation)?;

        let Some(session) = self.lifecycle.session() else {
            return self
                .revert(generation, CoordinatorError::invalid_state("telephony client is not initialized"))
                .await;
        };

        if self.conference.is_joined() {
            self.settle_available(generation, None).await;
            return Ok(());
        }

        let retry = self.join_retry.retry_config();
        let max_attempts = retry.max_attempts.max(1);
        let attempt_timeout = self.join_retry.attempt_timeout();
        let attempts = AtomicU32::new(0);

        let joined = retry_with_backoff_notify(
            "conference_join",
            retry,
            || {
                let session = session.clone();
                let attempts = &attempts;
                async move {
                    self.ensure_current(generation)?;
                    attempts.fetch_add(1, Ordering::SeqCst);
                    match with_timeout("conference_join_attempt", attempt_timeout, self.conference.join(&session)).await {
                        Err(CoordinatorError::OperationTimeout { duration_ms }) => Err(CoordinatorError::join_failed(
                            format!("no answer from conference after {}ms", duration_ms),
                        )),
                        other => other,
                    }
                }
            },
            |next_attempt, _| {
                self.update_if_current(generation, |p| {
                    p.progress = Some(format!("{} (attempt {}/{})", CONNECTING, next_attempt, max_attempts));
                });
            },
        )
        .await;

        match joined {
            Ok(conference) => {
                if self.ensure_current(generation).is_err() {
                    self.discard_superseded_join().await;
                    return Err(CoordinatorError::Superseded);
                }
                info!(agent_id = %self.agent_id, conference = %conference.name, "Agent available in conference");
                self.settle_available(generation, None).await;
                Ok(())
            }
            Err(CoordinatorError::Superseded) => Err(CoordinatorError::Superseded),
            Err(e) => {
                let err = match e {
                    CoordinatorError::ConferenceJoinFailure { reason, .. } => CoordinatorError::ConferenceJoinFailure {
                        attempts: attempts.load(Ordering::SeqCst),
                        reason,
                    },
                    other => CoordinatorError::ConferenceJoinFailure {
                        attempts: attempts.load(Ordering::SeqCst),
                        reason: other.to_string(),
                    },
                };
                warn!(agent_id = %self.agent_id, error = %err, "Conference join retries exhausted");
                self.settle_available(generation, Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    /// Single rejoin attempt for a restored `available` intent
    async fn auto_rejoin(&self, generation: u64) -> CoordinatorResult<()> {
        info!(agent_id = %self.agent_id, "Rejoining conference for restored available status");
        let started = self.update_if_current(generation, |p| {
            p.is_transitioning = true;
            p.last_error = None;
            p.progress = Some(CONNECTING.to_string());
        });
        if !started {
            return Err(CoordinatorError::Superseded);
        }

        if let Err(e) = self.lifecycle.online().await {
            return self.revert(generation, e).await;
        }
        let Some(session) = self.lifecycle.session() else {
            return self
                .revert(generation, CoordinatorError::invalid_state("telephony client is not initialized"))
                .await;
        };

        let joined = with_timeout(
            "conference_rejoin",
            self.join_retry.attempt_timeout(),
            self.conference.join(&session),
        )
        .await;
        if self.ensure_current(generation).is_err() {
            if joined.is_ok() {
                self.discard_superseded_join().await;
            }
            return Err(CoordinatorError::Superseded);
        }

        match joined {
            Ok(_) => {
                self.settle_available(generation, None).await;
                Ok(())
            }
            Err(e) => self.revert(generation, e).await,
        }
    }

    async fn settle_available(&self, generation: u64, last_error: Option<String>) {
        let settled = self.update_if_current(generation, |p| {
            p.status = AgentStatus::Available;
            p.is_transitioning = false;
            p.progress = None;
            p.last_error = last_error;
        });
        if settled {
            self.record(AgentStatus::Available).await;
        }
    }

    /// Fall back to `offline`, persisting the reversion, and return `err`
    async fn revert<T>(&self, generation: u64, err: CoordinatorError) -> CoordinatorResult<T> {
        warn!(agent_id = %self.agent_id, error = %err, category = err.category(), "Status transition failed; reverting to offline");
        self.release().await;
        let reverted = self.update_if_current(generation, |p| {
            *p = AgentPresence::new(AgentStatus::Offline);
            p.last_error = Some(err.to_string());
        });
        if reverted {
            self.record(AgentStatus::Offline).await;
        }
        Err(err)
    }

    /// A join finished after a newer request took over
    ///
    /// The newer request may already have run its release while the join was
    /// still in flight, so the membership is dropped here unless the newest
    /// target status keeps the conference.
    async fn discard_superseded_join(&self) {
        let requested = self.state.lock().requested;
        if matches!(
            requested,
            Some(AgentStatus::Available | AgentStatus::Busy | AgentStatus::AfterCall)
        ) {
            return;
        }
        info!(agent_id = %self.agent_id, requested = ?requested, "Leaving conference joined by a superseded request");
        if let Err(e) = self.conference.leave().await {
            warn!(error = %e, "Failed to leave conference after superseded join");
        }
    }

    /// Leave the conference and take the client offline
    async fn release(&self) {
        if let Err(e) = self.conference.leave().await {
            warn!(error = %e, "Failed to leave conference");
        }
        if let Err(e) = self.lifecycle.offline().await {
            warn!(error = %e, "Failed to take telephony client offline");
        }
    }

    /// Persist a settled status and tell the presence store
    async fn record(&self, status: AgentStatus) {
        if let Err(e) = self.session_store.save(status).await {
            warn!(error = %e, status = %status, "Failed to persist agent status");
        }
        if let Err(e) = self.presence_store.set_agent_status(&self.presence_token, status).await {
            warn!(error = %e, status = %status, "Failed to update presence store");
        }
    }

    /// Merge a status pushed by the presence store
    ///
    /// Ignored while a local change is in flight. A pushed `offline` or
    /// `break` releases the conference and the client like a local request.
    /// A pushed `available` is only accepted when the agent is already in the
    /// conference; otherwise the server is corrected with the local status.
    /// Nothing is echoed back for an accepted update.
    ///
    /// Returns whether the update was applied.
    pub async fn apply_remote(&self, status: AgentStatus) -> bool {
        let generation = {
            let mut state = self.state.lock();
            if state.presence.is_transitioning || state.pending.is_some() {
                debug!(status = %status, "Ignoring server presence while transitioning");
                return false;
            }
            if state.presence.status == status {
                return true;
            }
            if status == AgentStatus::Available && !self.conference.is_joined() {
                None
            } else {
                state.generation += 1;
                state.requested = Some(status);
                Some(state.generation)
            }
        };

        let Some(generation) = generation else {
            let local = self.status();
            warn!(agent_id = %self.agent_id, local = %local, "Server reports available outside the conference; restating local status");
            if let Err(e) = self.presence_store.set_agent_status(&self.presence_token, local).await {
                warn!(error = %e, status = %local, "Failed to update presence store");
            }
            return false;
        };

        info!(agent_id = %self.agent_id, status = %status, "Presence updated by server");
        if matches!(status, AgentStatus::Offline | AgentStatus::Break) {
            self.release().await;
        }
        if !self.update_if_current(generation, |p| *p = AgentPresence::new(status)) {
            return false;
        }
        if let Err(e) = self.session_store.save(status).await {
            warn!(error = %e, "Failed to persist server presence");
        }
        true
    }

    /// Drop any queued request and cancel in-flight transitions
    pub fn cancel_pending(&self) {
        let snapshot = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.requested = None;
            state.pending = None;
            state.presence.is_transitioning = false;
            state.presence.progress = None;
            state.presence.clone()
        };
        self.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientCredentials, ReadinessMode};
    use crate::sim::{SimConferenceApi, SimPresenceStore, SimTelephony};
    use crate::store::MemorySessionStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        telephony: Arc<SimTelephony>,
        api: Arc<SimConferenceApi>,
        presence_store: Arc<SimPresenceStore>,
        session_store: Arc<MemorySessionStore>,
        lifecycle: Arc<ClientLifecycle>,
        conference: Arc<ConferenceManager>,
        controller: StatusController,
    }

    fn harness(session_store: MemorySessionStore) -> Harness {
        let telephony = Arc::new(SimTelephony::new());
        let api = Arc::new(SimConferenceApi::new());
        let presence_store = Arc::new(SimPresenceStore::new());
        let session_store = Arc::new(session_store);
        let (tx, _rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(ClientLifecycle::new(
            telephony.clone(),
            ClientCredentials::default(),
            ReadinessMode::Warmup { delay_ms: 1_000 },
            tx,
        ));
        let conference = Arc::new(ConferenceManager::new("7", api.clone()));
        let controller = StatusController::new(
            "7",
            "token",
            lifecycle.clone(),
            conference.clone(),
            presence_store.clone(),
            session_store.clone(),
            JoinRetryConfig::default(),
        );
        Harness {
            telephony,
            api,
            presence_store,
            session_store,
            lifecycle,
            conference,
            controller,
        }
    }

    async fn ready(h: &Harness) {
        h.lifecycle.initialize().await.unwrap();
        h.lifecycle.wait_until_ready(std::time::Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_and_after_call_leave_client_alone() {
        let h = harness(MemorySessionStore::new());
        ready(&h).await;
        h.controller.set_status(AgentStatus::Available).await.unwrap();

        h.controller.set_status(AgentStatus::Busy).await.unwrap();
        h.controller.set_status(AgentStatus::AfterCall).await.unwrap();
        assert!(h.lifecycle.is_online());
        assert!(h.conference.is_joined());
        assert_eq!(h.telephony.offline_calls(), 0);
        assert_eq!(
            h.presence_store.statuses_sent(),
            vec![AgentStatus::Available, AgentStatus::Busy, AgentStatus::AfterCall]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn break_leaves_conference_and_goes_offline() {
        let h = harness(MemorySessionStore::new());
        ready(&h).await;
        h.controller.set_status(AgentStatus::Available).await.unwrap();

        h.controller.set_status(AgentStatus::Break).await.unwrap();
        assert!(!h.conference.is_joined());
        assert!(!h.lifecycle.is_online());
        assert_eq!(h.controller.status(), AgentStatus::Break);
        assert_eq!(h.session_store.load_status().await.unwrap(), Some(AgentStatus::Break));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_before_ready_only_updates_the_store() {
        let h = harness(MemorySessionStore::new());
        h.controller.set_status(AgentStatus::Offline).await.unwrap();

        assert_eq!(h.telephony.sessions_created(), 0);
        assert_eq!(h.presence_store.statuses_sent(), vec![AgentStatus::Offline]);
        assert!(!h.controller.is_transitioning());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_request_replaces_queued_available() {
        let h = harness(MemorySessionStore::new());
        h.lifecycle.initialize().await.unwrap();

        h.controller.set_status(AgentStatus::Available).await.unwrap();
        assert_eq!(h.controller.pending(), Some(AgentStatus::Available));
        h.controller.set_status(AgentStatus::Offline).await.unwrap();
        assert_eq!(h.controller.pending(), None);

        ready(&h).await;
        h.controller.on_ready().await.unwrap();
        assert_eq!(h.telephony.online_calls(), 0);
        assert_eq!(h.controller.status(), AgentStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn server_echo_ignored_while_transitioning() {
        let h = harness(MemorySessionStore::new());
        h.lifecycle.initialize().await.unwrap();
        h.controller.set_status(AgentStatus::Available).await.unwrap();

        assert!(!h.controller.apply_remote(AgentStatus::Offline).await);
        assert_eq!(h.controller.pending(), Some(AgentStatus::Available));

        ready(&h).await;
        h.controller.on_ready().await.unwrap();
        assert!(h.controller.apply_remote(AgentStatus::Busy).await);
        assert_eq!(h.controller.status(), AgentStatus::Busy);
        assert_eq!(h.session_store.load_status().await.unwrap(), Some(AgentStatus::Busy));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_during_rejoin_leaves_the_late_conference() {
        let h = harness(MemorySessionStore::with_status(AgentStatus::Available));
        h.api.set_lookup_delay(Duration::from_secs(3));
        h.controller.restore().await.unwrap();
        ready(&h).await;

        let (rejoin, offline) = tokio::join!(h.controller.on_ready(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.controller.set_status(AgentStatus::Offline).await
        });
        rejoin.unwrap();
        offline.unwrap();

        assert_eq!(h.controller.status(), AgentStatus::Offline);
        assert!(!h.lifecycle.is_online());
        assert!(!h.conference.is_joined());
        assert_eq!(h.telephony.last_call().unwrap().hangups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn break_during_join_ladder_leaves_the_late_conference() {
        let h = harness(MemorySessionStore::new());
        h.api.set_lookup_delay(Duration::from_secs(3));
        ready(&h).await;

        // First attempt starts after 2s and resolves 3s later
        let (available, on_break) = tokio::join!(h.controller.set_status(AgentStatus::Available), async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            h.controller.set_status(AgentStatus::Break).await
        });
        available.unwrap();
        on_break.unwrap();

        assert_eq!(h.controller.status(), AgentStatus::Break);
        assert!(!h.conference.is_joined());
        assert!(!h.lifecycle.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_during_join_ladder_keeps_the_conference() {
        let h = harness(MemorySessionStore::new());
        h.api.set_lookup_delay(Duration::from_secs(3));
        ready(&h).await;

        let (available, busy) = tokio::join!(h.controller.set_status(AgentStatus::Available), async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            h.controller.set_status(AgentStatus::Busy).await
        });
        available.unwrap();
        busy.unwrap();

        assert_eq!(h.controller.status(), AgentStatus::Busy);
        assert!(h.conference.is_joined());
    }

    #[tokio::test(start_paused = true)]
    async fn server_offline_releases_conference_and_client() {
        let h = harness(MemorySessionStore::new());
        ready(&h).await;
        h.controller.set_status(AgentStatus::Available).await.unwrap();
        assert!(h.conference.is_joined());

        assert!(h.controller.apply_remote(AgentStatus::Offline).await);
        assert_eq!(h.controller.status(), AgentStatus::Offline);
        assert!(!h.conference.is_joined());
        assert!(!h.lifecycle.is_online());
        assert_eq!(h.session_store.load_status().await.unwrap(), Some(AgentStatus::Offline));
        // Accepted server updates are not echoed back
        assert_eq!(h.presence_store.statuses_sent(), vec![AgentStatus::Available]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_available_outside_conference_is_refused() {
        let h = harness(MemorySessionStore::new());
        ready(&h).await;
        h.controller.set_status(AgentStatus::Break).await.unwrap();

        assert!(!h.controller.apply_remote(AgentStatus::Available).await);
        assert_eq!(h.controller.status(), AgentStatus::Break);
        assert!(!h.conference.is_joined());
        assert_eq!(h.api.resource_lookups(), 0);
        assert_eq!(
            h.presence_store.statuses_sent(),
            vec![AgentStatus::Break, AgentStatus::Break],
            "server is corrected with the local status"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_recoverable_join_error_ends_ladder_early() {
        let h = harness(MemorySessionStore::new());
        h.api.fail_next_lookups(
            5,
            CoordinatorError::ConferenceApi { status: Some(403), message: "not owner".into() },
        );
        ready(&h).await;

        let err = h.controller.set_status(AgentStatus::Available).await.unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::ConferenceJoinFailure {
                attempts: 1,
                reason: "Conference API error (403): not owner".into()
            }
        );
        let presence = h.controller.presence();
        assert_eq!(presence.status, AgentStatus::Available);
        assert!(presence.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn presence_store_failure_does_not_fail_the_transition() {
        let h = harness(MemorySessionStore::new());
        h.presence_store.fail_sends(true);
        ready(&h).await;

        h.controller.set_status(AgentStatus::Available).await.unwrap();
        assert_eq!(h.controller.status(), AgentStatus::Available);
        assert!(h.conference.is_joined());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_shows_intent_without_joining() {
        let h = harness(MemorySessionStore::with_status(AgentStatus::Available));
        assert_eq!(h.controller.restore().await.unwrap(), Some(AgentStatus::Available));

        assert_eq!(h.controller.status(), AgentStatus::Available);
        assert!(!h.conference.is_joined());
        assert_eq!(h.api.resource_lookups(), 0);
    }
}
