//! Session coordinator
//!
//! [`SessionCoordinator`] is built once per logged-in agent and handed to
//! whatever drives the UI. It owns every component and the background tasks
//! that connect them:
//!
//! - a readiness watcher that runs the queued status change (or the one-shot
//!   rejoin) when the telephony client becomes ready
//! - the telephony event loop feeding SDK callbacks into the call session
//! - the realtime [`EventBridge`] run loop
//!
//! [`SessionCoordinator::dispose`] stops the tasks and releases the
//! conference and the telephony session. [`SessionCoordinator::end_session`]
//! also clears the persisted status, for logout.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::bridge::{EventBridge, EventKind, RealtimeEvent};
use crate::call::{CallSession, CallSessionManager, CallState};
use crate::conference::{
    Conference, ConferenceApi, ConferenceManager, ConferenceStatus, HttpConferenceApi, Participant,
};
use crate::config::CoordinatorConfig;
use crate::controller::StatusController;
use crate::dialer::{DialOrchestrator, DialRequest};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::lifecycle::ClientLifecycle;
use crate::presence::PresenceStore;
use crate::status::{AgentPresence, AgentStatus};
use crate::store::{FileSessionStore, MemorySessionStore, SessionStore};
use crate::telephony::{TelephonyCall, TelephonyEvent, TelephonyEventReceiver, TelephonyProvider};

/// Builder for [`SessionCoordinator`]
pub struct SessionCoordinatorBuilder {
    config: CoordinatorConfig,
    telephony: Option<Arc<dyn TelephonyProvider>>,
    conference_api: Option<Arc<dyn ConferenceApi>>,
    presence_store: Option<Arc<dyn PresenceStore>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl SessionCoordinatorBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            telephony: None,
            conference_api: None,
            presence_store: None,
            session_store: None,
        }
    }

    pub fn telephony(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.telephony = Some(provider);
        self
    }

    /// Defaults to [`HttpConferenceApi`] at `config.api_base_url`
    pub fn conference_api(mut self, api: Arc<dyn ConferenceApi>) -> Self {
        self.conference_api = Some(api);
        self
    }

    pub fn presence_store(mut self, store: Arc<dyn PresenceStore>) -> Self {
        self.presence_store = Some(store);
        self
    }

    /// Defaults to a file store at `config.session_store_path`, or memory
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn build(self) -> CoordinatorResult<SessionCoordinator> {
        self.config.validate()?;
        let config = self.config;

        let telephony = self
            .telephony
            .ok_or_else(|| CoordinatorError::config("telephony", "a telephony provider is required"))?;
        let presence_store = self
            .presence_store
            .ok_or_else(|| CoordinatorError::config("presence_store", "a presence store is required"))?;
        let conference_api: Arc<dyn ConferenceApi> = match self.conference_api {
            Some(api) => api,
            None => Arc::new(HttpConferenceApi::new(
                &config.api_base_url,
                config.api_token.clone(),
                config.api_timeout(),
            )?),
        };
        let session_store: Arc<dyn SessionStore> = match (self.session_store, &config.session_store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileSessionStore::new(path)),
            (None, None) => Arc::new(MemorySessionStore::new()),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(ClientLifecycle::new(
            telephony,
            config.credentials.clone(),
            config.readiness,
            events_tx,
        ));
        let conference = Arc::new(ConferenceManager::new(&config.agent_id, conference_api.clone()));
        let controller = Arc::new(StatusController::new(
            &config.agent_id,
            &config.presence_token,
            lifecycle.clone(),
            conference.clone(),
            presence_store.clone(),
            session_store.clone(),
            config.join_retry.clone(),
        ));
        let calls = Arc::new(CallSessionManager::new().with_conference_api(conference_api));
        let dialer = DialOrchestrator::new(
            config.dial.clone(),
            lifecycle.clone(),
            conference.clone(),
            controller.clone(),
            calls.clone(),
        );

        Ok(SessionCoordinator {
            inner: Arc::new(Inner {
                config,
                lifecycle,
                conference,
                controller,
                calls,
                dialer,
                bridge: Arc::new(EventBridge::new()),
                presence_store,
                session_store,
            }),
            telephony_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }
}

struct Inner {
    config: CoordinatorConfig,
    lifecycle: Arc<ClientLifecycle>,
    conference: Arc<ConferenceManager>,
    controller: Arc<StatusController>,
    calls: Arc<CallSessionManager>,
    dialer: DialOrchestrator,
    bridge: Arc<EventBridge>,
    presence_store: Arc<dyn PresenceStore>,
    session_store: Arc<dyn SessionStore>,
}

/// One agent's presence and call session
pub struct SessionCoordinator {
    inner: Arc<Inner>,
    telephony_rx: Mutex<Option<TelephonyEventReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl SessionCoordinator {
    pub fn builder(config: CoordinatorConfig) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder::new(config)
    }

    /// Restore persisted intent, start the background tasks and create the
    /// telephony client
    pub async fn start(&self) -> CoordinatorResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CoordinatorError::invalid_state("coordinator has been disposed"));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = &self.inner;
        info!(agent_id = %inner.config.agent_id, "Starting agent session");

        inner.controller.restore().await?;
        self.spawn_tasks();

        inner.lifecycle.initialize().await?;

        if let Err(e) = inner.presence_store.request_agent_status(&inner.config.presence_token).await {
            warn!(error = %e, "Could not request server presence");
        }
        Ok(())
    }

    fn spawn_tasks(&self) {
        let mut tasks = self.tasks.lock();

        // Subscribed before the client exists so the first flip is not missed
        let ready_rx = self.inner.lifecycle.subscribe_ready();
        tasks.push(tokio::spawn(watch_readiness(Arc::downgrade(&self.inner), ready_rx)));

        if let Some(rx) = self.telephony_rx.lock().take() {
            tasks.push(tokio::spawn(telephony_loop(Arc::downgrade(&self.inner), rx)));
        }

        for kind in EventKind::ALL {
            let weak = Arc::downgrade(&self.inner);
            self.inner.bridge.subscribe(kind, move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_realtime(event).await;
                    }
                }
            });
        }
        tasks.push(tokio::spawn(self.inner.bridge.clone().run()));
    }

    pub async fn set_status(&self, status: AgentStatus) -> CoordinatorResult<()> {
        self.ensure_live()?;
        self.inner.controller.set_status(status).await
    }

    pub async fn make_call(&self, request: DialRequest) -> CoordinatorResult<CallSession> {
        self.ensure_live()?;
        self.inner.dialer.make_call(request).await
    }

    pub async fn dial(&self, target: &str) -> CoordinatorResult<CallSession> {
        self.make_call(DialRequest::new(target)).await
    }

    /// Answer the ringing inbound call
    pub async fn answer(&self) -> CoordinatorResult<CallSession> {
        self.ensure_live()?;
        let session = self.inner.calls.answer().await?;
        self.inner.on_call_connected().await;
        Ok(session)
    }

    pub async fn reject(&self) -> CoordinatorResult<Option<CallSession>> {
        self.ensure_live()?;
        self.inner.calls.reject().await
    }

    /// Hang up the current call; a no-op when idle
    pub async fn hangup(&self) -> Option<CallSession> {
        let session = self.inner.calls.hangup().await?;
        self.inner.on_call_finished(&session).await;
        Some(session)
    }

    /// Mute or unmute the agent's audio on the current call
    pub async fn set_muted(&self, muted: bool) -> CoordinatorResult<()> {
        let leg = self.inner.media_leg()?;
        if muted {
            leg.audio_mute().await?;
        } else {
            leg.audio_unmute().await?;
        }
        self.inner.calls.set_muted(muted);
        self.inner.conference.set_agent_muted(muted);
        Ok(())
    }

    pub async fn send_digits(&self, digits: &str) -> CoordinatorResult<()> {
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | 'w')) {
            return Err(CoordinatorError::invalid_state(format!("invalid DTMF digits '{}'", digits)));
        }
        self.inner.media_leg()?.send_digits(digits).await
    }

    pub fn presence(&self) -> AgentPresence {
        self.inner.controller.presence()
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.controller.status()
    }

    pub fn current_call(&self) -> Option<CallSession> {
        self.inner.calls.current()
    }

    pub fn conference(&self) -> Option<Conference> {
        self.inner.conference.conference()
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.inner.conference.roster()
    }

    pub fn is_in_conference(&self) -> bool {
        self.inner.conference.is_joined()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.lifecycle.subscribe_ready()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<AgentPresence> {
        self.inner.controller.subscribe()
    }

    pub fn subscribe_calls(&self) -> watch::Receiver<Option<CallSession>> {
        self.inner.calls.subscribe()
    }

    /// Status request queued until the client is ready
    pub fn pending_status(&self) -> Option<AgentStatus> {
        self.inner.controller.pending()
    }

    /// Stream of presence snapshots, starting with the current one
    pub fn presence_stream(&self) -> WatchStream<AgentPresence> {
        WatchStream::new(self.inner.controller.subscribe())
    }

    /// Stream of call session snapshots; `None` while idle
    pub fn call_stream(&self) -> WatchStream<Option<CallSession>> {
        WatchStream::new(self.inner.calls.subscribe())
    }

    /// Realtime bridge; the transport publishes inbound frames into it
    pub fn events(&self) -> Arc<EventBridge> {
        self.inner.bridge.clone()
    }

    fn ensure_live(&self) -> CoordinatorResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(CoordinatorError::invalid_state("coordinator has been disposed"))
        } else {
            Ok(())
        }
    }

    /// Release the telephony session, the conference and every task
    ///
    /// Persisted intent is kept so a reload can restore it.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = &self.inner;
        info!(agent_id = %inner.config.agent_id, "Disposing agent session");

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        inner.bridge.clear();
        inner.controller.cancel_pending();

        inner.calls.hangup().await;
        if let Err(e) = inner.conference.leave().await {
            warn!(error = %e, "Failed to leave conference during dispose");
        }
        inner.lifecycle.dispose().await;
    }

    /// Log the agent out: go offline, dispose, and forget the persisted status
    pub async fn end_session(&self) -> CoordinatorResult<()> {
        if !self.disposed.load(Ordering::SeqCst) {
            if let Err(e) = self.inner.controller.set_status(AgentStatus::Offline).await {
                warn!(error = %e, "Failed to go offline before ending session");
            }
        }
        self.dispose().await;
        self.inner.session_store.clear().await
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    /// The leg carrying the agent's audio for the current call
    fn media_leg(&self) -> CoordinatorResult<Arc<dyn TelephonyCall>> {
        if self.calls.is_idle() {
            return Err(CoordinatorError::invalid_state("no call in progress"));
        }
        self.calls
            .handle()
            .or_else(|| self.conference.agent_call())
            .ok_or_else(|| CoordinatorError::invalid_state("current call has no local media leg"))
    }

    async fn on_call_connected(&self) {
        if self.config.busy_on_answer && self.controller.status() == AgentStatus::Available {
            if let Err(e) = self.controller.set_status(AgentStatus::Busy).await {
                warn!(error = %e, "Failed to mark agent busy");
            }
        }
    }

    async fn on_call_finished(&self, session: &CallSession) {
        let status = self.controller.status();
        if self.config.after_call_on_hangup
            && session.answered_at.is_some()
            && matches!(status, AgentStatus::Available | AgentStatus::Busy)
        {
            if let Err(e) = self.controller.set_status(AgentStatus::AfterCall).await {
                warn!(error = %e, "Failed to move agent to after-call");
            }
        }
    }

    async fn handle_telephony(&self, event: TelephonyEvent) {
        debug!(event = ?event, "Telephony event");
        match event {
            TelephonyEvent::IncomingCall { call, caller_id, context } => {
                if let Err(e) = self.calls.on_incoming(call, caller_id, context) {
                    warn!(error = %e, "Dropping inbound call notification");
                }
            }
            TelephonyEvent::CallState { call_id, state } => {
                let Some(session) = self.calls.on_call_state(&call_id, state) else {
                    return;
                };
                if session.state == CallState::Active {
                    self.on_call_connected().await;
                }
            }
            TelephonyEvent::Destroyed { call_id } => {
                if let Some(session) = self.calls.on_destroyed(&call_id) {
                    self.on_call_finished(&session).await;
                }
            }
        }
    }

    async fn handle_realtime(&self, event: RealtimeEvent) {
        if let Some(name) = event.conference_name() {
            if !self.conference.owns(name) {
                debug!(conference = name, "Ignoring event for another conference");
                return;
            }
        }

        match event {
            RealtimeEvent::AgentStatus { status } | RealtimeEvent::AgentStatusUpdated { status } => {
                self.controller.apply_remote(status).await;
            }
            RealtimeEvent::ParticipantJoined { conference_name, participant } => {
                self.conference
                    .apply_participant_joined(&conference_name, participant.to_participant());
            }
            RealtimeEvent::ParticipantLeft { conference_name, participant } => {
                let left = self
                    .conference
                    .apply_participant_left(&conference_name, &participant.participant_id);
                if left.is_none() {
                    if let Some(sid) = &participant.call_sid {
                        self.conference.apply_participant_left(&conference_name, sid);
                    }
                }
            }
            RealtimeEvent::CustomerRoutedToConference {
                customer_call_sid,
                customer_info,
                context,
                ..
            } => {
                let caller = customer_info.phone.unwrap_or_else(|| customer_call_sid.clone());
                match self.calls.on_customer_routed(&customer_call_sid, &caller, context) {
                    Ok(session) if session.state == CallState::Active => self.on_call_connected().await,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Could not present routed customer"),
                }
            }
            RealtimeEvent::CustomerLeftConference {
                conference_name,
                customer_call_sid,
                participant_id,
            } => {
                let id = participant_id.unwrap_or_else(|| customer_call_sid.clone());
                self.conference.apply_participant_left(&conference_name, &id);
                if let Some(session) = self.calls.on_destroyed(&customer_call_sid) {
                    info!(call_id = %session.id, "Customer left conference");
                    self.on_call_finished(&session).await;
                }
            }
            RealtimeEvent::ConferenceParticipantSpeaking {
                conference_name,
                participant_call_sid,
                is_speaking,
            } => {
                self.conference
                    .apply_participant_speaking(&conference_name, &participant_call_sid, is_speaking);
            }
            RealtimeEvent::ConferenceStatusUpdate { conference_name, status } => {
                self.apply_conference_status(&conference_name, status);
            }
            RealtimeEvent::ConferenceEnded { conference_name } => {
                self.apply_conference_status(&conference_name, ConferenceStatus::Ended);
            }
        }
    }

    fn apply_conference_status(&self, conference_name: &str, status: ConferenceStatus) {
        if self.conference.apply_conference_status(conference_name, status)
            && status == ConferenceStatus::Ended
            && self.controller.status() == AgentStatus::Available
        {
            warn!(
                conference = conference_name,
                "Conference ended while agent is available; calls will not be routed until rejoined"
            );
        }
    }
}

async fn watch_readiness(inner: Weak<Inner>, mut ready_rx: watch::Receiver<bool>) {
    loop {
        if ready_rx.wait_for(|ready| *ready).await.is_err() {
            return;
        }
        let Some(strong) = inner.upgrade() else {
            return;
        };
        if let Err(e) = strong.controller.on_ready().await {
            warn!(error = %e, category = e.category(), "Status change after readiness failed");
        }
        drop(strong);

        // A new session flips readiness again
        if ready_rx.wait_for(|ready| !*ready).await.is_err() {
            return;
        }
    }
}

async fn telephony_loop(inner: Weak<Inner>, mut rx: TelephonyEventReceiver) {
    while let Some(event) = rx.recv().await {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        strong.handle_telephony(event).await;
    }
}
