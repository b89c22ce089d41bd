//! In-memory backends
//!
//! Scriptable stand-ins for the telephony SDK, the conference routing API and
//! the presence channel. They record every call made against them so tests
//! can assert on side effects, and can be told to fail the next N requests.
//! The console's `simulate` command runs a coordinator against them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::call::CallContext;
use crate::conference::{ConferenceApi, DialOutRequest, DialOutResponse, EndCallResponse, ResourceAddress};
use crate::config::ClientCredentials;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::presence::{PresenceCommand, PresenceStore};
use crate::status::AgentStatus;
use crate::telephony::{
    TelephonyCall, TelephonyEvent, TelephonyEventSender, TelephonyProvider, TelephonySession,
};

/// Scripted telephony call leg
#[derive(Debug)]
pub struct SimCall {
    id: String,
    started: AtomicBool,
    answered: AtomicBool,
    muted: AtomicBool,
    hangups: AtomicU32,
    fail_start: AtomicBool,
    fail_hangup: AtomicBool,
    digits: Mutex<String>,
}

impl SimCall {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            hangups: AtomicU32::new(0),
            fail_start: AtomicBool::new(false),
            fail_hangup: AtomicBool::new(false),
            digits: Mutex::new(String::new()),
        }
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn hangups(&self) -> u32 {
        self.hangups.load(Ordering::SeqCst)
    }

    pub fn digits(&self) -> String {
        self.digits.lock().clone()
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_hangup(&self) {
        self.fail_hangup.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TelephonyCall for SimCall {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start(&self) -> CoordinatorResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CoordinatorError::telephony(format!("call {} failed to start", self.id)));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn answer(&self) -> CoordinatorResult<()> {
        self.answered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn hangup(&self) -> CoordinatorResult<()> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        if self.fail_hangup.load(Ordering::SeqCst) {
            return Err(CoordinatorError::telephony(format!("call {} is already gone", self.id)));
        }
        Ok(())
    }

    async fn audio_mute(&self) -> CoordinatorResult<()> {
        self.muted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn audio_unmute(&self) -> CoordinatorResult<()> {
        self.muted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_digits(&self, digits: &str) -> CoordinatorResult<()> {
        self.digits.lock().push_str(digits);
        Ok(())
    }
}

#[derive(Default)]
struct TelephonyScript {
    create_delay: Duration,
    ready_delay: Duration,
    create_failures: VecDeque<CoordinatorError>,
    online_failures: u32,
    start_failures: u32,
    sessions_created: u32,
    online_calls: u32,
    offline_calls: u32,
    dials: Vec<String>,
    calls: Vec<Arc<SimCall>>,
    events: Option<TelephonyEventSender>,
}

/// Scripted telephony SDK
#[derive(Default)]
pub struct SimTelephony {
    script: Arc<Mutex<TelephonyScript>>,
}

impl SimTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.script.lock().create_delay = delay;
    }

    /// Delay before the SDK's own ready signal
    pub fn set_ready_delay(&self, delay: Duration) {
        self.script.lock().ready_delay = delay;
    }

    pub fn fail_next_create(&self, err: CoordinatorError) {
        self.script.lock().create_failures.push_back(err);
    }

    pub fn fail_next_online(&self, count: u32) {
        self.script.lock().online_failures = count;
    }

    /// Make the next `count` dialed calls fail to start
    pub fn fail_next_starts(&self, count: u32) {
        self.script.lock().start_failures = count;
    }

    pub fn sessions_created(&self) -> u32 {
        self.script.lock().sessions_created
    }

    pub fn online_calls(&self) -> u32 {
        self.script.lock().online_calls
    }

    pub fn offline_calls(&self) -> u32 {
        self.script.lock().offline_calls
    }

    /// Every target dialed, in order
    pub fn dials(&self) -> Vec<String> {
        self.script.lock().dials.clone()
    }

    pub fn last_call(&self) -> Option<Arc<SimCall>> {
        self.script.lock().calls.last().cloned()
    }

    /// Push an SDK event; false if the session is not online
    pub fn emit(&self, event: TelephonyEvent) -> bool {
        let events = self.script.lock().events.clone();
        match events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Ring the client with an inbound call
    pub fn ring(&self, call_id: &str, caller_id: &str) -> Arc<SimCall> {
        let call = Arc::new(SimCall::new(call_id));
        self.emit(TelephonyEvent::IncomingCall {
            call: call.clone(),
            caller_id: caller_id.to_string(),
            context: CallContext::new(),
        });
        call
    }
}

#[async_trait]
impl TelephonyProvider for SimTelephony {
    async fn create_session(&self, _credentials: &ClientCredentials) -> CoordinatorResult<Arc<dyn TelephonySession>> {
        let delay = self.script.lock().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock();
        if let Some(err) = script.create_failures.pop_front() {
            return Err(err);
        }
        script.sessions_created += 1;
        Ok(Arc::new(SimSession {
            script: self.script.clone(),
        }))
    }
}

struct SimSession {
    script: Arc<Mutex<TelephonyScript>>,
}

#[async_trait]
impl TelephonySession for SimSession {
    async fn online(&self, events: TelephonyEventSender) -> CoordinatorResult<()> {
        let mut script = self.script.lock();
        if script.online_failures > 0 {
            script.online_failures -= 1;
            return Err(CoordinatorError::telephony("media devices unavailable"));
        }
        script.online_calls += 1;
        script.events = Some(events);
        Ok(())
    }

    async fn offline(&self) -> CoordinatorResult<()> {
        let mut script = self.script.lock();
        script.offline_calls += 1;
        script.events = None;
        Ok(())
    }

    async fn dial(&self, target: &str, _context: &CallContext) -> CoordinatorResult<Arc<dyn TelephonyCall>> {
        let mut script = self.script.lock();
        script.dials.push(target.to_string());
        let call = Arc::new(SimCall::new(format!("sim-call-{}", script.dials.len())));
        if script.start_failures > 0 {
            script.start_failures -= 1;
            call.fail_start();
        }
        script.calls.push(call.clone());
        debug!(target = target, call_id = %call.id, "Simulated dial");
        Ok(call)
    }

    async fn ready(&self) -> CoordinatorResult<()> {
        let delay = self.script.lock().ready_delay;
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[derive(Default)]
struct ApiScript {
    lookups: u32,
    lookup_failures: VecDeque<CoordinatorError>,
    lookup_delay: Duration,
    dial_outs: Vec<(String, DialOutRequest)>,
    dial_out_failure: Option<CoordinatorError>,
    ended_calls: Vec<String>,
    end_call_failure: Option<CoordinatorError>,
}

/// Scripted conference routing API; conferences are named `agent_{id}`
#[derive(Default)]
pub struct SimConferenceApi {
    script: Mutex<ApiScript>,
}

impl SimConferenceApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_lookups(&self) -> u32 {
        self.script.lock().lookups
    }

    /// Fail the next `count` resource-address lookups with `err`
    pub fn fail_next_lookups(&self, count: u32, err: CoordinatorError) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.lookup_failures.push_back(err.clone());
        }
    }

    /// Delay every resource-address lookup, stretching each join attempt
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.script.lock().lookup_delay = delay;
    }

    pub fn fail_dial_out(&self, err: CoordinatorError) {
        self.script.lock().dial_out_failure = Some(err);
    }

    pub fn fail_end_call(&self, err: CoordinatorError) {
        self.script.lock().end_call_failure = Some(err);
    }

    /// Every remote leg asked to end, in order
    pub fn ended_calls(&self) -> Vec<String> {
        self.script.lock().ended_calls.clone()
    }

    /// Every dial-out as `(conference_name, request)`
    pub fn dial_outs(&self) -> Vec<(String, DialOutRequest)> {
        self.script.lock().dial_outs.clone()
    }
}

#[async_trait]
impl ConferenceApi for SimConferenceApi {
    async fn resource_address(&self, agent_id: &str) -> CoordinatorResult<ResourceAddress> {
        let delay = self.script.lock().lookup_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock();
        script.lookups += 1;
        if let Some(err) = script.lookup_failures.pop_front() {
            return Err(err);
        }
        Ok(ResourceAddress {
            dial_address: format!("/public/agent-conference?agent_id={}", agent_id),
            conference_name: format!("agent_{}", agent_id),
            resource_address: Some("/public/agent-conference".to_string()),
            conference_id: Some(1),
        })
    }

    async fn dial_out(&self, conference_name: &str, request: &DialOutRequest) -> CoordinatorResult<DialOutResponse> {
        let mut script = self.script.lock();
        if let Some(err) = script.dial_out_failure.take() {
            return Err(err);
        }
        script.dial_outs.push((conference_name.to_string(), request.clone()));
        Ok(DialOutResponse {
            success: true,
            call_id: Some(script.dial_outs.len().to_string()),
            call_sid: Some(format!("CA{:04}", script.dial_outs.len())),
            conference_name: Some(conference_name.to_string()),
            phone_number: Some(request.phone_number.clone()),
        })
    }

    async fn end_call(&self, call_id: &str) -> CoordinatorResult<EndCallResponse> {
        let mut script = self.script.lock();
        script.ended_calls.push(call_id.to_string());
        if let Some(err) = script.end_call_failure.take() {
            return Err(err);
        }
        Ok(EndCallResponse {
            success: true,
            call_id: None,
            call_sid: Some(call_id.to_string()),
            message: Some("Call ended successfully".to_string()),
        })
    }
}

/// Recording presence channel
#[derive(Default)]
pub struct SimPresenceStore {
    commands: Mutex<Vec<PresenceCommand>>,
    fail: AtomicBool,
}

impl SimPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<PresenceCommand> {
        self.commands.lock().clone()
    }

    /// Statuses sent with `set_agent_status`, in order
    pub fn statuses_sent(&self) -> Vec<AgentStatus> {
        self.commands
            .lock()
            .iter()
            .filter_map(|c| match c {
                PresenceCommand::SetAgentStatus { status, .. } => Some(*status),
                PresenceCommand::GetAgentStatus { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl PresenceStore for SimPresenceStore {
    async fn send(&self, command: PresenceCommand) -> CoordinatorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinatorError::presence("realtime channel disconnected"));
        }
        self.commands.lock().push(command);
        Ok(())
    }
}
