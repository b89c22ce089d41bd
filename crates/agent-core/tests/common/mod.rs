//! Shared harness for coordinator integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agentdesk_agent_core::call::CallSession;
use agentdesk_agent_core::sim::{SimConferenceApi, SimPresenceStore, SimTelephony};
use agentdesk_agent_core::store::MemorySessionStore;
use agentdesk_agent_core::{AgentPresence, CoordinatorConfig, SessionCoordinator};

pub const AGENT_ID: &str = "7";
pub const CONFERENCE: &str = "agent_7";
pub const WARMUP: Duration = Duration::from_millis(10_500);

pub struct Harness {
    pub telephony: Arc<SimTelephony>,
    pub api: Arc<SimConferenceApi>,
    pub presence_store: Arc<SimPresenceStore>,
    pub session_store: Arc<MemorySessionStore>,
    pub coordinator: SessionCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CoordinatorConfig::new(AGENT_ID), MemorySessionStore::new())
    }

    pub fn with(config: CoordinatorConfig, session_store: MemorySessionStore) -> Self {
        let telephony = Arc::new(SimTelephony::new());
        let api = Arc::new(SimConferenceApi::new());
        let presence_store = Arc::new(SimPresenceStore::new());
        let session_store = Arc::new(session_store);

        let coordinator = SessionCoordinator::builder(config.with_presence_token("presence-token"))
            .telephony(telephony.clone())
            .conference_api(api.clone())
            .presence_store(presence_store.clone())
            .session_store(session_store.clone())
            .build()
            .expect("coordinator should build");

        Self {
            telephony,
            api,
            presence_store,
            session_store,
            coordinator,
        }
    }

    /// Start and wait out the warm-up
    pub async fn start_ready(&self) {
        self.coordinator.start().await.expect("start should succeed");
        self.wait_ready().await;
    }

    pub async fn wait_ready(&self) {
        let mut ready = self.coordinator.subscribe_ready();
        tokio::time::timeout(Duration::from_secs(60), ready.wait_for(|r| *r))
            .await
            .expect("client never became ready")
            .expect("readiness channel closed");
    }

    pub async fn presence_where<F>(&self, predicate: F) -> AgentPresence
    where
        F: FnMut(&AgentPresence) -> bool,
    {
        let mut rx = self.coordinator.subscribe_presence();
        let presence = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
            .await
            .expect("presence did not reach the expected state")
            .expect("presence channel closed")
            .clone();
        presence
    }

    pub async fn call_where<F>(&self, predicate: F) -> Option<CallSession>
    where
        F: FnMut(&Option<CallSession>) -> bool,
    {
        let mut rx = self.coordinator.subscribe_calls();
        let call = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
            .await
            .expect("call did not reach the expected state")
            .expect("call channel closed")
            .clone();
        call
    }
}

/// Let spawned tasks drain their queues
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
