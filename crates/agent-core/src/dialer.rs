//! Outbound dial orchestration
//!
//! [`DialOrchestrator::make_call`] picks how a call is placed from the
//! agent's current state:
//!
//! 1. `available`: the server dials
//!    the target into the agent's conference. The local client does no
//!    signaling; the agent is already in the bridge.
//! 2. `offline`: the agent is promoted to `available` first. The client gets
//!    a bounded wait for readiness, the status controller runs the
//!    `available` transition, and the conference join is polled for before
//!    falling through to case 1.
//! 3. `busy`, `after-call`, `break`: refused with [`CoordinatorError::DialRejected`].
//!
//! With conference routing disabled the call is placed directly by the
//! telephony client instead of the dial-out endpoint.

use std::sync::Arc;
use tracing::{info, warn};

use crate::call::{CallContext, CallRoute, CallSession, CallSessionManager};
use crate::conference::{ConferenceManager, DialOutRequest};
use crate::config::DialConfig;
use crate::controller::StatusController;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::lifecycle::ClientLifecycle;
use crate::recovery::poll_until;
use crate::status::AgentStatus;

/// An outbound call request
#[derive(Debug, Clone, PartialEq)]
pub struct DialRequest {
    pub target: String,
    pub contact_id: Option<String>,
    pub context: CallContext,
}

impl DialRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            contact_id: None,
            context: CallContext::new(),
        }
    }

    pub fn with_contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

pub struct DialOrchestrator {
    config: DialConfig,
    lifecycle: Arc<ClientLifecycle>,
    conference: Arc<ConferenceManager>,
    controller: Arc<StatusController>,
    calls: Arc<CallSessionManager>,
}

impl DialOrchestrator {
    pub fn new(
        config: DialConfig,
        lifecycle: Arc<ClientLifecycle>,
        conference: Arc<ConferenceManager>,
        controller: Arc<StatusController>,
        calls: Arc<CallSessionManager>,
    ) -> Self {
        Self {
            config,
            lifecycle,
            conference,
            controller,
            calls,
        }
    }

    /// Place an outbound call
    pub async fn make_call(&self, request: DialRequest) -> CoordinatorResult<CallSession> {
        if request.target.trim().is_empty() {
            return Err(CoordinatorError::dial_rejected("Cannot dial an empty number"));
        }
        if let Some(current) = self.calls.current() {
            return Err(CoordinatorError::dial_rejected(format!(
                "Cannot dial while call {} is in progress",
                current.id
            )));
        }

        let status = self.controller.status();
        match status {
            AgentStatus::Available => {
                self.wait_for_conference().await?;
            }
            AgentStatus::Offline => self.promote().await?,
            other => {
                return Err(CoordinatorError::dial_rejected(format!(
                    "Cannot dial while in {} status",
                    other
                )));
            }
        }

        if self.config.conference_routing {
            self.dial_via_conference(request).await
        } else {
            self.dial_direct(request).await
        }
    }

    /// Bring an offline agent to `available` before dialing
    async fn promote(&self) -> CoordinatorResult<()> {
        info!("Agent offline; going available before dialing");
        if !self.lifecycle.exists() {
            self.lifecycle.initialize().await?;
        }
        self.lifecycle
            .wait_until_ready(std::time::Duration::from_millis(self.config.readiness_timeout_ms))
            .await?;
        self.controller.set_status(AgentStatus::Available).await?;
        self.wait_for_conference().await
    }

    async fn wait_for_conference(&self) -> CoordinatorResult<()> {
        if !self.config.conference_routing {
            return Ok(());
        }
        let conference = &self.conference;
        poll_until(
            "wait_for_conference_join",
            std::time::Duration::from_millis(self.config.join_poll_interval_ms),
            std::time::Duration::from_millis(self.config.join_poll_timeout_ms),
            || conference.is_joined(),
        )
        .await
    }

    async fn dial_via_conference(&self, request: DialRequest) -> CoordinatorResult<CallSession> {
        // Claim the call slot before the HTTP round trip
        let provisional_id = format!("dial-{}", uuid::Uuid::new_v4());
        self.calls.begin_outbound(
            &provisional_id,
            &request.target,
            request.context.clone(),
            CallRoute::Conference,
            None,
        )?;

        let dial_out = DialOutRequest {
            phone_number: request.target.clone(),
            contact_id: request.contact_id,
            context: request.context,
        };
        let response = match self.conference.dial_out(&dial_out).await {
            Ok(response) if response.success => response,
            Ok(_) => {
                self.calls.on_destroyed(&provisional_id);
                return Err(CoordinatorError::ConferenceApi {
                    status: None,
                    message: "dial-out was not accepted".to_string(),
                });
            }
            Err(e) => {
                warn!(target = %request.target, error = %e, "Conference dial-out failed");
                self.calls.on_destroyed(&provisional_id);
                return Err(e);
            }
        };

        let session = match response.leg_id() {
            Some(leg_id) => self.calls.rebind(&provisional_id, leg_id),
            None => self.calls.current(),
        };
        let session = session.ok_or_else(|| CoordinatorError::invalid_state("call ended while dialing"))?;
        info!(call_id = %session.id, target = %request.target, "Dial-out placed through conference");
        Ok(session)
    }

    async fn dial_direct(&self, request: DialRequest) -> CoordinatorResult<CallSession> {
        let telephony = self
            .lifecycle
            .session()
            .ok_or_else(|| CoordinatorError::invalid_state("telephony client is not initialized"))?;

        let call = telephony.dial(&request.target, &request.context).await?;
        let call_id = call.id();
        let session = self.calls.begin_outbound(
            &call_id,
            &request.target,
            request.context,
            CallRoute::Direct,
            Some(call.clone()),
        )?;

        if let Err(e) = call.start().await {
            warn!(call_id = %call_id, error = %e, "Direct dial failed to start");
            self.calls.on_destroyed(&call_id);
            return Err(e);
        }
        info!(call_id = %call_id, target = %session.caller_id, "Direct call started");
        Ok(session)
    }
}
