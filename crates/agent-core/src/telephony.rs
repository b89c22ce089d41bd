//! Telephony client SDK contract
//!
//! The coordinator never signals media itself. It drives a WebRTC telephony
//! SDK through these traits: a [`TelephonyProvider`] creates one
//! [`TelephonySession`] per authenticated user, the session goes online and
//! offline and dials, and every call it produces is a [`TelephonyCall`].
//!
//! SDK callbacks are delivered as [`TelephonyEvent`]s over the channel passed
//! to [`TelephonySession::online`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::call::CallContext;
use crate::config::ClientCredentials;
use crate::error::CoordinatorResult;

/// Sender half used by the SDK to report events
pub type TelephonyEventSender = mpsc::UnboundedSender<TelephonyEvent>;

/// Receiver half consumed by the coordinator
pub type TelephonyEventReceiver = mpsc::UnboundedReceiver<TelephonyEvent>;

/// Factory for client sessions
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Create a client session for the given credentials
    ///
    /// Implementations should return
    /// [`CoordinatorError::PermissionDenied`](crate::CoordinatorError::PermissionDenied)
    /// when microphone access is refused.
    async fn create_session(&self, credentials: &ClientCredentials) -> CoordinatorResult<Arc<dyn TelephonySession>>;
}

/// One live telephony client session
#[async_trait]
pub trait TelephonySession: Send + Sync {
    /// Start receiving calls; SDK events are pushed into `events`
    async fn online(&self, events: TelephonyEventSender) -> CoordinatorResult<()>;

    /// Stop receiving calls
    async fn offline(&self) -> CoordinatorResult<()>;

    /// Place a call to `target`
    async fn dial(&self, target: &str, context: &CallContext) -> CoordinatorResult<Arc<dyn TelephonyCall>>;

    /// Resolve once the SDK reports its connection pool as usable
    ///
    /// Only awaited in [`ReadinessMode::SdkSignal`](crate::config::ReadinessMode::SdkSignal);
    /// SDKs without such a signal can keep the default.
    async fn ready(&self) -> CoordinatorResult<()> {
        Ok(())
    }

    /// Tear the session down
    async fn disconnect(&self) -> CoordinatorResult<()> {
        Ok(())
    }
}

/// A call leg owned by the telephony SDK
#[async_trait]
pub trait TelephonyCall: Send + Sync {
    fn id(&self) -> String;

    async fn start(&self) -> CoordinatorResult<()>;

    /// Accept an inbound invitation
    async fn answer(&self) -> CoordinatorResult<()>;

    async fn hangup(&self) -> CoordinatorResult<()>;

    async fn audio_mute(&self) -> CoordinatorResult<()>;

    async fn audio_unmute(&self) -> CoordinatorResult<()>;

    async fn send_digits(&self, digits: &str) -> CoordinatorResult<()>;
}

/// Values of the SDK's `call.state` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelephonyCallState {
    Active,
    Answered,
    Ending,
    Ended,
}

/// Events raised by the telephony SDK
#[derive(Clone)]
pub enum TelephonyEvent {
    /// An inbound call is ringing this client
    IncomingCall {
        call: Arc<dyn TelephonyCall>,
        caller_id: String,
        context: CallContext,
    },
    /// `call.state` changed
    CallState {
        call_id: String,
        state: TelephonyCallState,
    },
    /// The call object was destroyed by the SDK
    Destroyed { call_id: String },
}

impl fmt::Debug for TelephonyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelephonyEvent::IncomingCall { call, caller_id, .. } => f
                .debug_struct("IncomingCall")
                .field("call_id", &call.id())
                .field("caller_id", caller_id)
                .finish(),
            TelephonyEvent::CallState { call_id, state } => f
                .debug_struct("CallState")
                .field("call_id", call_id)
                .field("state", state)
                .finish(),
            TelephonyEvent::Destroyed { call_id } => {
                f.debug_struct("Destroyed").field("call_id", call_id).finish()
            }
        }
    }
}
