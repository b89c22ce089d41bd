//! Realtime event bridge
//!
//! Inbound realtime messages (server-pushed presence, conference roster
//! changes, customers routed into the agent's conference) are decoded into
//! [`RealtimeEvent`]s and handed to subscribers. Subscribing returns a
//! [`SubscriptionToken`] used to unsubscribe.
//!
//! Events are dispatched one at a time by [`EventBridge::run`]: every handler
//! for an event finishes before the next event is looked at, so handlers see
//! events in arrival order. Handlers for the same event run in subscription
//! order.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::call::CallContext;
use crate::conference::{ConferenceStatus, Participant, ParticipantKind, ParticipantStatus};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::presence::PresenceUpdate;
use crate::status::AgentStatus;

/// Participant as serialized by the conference service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPayload {
    pub participant_id: String,
    pub participant_type: ParticipantKind,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub status: Option<ParticipantStatus>,
    #[serde(default)]
    pub is_muted: bool,
}

impl ParticipantPayload {
    pub fn to_participant(&self) -> Participant {
        let status = match (self.status, self.is_muted) {
            (Some(ParticipantStatus::Left), _) => ParticipantStatus::Left,
            (_, true) => ParticipantStatus::Muted,
            (Some(status), false) => status,
            (None, false) => ParticipantStatus::Active,
        };
        let participant = Participant::new(&self.participant_id, self.participant_type, status);
        match &self.call_sid {
            Some(sid) => participant.with_call_sid(sid),
            None => participant,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    #[serde(default)]
    pub phone: Option<String>,
}

/// Inbound realtime events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    AgentStatus {
        status: AgentStatus,
    },
    AgentStatusUpdated {
        status: AgentStatus,
    },
    #[serde(alias = "conference_participant_joined")]
    ParticipantJoined {
        conference_name: String,
        participant: ParticipantPayload,
    },
    #[serde(alias = "conference_participant_left")]
    ParticipantLeft {
        conference_name: String,
        participant: ParticipantPayload,
    },
    CustomerRoutedToConference {
        conference_name: String,
        customer_call_sid: String,
        #[serde(default)]
        customer_info: CustomerInfo,
        #[serde(default)]
        context: CallContext,
    },
    CustomerLeftConference {
        conference_name: String,
        customer_call_sid: String,
        #[serde(default)]
        participant_id: Option<String>,
    },
    ConferenceParticipantSpeaking {
        conference_name: String,
        participant_call_sid: String,
        is_speaking: bool,
    },
    ConferenceStatusUpdate {
        conference_name: String,
        status: ConferenceStatus,
    },
    ConferenceEnded {
        conference_name: String,
    },
}

/// Subscription key; one per [`RealtimeEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentStatus,
    ParticipantJoined,
    ParticipantLeft,
    CustomerRouted,
    CustomerLeft,
    ParticipantSpeaking,
    ConferenceStatus,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::AgentStatus,
        EventKind::ParticipantJoined,
        EventKind::ParticipantLeft,
        EventKind::CustomerRouted,
        EventKind::CustomerLeft,
        EventKind::ParticipantSpeaking,
        EventKind::ConferenceStatus,
    ];
}

const EVENT_NAMES: &[&str] = &[
    "agent_status",
    "agent_status_updated",
    "participant_joined",
    "conference_participant_joined",
    "participant_left",
    "conference_participant_left",
    "customer_routed_to_conference",
    "customer_left_conference",
    "conference_participant_speaking",
    "conference_status_update",
    "conference_ended",
];

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::AgentStatus { .. } | RealtimeEvent::AgentStatusUpdated { .. } => EventKind::AgentStatus,
            RealtimeEvent::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            RealtimeEvent::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            RealtimeEvent::CustomerRoutedToConference { .. } => EventKind::CustomerRouted,
            RealtimeEvent::CustomerLeftConference { .. } => EventKind::CustomerLeft,
            RealtimeEvent::ConferenceParticipantSpeaking { .. } => EventKind::ParticipantSpeaking,
            RealtimeEvent::ConferenceStatusUpdate { .. } | RealtimeEvent::ConferenceEnded { .. } => {
                EventKind::ConferenceStatus
            }
        }
    }

    /// Conference the event is scoped to, if any
    pub fn conference_name(&self) -> Option<&str> {
        match self {
            RealtimeEvent::AgentStatus { .. } | RealtimeEvent::AgentStatusUpdated { .. } => None,
            RealtimeEvent::ParticipantJoined { conference_name, .. }
            | RealtimeEvent::ParticipantLeft { conference_name, .. }
            | RealtimeEvent::CustomerRoutedToConference { conference_name, .. }
            | RealtimeEvent::CustomerLeftConference { conference_name, .. }
            | RealtimeEvent::ConferenceParticipantSpeaking { conference_name, .. }
            | RealtimeEvent::ConferenceStatusUpdate { conference_name, .. }
            | RealtimeEvent::ConferenceEnded { conference_name } => Some(conference_name),
        }
    }

    /// Decode one realtime frame
    ///
    /// Frames for events this crate does not handle decode to `None`.
    pub fn from_json(frame: &str) -> CoordinatorResult<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(frame)
            .map_err(|e| CoordinatorError::presence(format!("malformed realtime frame: {}", e)))?;
        let Some(name) = value.get("event").and_then(|v| v.as_str()) else {
            return Err(CoordinatorError::presence("realtime frame has no event name"));
        };
        if !EVENT_NAMES.contains(&name) {
            trace!(event = name, "Ignoring unhandled realtime event");
            return Ok(None);
        }
        let name = name.to_string();
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CoordinatorError::presence(format!("malformed {} event: {}", name, e)))
    }
}

impl From<PresenceUpdate> for RealtimeEvent {
    fn from(update: PresenceUpdate) -> Self {
        match update {
            PresenceUpdate::AgentStatus { status } => RealtimeEvent::AgentStatus { status },
            PresenceUpdate::AgentStatusUpdated { status } => RealtimeEvent::AgentStatusUpdated { status },
        }
    }
}

/// Handle returned by [`EventBridge::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

type Handler = Arc<dyn Fn(RealtimeEvent) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    token: SubscriptionToken,
    kind: EventKind,
    handler: Handler,
}

/// Typed pub/sub over inbound realtime events
pub struct EventBridge {
    subscriptions: Mutex<Vec<Subscription>>,
    next_token: AtomicU64,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<RealtimeEvent>>>,
}

impl EventBridge {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(RealtimeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(handler(event)) });
        self.subscriptions.lock().push(Subscription { token, kind, handler });
        debug!(token = token.0, kind = ?kind, "Realtime subscription added");
        token
    }

    /// Returns false if the token was not subscribed
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.token != token);
        subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Queue an event for dispatch
    pub fn publish(&self, event: RealtimeEvent) -> CoordinatorResult<()> {
        self.tx
            .send(event)
            .map_err(|_| CoordinatorError::internal("event bridge stopped"))
    }

    /// Decode a realtime frame and queue it; returns whether it was queued
    pub fn publish_json(&self, frame: &str) -> CoordinatorResult<bool> {
        match RealtimeEvent::from_json(frame)? {
            Some(event) => self.publish(event).map(|_| true),
            None => Ok(false),
        }
    }

    /// Run every handler subscribed to the event's kind, in order
    pub async fn dispatch(&self, event: RealtimeEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        trace!(kind = ?kind, handlers = handlers.len(), "Dispatching realtime event");
        for handler in &handlers {
            handler(event.clone()).await;
        }
        handlers.len()
    }

    /// Drain the queue until every sender is gone
    ///
    /// Only the first call gets the queue; later calls return at once.
    pub async fn run(self: Arc<Self>) {
        let Some(mut rx) = self.rx.lock().take() else {
            warn!("Event bridge is already running");
            return;
        };
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
        debug!("Event bridge stopped");
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.subscriptions.lock().clear();
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}
