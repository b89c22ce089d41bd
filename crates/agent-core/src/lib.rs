//! # Agent presence and call session coordination
//!
//! Client-side core of an agent desktop. It keeps three independently failing
//! systems consistent:
//!
//! - a WebRTC **telephony client** that needs a warm-up period before it can
//!   place or receive calls ([`lifecycle`], [`telephony`])
//! - a server-side **presence store** reached over a realtime channel
//!   ([`presence`], [`bridge`])
//! - a **conference routing service** that bridges customers into the
//!   agent's personal conference and dials out on the agent's behalf
//!   ([`conference`])
//!
//! On top of those sit the [`controller`] (the agent status state machine),
//! the [`call`] session manager, the outbound [`dialer`], and the
//! [`SessionCoordinator`] that wires everything together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentdesk_agent_core::sim::{SimConferenceApi, SimPresenceStore, SimTelephony};
//! use agentdesk_agent_core::{AgentStatus, CoordinatorConfig, SessionCoordinator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = SessionCoordinator::builder(CoordinatorConfig::new("42"))
//!         .telephony(Arc::new(SimTelephony::new()))
//!         .conference_api(Arc::new(SimConferenceApi::new()))
//!         .presence_store(Arc::new(SimPresenceStore::new()))
//!         .build()?;
//!
//!     coordinator.start().await?;
//!     // Queued until the telephony client has warmed up
//!     coordinator.set_status(AgentStatus::Available).await?;
//!
//!     let call = coordinator.dial("+15551234567").await?;
//!     println!("dialing through conference, leg {}", call.id);
//!
//!     coordinator.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod call;
pub mod conference;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod dialer;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod presence;
pub mod recovery;
pub mod sim;
pub mod status;
pub mod store;
pub mod telephony;

pub use bridge::{EventBridge, EventKind, RealtimeEvent, SubscriptionToken};
pub use call::{CallContext, CallDirection, CallRoute, CallSession, CallState};
pub use conference::{Conference, ConferenceStatus, Participant, ParticipantKind, ParticipantStatus};
pub use config::{CoordinatorConfig, ReadinessMode};
pub use coordinator::{SessionCoordinator, SessionCoordinatorBuilder};
pub use dialer::DialRequest;
pub use error::{CoordinatorError, CoordinatorResult};
pub use status::{AgentPresence, AgentStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
