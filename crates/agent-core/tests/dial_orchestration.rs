//! Outbound dial orchestration tests
//!
//! Covers the three dial branches:
//! - available: server-side dial-out into the agent conference
//! - offline: promote to available, wait for the join, then dial out
//! - busy / after-call / break: rejected without touching the routing API
//!
//! plus the direct-dial path used when conference routing is disabled.

mod common;

use std::time::Duration;
use tokio::time::Instant;

use agentdesk_agent_core::bridge::{CustomerInfo, RealtimeEvent};
use agentdesk_agent_core::config::DialConfig;
use agentdesk_agent_core::store::MemorySessionStore;
use agentdesk_agent_core::telephony::{TelephonyCallState, TelephonyEvent};
use agentdesk_agent_core::{
    AgentStatus, CallContext, CallDirection, CallRoute, CallState, CoordinatorConfig, CoordinatorError,
    DialRequest, ReadinessMode,
};

use common::{Harness, AGENT_ID, CONFERENCE, WARMUP};

fn routed(call_sid: &str) -> RealtimeEvent {
    RealtimeEvent::CustomerRoutedToConference {
        conference_name: CONFERENCE.into(),
        customer_call_sid: call_sid.into(),
        customer_info: CustomerInfo {
            phone: Some("+15550001111".into()),
        },
        context: CallContext::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_offline_dial_promotes_then_dials_out() {
    let h = Harness::new();
    h.coordinator.start().await.unwrap();
    assert_eq!(h.coordinator.status(), AgentStatus::Offline);

    let started = Instant::now();
    let call = h.coordinator.dial("+15550001111").await.unwrap();

    // Warm-up, then the 2s delay before the first join attempt
    assert_eq!(started.elapsed(), WARMUP + Duration::from_secs(2));
    assert_eq!(h.coordinator.status(), AgentStatus::Available);
    assert!(h.coordinator.is_in_conference());

    let dial_outs = h.api.dial_outs();
    assert_eq!(dial_outs.len(), 1);
    assert_eq!(dial_outs[0].0, CONFERENCE);
    assert_eq!(dial_outs[0].1.phone_number, "+15550001111");

    assert_eq!(call.id, "CA0001");
    assert_eq!(call.state, CallState::Ringing);
    assert_eq!(call.direction, CallDirection::Outbound);
    assert_eq!(call.route, CallRoute::Conference);
    // Only the conference leg was signaled locally
    assert_eq!(h.telephony.dials(), vec![format!("/public/agent-conference?agent_id={}", AGENT_ID)]);
}

#[tokio::test(start_paused = true)]
async fn test_relayed_call_connects_and_wraps_up() {
    let h = Harness::new();
    h.start_ready().await;
    h.coordinator.set_status(AgentStatus::Available).await.unwrap();
    let call = h.coordinator.dial("+15550001111").await.unwrap();

    h.coordinator.events().publish(routed(&call.id)).unwrap();
    let connected = h
        .call_where(|c| c.as_ref().map(|s| s.state) == Some(CallState::Active))
        .await
        .unwrap();
    assert_eq!(connected.id, call.id);
    assert!(connected.answered_at.is_some());
    h.presence_where(|p| p.status == AgentStatus::Busy).await;
    assert!(h.coordinator.is_in_conference(), "busy keeps the conference");

    h.coordinator
        .events()
        .publish(RealtimeEvent::CustomerLeftConference {
            conference_name: CONFERENCE.into(),
            customer_call_sid: call.id.clone(),
            participant_id: None,
        })
        .unwrap();
    h.call_where(|c| c.is_none()).await;
    h.presence_where(|p| p.status == AgentStatus::AfterCall).await;
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_statuses_reject_dial() {
    let h = Harness::new();
    h.start_ready().await;

    for status in [AgentStatus::Busy, AgentStatus::AfterCall, AgentStatus::Break] {
        h.coordinator.set_status(status).await.unwrap();
        let err = h.coordinator.dial("+15550001111").await.unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::DialRejected {
                reason: format!("Cannot dial while in {} status", status)
            }
        );
        assert!(!err.is_recoverable());
    }
    assert!(h.api.dial_outs().is_empty());
    assert_eq!(h.api.resource_lookups(), 0);
    assert!(h.coordinator.current_call().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_offline_dial_gives_up_when_client_never_ready() {
    let config = CoordinatorConfig::new(AGENT_ID).with_readiness(ReadinessMode::Warmup { delay_ms: 60_000 });
    let h = Harness::with(config, MemorySessionStore::new());
    h.coordinator.start().await.unwrap();

    let started = Instant::now();
    let err = h.coordinator.dial("+15550001111").await.unwrap_err();
    assert_eq!(err, CoordinatorError::ReadinessTimeout { timeout_ms: 15_000 });
    assert_eq!(started.elapsed(), Duration::from_secs(15));
    assert_eq!(h.coordinator.status(), AgentStatus::Offline);
    assert!(h.api.dial_outs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_available_dial_waits_for_pending_join() {
    let h = Harness::with(
        CoordinatorConfig::new(AGENT_ID),
        MemorySessionStore::with_status(AgentStatus::Available),
    );
    h.coordinator.start().await.unwrap();
    assert!(!h.coordinator.is_in_conference());

    // Restored intent rejoins at readiness; the dial polls for it
    let call = h.coordinator.dial("+15550002222").await.unwrap();
    assert_eq!(call.route, CallRoute::Conference);
    assert_eq!(h.api.resource_lookups(), 1);
    assert_eq!(h.api.dial_outs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_out_failure_frees_the_call_slot() {
    let h = Harness::new();
    h.start_ready().await;
    h.coordinator.set_status(AgentStatus::Available).await.unwrap();

    h.api.fail_dial_out(CoordinatorError::ConferenceApi {
        status: Some(500),
        message: "Failed to dial out".into(),
    });
    let err = h.coordinator.dial("+15550001111").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::ConferenceApi { status: Some(500), .. }));
    assert!(h.coordinator.current_call().is_none());

    h.coordinator.dial("+15550001111").await.unwrap();
    assert_eq!(h.api.dial_outs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_call_at_a_time() {
    let h = Harness::new();
    h.start_ready().await;
    h.coordinator.set_status(AgentStatus::Available).await.unwrap();

    h.coordinator
        .make_call(DialRequest::new("+15550001111").with_contact_id("contact-9"))
        .await
        .unwrap();
    let err = h.coordinator.dial("+15550003333").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::DialRejected { .. }));

    let dial_outs = h.api.dial_outs();
    assert_eq!(dial_outs.len(), 1);
    assert_eq!(dial_outs[0].1.contact_id.as_deref(), Some("contact-9"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_target_is_rejected() {
    let h = Harness::new();
    h.start_ready().await;
    let err = h.coordinator.dial("  ").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::DialRejected { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_direct_dial_follows_sdk_call_state() {
    let config = CoordinatorConfig::new(AGENT_ID).with_dial(DialConfig {
        conference_routing: false,
        ..DialConfig::default()
    });
    let h = Harness::with(config, MemorySessionStore::new());
    h.start_ready().await;
    h.coordinator.set_status(AgentStatus::Available).await.unwrap();

    let call = h.coordinator.dial("+15550004444").await.unwrap();
    assert_eq!(call.route, CallRoute::Direct);
    assert_eq!(call.state, CallState::Ringing);
    assert!(h.api.dial_outs().is_empty());
    assert_eq!(h.telephony.dials().last().map(String::as_str), Some("+15550004444"));
    assert!(h.telephony.last_call().unwrap().started());

    h.telephony.emit(TelephonyEvent::CallState {
        call_id: call.id.clone(),
        state: TelephonyCallState::Answered,
    });
    h.call_where(|c| c.as_ref().map(|s| s.state) == Some(CallState::Active)).await;
    h.presence_where(|p| p.status == AgentStatus::Busy).await;

    h.telephony.emit(TelephonyEvent::CallState {
        call_id: call.id.clone(),
        state: TelephonyCallState::Ending,
    });
    h.call_where(|c| c.as_ref().map(|s| s.state) == Some(CallState::Ending)).await;

    h.telephony.emit(TelephonyEvent::Destroyed { call_id: call.id.clone() });
    h.call_where(|c| c.is_none()).await;
    h.presence_where(|p| p.status == AgentStatus::AfterCall).await;
}

#[tokio::test(start_paused = true)]
async fn test_direct_dial_start_failure_clears_session() {
    let config = CoordinatorConfig::new(AGENT_ID).with_dial(DialConfig {
        conference_routing: false,
        ..DialConfig::default()
    });
    let h = Harness::with(config, MemorySessionStore::new());
    h.start_ready().await;
    h.coordinator.set_status(AgentStatus::Available).await.unwrap();

    h.telephony.fail_next_starts(1);
    let err = h.coordinator.dial("+15550004444").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Telephony { .. }));
    assert!(h.coordinator.current_call().is_none());
}
