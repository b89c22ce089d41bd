//! Telephony client lifecycle
//!
//! [`ClientLifecycle`] owns the single telephony client session of an agent.
//! Creating the session is not enough to use it: the WebRTC stack needs a
//! warm-up period (ICE gathering) before calls can be placed or received
//! reliably. Readiness is exposed as a `watch` channel that flips from `false`
//! to `true` exactly once per session, either after a fixed warm-up delay or
//! when the SDK reports it, depending on [`ReadinessMode`].
//!
//! [`ClientLifecycle::initialize`] is idempotent: concurrent callers collapse
//! onto the one in-flight creation, and a failed creation leaves no session
//! behind so a later call can retry.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientCredentials, ReadinessMode};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::recovery::with_timeout;
use crate::telephony::{TelephonyEventSender, TelephonyProvider, TelephonySession};

#[derive(Default)]
struct LifecycleState {
    session: Option<Arc<dyn TelephonySession>>,
    online: bool,
    last_error: Option<String>,
    readiness_task: Option<JoinHandle<()>>,
    sessions_created: u32,
}

/// Owner of the agent's telephony client session
pub struct ClientLifecycle {
    provider: Arc<dyn TelephonyProvider>,
    credentials: ClientCredentials,
    readiness: ReadinessMode,
    events_tx: TelephonyEventSender,
    init_guard: tokio::sync::Mutex<()>,
    state: Arc<Mutex<LifecycleState>>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl ClientLifecycle {
    pub fn new(
        provider: Arc<dyn TelephonyProvider>,
        credentials: ClientCredentials,
        readiness: ReadinessMode,
        events_tx: TelephonyEventSender,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            provider,
            credentials,
            readiness,
            events_tx,
            init_guard: tokio::sync::Mutex::new(()),
            state: Arc::new(Mutex::new(LifecycleState::default())),
            ready_tx: Arc::new(ready_tx),
        }
    }

    /// Create the client session if it does not exist yet
    pub async fn initialize(&self) -> CoordinatorResult<()> {
        if self.exists() {
            return Ok(());
        }

        let _guard = self.init_guard.lock().await;
        if self.exists() {
            debug!("Telephony client already initialized by a concurrent caller");
            return Ok(());
        }

        info!("Creating telephony client session");
        let session = match self.provider.create_session(&self.credentials).await {
            Ok(session) => session,
            Err(e) => {
                let err = match e {
                    CoordinatorError::PermissionDenied { .. } | CoordinatorError::InitializationFailure { .. } => e,
                    other => CoordinatorError::initialization(other.to_string()),
                };
                warn!(error = %err, category = err.category(), "Telephony client creation failed");
                self.state.lock().last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let task = self.spawn_readiness(session.clone());
        let mut state = self.state.lock();
        state.session = Some(session);
        state.online = false;
        state.last_error = None;
        state.readiness_task = Some(task);
        state.sessions_created += 1;
        Ok(())
    }

    fn spawn_readiness(&self, session: Arc<dyn TelephonySession>) -> JoinHandle<()> {
        let ready_tx = self.ready_tx.clone();
        let state = self.state.clone();
        let readiness = self.readiness;

        tokio::spawn(async move {
            match readiness {
                ReadinessMode::Warmup { delay_ms } => {
                    debug!(delay_ms = delay_ms, "Waiting for telephony client warm-up");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                ReadinessMode::SdkSignal => {
                    if let Err(e) = session.ready().await {
                        warn!(error = %e, "Telephony client never became ready");
                        state.lock().last_error = Some(e.to_string());
                        return;
                    }
                }
            }
            info!("Telephony client ready");
            ready_tx.send_replace(true);
        })
    }

    pub fn exists(&self) -> bool {
        self.state.lock().session.is_some()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Number of sessions successfully created over this manager's lifetime
    pub fn sessions_created(&self) -> u32 {
        self.state.lock().sessions_created
    }

    /// Observe readiness changes
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn session(&self) -> Option<Arc<dyn TelephonySession>> {
        self.state.lock().session.clone()
    }

    fn require_session(&self) -> CoordinatorResult<Arc<dyn TelephonySession>> {
        self.session()
            .ok_or_else(|| CoordinatorError::invalid_state("telephony client is not initialized"))
    }

    /// Wait at most `timeout` for readiness
    pub async fn wait_until_ready(&self, timeout: Duration) -> CoordinatorResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let mut rx = self.ready_tx.subscribe();
        let waited = with_timeout("wait_for_client_ready", timeout, async move {
            rx.wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| CoordinatorError::internal("readiness channel closed"))
        })
        .await;

        match waited {
            Err(CoordinatorError::OperationTimeout { duration_ms }) => {
                Err(CoordinatorError::ReadinessTimeout { timeout_ms: duration_ms })
            }
            other => other,
        }
    }

    /// Bring the client online if it is not already
    pub async fn online(&self) -> CoordinatorResult<()> {
        let session = self.require_session()?;
        if self.is_online() {
            return Ok(());
        }
        session.online(self.events_tx.clone()).await?;
        self.state.lock().online = true;
        info!("Telephony client online");
        Ok(())
    }

    /// Take the client offline; the local flag is cleared even if the SDK fails
    pub async fn offline(&self) -> CoordinatorResult<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        if !self.is_online() {
            return Ok(());
        }
        self.state.lock().online = false;
        session.offline().await?;
        info!("Telephony client offline");
        Ok(())
    }

    /// Destroy the session and stop the readiness timer
    pub async fn dispose(&self) {
        let (session, task, was_online) = {
            let mut state = self.state.lock();
            let was_online = state.online;
            state.online = false;
            (state.session.take(), state.readiness_task.take(), was_online)
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(session) = session {
            if was_online {
                if let Err(e) = session.offline().await {
                    warn!(error = %e, "Failed to take telephony client offline during dispose");
                }
            }
            if let Err(e) = session.disconnect().await {
                warn!(error = %e, "Failed to disconnect telephony client");
            }
        }
        self.ready_tx.send_replace(false);
        debug!("Telephony client disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTelephony;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn lifecycle(provider: Arc<SimTelephony>, readiness: ReadinessMode) -> ClientLifecycle {
        let (tx, _rx) = mpsc::unbounded_channel();
        ClientLifecycle::new(provider, ClientCredentials::default(), readiness, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_ready_after_warmup() {
        let provider = Arc::new(SimTelephony::new());
        let lifecycle = lifecycle(provider, ReadinessMode::Warmup { delay_ms: 10_500 });
        let started = Instant::now();

        lifecycle.initialize().await.unwrap();
        assert!(lifecycle.exists());
        assert!(!lifecycle.is_ready());

        let mut ready = lifecycle.subscribe_ready();
        ready.wait_for(|r| *r).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(10_500));
        assert!(lifecycle.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initialize_creates_one_session() {
        let provider = Arc::new(SimTelephony::new());
        provider.set_create_delay(Duration::from_secs(1));
        let lifecycle = lifecycle(provider.clone(), ReadinessMode::Warmup { delay_ms: 100 });

        let (a, b) = tokio::join!(lifecycle.initialize(), lifecycle.initialize());
        a.unwrap();
        b.unwrap();
        assert_eq!(provider.sessions_created(), 1);
        assert_eq!(lifecycle.sessions_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_creation_can_be_retried() {
        let provider = Arc::new(SimTelephony::new());
        provider.fail_next_create(CoordinatorError::telephony("token rejected"));
        let lifecycle = lifecycle(provider.clone(), ReadinessMode::Warmup { delay_ms: 100 });

        let err = lifecycle.initialize().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InitializationFailure { .. }));
        assert!(!lifecycle.exists());
        assert!(lifecycle.last_error().unwrap().contains("token rejected"));

        lifecycle.initialize().await.unwrap();
        assert!(lifecycle.exists());
        assert_eq!(lifecycle.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_surfaced_verbatim() {
        let provider = Arc::new(SimTelephony::new());
        provider.fail_next_create(CoordinatorError::PermissionDenied { reason: "microphone blocked".into() });
        let lifecycle = lifecycle(provider, ReadinessMode::Warmup { delay_ms: 100 });

        let err = lifecycle.initialize().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PermissionDenied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn sdk_signal_mode_waits_for_the_sdk() {
        let provider = Arc::new(SimTelephony::new());
        provider.set_ready_delay(Duration::from_secs(3));
        let lifecycle = lifecycle(provider, ReadinessMode::SdkSignal);

        lifecycle.initialize().await.unwrap();
        let started = Instant::now();
        lifecycle.wait_until_ready(Duration::from_secs(15)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_times_out() {
        let provider = Arc::new(SimTelephony::new());
        let lifecycle = lifecycle(provider, ReadinessMode::Warmup { delay_ms: 60_000 });
        lifecycle.initialize().await.unwrap();

        let err = lifecycle.wait_until_ready(Duration::from_secs(15)).await.unwrap_err();
        assert_eq!(err, CoordinatorError::ReadinessTimeout { timeout_ms: 15_000 });
    }

    #[tokio::test(start_paused = true)]
    async fn online_is_idempotent_and_dispose_resets() {
        let provider = Arc::new(SimTelephony::new());
        let lifecycle = lifecycle(provider.clone(), ReadinessMode::Warmup { delay_ms: 100 });

        assert!(lifecycle.online().await.is_err());
        lifecycle.initialize().await.unwrap();
        lifecycle.online().await.unwrap();
        lifecycle.online().await.unwrap();
        assert_eq!(provider.online_calls(), 1);

        lifecycle.dispose().await;
        assert!(!lifecycle.exists());
        assert!(!lifecycle.is_online());
        assert!(!lifecycle.is_ready());
        assert_eq!(provider.offline_calls(), 1);
    }
}
