//! Coordinator configuration
//!
//! [`CoordinatorConfig`] carries the agent identity, the credentials handed to
//! the telephony SDK, the conference routing API endpoint and every timing
//! constant the coordinator uses. Configuration can be built in code with the
//! `with_*` methods or loaded from TOML.
//!
//! ```rust
//! use agentdesk_agent_core::config::{CoordinatorConfig, ReadinessMode};
//! use std::time::Duration;
//!
//! let config = CoordinatorConfig::new("42")
//!     .with_api_base_url("https://desk.example.com/api")
//!     .with_readiness(ReadinessMode::Warmup { delay_ms: 10_500 });
//!
//! assert_eq!(config.warmup_delay(), Some(Duration::from_millis(10_500)));
//! assert_eq!(config.join_retry.max_attempts, 5);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::recovery::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials passed to the telephony SDK when creating a client session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Subscriber token issued by the backend
    pub token: String,
    /// Optional project / space identifier
    #[serde(default)]
    pub project: Option<String>,
}

/// How the coordinator decides the telephony client is usable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessMode {
    /// Treat the client as ready a fixed delay after creation
    Warmup { delay_ms: u64 },
    /// Wait for the SDK's own ready notification
    SdkSignal,
}

impl Default for ReadinessMode {
    fn default() -> Self {
        ReadinessMode::Warmup { delay_ms: 10_500 }
    }
}

/// Join retry ladder used when going available
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JoinRetryConfig {
    pub max_attempts: u32,
    /// Delay before attempt `n` is `n * step_ms`
    pub step_ms: u64,
    /// Upper bound for one join attempt
    pub attempt_timeout_ms: u64,
}

impl Default for JoinRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step_ms: 2_000,
            attempt_timeout_ms: 15_000,
        }
    }
}

impl JoinRetryConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::conference_join(self.max_attempts, Duration::from_millis(self.step_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Outbound dial orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DialConfig {
    /// Bound on waiting for client readiness when auto-promoting from offline
    pub readiness_timeout_ms: u64,
    pub join_poll_interval_ms: u64,
    pub join_poll_timeout_ms: u64,
    /// Relay outbound calls through the agent conference; when false calls
    /// are placed directly by the telephony client
    pub conference_routing: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 15_000,
            join_poll_interval_ms: 500,
            join_poll_timeout_ms: 20_000,
            conference_routing: true,
        }
    }
}

/// Main coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Agent (user) identifier used by the routing API
    pub agent_id: String,

    /// Token sent with presence store events
    pub presence_token: String,

    pub credentials: ClientCredentials,

    pub readiness: ReadinessMode,

    pub join_retry: JoinRetryConfig,

    pub dial: DialConfig,

    /// Base URL of the conference routing HTTP API
    pub api_base_url: String,

    /// Bearer token for the routing API
    pub api_token: Option<String>,

    pub api_timeout_ms: u64,

    /// File used to persist the intended status across reloads
    pub session_store_path: Option<PathBuf>,

    /// Move to after-call when a call ends
    pub after_call_on_hangup: bool,

    /// Move from available to busy when a call connects
    pub busy_on_answer: bool,

    /// Default log level for binaries; a command-line flag overrides it
    pub log_level: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            presence_token: String::new(),
            credentials: ClientCredentials::default(),
            readiness: ReadinessMode::default(),
            join_retry: JoinRetryConfig::default(),
            dial: DialConfig::default(),
            api_base_url: "http://localhost:5000/api".to_string(),
            api_token: None,
            api_timeout_ms: 10_000,
            session_store_path: None,
            after_call_on_hangup: true,
            busy_on_answer: true,
            log_level: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(source: &str) -> CoordinatorResult<Self> {
        let config: CoordinatorConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> CoordinatorResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::config("path", format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn with_presence_token(mut self, token: impl Into<String>) -> Self {
        self.presence_token = token.into();
        self
    }

    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessMode) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_join_retry(mut self, join_retry: JoinRetryConfig) -> Self {
        self.join_retry = join_retry;
        self
    }

    pub fn with_dial(mut self, dial: DialConfig) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_session_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_store_path = Some(path.into());
        self
    }

    pub fn with_after_call_on_hangup(mut self, enabled: bool) -> Self {
        self.after_call_on_hangup = enabled;
        self
    }

    pub fn with_busy_on_answer(mut self, enabled: bool) -> Self {
        self.busy_on_answer = enabled;
        self
    }

    /// Warm-up delay, if readiness is timer based
    pub fn warmup_delay(&self) -> Option<Duration> {
        match self.readiness {
            ReadinessMode::Warmup { delay_ms } => Some(Duration::from_millis(delay_ms)),
            ReadinessMode::SdkSignal => None,
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.dial.readiness_timeout_ms)
    }

    pub fn join_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dial.join_poll_interval_ms)
    }

    pub fn join_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.dial.join_poll_timeout_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    /// Reject settings that would make the coordinator spin or never finish
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.agent_id.trim().is_empty() {
            return Err(CoordinatorError::config("agent_id", "must not be empty"));
        }
        if self.join_retry.max_attempts == 0 {
            return Err(CoordinatorError::config("join_retry.max_attempts", "must be at least 1"));
        }
        if self.join_retry.attempt_timeout_ms == 0 {
            return Err(CoordinatorError::config("join_retry.attempt_timeout_ms", "must be greater than 0"));
        }
        if self.dial.join_poll_interval_ms == 0 {
            return Err(CoordinatorError::config("dial.join_poll_interval_ms", "must be greater than 0"));
        }
        if self.dial.join_poll_interval_ms > self.dial.join_poll_timeout_ms {
            return Err(CoordinatorError::config(
                "dial.join_poll_interval_ms",
                "must not exceed dial.join_poll_timeout_ms",
            ));
        }
        if self.dial.readiness_timeout_ms == 0 {
            return Err(CoordinatorError::config("dial.readiness_timeout_ms", "must be greater than 0"));
        }
        url::Url::parse(&self.api_base_url)
            .map_err(|e| CoordinatorError::config("api_base_url", e.to_string()))?;
        Ok(())
    }
}
