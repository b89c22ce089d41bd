//! Error types for the agent coordinator
//!
//! Failures are grouped the way an agent desktop surfaces them: problems
//! creating the telephony client, waiting for it to warm up, joining the
//! agent's conference, dialing in an invalid state, and missing microphone
//! permission. Boundary failures from the external services (telephony SDK,
//! conference routing API, presence channel, session storage) get their own
//! variants so logs can tell them apart.

use thiserror::Error;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur while coordinating presence and calls
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The telephony client session could not be created
    #[error("Telephony client initialization failed: {reason}")]
    InitializationFailure { reason: String },

    /// Waited too long for the telephony client to become ready
    #[error("Telephony client not ready after {timeout_ms}ms")]
    ReadinessTimeout { timeout_ms: u64 },

    /// Joining the agent conference failed
    #[error("Failed to join conference after {attempts} attempt(s): {reason}")]
    ConferenceJoinFailure { attempts: u32, reason: String },

    /// A dial request was refused because of the agent's current state
    #[error("{reason}")]
    DialRejected { reason: String },

    /// Microphone access was refused by the user or the platform
    #[error("Microphone permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The telephony SDK reported an error
    #[error("Telephony error: {message}")]
    Telephony { message: String },

    /// The conference routing API reported an error
    #[error("Conference API error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ConferenceApi { status: Option<u16>, message: String },

    /// The realtime presence channel reported an error
    #[error("Presence channel error: {message}")]
    Presence { message: String },

    /// Persisted session state could not be read or written
    #[error("Session storage error: {message}")]
    Storage { message: String },

    /// Invalid configuration
    #[error("Invalid configuration for {field}: {reason}")]
    Configuration { field: String, reason: String },

    /// The operation is not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// An operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    /// A newer status request replaced the one in flight
    #[error("Status change superseded by a newer request")]
    Superseded,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoordinatorError {
    /// Create an initialization failure
    pub fn initialization(reason: impl Into<String>) -> Self {
        Self::InitializationFailure { reason: reason.into() }
    }

    /// Create a conference join failure for a single attempt
    pub fn join_failed(reason: impl Into<String>) -> Self {
        Self::ConferenceJoinFailure { attempts: 1, reason: reason.into() }
    }

    /// Create a dial rejection
    pub fn dial_rejected(reason: impl Into<String>) -> Self {
        Self::DialRejected { reason: reason.into() }
    }

    /// Create a telephony SDK error
    pub fn telephony(message: impl Into<String>) -> Self {
        Self::Telephony { message: message.into() }
    }

    /// Create a presence channel error
    pub fn presence(message: impl Into<String>) -> Self {
        Self::Presence { message: message.into() }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration { field: field.into(), reason: reason.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoordinatorError::ConferenceJoinFailure { .. }
            | CoordinatorError::Telephony { .. }
            | CoordinatorError::Presence { .. }
            | CoordinatorError::OperationTimeout { .. }
            | CoordinatorError::ReadinessTimeout { .. } => true,
            CoordinatorError::ConferenceApi { status, .. } => match status {
                // Client errors will not change on retry
                Some(code) => *code >= 500 || *code == 408 || *code == 429,
                None => true,
            },
            CoordinatorError::InitializationFailure { .. }
            | CoordinatorError::DialRejected { .. }
            | CoordinatorError::PermissionDenied { .. }
            | CoordinatorError::Storage { .. }
            | CoordinatorError::Configuration { .. }
            | CoordinatorError::InvalidState { .. }
            | CoordinatorError::Superseded
            | CoordinatorError::Internal { .. } => false,
        }
    }

    /// Short label used in structured logs
    pub fn category(&self) -> &'static str {
        match self {
            CoordinatorError::InitializationFailure { .. } => "initialization",
            CoordinatorError::ReadinessTimeout { .. } => "readiness",
            CoordinatorError::ConferenceJoinFailure { .. } => "conference_join",
            CoordinatorError::DialRejected { .. } => "dial_rejected",
            CoordinatorError::PermissionDenied { .. } => "permission",
            CoordinatorError::Telephony { .. } => "telephony",
            CoordinatorError::ConferenceApi { .. } => "conference_api",
            CoordinatorError::Presence { .. } => "presence",
            CoordinatorError::Storage { .. } => "storage",
            CoordinatorError::Configuration { .. } => "configuration",
            CoordinatorError::InvalidState { .. } => "invalid_state",
            CoordinatorError::OperationTimeout { .. } => "timeout",
            CoordinatorError::Superseded => "superseded",
            CoordinatorError::Internal { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return CoordinatorError::ConferenceApi {
                status: Some(408),
                message: err.to_string(),
            };
        }
        CoordinatorError::ConferenceApi {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Storage { message: format!("invalid JSON: {}", err) }
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        CoordinatorError::Storage { message: err.to_string() }
    }
}

impl From<toml::de::Error> for CoordinatorError {
    fn from(err: toml::de::Error) -> Self {
        CoordinatorError::Configuration {
            field: "toml".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_failures_are_retried_but_permission_is_not() {
        assert!(CoordinatorError::join_failed("busy signal").is_recoverable());
        assert!(!CoordinatorError::PermissionDenied { reason: "blocked".into() }.is_recoverable());
        assert!(!CoordinatorError::dial_rejected("nope").is_recoverable());
    }

    #[test]
    fn conference_api_status_decides_recoverability() {
        let server = CoordinatorError::ConferenceApi { status: Some(503), message: "down".into() };
        let client = CoordinatorError::ConferenceApi { status: Some(403), message: "not owner".into() };
        assert!(server.is_recoverable());
        assert!(!client.is_recoverable());
        assert_eq!(client.to_string(), "Conference API error (403): not owner");
    }

    #[test]
    fn dial_rejection_message_is_verbatim() {
        let err = CoordinatorError::dial_rejected("Cannot dial while in busy");
        assert_eq!(err.to_string(), "Cannot dial while in busy");
        assert_eq!(err.category(), "dial_rejected");
    }
}
