//! Tracing setup for the console and other embedding binaries
//!
//! Output goes to stderr so stdout stays free for presence snapshots. The
//! HTTP stack is held at `warn` unless a directive or `RUST_LOG` says
//! otherwise.

use std::str::FromStr;

use tracing::{Level, Span};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

const HTTP_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// `target=level` directives layered over `level`
    pub directives: Vec<String>,
    /// Agent the session span is tagged with
    pub agent_id: String,
}

impl LoggingConfig {
    /// Start from the coordinator config: its `log_level` (default `info`) and agent id
    pub fn for_agent(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        let level = match config.log_level.as_deref() {
            Some(level) => parse_log_level(level)?,
            None => Level::INFO,
        };
        Ok(Self {
            level,
            format: LogFormat::Text,
            directives: HTTP_TARGETS.iter().map(|d| d.to_string()).collect(),
            agent_id: config.agent_id.clone(),
        })
    }

    /// Override the level, typically from a command-line flag
    pub fn with_level(mut self, level: Option<&str>) -> CoordinatorResult<Self> {
        if let Some(level) = level {
            self.level = parse_log_level(level)?;
        }
        Ok(self)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Base level, then `RUST_LOG`, then the configured directives
    pub fn filter(&self) -> CoordinatorResult<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        for raw in &self.directives {
            let directive = Directive::from_str(raw)
                .map_err(|e| CoordinatorError::config("log_directive", format!("{}: {}", raw, e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }

    /// Span that tags every event of one agent session
    pub fn session_span(&self) -> Span {
        tracing::info_span!("agent_session", agent_id = %self.agent_id)
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> CoordinatorResult<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_target(config.level >= Level::DEBUG)
        .with_writer(std::io::stderr);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| CoordinatorError::config("logging", e.to_string()))
}

pub fn parse_log_level(level: &str) -> CoordinatorResult<Level> {
    Level::from_str(level).map_err(|_| CoordinatorError::config("log_level", format!("invalid log level: {}", level)))
}
