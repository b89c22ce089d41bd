//! Agent desk console
//!
//! Runs the session coordinator against the in-memory backends so the
//! status and dial flows can be exercised without a telephony account.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Instrument};

use agentdesk_agent_core::bridge::{CustomerInfo, RealtimeEvent};
use agentdesk_agent_core::logging::{setup_logging, LogFormat, LoggingConfig};
use agentdesk_agent_core::sim::{SimConferenceApi, SimPresenceStore, SimTelephony};
use agentdesk_agent_core::{
    AgentPresence, AgentStatus, CallContext, CoordinatorConfig, ReadinessMode, SessionCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "agentdesk", author, version, about = "Agent desk session console", long_about = None)]
struct Cli {
    /// Coordinator configuration file (TOML)
    #[arg(short, long, env = "AGENTDESK_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs and snapshots as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration
    Config,

    /// Run a scripted agent session on the simulated backends
    Simulate {
        /// Agent id, overrides the configuration file
        #[arg(long)]
        agent_id: Option<String>,

        /// Status requested right after start
        #[arg(long, default_value = "available")]
        status: String,

        /// Telephony client warm-up in milliseconds
        #[arg(long)]
        warmup_ms: Option<u64>,

        /// Number to dial once the agent is in the conference
        #[arg(long)]
        dial: Option<String>,

        /// Seconds to stay on the call before hanging up
        #[arg(long, default_value = "3")]
        hold_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::from_file(path).with_context(|| format!("loading {}", path))?,
        None => CoordinatorConfig::new("1"),
    };
    if let Command::Simulate {
        agent_id: Some(agent_id), ..
    } = &cli.command
    {
        config.agent_id = agent_id.clone();
    }

    let format = if cli.json { LogFormat::Json } else { LogFormat::Text };
    let logging = LoggingConfig::for_agent(&config)?
        .with_level(cli.log_level.as_deref())?
        .with_format(format);
    setup_logging(&logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting agentdesk");

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Simulate {
            status,
            warmup_ms,
            dial,
            hold_secs,
            ..
        } => {
            if let Some(delay_ms) = warmup_ms {
                config = config.with_readiness(ReadinessMode::Warmup { delay_ms });
            }
            let status: AgentStatus = status.parse()?;
            simulate(config, status, dial, Duration::from_secs(hold_secs), cli.json)
                .instrument(logging.session_span())
                .await
        }
    }
}

async fn simulate(
    config: CoordinatorConfig,
    status: AgentStatus,
    dial: Option<String>,
    hold: Duration,
    json: bool,
) -> Result<()> {
    let coordinator = SessionCoordinator::builder(config)
        .telephony(Arc::new(SimTelephony::new()))
        .conference_api(Arc::new(SimConferenceApi::new()))
        .presence_store(Arc::new(SimPresenceStore::new()))
        .build()?;

    coordinator.start().await?;
    coordinator.set_status(status).await?;
    report(&coordinator.presence(), json)?;

    let mut ready = coordinator.subscribe_ready();
    ready.wait_for(|r| *r).await.context("telephony client went away")?;
    let mut presence = coordinator.subscribe_presence();
    let settled = presence
        .wait_for(|p| !p.is_transitioning)
        .await
        .context("presence channel closed")?
        .clone();
    report(&settled, json)?;

    if let Some(target) = dial {
        match coordinator.dial(&target).await {
            Ok(call) => {
                info!(call_id = %call.id, target = %target, "Dial placed");
                // Stand in for the server bridging the customer leg
                coordinator.events().publish(RealtimeEvent::CustomerRoutedToConference {
                    conference_name: coordinator
                        .conference()
                        .map(|c| c.name)
                        .unwrap_or_default(),
                    customer_call_sid: call.id.clone(),
                    customer_info: CustomerInfo { phone: Some(target) },
                    context: CallContext::new(),
                })?;
                tokio::time::sleep(hold).await;
                report(&coordinator.presence(), json)?;
                if let Some(ended) = coordinator.hangup().await {
                    info!(call_id = %ended.id, talk_secs = ?ended.talk_time_secs(), "Call finished");
                }
            }
            Err(e) => warn!(error = %e, category = e.category(), "Dial failed"),
        }
    }

    report(&coordinator.presence(), json)?;
    coordinator.dispose().await;
    Ok(())
}

fn report(presence: &AgentPresence, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(presence)?);
    } else {
        match &presence.last_error {
            Some(err) => println!("status: {} ({})", presence.status, err),
            None => println!("status: {}", presence.status),
        }
    }
    Ok(())
}
