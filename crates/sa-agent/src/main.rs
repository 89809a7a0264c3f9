//! Session agent
//!
//! Runs one interactive session: dials the session service over a
//! WebSocket and bridges either a shell or a local TCP port onto it until
//! the session ends, then reports the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sa_agent::plugin::{Plugin, PortPlugin, ShellPlugin};
use sa_agent::pty::PortablePtyBackend;
use sa_agent::task::{SessionRegistry, SessionTask};
use sa_agent::AgentState;
use sa_core::config;
use sa_core::traits::{SessionOutcome, SessionStatus, ShellRequest};
use sa_core::SendRate;

#[derive(Parser)]
#[command(name = "session-agent")]
#[command(about = "Bridges a shell or a local port onto a remote session channel")]
#[command(version)]
struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive shell session
    Shell {
        /// Session (channel) id
        #[arg(long)]
        session_id: String,
        /// Session service WebSocket URL
        #[arg(long)]
        url: String,
        /// Command to run instead of the default shell
        #[arg(long)]
        command: Option<String>,
        /// Send rate limit in bits per second
        #[arg(long)]
        flow_limit: Option<u64>,
    },

    /// Forward a local TCP port
    Port {
        /// Session (channel) id
        #[arg(long)]
        session_id: String,
        /// Session service WebSocket URL
        #[arg(long)]
        url: String,
        /// Host to connect to (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,
        /// Port to connect to
        #[arg(long)]
        port: u16,
        /// Send rate limit in bits per second
        #[arg(long)]
        flow_limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Session agent {} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let agent_config = config::load_agent_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let state = AgentState::new(agent_config).context("Failed to initialize agent")?;
    let default_rate = state.config.flow.default_rate();
    let rate = |limit: Option<u64>| match limit {
        Some(bps) if bps > 0 => SendRate(bps),
        _ => default_rate,
    };

    spawn_signal_handler(state.registry.clone());

    let outcome = match args.command {
        Command::Shell {
            session_id,
            url,
            command,
            flow_limit,
        } => {
            let backend = PortablePtyBackend::from_config(&state.config.shell);
            let request = ShellRequest {
                command,
                ..Default::default()
            };
            let plugin = ShellPlugin::new(&session_id, backend, request, rate(flow_limit));
            run_session(&state, session_id, url, plugin).await
        }
        Command::Port {
            session_id,
            url,
            host,
            port,
            flow_limit,
        } => {
            let host = host.unwrap_or_else(|| state.config.port.default_host.clone());
            let plugin = PortPlugin::new(&session_id, &host, port, rate(flow_limit));
            run_session(&state, session_id, url, plugin).await
        }
    };

    tracing::info!(
        "Session {} finished: {} ({})",
        outcome.channel_id,
        outcome.status,
        outcome.error_code
    );
    if outcome.status == SessionStatus::Failed {
        anyhow::bail!("Session {} failed: {}", outcome.channel_id, outcome.error_code);
    }
    Ok(())
}

async fn run_session<P: Plugin>(
    state: &AgentState,
    session_id: String,
    url: String,
    plugin: P,
) -> SessionOutcome {
    SessionTask::new(session_id, url, plugin, state).run().await
}

/// Stop every running session on Ctrl-C
fn spawn_signal_handler(registry: Arc<SessionRegistry>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, stopping {} session(s)", registry.len());
                registry.stop_all();
            }
            Err(e) => tracing::warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
}
