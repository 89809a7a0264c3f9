//! Session tasks
//!
//! A [`SessionTask`] runs one plugin over one session channel from start to
//! finish: register the session, dial the channel, run the plugin under the
//! session cap, report the outcome and clean up.

mod registry;
mod report;

pub use registry::SessionRegistry;
pub use report::{HttpResultReporter, LogResultReporter};

use std::sync::Arc;

use sa_core::config::AgentConfig;
use sa_core::time::{current_time_millis, elapsed_since};
use sa_core::traits::{HeaderProvider, ResultReporter, SessionOutcome, StreamMessageHandler};
use sa_core::{CancelFlag, CancelState, SessionError};
use sa_protocol::SessionId;

use crate::channel::SessionChannel;
use crate::plugin::{Plugin, PluginExitCode};
use crate::state::AgentState;

/// Another session with the same id is already running
pub const SESSION_ID_DUPLICATE: &str = "Session_id_duplicate";
/// The session channel could not be created
pub const INIT_CHANNEL_FAILED: &str = "Init_channel_failed";
/// The session channel could not be opened
pub const OPEN_CHANNEL_FAILED: &str = "Open_channel_failed";

/// Session endpoint for `id`
///
/// A URL that already names a channel is used verbatim; otherwise
/// `channelId` is appended to the query string.
pub fn build_channel_url(base: &str, id: &str) -> String {
    if base.contains("channelId=") {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}channelId={}", base, separator, id)
}

/// One session from registration to report
pub struct SessionTask<P: Plugin> {
    id: String,
    url: String,
    plugin: Arc<P>,
    cancel: CancelFlag,
    config: Arc<AgentConfig>,
    headers: Option<Arc<HeaderProvider>>,
    registry: Arc<SessionRegistry>,
    reporter: Arc<dyn ResultReporter>,
}

impl<P: Plugin> SessionTask<P> {
    pub fn new(id: impl Into<String>, url: impl Into<String>, plugin: P, state: &AgentState) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            plugin: Arc::new(plugin),
            cancel: CancelFlag::new(),
            config: state.config.clone(),
            headers: state.header_provider(),
            registry: state.registry.clone(),
            reporter: state.reporter.clone(),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the session to completion and report its outcome
    pub async fn run(self) -> SessionOutcome {
        tracing::info!("Running {} session {}", self.plugin.kind(), self.id);

        let code = self.start().await;
        let outcome = SessionOutcome::new(&self.id, code);
        if let Err(e) = self.reporter.report(&outcome).await {
            tracing::warn!("Failed to report session {}: {:#}", self.id, e);
        }
        outcome
    }

    /// Register the session and drive it; returns the exit code
    async fn start(&self) -> &'static str {
        // the id fills a fixed-width frame field
        if let Err(e) = SessionId::new(self.id.as_str()) {
            tracing::error!("Invalid session id {:?}: {}", self.id, e);
            return INIT_CHANNEL_FAILED;
        }

        match self.registry.insert(&self.id, self.cancel.clone()) {
            Ok(()) => {
                let code = self.drive().await;
                self.registry.remove(&self.id);
                code
            }
            Err(e @ SessionError::AlreadyExists(_)) => {
                tracing::error!("Refusing to start session: {}", e);
                SESSION_ID_DUPLICATE
            }
            Err(e) => {
                tracing::error!("Unable to register session {}: {}", self.id, e);
                INIT_CHANNEL_FAILED
            }
        }
    }

    /// Dial the channel and run the plugin; returns the exit code
    async fn drive(&self) -> &'static str {
        let url = build_channel_url(&self.url, &self.id);
        tracing::info!("Session {} channel url: {}", self.id, url);

        let handler: Arc<dyn StreamMessageHandler> = self.plugin.clone();
        let channel = match SessionChannel::websocket(
            &self.id,
            url,
            &self.config,
            self.headers.clone(),
            handler,
            self.cancel.clone(),
        ) {
            Ok(channel) => channel,
            Err(e) => {
                let e = SessionError::InitChannel(e.to_string());
                tracing::error!("Session {}: {}", self.id, e);
                return INIT_CHANNEL_FAILED;
            }
        };

        if let Err(e) = channel.open().await {
            let e = SessionError::OpenChannel(e);
            tracing::error!("Session {}: {}", self.id, e);
            return OPEN_CHANNEL_FAILED;
        }

        tokio::time::sleep(self.config.session.start_delay).await;

        let max_duration = self.config.session.max_duration;
        let cap = {
            let cancel = self.cancel.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(max_duration).await;
                if cancel.set(CancelState::Canceled) {
                    tracing::warn!("Session {} reached its {:?} limit", id, max_duration);
                }
            })
        };

        let started = current_time_millis();
        let (code, error) = self
            .plugin
            .clone()
            .execute(channel.clone(), self.cancel.clone())
            .await;
        cap.abort();

        let elapsed = elapsed_since(started);
        match error {
            Some(e) => tracing::warn!("Session {} ended with {} after {:?}: {}", self.id, code, elapsed, e),
            None => tracing::info!("Session {} ended with {} after {:?}", self.id, code, elapsed),
        }

        if let Err(e) = channel.close().await {
            tracing::debug!("Closing session {} channel: {}", self.id, e);
        }
        code.as_str()
    }
}
