//! Agent state management

use std::sync::Arc;

use sa_core::config::AgentConfig;
use sa_core::traits::{HeaderProvider, ProviderChain, ResultReporter, StaticHeaders};

use crate::task::{HttpResultReporter, LogResultReporter, SessionRegistry};

/// Global state shared by every session the agent runs
pub struct AgentState {
    /// Configuration
    pub config: Arc<AgentConfig>,
    /// Running sessions
    pub registry: Arc<SessionRegistry>,
    /// Where finished sessions are reported
    pub reporter: Arc<dyn ResultReporter>,
    /// Extra headers for session channel handshakes
    pub headers: Arc<ProviderChain<Vec<(String, String)>>>,
}

impl AgentState {
    /// Create agent state from a loaded configuration
    ///
    /// Sessions are reported over HTTP when `status_url` is set and only
    /// logged otherwise.
    pub fn new(config: AgentConfig) -> anyhow::Result<Self> {
        let reporter: Arc<dyn ResultReporter> = match &config.status_url {
            Some(url) => Arc::new(HttpResultReporter::new(url.clone(), &config.user_agent)?),
            None => Arc::new(LogResultReporter),
        };
        Ok(Self::with_reporter(config, reporter))
    }

    /// Create agent state with a specific reporter
    pub fn with_reporter(config: AgentConfig, reporter: Arc<dyn ResultReporter>) -> Self {
        let headers = ProviderChain::new().with(StaticHeaders(config.extra_headers.clone()));
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            reporter,
            headers: Arc::new(headers),
        }
    }

    /// Header provider handed to new session channels
    pub fn header_provider(&self) -> Option<Arc<HeaderProvider>> {
        if self.headers.is_empty() {
            return None;
        }
        let provider: Arc<HeaderProvider> = self.headers.clone();
        Some(provider)
    }
}
