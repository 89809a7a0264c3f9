//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::serde_utils::{duration_millis, duration_secs};
use crate::types::{SendRate, DEFAULT_SEND_SPEED_KBPS};

/// Configuration for the session agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `User-Agent` sent when dialing session channels
    pub user_agent: String,

    /// Extra headers sent when dialing session channels
    pub extra_headers: Vec<(String, String)>,

    /// Endpoint that receives session results (none = log only)
    pub status_url: Option<String>,

    /// Duplex channel settings
    pub channel: ChannelConfig,

    /// Session channel settings
    pub session: SessionConfig,

    /// Backoff used to re-open a dropped session channel
    pub reconnect: BackoffConfig,

    /// Outbound flow control
    pub flow: FlowConfig,

    /// Shell plugin defaults
    pub shell: ShellConfig,

    /// Port plugin defaults
    pub port: PortConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("session-agent/{}", env!("CARGO_PKG_VERSION")),
            extra_headers: vec![],
            status_url: None,
            channel: ChannelConfig::default(),
            session: SessionConfig::default(),
            reconnect: BackoffConfig::default(),
            flow: FlowConfig::default(),
            shell: ShellConfig::default(),
            port: PortConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Check cross-field constraints after loading
    pub fn validate(&self) -> Result<(), String> {
        self.reconnect.validate()?;
        if self.channel.ping_interval.is_zero() {
            return Err("channel.ping_interval must be positive".to_string());
        }
        if self.channel.read_error_limit == 0 {
            return Err("channel.read_error_limit must be at least 1".to_string());
        }
        if self.session.idle_timeout.is_zero() {
            return Err("session.idle_timeout must be positive".to_string());
        }
        if self.session.schema_version.len() > 4 {
            return Err("session.schema_version must fit in 4 bytes".to_string());
        }
        Ok(())
    }
}

/// Duplex (WebSocket) channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Interval between keepalive pings
    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,

    /// Consecutive read failures before the channel reports an error
    pub read_error_limit: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            read_error_limit: 10,
        }
    }
}

/// Session channel and session task settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cancel a session after this long without inbound frames
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Schema version stamped on outbound frames
    pub schema_version: String,

    /// Upper bound on a whole session
    #[serde(with = "duration_secs")]
    pub max_duration: Duration,

    /// Delay between opening the channel and starting the plugin
    #[serde(with = "duration_millis")]
    pub start_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            schema_version: sa_protocol::SCHEMA_VERSION.to_string(),
            max_duration: Duration::from_secs(3 * 3600),
            start_delay: Duration::from_secs(1),
        }
    }
}

/// Outbound flow control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Send rate used until the remote negotiates one, in kbit/s
    pub default_send_speed_kbps: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_send_speed_kbps: DEFAULT_SEND_SPEED_KBPS,
        }
    }
}

impl FlowConfig {
    /// Default send rate
    pub fn default_rate(&self) -> SendRate {
        SendRate::from_kbps(self.default_send_speed_kbps)
    }
}

/// Shell plugin defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell to spawn when the session carries no command
    pub default_shell: Option<String>,

    /// Environment variables for every shell
    pub default_env: Vec<(String, String)>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
        }
    }
}

/// Port plugin defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Host dialed when the session names none
    pub default_host: String,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            default_host: "localhost".to_string(),
        }
    }
}
