//! Data-pump plugins
//!
//! A plugin owns one local resource (a PTY or a TCP socket). Its write pump
//! moves local bytes to the session channel at a throttled rate while the
//! session channel's dispatcher hands it inbound frames through
//! [`StreamMessageHandler`].

mod port;
mod shell;
mod utf8;

#[cfg(test)]
pub(crate) mod testing;

pub use port::{PortExitCode, PortPlugin, PORT_PACKET_SIZE};
pub use shell::{ShellExitCode, ShellPlugin, SHELL_PACKET_SIZE};
pub use utf8::Utf8Reassembler;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use sa_core::traits::{DataChannel, StreamMessageHandler};
use sa_core::{CancelFlag, CancelState, SendRate, SessionKind};
use sa_protocol::StatusPayload;

/// Why a plugin session ended badly
#[derive(Error, Debug)]
pub enum PluginError {
    /// The PTY or its process could not be started
    #[error("Unable to start shell: {0}")]
    OpenPty(String),

    /// The first dial of the local port failed
    #[error("Unable to connect to {addr}: {source}")]
    OpenPort {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Re-dialing the local port after a read failure failed
    #[error("Unable to read port {addr}: {reason}")]
    ReadPort { addr: String, reason: String },

    /// Local output could not be handed to the session channel
    #[error("Error processing output data: {0}")]
    ProcessData(String),

    /// The session channel refused data or went away
    #[error("Socket I/O error: {0}")]
    IoSocket(String),

    /// The data pump panicked
    #[error("Data pump panicked: {0}")]
    Panic(String),

    /// The data pump task ended abnormally
    #[error("Data pump failed: {0}")]
    Unexpected(String),
}

/// Closed set of exit codes a plugin reports
pub trait PluginExitCode: Copy + fmt::Debug + fmt::Display + Send + 'static {
    /// The pump ran to completion
    const OK: Self;
    /// The session was cancelled (idle timeout, transport loss, session cap)
    const TIMEOUT: Self;
    /// The session was asked to stop
    const NOTIFIED: Self;
    /// The pump failed in an unexpected way
    const UNKNOWN_ERROR: Self;

    /// Wire rendering of the code
    fn as_str(&self) -> &'static str;
}

/// Result of running a plugin
pub type PluginResult<C> = (C, Option<PluginError>);

/// A local resource bridged onto a session channel
#[async_trait]
pub trait Plugin: StreamMessageHandler + 'static {
    /// Exit codes of this plugin
    type ExitCode: PluginExitCode;

    /// Which local resource this plugin bridges
    fn kind(&self) -> SessionKind;

    /// Open the local resource and pump it until it ends or `cancel` fires
    async fn execute(
        self: Arc<Self>,
        channel: Arc<dyn DataChannel>,
        cancel: CancelFlag,
    ) -> PluginResult<Self::ExitCode>;
}

/// Outbound throttle shared by a pump and its input handler
#[derive(Debug)]
pub struct FlowControl {
    packet_size: usize,
    interval_ms: AtomicU64,
}

impl FlowControl {
    /// Throttle for `packet_size`-byte reads at `rate`
    pub fn new(packet_size: usize, rate: SendRate) -> Self {
        let interval = rate.send_interval(packet_size);
        Self {
            packet_size,
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
        }
    }

    /// Pause between two reads
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Largest read handed to the session channel
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Switch to a new rate in bits per second; 0 leaves the rate unchanged
    pub fn set_rate(&self, bps: u32) -> Option<Duration> {
        if bps == 0 {
            return None;
        }
        let interval = SendRate(u64::from(bps)).send_interval(self.packet_size);
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
        Some(interval)
    }

    /// Apply a `Status` payload; malformed payloads are logged and ignored
    pub fn apply_status(&self, channel_id: &str, payload: &[u8]) {
        match StatusPayload::parse(payload) {
            Ok(StatusPayload::SetSendRate(bps)) => {
                if let Some(interval) = self.set_rate(bps) {
                    tracing::info!(
                        "Set send speed, channelId[{}] speed[{}]bps sendInterval[{}]ms",
                        channel_id,
                        bps,
                        interval.as_millis()
                    );
                }
            }
            Ok(StatusPayload::Other(code)) => {
                tracing::debug!("Ignoring status code {} on channel {}", code, channel_id);
            }
            Err(e) => {
                tracing::warn!("Invalid flow control payload on channel {}: {}", channel_id, e);
            }
        }
    }
}

/// Race the pump against the cancel flag
///
/// Cancellation aborts the pump. A panicking pump is reported as
/// `UNKNOWN_ERROR` with the panic message.
pub(crate) async fn race_pump<C: PluginExitCode>(
    name: impl fmt::Display,
    cancel: &CancelFlag,
    mut pump: JoinHandle<PluginResult<C>>,
) -> PluginResult<C> {
    tokio::select! {
        state = cancel.wait() => {
            pump.abort();
            tracing::info!("The {} session was cancelled ({})", name, state);
            match state {
                CancelState::Completed => (C::NOTIFIED, None),
                _ => (C::TIMEOUT, None),
            }
        }
        joined = &mut pump => match joined {
            Ok(result) => {
                tracing::info!("The {} pump finished: {}", name, result.0);
                result
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!("The {} pump panicked: {}", name, message);
                (C::UNKNOWN_ERROR, Some(PluginError::Panic(message)))
            }
            Err(e) => (C::UNKNOWN_ERROR, Some(PluginError::Unexpected(e.to_string()))),
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
