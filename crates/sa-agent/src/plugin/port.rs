//! Port plugin: forwards a local TCP port over a session channel

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

use sa_core::traits::{DataChannel, StreamMessageHandler};
use sa_core::{CancelFlag, SendRate, SessionKind};
use sa_protocol::{AgentMessage, MessageType};

use super::{race_pump, FlowControl, Plugin, PluginError, PluginExitCode, PluginResult};

/// Largest chunk read from the socket per send
pub const PORT_PACKET_SIZE: usize = 2048;

/// Poll period while the session channel is down
const INACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a port session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortExitCode {
    Ok,
    OpenPortFailed,
    ReadPortFailed,
    IoSocketError,
    UnknownError,
    Timeout,
    Notified,
}

impl PluginExitCode for PortExitCode {
    const OK: Self = PortExitCode::Ok;
    const TIMEOUT: Self = PortExitCode::Timeout;
    const NOTIFIED: Self = PortExitCode::Notified;
    const UNKNOWN_ERROR: Self = PortExitCode::UnknownError;

    fn as_str(&self) -> &'static str {
        match self {
            PortExitCode::Ok => "Ok",
            PortExitCode::OpenPortFailed => "Open_port_failed",
            PortExitCode::ReadPortFailed => "Read_port_failed",
            PortExitCode::IoSocketError => "IO_socket_error",
            PortExitCode::UnknownError => "Unknown_error",
            PortExitCode::Timeout => "Timeout",
            PortExitCode::Notified => "Notified",
        }
    }
}

impl fmt::Display for PortExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of the forwarded socket
enum PortState {
    /// Not dialed yet, or torn down
    Idle,
    Connected,
    /// The pump lost the socket and waits for the next inbound frame to redial
    AwaitingReconnect(oneshot::Sender<io::Result<OwnedReadHalf>>),
}

/// Bridges one TCP connection to a session channel
pub struct PortPlugin {
    id: String,
    addr: String,
    flow: FlowControl,
    state: Mutex<PortState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl PortPlugin {
    /// Create a port plugin forwarding `host:port` for channel `id`
    pub fn new(id: impl Into<String>, host: &str, port: u16, rate: SendRate) -> Self {
        let id = id.into();
        let host = if host.is_empty() { "localhost" } else { host };
        let flow = FlowControl::new(PORT_PACKET_SIZE, rate);
        tracing::info!(
            "Init send speed, channelId[{}] speed[{}] sendInterval[{}]ms",
            id,
            rate,
            flow.interval().as_millis()
        );

        Self {
            id,
            addr: format!("{}:{}", host, port),
            flow,
            state: Mutex::new(PortState::Idle),
            writer: Mutex::new(None),
        }
    }

    /// Address being forwarded
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current pause between two sends
    pub fn send_interval(&self) -> Duration {
        self.flow.interval()
    }

    async fn connect(&self) -> io::Result<OwnedReadHalf> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        Ok(reader)
    }

    /// Redial if the pump is waiting for it; hand the result to the pump
    async fn resume_if_parked(&self) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, PortState::Connected) {
            PortState::Idle => {
                *state = PortState::Idle;
                Ok(false)
            }
            PortState::Connected => Ok(true),
            PortState::AwaitingReconnect(reply) => {
                tracing::info!("Reconnecting channel {} to {}", self.id, self.addr);
                match self.connect().await {
                    Ok(reader) => {
                        let _ = reply.send(Ok(reader));
                        Ok(true)
                    }
                    Err(e) => {
                        *state = PortState::Idle;
                        let message = e.to_string();
                        let _ = reply.send(Err(e));
                        Err(anyhow::anyhow!("Failed to reconnect to {}: {}", self.addr, message))
                    }
                }
            }
        }
    }

    /// Drop the socket and park until the handler redials
    async fn await_reconnect(&self) -> io::Result<OwnedReadHalf> {
        let (tx, rx) = oneshot::channel();
        {
            // frames must not see Connected once the writer is gone
            let mut state = self.state.lock().await;
            *state = PortState::AwaitingReconnect(tx);
            *self.writer.lock().await = None;
        }

        tracing::debug!("Channel {} waiting for reconnection to {}", self.id, self.addr);
        rx.await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "reconnect abandoned")))
    }

    async fn stop(&self) {
        *self.state.lock().await = PortState::Idle;
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write_pump(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        channel: Arc<dyn DataChannel>,
    ) -> PluginResult<PortExitCode> {
        let mut packet = vec![0u8; self.flow.packet_size()];

        loop {
            if !channel.is_active() {
                tokio::time::sleep(INACTIVE_POLL_INTERVAL).await;
                continue;
            }

            let read = match reader.read(&mut packet).await {
                Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")),
                other => other,
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::info!("Encountered {} while reading {}, waiting to reconnect", e, self.addr);
                    match self.await_reconnect().await {
                        Ok(new_reader) => {
                            tracing::info!("Reconnection to port is successful, resume reading from port.");
                            reader = new_reader;
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!("Unable to read port {}: {}", self.addr, e);
                            return (
                                PortExitCode::ReadPortFailed,
                                Some(PluginError::ReadPort {
                                    addr: self.addr.clone(),
                                    reason: e.to_string(),
                                }),
                            );
                        }
                    }
                }
            };

            tracing::trace!("Read {} bytes from {}", n, self.addr);
            if let Err(e) = channel.send_stream_data(&packet[..n]).await {
                tracing::error!("Unable to send stream data message: {}", e);
                return (PortExitCode::IoSocketError, Some(PluginError::IoSocket(e.to_string())));
            }

            tokio::time::sleep(self.flow.interval()).await;
        }
    }
}

#[async_trait]
impl StreamMessageHandler for PortPlugin {
    async fn input_stream_message_handler(&self, message: AgentMessage) -> anyhow::Result<()> {
        if !self.resume_if_parked().await? {
            tracing::info!("Connection to {} not ready, dropping frame", self.addr);
            return Ok(());
        }

        match message.message_type {
            MessageType::InputStreamData => {
                let mut writer = self.writer.lock().await;
                if let Some(writer) = writer.as_mut() {
                    writer
                        .write_all(&message.payload)
                        .await
                        .with_context(|| format!("Unable to write to {}", self.addr))?;
                    tracing::trace!("Wrote {} bytes to {}", message.payload.len(), self.addr);
                }
            }
            MessageType::Status => self.flow.apply_status(&self.id, &message.payload),
            other => tracing::debug!("Port plugin ignores {:?} frames", other),
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for PortPlugin {
    type ExitCode = PortExitCode;

    fn kind(&self) -> SessionKind {
        SessionKind::Port
    }

    async fn execute(
        self: Arc<Self>,
        channel: Arc<dyn DataChannel>,
        cancel: CancelFlag,
    ) -> PluginResult<PortExitCode> {
        tracing::info!("Connecting channel {} to {}", self.id, self.addr);
        // inbound frames wait on the state lock until the dial settles
        let mut state = self.state.lock().await;
        let reader = match self.connect().await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Unable to start port {}: {}", self.addr, e);
                return (
                    PortExitCode::OpenPortFailed,
                    Some(PluginError::OpenPort {
                        addr: self.addr.clone(),
                        source: e,
                    }),
                );
            }
        };
        *state = PortState::Connected;
        drop(state);

        let pump = tokio::spawn(Arc::clone(&self).write_pump(reader, channel));
        let result = race_pump(self.kind(), &cancel, pump).await;
        self.stop().await;
        result
    }
}
