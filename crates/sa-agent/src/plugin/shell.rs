//! Shell plugin: bridges an interactive PTY onto a session channel

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use sa_core::traits::{DataChannel, PtyBackend, PtyProcess, ShellRequest, StreamMessageHandler};
use sa_core::{CancelFlag, SendRate, SessionKind};
use sa_protocol::{AgentMessage, MessageType, TerminalSize};

use super::{race_pump, FlowControl, Plugin, PluginError, PluginExitCode, PluginResult, Utf8Reassembler};

/// Largest chunk read from the PTY per send
pub const SHELL_PACKET_SIZE: usize = 1024;

/// Pause before the first read so the shell can print its prompt
const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(1);

/// How a shell session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExitCode {
    Ok,
    OpenPtyFailed,
    ProcessDataError,
    UnknownError,
    Timeout,
    Notified,
}

impl PluginExitCode for ShellExitCode {
    const OK: Self = ShellExitCode::Ok;
    const TIMEOUT: Self = ShellExitCode::Timeout;
    const NOTIFIED: Self = ShellExitCode::Notified;
    const UNKNOWN_ERROR: Self = ShellExitCode::UnknownError;

    fn as_str(&self) -> &'static str {
        match self {
            ShellExitCode::Ok => "Ok",
            ShellExitCode::OpenPtyFailed => "Open_pty_failed",
            ShellExitCode::ProcessDataError => "Process_data_error",
            ShellExitCode::UnknownError => "Unknown_error",
            ShellExitCode::Timeout => "Timeout",
            ShellExitCode::Notified => "Notified",
        }
    }
}

impl fmt::Display for ShellExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct PtyState<P> {
    process: Option<P>,
    /// Size requested before the PTY existed
    pending_size: Option<TerminalSize>,
}

/// Runs a process on a PTY and pumps its output to the session channel
pub struct ShellPlugin<B: PtyBackend> {
    id: String,
    backend: Arc<B>,
    request: ShellRequest,
    flow: FlowControl,
    startup_delay: Duration,
    pty: Arc<Mutex<PtyState<B::Process>>>,
}

impl<B: PtyBackend + 'static> ShellPlugin<B> {
    /// Create a shell plugin for channel `id`
    pub fn new(id: impl Into<String>, backend: B, request: ShellRequest, rate: SendRate) -> Self {
        let id = id.into();
        let flow = FlowControl::new(SHELL_PACKET_SIZE, rate);
        tracing::info!(
            "Init send speed, channelId[{}] speed[{}] sendInterval[{}]ms",
            id,
            rate,
            flow.interval().as_millis()
        );

        Self {
            id,
            backend: Arc::new(backend),
            request,
            flow,
            startup_delay: DEFAULT_STARTUP_DELAY,
            pty: Arc::new(Mutex::new(PtyState {
                process: None,
                pending_size: None,
            })),
        }
    }

    /// Override the pause before the first read
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Current pause between two sends
    pub fn send_interval(&self) -> Duration {
        self.flow.interval()
    }

    fn lock(&self) -> MutexGuard<'_, PtyState<B::Process>> {
        lock_pty(&self.pty)
    }

    async fn start(&self) -> anyhow::Result<Box<dyn Read + Send>> {
        let backend = Arc::clone(&self.backend);
        let request = self.request.clone();
        let pty = Arc::clone(&self.pty);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Box<dyn Read + Send>> {
            let mut process = backend.spawn(&request)?;
            let reader = process.take_reader()?;

            let mut state = lock_pty(&pty);
            if let Some(size) = state.pending_size.take() {
                if let Err(e) = process.resize(size) {
                    tracing::warn!("Failed to apply initial size to channel {}: {:#}", id, e);
                }
            }
            state.process = Some(process);
            Ok(reader)
        })
        .await
        .context("PTY start task failed")?
    }

    async fn stop(&self) {
        let process = self.lock().process.take();
        let Some(mut process) = process else {
            return;
        };

        let id = self.id.clone();
        let waited = tokio::task::spawn_blocking(move || {
            if let Err(e) = process.kill() {
                tracing::debug!("Kill of PTY process for {} failed: {:#}", id, e);
            }
            process.wait()
        })
        .await;

        match waited {
            Ok(Ok(code)) => tracing::info!("Shell for channel {} exited with code {}", self.id, code),
            Ok(Err(e)) => tracing::warn!("Failed to reap shell for channel {}: {:#}", self.id, e),
            Err(e) => tracing::error!("PTY cleanup task for channel {} failed: {}", self.id, e),
        }
    }

    async fn write_input(&self, payload: bytes::Bytes) -> anyhow::Result<()> {
        let pty = Arc::clone(&self.pty);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = lock_pty(&pty);
            match state.process.as_mut() {
                Some(process) => process.write(&payload),
                None => {
                    tracing::debug!("PTY for channel {} not started, dropping input", id);
                    Ok(())
                }
            }
        })
        .await
        .context("PTY write task failed")?
    }

    async fn resize(&self, size: TerminalSize) -> anyhow::Result<()> {
        let pty = Arc::clone(&self.pty);
        tokio::task::spawn_blocking(move || {
            let mut state = lock_pty(&pty);
            match state.process.as_mut() {
                Some(process) => process.resize(size),
                None => {
                    tracing::debug!("Remembering size {}x{} until the PTY starts", size.cols, size.rows);
                    state.pending_size = Some(size);
                    Ok(())
                }
            }
        })
        .await
        .context("PTY resize task failed")?
    }

    async fn write_pump(
        self: Arc<Self>,
        reader: Box<dyn Read + Send>,
        channel: Arc<dyn DataChannel>,
    ) -> PluginResult<ShellExitCode> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
        let packet_size = self.flow.packet_size();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || read_pty(&id, reader, tx, packet_size));

        tokio::time::sleep(self.startup_delay).await;

        let mut utf8 = Utf8Reassembler::new();
        while let Some(chunk) = rx.recv().await {
            let out = utf8.push(&chunk);
            if let Err(e) = channel.send_stream_data(&out).await {
                tracing::error!("Error processing stdout data for channel {}: {}", self.id, e);
                return (
                    ShellExitCode::ProcessDataError,
                    Some(PluginError::ProcessData(e.to_string())),
                );
            }
            tokio::time::sleep(self.flow.interval()).await;
        }

        let tail = utf8.flush();
        if let Err(e) = channel.send_stream_data(&tail).await {
            return (
                ShellExitCode::ProcessDataError,
                Some(PluginError::ProcessData(e.to_string())),
            );
        }

        (ShellExitCode::Ok, None)
    }
}

fn lock_pty<P>(pty: &Mutex<PtyState<P>>) -> MutexGuard<'_, PtyState<P>> {
    pty.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Blocking PTY reader feeding the pump one chunk at a time
fn read_pty(id: &str, mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>, packet_size: usize) {
    let mut buf = vec![0u8; packet_size];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("PTY reader EOF for channel {}", id);
                break;
            }
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    tracing::debug!("PTY output channel closed for channel {}", id);
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO once the child exits on Linux
                tracing::debug!("Failed to read from pty master for channel {}: {}", id, e);
                break;
            }
        }
    }
}

#[async_trait]
impl<B: PtyBackend + 'static> StreamMessageHandler for ShellPlugin<B> {
    async fn input_stream_message_handler(&self, message: AgentMessage) -> anyhow::Result<()> {
        match message.message_type {
            MessageType::InputStreamData => {
                tracing::trace!("Input for channel {}: {:?}", self.id, message.payload);
                self.write_input(message.payload).await
            }
            MessageType::SetSize => {
                let size = TerminalSize::from_payload(&message.payload)
                    .context("Invalid SetSize payload")?;
                self.resize(size).await
            }
            MessageType::Status => {
                self.flow.apply_status(&self.id, &message.payload);
                Ok(())
            }
            other => {
                tracing::debug!("Shell plugin ignores {:?} frames", other);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<B: PtyBackend + 'static> Plugin for ShellPlugin<B> {
    type ExitCode = ShellExitCode;

    fn kind(&self) -> SessionKind {
        SessionKind::Shell
    }

    async fn execute(
        self: Arc<Self>,
        channel: Arc<dyn DataChannel>,
        cancel: CancelFlag,
    ) -> PluginResult<ShellExitCode> {
        tracing::info!("Starting PTY for channel {}", self.id);
        let reader = match self.start().await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!("Unable to start shell for channel {}: {:#}", self.id, e);
                return (
                    ShellExitCode::OpenPtyFailed,
                    Some(PluginError::OpenPty(format!("{:#}", e))),
                );
            }
        };

        let pump = tokio::spawn(Arc::clone(&self).write_pump(reader, channel));
        let result = race_pump(self.kind(), &cancel, pump).await;
        self.stop().await;
        result
    }
}
