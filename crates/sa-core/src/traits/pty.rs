//! PTY backend traits

use std::io::Read;

use sa_protocol::TerminalSize;

/// What to spawn on a new PTY
#[derive(Debug, Clone, Default)]
pub struct ShellRequest {
    /// Command line to run (None = default shell)
    pub command: Option<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Initial terminal size
    pub size: TerminalSize,
}

/// Spawns processes attached to a pseudo terminal
pub trait PtyBackend: Send + Sync {
    /// Process handle produced by this backend
    type Process: PtyProcess;

    /// Spawn a process on a new PTY
    fn spawn(&self, request: &ShellRequest) -> anyhow::Result<Self::Process>;
}

/// A running process attached to a PTY
///
/// Calls may block; async callers run them on a blocking thread.
pub trait PtyProcess: Send + 'static {
    /// Take the output reader (only the first call succeeds)
    fn take_reader(&mut self) -> anyhow::Result<Box<dyn Read + Send>>;

    /// Write to the process's stdin
    fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;

    /// Resize the terminal
    fn resize(&mut self, size: TerminalSize) -> anyhow::Result<()>;

    /// Kill the process
    fn kill(&mut self) -> anyhow::Result<()>;

    /// Wait for the process to exit, returning its exit code
    fn wait(&mut self) -> anyhow::Result<u32>;
}
