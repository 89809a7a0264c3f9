//! PTY processes backed by the portable-pty crate

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use sa_core::config::ShellConfig;
use sa_core::traits::{PtyBackend, PtyProcess, ShellRequest};
use sa_protocol::TerminalSize;

/// Allowed shell paths for security (prevents arbitrary command execution)
const ALLOWED_SHELLS_UNIX: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/fish",
    "/bin/dash",
    "/bin/ksh",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/fish",
    "/usr/bin/dash",
    "/usr/bin/ksh",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/fish",
];

const ALLOWED_SHELLS_WINDOWS: &[&str] = &[
    "cmd.exe",
    "powershell.exe",
    "pwsh.exe",
    "C:\\Windows\\System32\\cmd.exe",
    "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
];

const LANG_VAR: &str = "LANG";
const DEFAULT_LANG: &str = "C.UTF-8";

/// Validate that a default shell path is allowed and exists
fn validate_shell_path(shell: &str) -> Result<String> {
    let allowed = if cfg!(windows) {
        ALLOWED_SHELLS_WINDOWS
    } else {
        ALLOWED_SHELLS_UNIX
    };

    let shell_lower = shell.to_lowercase();
    let is_allowed = allowed.iter().any(|s| s.to_lowercase() == shell_lower);

    if !is_allowed {
        #[cfg(unix)]
        if let Ok(shells) = std::fs::read_to_string("/etc/shells") {
            if shells.lines().any(|line| {
                let line = line.trim();
                !line.starts_with('#') && line == shell
            }) && Path::new(shell).exists()
            {
                return Ok(shell.to_string());
            }
        }

        anyhow::bail!(
            "Shell '{}' is not in the allowed shell list. Allowed shells: {:?}",
            shell,
            allowed
        );
    }

    if !Path::new(shell).exists() && !cfg!(windows) {
        anyhow::bail!("Shell '{}' does not exist", shell);
    }

    Ok(shell.to_string())
}

/// Split a command line into program and arguments
fn split_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut parts = shlex::split(command)
        .with_context(|| format!("Failed to split command line: {}", command))?
        .into_iter();
    let program = parts
        .next()
        .with_context(|| "Command line is empty")?;
    Ok((program, parts.collect()))
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows_u16(),
        cols: size.cols_u16(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawns PTY processes on the native PTY system
#[derive(Debug, Clone)]
pub struct PortablePtyBackend {
    /// Shell used when a request carries no command
    default_shell: Option<String>,
    /// Environment applied to every process
    default_env: Vec<(String, String)>,
}

impl PortablePtyBackend {
    /// Create a backend with the built-in defaults
    pub fn new() -> Self {
        Self::from_config(&ShellConfig::default())
    }

    /// Create a backend from the shell section of the agent config
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            default_shell: config.default_shell.clone(),
            default_env: config.default_env.clone(),
        }
    }

    fn build_command(&self, request: &ShellRequest) -> Result<CommandBuilder> {
        let mut cmd = match &request.command {
            Some(command) => {
                let (program, args) = split_command(command)?;
                tracing::debug!("Running command {} {:?}", program, args);
                let mut cmd = CommandBuilder::new(program);
                cmd.args(args);
                cmd
            }
            None => {
                let requested_shell = self
                    .default_shell
                    .clone()
                    .or_else(|| std::env::var("SHELL").ok())
                    .unwrap_or_else(|| {
                        if cfg!(windows) {
                            "cmd.exe".to_string()
                        } else {
                            "/bin/sh".to_string()
                        }
                    });
                let shell_path = validate_shell_path(&requested_shell)
                    .with_context(|| format!("Invalid shell requested: {}", requested_shell))?;
                tracing::debug!("Using validated shell: {}", shell_path);
                CommandBuilder::new(shell_path)
            }
        };

        if std::env::var_os(LANG_VAR).map_or(true, |lang| lang.is_empty()) {
            cmd.env(LANG_VAR, DEFAULT_LANG);
        }
        for (key, value) in self.default_env.iter().chain(request.env.iter()) {
            cmd.env(key, value);
        }

        Ok(cmd)
    }
}

impl Default for PortablePtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyBackend for PortablePtyBackend {
    type Process = PortablePtyProcess;

    fn spawn(&self, request: &ShellRequest) -> Result<PortablePtyProcess> {
        tracing::info!(
            "Opening PTY with size {}x{}",
            request.size.cols,
            request.size.rows
        );

        let pair = native_pty_system()
            .openpty(pty_size(request.size))
            .with_context(|| "Failed to open PTY")?;

        let cmd = self.build_command(request)?;
        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| "Failed to spawn PTY process")?;
        // Only the child keeps the slave open, so reads see EOF when it exits
        drop(pair.slave);

        tracing::info!("Spawned PTY process with PID: {:?}", child.process_id());

        let reader = pair
            .master
            .try_clone_reader()
            .with_context(|| "Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .with_context(|| "Failed to take PTY writer")?;

        Ok(PortablePtyProcess {
            master: pair.master,
            child,
            writer,
            reader: Some(reader),
        })
    }
}

/// A process running on a portable-pty PTY
pub struct PortablePtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Option<Box<dyn Read + Send>>,
}

impl PtyProcess for PortablePtyProcess {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        self.reader
            .take()
            .with_context(|| "PTY reader already taken")
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .with_context(|| "Failed to write to PTY")?;
        self.writer.flush().with_context(|| "Failed to flush PTY")?;
        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        self.master
            .resize(pty_size(size))
            .with_context(|| "Failed to resize PTY")
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill().with_context(|| "Failed to kill PTY process")
    }

    fn wait(&mut self) -> Result<u32> {
        let status = self
            .child
            .wait()
            .with_context(|| "Failed to wait for PTY process")?;
        Ok(status.exit_code())
    }
}
