//! Core error types for session-agent

use std::path::PathBuf;
use thiserror::Error;

/// Transport errors on a duplex channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Dialing the remote endpoint failed
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The channel is not open
    #[error("Can't send message: Connection is closed.")]
    Closed,

    /// Refused to send an empty frame
    #[error("Can't send message: Empty input.")]
    EmptyInput,

    /// Writing a frame failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the connection failed repeatedly
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Closing the connection failed
    #[error("Close failed: {0}")]
    Close(String),

    /// A frame could not be built
    #[error("Framing failed: {0}")]
    Framing(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// A session with this id is already running
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session channel could not be created
    #[error("Failed to initialize session channel: {0}")]
    InitChannel(String),

    /// The session channel could not be opened
    #[error("Failed to open session channel: {0}")]
    OpenChannel(#[source] ChannelError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
