//! sa-core: Core abstractions and configuration for session-agent
//!
//! This crate provides the shared configuration, error taxonomy,
//! cancellation flag and collaborator traits used by the agent runtime.

pub mod cancel;
pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use cancel::{CancelFlag, CancelState};
pub use error::{ChannelError, ConfigError, SessionError};
pub use types::{SendRate, SessionKind};
