//! Core trait definitions

mod channel;
mod provider;
mod pty;
mod reporter;

pub use channel::{ChannelEvent, DataChannel, DuplexChannel, StreamMessageHandler};
pub use provider::{HeaderProvider, Provider, ProviderChain, StaticHeaders};
pub use pty::{PtyBackend, PtyProcess, ShellRequest};
pub use reporter::{ResultReporter, SessionOutcome, SessionStatus};
