//! sa-protocol: Wire format for session-agent interactive channels
//!
//! This crate defines the fixed-header binary frame exchanged between the
//! agent and the session service over a WebSocket, plus the small control
//! payloads (terminal size, flow control) carried inside it.

pub mod error;
pub mod frame;
pub mod message;
pub mod payload;
pub mod session;

pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{AgentMessage, MessageType, SCHEMA_VERSION};
pub use payload::{StatusPayload, TerminalSize, STATUS_SET_SEND_RATE};
pub use session::SessionId;
