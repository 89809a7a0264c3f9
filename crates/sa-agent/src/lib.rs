//! sa-agent: Session agent
//!
//! The agent dials a session service over a WebSocket and bridges one
//! local resource per session onto it: an interactive shell on a PTY, or a
//! TCP connection to a local port. Output is framed, sequenced and
//! throttled; input is decoded and routed back to the resource.

pub mod channel;
pub mod plugin;
pub mod pty;
pub mod retry;
pub mod state;
pub mod task;

pub use state::AgentState;
