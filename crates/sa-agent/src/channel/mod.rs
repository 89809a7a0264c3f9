//! Transport to the session service
//!
//! [`WebSocketChannel`] is the raw duplex connection; [`SessionChannel`]
//! adds framing, sequencing, reconnect and the idle watchdog on top.

mod session;
mod websocket;

pub use session::{SessionChannel, SessionChannelConfig};
pub use websocket::{WebSocketChannel, WebSocketConfig};
