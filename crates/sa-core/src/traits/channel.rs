//! Channel traits

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChannelError;
use sa_protocol::AgentMessage;

/// Something observed by a duplex channel's read loop
///
/// Events arrive in read order. `Error` is sent at most once per `open`
/// and is always the last event of that connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// One inbound data frame
    Message(Bytes),
    /// The read loop gave up on the connection
    Error(ChannelError),
}

/// Raw bidirectional connection to the session service
#[async_trait]
pub trait DuplexChannel: Send + Sync + 'static {
    /// Dial the remote endpoint and start the background loops
    async fn open(&self) -> Result<(), ChannelError>;

    /// Stop the background loops and close the connection
    ///
    /// Closing an already closed channel is a no-op.
    async fn close(&self) -> Result<(), ChannelError>;

    /// Write one binary frame
    async fn send_message(&self, data: Bytes) -> Result<(), ChannelError>;

    /// Whether the connection is currently open
    fn is_active(&self) -> bool;
}

/// What a plugin needs from its session channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Frame and send local output to the remote peer
    async fn send_stream_data(&self, data: &[u8]) -> Result<(), ChannelError>;

    /// Whether the underlying transport is open
    fn is_active(&self) -> bool;

    /// Identifier of the channel (the session id)
    fn channel_id(&self) -> &str;
}

/// Receiver of decoded inbound frames (implemented by plugins)
#[async_trait]
pub trait StreamMessageHandler: Send + Sync {
    /// Handle one InputStreamData, SetSize or Status frame
    async fn input_stream_message_handler(&self, message: AgentMessage) -> anyhow::Result<()>;
}
