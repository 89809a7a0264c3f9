//! Agent messages carried on a session channel
//!
//! An [`AgentMessage`] is one frame: the fixed header described in
//! [`crate::frame`] followed by an opaque payload. The agent sends
//! `OutputStreamData`; the remote side sends `InputStreamData`, `SetSize`
//! and `Status` (flow control).
//!
//! # Message Flow
//!
//! 1. The agent opens the channel and starts the local resource
//! 2. `InputStreamData` carries keystrokes / socket bytes to the agent
//! 3. `OutputStreamData` carries PTY / socket output back, one sequence
//!    number per frame starting at 0
//! 4. `SetSize` resizes the PTY, `Status` code 7 renegotiates the send rate

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Schema version stamped on outbound frames.
pub const SCHEMA_VERSION: &str = "1.01";

/// Message type identifier
///
/// Value 4 is reserved. Any value the agent does not know decodes to
/// [`MessageType::Unknown`] so the dispatcher can log and drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Bytes from the remote side for the local resource
    InputStreamData,
    /// Bytes from the local resource for the remote side
    OutputStreamData,
    /// Terminal resize (JSON `{"cols":..,"rows":..}`)
    SetSize,
    /// Remote asks to close the data channel
    CloseChannel,
    /// Status / flow-control message
    Status,
    /// Anything else
    Unknown(u32),
}

impl MessageType {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::InputStreamData => 0,
            Self::OutputStreamData => 1,
            Self::SetSize => 2,
            Self::CloseChannel => 3,
            Self::Status => 5,
            Self::Unknown(value) => *value,
        }
    }

    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::InputStreamData,
            1 => Self::OutputStreamData,
            2 => Self::SetSize,
            3 => Self::CloseChannel,
            5 => Self::Status,
            other => Self::Unknown(other),
        }
    }
}

/// One frame on the session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    pub message_type: MessageType,
    pub schema_version: String,
    pub session_id: String,
    /// Milliseconds since the Unix epoch; zero means "missing"
    pub created_date: u64,
    pub sequence_number: i64,
    /// Length as declared on the wire; recomputed by [`AgentMessage::serialize`]
    pub payload_length: u32,
    pub payload: Bytes,
}

impl AgentMessage {
    /// Build an outbound stream data frame
    pub fn output_stream(
        schema_version: impl Into<String>,
        session_id: impl Into<String>,
        sequence_number: i64,
        created_date: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            message_type: MessageType::OutputStreamData,
            schema_version: schema_version.into(),
            session_id: session_id.into(),
            created_date,
            sequence_number,
            payload_length: payload.len() as u32,
            payload,
        }
    }

    /// Serialize into a complete frame
    ///
    /// `payload_length` is always taken from the payload itself; a stale
    /// declared length is corrected rather than rejected.
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let payload_length = self.payload.len() as u32;
        if payload_length != self.payload_length {
            tracing::debug!(
                "Payload length will be adjusted: {} -> {}",
                self.payload_length,
                payload_length
            );
        }

        let header = FrameHeader {
            message_type: self.message_type,
            schema_version: self.schema_version.clone(),
            session_id: self.session_id.clone(),
            created_date: self.created_date,
            sequence_number: self.sequence_number,
            payload_length,
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        header.encode(&mut buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Deserialize a complete frame
    ///
    /// The declared payload length must fit in what was received; the
    /// payload is everything after the header.
    pub fn deserialize(input: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::decode(input)?;

        let available = input.len() - HEADER_SIZE;
        let declared = header.payload_length as usize;
        if declared > available {
            return Err(ProtocolError::MalformedFrame {
                field: "Payload",
                offset: HEADER_SIZE,
                end: HEADER_SIZE.saturating_add(declared),
                available: input.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&input[HEADER_SIZE..]);
        Ok(Self {
            message_type: header.message_type,
            schema_version: header.schema_version,
            session_id: header.session_id,
            created_date: header.created_date,
            sequence_number: header.sequence_number,
            payload_length: payload.len() as u32,
            payload,
        })
    }

    /// Check the fields a decoded frame must carry
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.created_date == 0 {
            return Err(ProtocolError::MissingCreatedDate);
        }
        Ok(())
    }
}
