//! Control payloads multiplexed on the stream framing

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Status code asking the agent to change its outbound send rate
pub const STATUS_SET_SEND_RATE: u8 = 7;

/// Terminal dimensions carried by `SetSize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u32,
    /// Number of rows
    pub rows: u32,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }

    /// Parse a `SetSize` payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Columns clamped to what a PTY accepts
    pub fn cols_u16(&self) -> u16 {
        u16::try_from(self.cols).unwrap_or(u16::MAX)
    }

    /// Rows clamped to what a PTY accepts
    pub fn rows_u16(&self) -> u16 {
        u16::try_from(self.rows).unwrap_or(u16::MAX)
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Decoded `Status` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPayload {
    /// New send rate in bits per second; 0 means "leave unchanged"
    SetSendRate(u32),
    /// A status code the agent does not act on
    Other(u8),
}

impl StatusPayload {
    /// Parse a `Status` payload
    ///
    /// Byte 0 is the status code. For code 7 the remaining 1 to 4 bytes are
    /// a big-endian unsigned bits-per-second value.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (&code, rest) = payload
            .split_first()
            .ok_or_else(|| ProtocolError::InvalidPayload("empty status payload".to_string()))?;

        if code != STATUS_SET_SEND_RATE {
            return Ok(Self::Other(code));
        }

        Ok(Self::SetSendRate(be_uint(rest)?))
    }
}

fn be_uint(bytes: &[u8]) -> Result<u32, ProtocolError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(ProtocolError::InvalidPayload(format!(
            "send rate must be 1 to 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}
