//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding agent messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A fixed-offset read or write fell outside the frame
    #[error("Malformed frame: {field} needs bytes {offset}..{end}, frame has {available}")]
    MalformedFrame {
        field: &'static str,
        offset: usize,
        end: usize,
        available: usize,
    },

    /// A fixed-width text field does not fit its slot
    #[error("Field {field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Payload does not fit the 32-bit length field
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Message decoded but carries no creation timestamp
    #[error("CreatedDate is missing")]
    MissingCreatedDate,

    /// Payload of a control message could not be interpreted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON payload error
    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),
}
