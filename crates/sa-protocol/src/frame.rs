//! Frame header encoding/decoding
//!
//! Every frame starts with a fixed 60-byte header, all integers little-endian:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 4    | message_type   |
//! | 4      | 4    | schema_version (text) |
//! | 8      | 32   | session_id (text)     |
//! | 40     | 8    | created_date (u64, ms since epoch) |
//! | 48     | 8    | sequence_number (i64) |
//! | 56     | 4    | payload_length (u32)  |
//! | 60     | n    | payload        |
//!
//! Text fields are space padded on encode and trimmed of NULs and
//! whitespace on decode.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

pub const MESSAGE_TYPE_LENGTH: usize = 4;
pub const SCHEMA_VERSION_LENGTH: usize = 4;
pub const SESSION_ID_LENGTH: usize = 32;
pub const CREATED_DATE_LENGTH: usize = 8;
pub const SEQUENCE_NUMBER_LENGTH: usize = 8;
pub const PAYLOAD_LENGTH_LENGTH: usize = 4;

pub const MESSAGE_TYPE_OFFSET: usize = 0;
pub const SCHEMA_VERSION_OFFSET: usize = MESSAGE_TYPE_OFFSET + MESSAGE_TYPE_LENGTH;
pub const SESSION_ID_OFFSET: usize = SCHEMA_VERSION_OFFSET + SCHEMA_VERSION_LENGTH;
pub const CREATED_DATE_OFFSET: usize = SESSION_ID_OFFSET + SESSION_ID_LENGTH;
pub const SEQUENCE_NUMBER_OFFSET: usize = CREATED_DATE_OFFSET + CREATED_DATE_LENGTH;
pub const PAYLOAD_LENGTH_OFFSET: usize = SEQUENCE_NUMBER_OFFSET + SEQUENCE_NUMBER_LENGTH;
pub const PAYLOAD_OFFSET: usize = PAYLOAD_LENGTH_OFFSET + PAYLOAD_LENGTH_LENGTH;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = PAYLOAD_OFFSET;

/// Maximum payload size (limited by the 32-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Fixed-layout header preceding every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub schema_version: String,
    pub session_id: String,
    pub created_date: u64,
    pub sequence_number: i64,
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header into a byte buffer
    ///
    /// Fails without touching `dst` if a text field is wider than its slot.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        check_width("SchemaVersion", &self.schema_version, SCHEMA_VERSION_LENGTH)?;
        check_width("SessionId", &self.session_id, SESSION_ID_LENGTH)?;

        dst.reserve(HEADER_SIZE);
        dst.put_u32_le(self.message_type.as_u32());
        put_padded(dst, &self.schema_version, SCHEMA_VERSION_LENGTH);
        put_padded(dst, &self.session_id, SESSION_ID_LENGTH);
        dst.put_u64_le(self.created_date);
        dst.put_i64_le(self.sequence_number);
        dst.put_u32_le(self.payload_length);
        Ok(())
    }

    /// Decode a header from the start of `src`
    ///
    /// Every field is read through a bounds check, so a short input yields
    /// `MalformedFrame` naming the first field that does not fit.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let message_type =
            field(src, "MessageType", MESSAGE_TYPE_OFFSET, MESSAGE_TYPE_LENGTH)?.get_u32_le();
        let schema_version = text(field(
            src,
            "SchemaVersion",
            SCHEMA_VERSION_OFFSET,
            SCHEMA_VERSION_LENGTH,
        )?);
        let session_id = text(field(src, "SessionId", SESSION_ID_OFFSET, SESSION_ID_LENGTH)?);
        let created_date =
            field(src, "CreatedDate", CREATED_DATE_OFFSET, CREATED_DATE_LENGTH)?.get_u64_le();
        let sequence_number = field(
            src,
            "SequenceNumber",
            SEQUENCE_NUMBER_OFFSET,
            SEQUENCE_NUMBER_LENGTH,
        )?
        .get_i64_le();
        let payload_length =
            field(src, "PayloadLength", PAYLOAD_LENGTH_OFFSET, PAYLOAD_LENGTH_LENGTH)?.get_u32_le();

        Ok(Self {
            message_type: MessageType::from_u32(message_type),
            schema_version,
            session_id,
            created_date,
            sequence_number,
            payload_length,
        })
    }
}

/// Borrow `len` bytes at `offset`, or report which field overran the frame
fn field<'a>(
    src: &'a [u8],
    name: &'static str,
    offset: usize,
    len: usize,
) -> Result<&'a [u8], ProtocolError> {
    let end = offset.checked_add(len).unwrap_or(usize::MAX);
    src.get(offset..end).ok_or(ProtocolError::MalformedFrame {
        field: name,
        offset,
        end,
        available: src.len(),
    })
}

fn text(raw: &[u8]) -> String {
    let trimmed = trim_nuls(raw);
    String::from_utf8_lossy(trimmed).trim().to_string()
}

fn trim_nuls(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
    &raw[start..end]
}

fn check_width(name: &'static str, value: &str, max: usize) -> Result<(), ProtocolError> {
    if value.len() > max {
        return Err(ProtocolError::FieldTooLong {
            field: name,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn put_padded(dst: &mut BytesMut, value: &str, width: usize) {
    dst.put_slice(value.as_bytes());
    dst.put_bytes(b' ', width - value.len());
}
