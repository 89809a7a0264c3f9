//! Session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;
use crate::frame::SESSION_ID_LENGTH;

/// Identifier of an interactive session (the channel id on the wire)
///
/// It fills the fixed 32-byte `SessionId` slot of every frame, so longer
/// identifiers are rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID, checking it fits the frame header
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.len() > SESSION_ID_LENGTH {
            return Err(ProtocolError::FieldTooLong {
                field: "SessionId",
                len: id.len(),
                max: SESSION_ID_LENGTH,
            });
        }
        Ok(Self(id))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ProtocolError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ProtocolError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        Self::new(id)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("s-42").unwrap();
        assert_eq!(format!("{}", id), "s-42");
    }

    #[test]
    fn test_session_id_length_limit() {
        assert!(SessionId::new("a".repeat(32)).is_ok());
        assert!(SessionId::new("a".repeat(33)).is_err());
        assert!("a".repeat(40).parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_equality() {
        let id1 = SessionId::new("one").unwrap();
        let id2: SessionId = "one".parse().unwrap();
        let id3 = SessionId::new("two").unwrap();

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }
}
