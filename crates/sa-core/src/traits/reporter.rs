//! Session result reporting

use async_trait::async_trait;
use std::fmt;

/// Final status of a session as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Success,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Success => write!(f, "Success"),
            SessionStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Channel (session) id
    pub channel_id: String,
    /// Success or failure
    pub status: SessionStatus,
    /// Exit code as rendered on the wire, e.g. `Open_pty_failed`
    pub error_code: String,
}

impl SessionOutcome {
    /// Build an outcome from an exit code; only `Ok` counts as success
    pub fn new(channel_id: impl Into<String>, error_code: impl Into<String>) -> Self {
        let error_code = error_code.into();
        let status = if error_code == "Ok" {
            SessionStatus::Success
        } else {
            SessionStatus::Failed
        };
        Self {
            channel_id: channel_id.into(),
            status,
            error_code,
        }
    }
}

/// Sink for session outcomes
#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Report one finished session
    async fn report(&self, outcome: &SessionOutcome) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status() {
        let ok = SessionOutcome::new("abc", "Ok");
        assert_eq!(ok.status, SessionStatus::Success);

        let failed = SessionOutcome::new("abc", "Open_pty_failed");
        assert_eq!(failed.status, SessionStatus::Failed);
        assert_eq!(failed.status.to_string(), "Failed");
    }
}
