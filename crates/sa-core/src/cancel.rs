//! Cooperative cancellation shared by every loop of a session
//!
//! A [`CancelFlag`] starts out `Running` and moves exactly once to a
//! terminal state: `Canceled` (idle timeout, reconnect exhaustion, session
//! cap) or `Completed` (the agent was told to stop the session). Every
//! clone observes the same state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// State of a session's cancellation flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// Session is still running
    Running,
    /// Session was cancelled (timeout or transport loss)
    Canceled,
    /// Session was asked to finish
    Completed,
}

impl CancelState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CancelState::Running)
    }
}

impl fmt::Display for CancelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelState::Running => write!(f, "running"),
            CancelState::Canceled => write!(f, "canceled"),
            CancelState::Completed => write!(f, "completed"),
        }
    }
}

/// Clonable tri-state cancellation signal
#[derive(Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<CancelState>>,
}

impl CancelFlag {
    /// Create a flag in the `Running` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CancelState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn state(&self) -> CancelState {
        *self.tx.borrow()
    }

    /// Whether a terminal state has been reached
    pub fn is_set(&self) -> bool {
        self.state().is_terminal()
    }

    /// Move to a terminal state
    ///
    /// Only the first transition out of `Running` takes effect; it returns
    /// `true`. Later calls (and `set(Running)`) are no-ops returning `false`.
    pub fn set(&self, state: CancelState) -> bool {
        if !state.is_terminal() {
            return false;
        }
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = state;
            true
        })
    }

    /// Wait until the flag reaches a terminal state and return it
    pub async fn wait(&self) -> CancelState {
        let mut rx = self.tx.subscribe();
        let seen = rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        // The sender lives as long as `self`; report the last value seen if
        // the wait still fails.
        seen.unwrap_or_else(|_| *rx.borrow())
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFlag")
            .field("state", &self.state())
            .finish()
    }
}
