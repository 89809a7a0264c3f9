//! Registry of running sessions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use sa_core::{CancelFlag, CancelState, SessionError};

/// Running sessions indexed by session id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, CancelFlag>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session; fails if the id is already running
    pub fn insert(&self, id: &str, cancel: CancelFlag) -> Result<(), SessionError> {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(cancel);
                Ok(())
            }
        }
    }

    /// Whether a session with this id is running
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Forget a session
    pub fn remove(&self, id: &str) -> Option<CancelFlag> {
        self.sessions.remove(id).map(|(_, cancel)| cancel)
    }

    /// Ask one session to finish
    pub fn stop(&self, id: &str) -> Result<(), SessionError> {
        let cancel = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if cancel.set(CancelState::Completed) {
            tracing::info!("Stopping session {}", id);
        }
        Ok(())
    }

    /// Ask every running session to finish
    pub fn stop_all(&self) {
        for entry in self.sessions.iter() {
            if entry.value().set(CancelState::Completed) {
                tracing::info!("Stopping session {}", entry.key());
            }
        }
    }

    /// Ids of the running sessions
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of running sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rejects_duplicates() {
        let registry = SessionRegistry::new();
        registry.insert("s-1", CancelFlag::new()).unwrap();
        assert!(matches!(
            registry.insert("s-1", CancelFlag::new()),
            Err(SessionError::AlreadyExists(id)) if id == "s-1"
        ));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("s-1").is_some());
        assert!(registry.is_empty());
        registry.insert("s-1", CancelFlag::new()).unwrap();
    }

    #[test]
    fn test_stop_completes_session() {
        let registry = SessionRegistry::new();
        let cancel = CancelFlag::new();
        registry.insert("s-1", cancel.clone()).unwrap();

        registry.stop("s-1").unwrap();
        assert_eq!(cancel.state(), CancelState::Completed);
        assert!(matches!(registry.stop("missing"), Err(SessionError::NotFound(_))));
    }

    #[test]
    fn test_stop_all_keeps_earlier_state() {
        let registry = SessionRegistry::new();
        let timed_out = CancelFlag::new();
        let running = CancelFlag::new();
        timed_out.set(CancelState::Canceled);
        registry.insert("a", timed_out.clone()).unwrap();
        registry.insert("b", running.clone()).unwrap();

        registry.stop_all();
        assert_eq!(timed_out.state(), CancelState::Canceled);
        assert_eq!(running.state(), CancelState::Completed);

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
