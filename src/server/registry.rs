//! Registry of live sessions, used to route CancelRequests

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Process id and secret key handed to the client in BackendKeyData
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    /// Process id (unique per server)
    pub process_id: i32,
    /// Random secret the client must echo in a CancelRequest
    pub secret_key: i32,
}

/// Active sessions by process id.
///
/// A CancelRequest arrives on a fresh connection and only carries the target's
/// key pair; this map is the only state shared between sessions.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    sessions: Mutex<HashMap<i32, SessionHandle>>,
}

#[derive(Debug)]
struct SessionHandle {
    secret_key: i32,
    // Token of the statement in flight, if any
    current_query: Option<CancellationToken>,
}

impl CancelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session once it has authenticated
    pub fn register(&self, key: BackendKey) {
        self.sessions.lock().insert(
            key.process_id,
            SessionHandle {
                secret_key: key.secret_key,
                current_query: None,
            },
        );
    }

    /// Forget a session when it ends
    pub fn unregister(&self, process_id: i32) {
        self.sessions.lock().remove(&process_id);
    }

    /// Start a statement and return the token a CancelRequest will trip
    pub fn begin_query(&self, process_id: i32) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(handle) = self.sessions.lock().get_mut(&process_id) {
            handle.current_query = Some(token.clone());
        }
        token
    }

    /// Finish the current statement
    pub fn end_query(&self, process_id: i32) {
        if let Some(handle) = self.sessions.lock().get_mut(&process_id) {
            handle.current_query = None;
        }
    }

    /// Cancel the statement running in the session identified by `key`.
    ///
    /// Returns whether a statement was cancelled. A wrong secret, an unknown
    /// process id and an idle session are all silently ignored.
    pub fn cancel(&self, key: BackendKey) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&key.process_id) {
            Some(handle) if handle.secret_key == key.secret_key => match &handle.current_query {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: BackendKey = BackendKey {
        process_id: 7,
        secret_key: 42,
    };

    #[test]
    fn test_cancel_running_query() {
        let registry = CancelRegistry::new();
        registry.register(KEY);
        let token = registry.begin_query(KEY.process_id);

        assert!(registry.cancel(KEY));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_with_wrong_secret_is_ignored() {
        let registry = CancelRegistry::new();
        registry.register(KEY);
        let token = registry.begin_query(KEY.process_id);

        let wrong = BackendKey {
            secret_key: 43,
            ..KEY
        };
        assert!(!registry.cancel(wrong));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_idle_session_does_nothing() {
        let registry = CancelRegistry::new();
        registry.register(KEY);
        let token = registry.begin_query(KEY.process_id);
        registry.end_query(KEY.process_id);

        assert!(!registry.cancel(KEY));
        assert!(!token.is_cancelled());

        // A later statement gets a fresh token
        let next = registry.begin_query(KEY.process_id);
        assert!(!next.is_cancelled());
    }

    #[test]
    fn test_unregister() {
        let registry = CancelRegistry::new();
        registry.register(KEY);
        assert_eq!(registry.len(), 1);
        registry.unregister(KEY.process_id);
        assert!(registry.is_empty());
        assert!(!registry.cancel(KEY));
    }
}
