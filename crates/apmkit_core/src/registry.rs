//! Sessions known to the sending engine.

use crate::session::Session;
use parking_lot::Mutex;
use tracing::trace;

/// Insertion-ordered set of sessions awaiting transmission.
///
/// Application threads add sessions; the sender thread snapshots and
/// removes them. Snapshots are plain clones so no lock is held while a
/// beacon is being sent.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Adding the same session twice is a no-op.
    pub fn add(&self, session: Session) {
        let mut sessions = self.sessions.lock();
        if sessions.iter().any(|s| s.ptr_eq(&session)) {
            return;
        }
        trace!(session = session.session_number(), "session registered");
        sessions.push(session);
    }

    /// Removes a session, returning whether it was present.
    pub fn remove(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| !s.ptr_eq(session));
        before != sessions.len()
    }

    /// Sessions that are still open.
    pub fn open_sessions(&self) -> Vec<Session> {
        self.filtered(|s| !s.is_ended())
    }

    /// Sessions that were ended.
    pub fn finished_sessions(&self) -> Vec<Session> {
        self.filtered(Session::is_ended)
    }

    /// Every registered session.
    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drops the buffered records of every session, keeping the sessions.
    pub fn clear_all_buffers(&self) {
        for session in self.all_sessions() {
            session.beacon().clear();
        }
    }

    fn filtered(&self, keep: impl Fn(&Session) -> bool) -> Vec<Session> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| keep(s))
            .cloned()
            .collect()
    }
}
