//! Sessions opened by the application.

use crate::action::{Action, ActionParent};
use crate::attributes::AttributeCell;
use crate::beacon::Beacon;
use crate::config::AgentConfig;
use crate::ids::SessionIdProvider;
use crate::time_sync::TimeSync;
use crate::web_request::WebRequestTracer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared state every session is created from.
#[derive(Debug)]
pub struct SessionContext {
    config: Arc<AgentConfig>,
    time_sync: Arc<TimeSync>,
    attributes: Arc<AttributeCell>,
    ids: SessionIdProvider,
}

impl SessionContext {
    /// Creates a context with a randomly seeded session number provider.
    pub fn new(
        config: Arc<AgentConfig>,
        time_sync: Arc<TimeSync>,
        attributes: Arc<AttributeCell>,
    ) -> Self {
        Self::with_ids(config, time_sync, attributes, SessionIdProvider::new())
    }

    /// Creates a context with an explicit session number provider.
    pub fn with_ids(
        config: Arc<AgentConfig>,
        time_sync: Arc<TimeSync>,
        attributes: Arc<AttributeCell>,
        ids: SessionIdProvider,
    ) -> Self {
        Self {
            config,
            time_sync,
            attributes,
            ids,
        }
    }

    /// Agent configuration.
    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Time synchronization service.
    pub fn time_sync(&self) -> &Arc<TimeSync> {
        &self.time_sync
    }

    /// Shared attributes.
    pub fn attributes(&self) -> &Arc<AttributeCell> {
        &self.attributes
    }

    /// Opens a new session.
    pub fn create_session(&self, client_ip: Option<&str>) -> Session {
        let beacon = Beacon::new(
            &self.config,
            self.ids.next_id(),
            client_ip,
            Arc::clone(&self.time_sync),
            Arc::clone(&self.attributes),
        );
        debug!(session = beacon.session_number(), "session created");
        Session {
            inner: Arc::new(SessionInner {
                beacon: Arc::new(beacon),
                ended: AtomicBool::new(false),
                root_actions: Mutex::new(Vec::new()),
            }),
        }
    }
}

pub(crate) struct SessionInner {
    beacon: Arc<Beacon>,
    ended: AtomicBool,
    root_actions: Mutex<Vec<Action>>,
}

impl SessionInner {
    pub(crate) fn root_action_left(&self, id: i32) {
        self.root_actions.lock().retain(|action| action.id() != id);
    }
}

/// A monitored session.
///
/// Handles are cheap to clone and may be shared between threads. Once
/// ended, every reporting call is a no-op.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Session number.
    pub fn session_number(&self) -> i32 {
        self.inner.beacon.session_number()
    }

    /// The session's beacon.
    pub fn beacon(&self) -> &Arc<Beacon> {
        &self.inner.beacon
    }

    /// Whether the session was ended.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    /// Returns true if both handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Enters a root action.
    pub fn enter_action(&self, name: &str) -> Action {
        let mut roots = self.inner.root_actions.lock();
        if self.is_ended() {
            debug!(session = self.session_number(), action = name, "enter_action on ended session ignored");
            return Action::detached(Arc::clone(&self.inner.beacon), name);
        }
        let action = Action::enter(
            Arc::clone(&self.inner.beacon),
            name,
            0,
            ActionParent::Session(Arc::downgrade(&self.inner)),
        );
        roots.push(action.clone());
        action
    }

    /// Tags the session with a user identifier.
    pub fn identify_user(&self, tag: &str) {
        if self.ignored("identify_user") {
            return;
        }
        self.inner.beacon.identify_user(tag);
    }

    /// Reports a crash.
    pub fn report_crash(&self, name: &str, reason: &str, stacktrace: &str) {
        if self.ignored("report_crash") {
            return;
        }
        self.inner.beacon.report_crash(name, reason, stacktrace);
    }

    /// Starts tracing a web request not bound to an action.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        if self.ignored("trace_web_request") {
            return WebRequestTracer::detached(Arc::clone(&self.inner.beacon), url);
        }
        WebRequestTracer::start_new(Arc::clone(&self.inner.beacon), 0, url)
    }

    /// Ends the session, leaving its open actions first.
    ///
    /// Calling it again is a no-op.
    pub fn end(&self) {
        let open = {
            let mut roots = self.inner.root_actions.lock();
            if self.inner.ended.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *roots)
        };
        for action in open {
            action.leave();
        }
        self.inner.beacon.end_session();
        debug!(session = self.session_number(), "session ended");
    }

    fn ignored(&self, call: &str) -> bool {
        let ended = self.is_ended();
        if ended {
            debug!(session = self.session_number(), call, "call on ended session ignored");
        }
        ended
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_number", &self.session_number())
            .field("ended", &self.is_ended())
            .finish()
    }
}
