//! Actions: named, timed units of work forming a tree below a session.

use crate::beacon::{Beacon, Stamp};
use crate::event::Value;
use crate::session::SessionInner;
use crate::web_request::WebRequestTracer;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) enum ActionParent {
    Session(Weak<SessionInner>),
    Action(Weak<ActionInner>),
    Detached,
}

#[derive(Default)]
struct ActionState {
    left: bool,
    children: Vec<Action>,
    child_duration: i64,
}

pub(crate) struct ActionInner {
    id: i32,
    name: String,
    parent_id: i32,
    start: Stamp,
    beacon: Arc<Beacon>,
    parent: ActionParent,
    state: Mutex<ActionState>,
}

impl ActionInner {
    fn child_left(&self, child_id: i32, duration: i64) {
        let mut state = self.state.lock();
        state.child_duration += duration;
        state.children.retain(|child| child.id() != child_id);
    }
}

/// A timed action.
///
/// Leaving an action records it, after leaving its open children. Leaving
/// twice, or reporting on a left action, is a no-op.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl Action {
    pub(crate) fn enter(
        beacon: Arc<Beacon>,
        name: &str,
        parent_id: i32,
        parent: ActionParent,
    ) -> Self {
        let id = beacon.create_action_id();
        let start = beacon.mark();
        Self {
            inner: Arc::new(ActionInner {
                id,
                name: name.to_string(),
                parent_id,
                start,
                beacon,
                parent,
                state: Mutex::new(ActionState::default()),
            }),
        }
    }

    /// An action that is already left, handed out on misuse.
    pub(crate) fn detached(beacon: Arc<Beacon>, name: &str) -> Self {
        Self {
            inner: Arc::new(ActionInner {
                id: 0,
                name: name.to_string(),
                parent_id: 0,
                start: Stamp {
                    sequence: 0,
                    timestamp: 0,
                },
                beacon,
                parent: ActionParent::Detached,
                state: Mutex::new(ActionState {
                    left: true,
                    ..ActionState::default()
                }),
            }),
        }
    }

    /// Session-scoped action id.
    pub fn id(&self) -> i32 {
        self.inner.id
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Id of the parent action, 0 for root actions.
    pub fn parent_id(&self) -> i32 {
        self.inner.parent_id
    }

    /// Sequence number and timestamp of entering.
    pub fn start(&self) -> Stamp {
        self.inner.start
    }

    /// Whether the action was left.
    pub fn is_left(&self) -> bool {
        self.inner.state.lock().left
    }

    /// Enters a child action.
    pub fn enter_action(&self, name: &str) -> Action {
        let mut state = self.inner.state.lock();
        if state.left {
            debug!(action = self.inner.id, "enter_action on left action ignored");
            return Action::detached(Arc::clone(&self.inner.beacon), name);
        }
        let child = Action::enter(
            Arc::clone(&self.inner.beacon),
            name,
            self.inner.id,
            ActionParent::Action(Arc::downgrade(&self.inner)),
        );
        state.children.push(child.clone());
        child
    }

    /// Reports a named event.
    pub fn report_event(&self, name: &str) -> &Self {
        if !self.ignored("report_event") {
            self.inner.beacon.report_event(self.inner.id, name);
        }
        self
    }

    /// Reports an integer value.
    pub fn report_int(&self, name: &str, value: i64) -> &Self {
        self.report_value(name, Value::Int(value))
    }

    /// Reports a floating point value.
    pub fn report_double(&self, name: &str, value: f64) -> &Self {
        self.report_value(name, Value::Double(value))
    }

    /// Reports a string value.
    pub fn report_string(&self, name: &str, value: &str) -> &Self {
        self.report_value(name, Value::Text(value.to_string()))
    }

    /// Reports a value.
    pub fn report_value(&self, name: &str, value: Value) -> &Self {
        if !self.ignored("report_value") {
            self.inner.beacon.report_value(self.inner.id, name, value);
        }
        self
    }

    /// Reports an error.
    pub fn report_error(&self, name: &str, code: i32, reason: &str) -> &Self {
        if !self.ignored("report_error") {
            self.inner
                .beacon
                .report_error(self.inner.id, name, code, reason);
        }
        self
    }

    /// Starts tracing a web request issued within this action.
    pub fn trace_web_request(&self, url: &str) -> WebRequestTracer {
        if self.ignored("trace_web_request") {
            return WebRequestTracer::detached(Arc::clone(&self.inner.beacon), url);
        }
        WebRequestTracer::start_new(Arc::clone(&self.inner.beacon), self.inner.id, url)
    }

    /// Leaves the action.
    pub fn leave(&self) {
        let children = {
            let mut state = self.inner.state.lock();
            if state.left {
                return;
            }
            state.left = true;
            std::mem::take(&mut state.children)
        };
        for child in children {
            child.leave();
        }

        let child_duration = self.inner.state.lock().child_duration;
        let end = self.inner.beacon.add_action(
            self.inner.id,
            &self.inner.name,
            self.inner.parent_id,
            self.inner.start,
            child_duration,
        );
        let duration = end.timestamp.saturating_sub(self.inner.start.timestamp);

        match &self.inner.parent {
            ActionParent::Action(parent) => {
                if let Some(parent) = parent.upgrade() {
                    parent.child_left(self.inner.id, duration);
                }
            }
            ActionParent::Session(session) => {
                if let Some(session) = session.upgrade() {
                    session.root_action_left(self.inner.id);
                }
            }
            ActionParent::Detached => {}
        }
    }

    fn ignored(&self, call: &str) -> bool {
        let left = self.inner.state.lock().left;
        if left {
            debug!(action = self.inner.id, call, "call on left action ignored");
        }
        left
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("parent_id", &self.inner.parent_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::attributes::AttributeCell;
    use crate::config::AgentConfig;
    use crate::event::{RecordKind, Value};
    use crate::ids::SessionIdProvider;
    use crate::session::{Session, SessionContext};
    use crate::test_support::StepClock;
    use crate::time_sync::TimeSync;
    use apmkit_protocol::ResponseAttributes;
    use std::sync::Arc;

    fn session() -> (Arc<StepClock>, Session) {
        let clock = Arc::new(StepClock::starting_at(1_000));
        let ctx = SessionContext::with_ids(
            Arc::new(AgentConfig::new("https://c.example.com", "app", "1")),
            Arc::new(TimeSync::new(clock.clone())),
            Arc::new(AttributeCell::new(ResponseAttributes::with_defaults(1))),
            SessionIdProvider::with_offset(0),
        );
        (clock, ctx.create_session(None))
    }

    fn action_record(session: &Session, id: i32) -> (i64, i64, i64) {
        session
            .beacon()
            .records()
            .into_iter()
            .find_map(|r| match r.kind {
                RecordKind::Action {
                    id: rid,
                    end_time,
                    child_duration,
                    ..
                } if rid == id => Some((r.timestamp, end_time, child_duration)),
                _ => None,
            })
            .expect("action record")
    }

    #[test]
    fn ids_and_parents() {
        let (_, session) = session();
        let a = session.enter_action("A");
        let b = a.enter_action("B");
        assert_eq!(a.id(), 1);
        assert_eq!(a.parent_id(), 0);
        assert_eq!(b.id(), 2);
        assert_eq!(b.parent_id(), a.id());
    }

    #[test]
    fn child_duration_accumulates_in_parent() {
        let (clock, session) = session();
        let a = session.enter_action("A");
        clock.advance(10);
        let b = a.enter_action("B");
        clock.advance(30);
        b.leave();
        clock.advance(5);
        let c = a.enter_action("C");
        clock.advance(7);
        c.leave();
        a.leave();

        let (a_start, a_end, a_children) = action_record(&session, a.id());
        assert_eq!(a_end - a_start, 52);
        assert_eq!(a_children, 37);
    }

    #[test]
    fn leaving_parent_leaves_children_first() {
        let (clock, session) = session();
        let a = session.enter_action("A");
        let b = a.enter_action("B");
        clock.advance(20);
        a.leave();

        assert!(b.is_left());
        let order: Vec<i32> = session
            .beacon()
            .records()
            .into_iter()
            .filter_map(|r| match r.kind {
                RecordKind::Action { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![b.id(), a.id()]);
        assert_eq!(action_record(&session, a.id()).2, 20);
    }

    #[test]
    fn leave_is_idempotent() {
        let (_, session) = session();
        let a = session.enter_action("A");
        a.leave();
        a.leave();
        let count = session.beacon().len();
        assert_eq!(count, 2);
    }

    #[test]
    fn values_reference_owning_action() {
        let (_, session) = session();
        let a = session.enter_action("A");
        a.report_int("answer", 42).report_string("s", "x");
        let values: Vec<_> = session
            .beacon()
            .records()
            .into_iter()
            .filter(|r| matches!(r.kind, RecordKind::Value { .. }))
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|r| r.parent_action_id == a.id()));
        assert!(matches!(
            &values[0].kind,
            RecordKind::Value { value: Value::Int(42), .. }
        ));
    }

    #[test]
    fn child_of_left_action_is_detached() {
        let (_, session) = session();
        let a = session.enter_action("A");
        a.leave();
        let child = a.enter_action("late");
        assert!(child.is_left());
        assert_eq!(child.id(), 0);
    }
}
