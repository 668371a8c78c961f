//! Property-based generators using proptest.
//!
//! Generates scripts of application calls against one session so that
//! ordering properties can be checked on the delivered payload.

use crate::clock::ManualClock;
use apmkit_core::{Action, Session};
use proptest::prelude::*;

/// One application call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOp {
    /// Enters an action below the innermost open one.
    Enter(String),
    /// Leaves the innermost open action.
    Leave,
    /// Reports a named event.
    Event(String),
    /// Reports an integer value.
    Int(String, i64),
    /// Reports a string value.
    Text(String, String),
    /// Reports an error.
    Error(String, i32),
    /// Lets time pass.
    Advance(i64),
}

/// Strategy for names, including characters that need escaping.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 &=%/._-]{1,12}").expect("Invalid regex")
}

/// Strategy for a single call.
pub fn report_op_strategy() -> impl Strategy<Value = ReportOp> {
    prop_oneof![
        name_strategy().prop_map(ReportOp::Enter),
        Just(ReportOp::Leave),
        name_strategy().prop_map(ReportOp::Event),
        (name_strategy(), any::<i64>()).prop_map(|(n, v)| ReportOp::Int(n, v)),
        (name_strategy(), name_strategy()).prop_map(|(n, v)| ReportOp::Text(n, v)),
        (name_strategy(), any::<i32>()).prop_map(|(n, c)| ReportOp::Error(n, c)),
        (0i64..500).prop_map(ReportOp::Advance),
    ]
}

/// Strategy for a script of calls.
pub fn report_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<ReportOp>> {
    prop::collection::vec(report_op_strategy(), 1..max_len)
}

/// Plays `ops` against `session`, then leaves whatever is still open.
///
/// Calls reported with no open action go on a fresh root action.
pub fn play_script(session: &Session, clock: &ManualClock, ops: &[ReportOp]) {
    let mut open: Vec<Action> = Vec::new();
    for op in ops {
        let reports = !matches!(op, ReportOp::Enter(_) | ReportOp::Leave | ReportOp::Advance(_));
        if open.is_empty() && reports {
            open.push(session.enter_action("root"));
        }
        match op {
            ReportOp::Enter(name) => {
                let action = match open.last() {
                    Some(parent) => parent.enter_action(name),
                    None => session.enter_action(name),
                };
                open.push(action);
            }
            ReportOp::Leave => {
                if let Some(action) = open.pop() {
                    action.leave();
                }
            }
            ReportOp::Event(name) => {
                if let Some(action) = open.last() {
                    action.report_event(name);
                }
            }
            ReportOp::Int(name, value) => {
                if let Some(action) = open.last() {
                    action.report_int(name, *value);
                }
            }
            ReportOp::Text(name, value) => {
                if let Some(action) = open.last() {
                    action.report_string(name, value);
                }
            }
            ReportOp::Error(name, code) => {
                if let Some(action) = open.last() {
                    action.report_error(name, *code, "generated");
                }
            }
            ReportOp::Advance(millis) => clock.advance(*millis),
        }
    }
    while let Some(action) = open.pop() {
        action.leave();
    }
}
