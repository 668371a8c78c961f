//! Shared state of the sending state machine.

use crate::config::SenderConfig;
use crate::state::SendingState;
use apmkit_core::{AttributeCell, Session, SessionContext, SessionRegistry, ShutdownSignal, TimeSync};
use apmkit_protocol::{BeaconRequest, BeaconTransport, Response, StatusRequest, TimeSyncRequest};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
struct InitState {
    outcome: Option<bool>,
    completions: u32,
}

/// One-shot outcome signal.
///
/// Reports the end of the initialization phase, and the exit of the
/// sender thread. The first reported outcome wins; waiters are released
/// once it is set.
#[derive(Debug, Default)]
pub struct InitLatch {
    state: Mutex<InitState>,
    completed: Condvar,
}

impl InitLatch {
    /// Creates an unset latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the end of initialization. Later reports are ignored.
    pub fn complete(&self, success: bool) {
        let mut state = self.state.lock();
        state.completions += 1;
        if state.outcome.is_some() {
            return;
        }
        state.outcome = Some(success);
        self.completed.notify_all();
    }

    /// The reported outcome, if any.
    pub fn outcome(&self) -> Option<bool> {
        self.state.lock().outcome
    }

    /// Number of times completion was reported.
    pub fn completions(&self) -> u32 {
        self.state.lock().completions
    }

    /// Blocks until initialization finished; returns whether it succeeded.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        self.completed
            .wait_while(&mut state, |state| state.outcome.is_none());
        state.outcome.unwrap_or(false)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.completed
            .wait_while_for(&mut state, |state| state.outcome.is_none(), timeout);
        state.outcome.unwrap_or(false)
    }
}

/// Everything the sending states read and mutate.
///
/// Owned by the sender thread. Only the shutdown signal, the session
/// registry and the attribute cell are shared with application threads.
pub struct SendingContext {
    config: SenderConfig,
    transport: Arc<dyn BeaconTransport>,
    time_sync: Arc<TimeSync>,
    attributes: Arc<AttributeCell>,
    sessions: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownSignal>,
    init: Arc<InitLatch>,
    current_state: SendingState,
    next_state: Option<SendingState>,
    last_status_check: i64,
    last_open_session_send: i64,
    last_time_sync: Option<i64>,
}

impl SendingContext {
    /// Creates a context in [`SendingState::Init`].
    pub fn new(
        config: SenderConfig,
        transport: Arc<dyn BeaconTransport>,
        session_context: &SessionContext,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        let time_sync = Arc::clone(session_context.time_sync());
        let now = time_sync.now();
        Self {
            config,
            transport,
            time_sync,
            attributes: Arc::clone(session_context.attributes()),
            sessions,
            shutdown: Arc::new(ShutdownSignal::new()),
            init: Arc::new(InitLatch::new()),
            current_state: SendingState::Init,
            next_state: None,
            last_status_check: now,
            last_open_session_send: now,
            last_time_sync: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(mut self, state: SendingState) -> Self {
        self.current_state = state;
        self
    }

    /// Sender configuration.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// The transport used for every request.
    pub fn transport(&self) -> &Arc<dyn BeaconTransport> {
        &self.transport
    }

    /// Time synchronization service.
    pub fn time_sync(&self) -> &Arc<TimeSync> {
        &self.time_sync
    }

    /// Attributes currently in effect.
    pub fn attributes(&self) -> &Arc<AttributeCell> {
        &self.attributes
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Shutdown signal shared with the agent.
    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Initialization latch shared with the agent.
    pub fn init_latch(&self) -> &Arc<InitLatch> {
        &self.init
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Requests shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Current local time in ms.
    pub fn current_timestamp(&self) -> i64 {
        self.time_sync.now()
    }

    /// Sleeps, returning early on shutdown.
    pub fn sleep(&self, duration: Duration) {
        trace!(millis = duration.as_millis() as u64, "sleeping");
        self.time_sync.clock().sleep(duration, &self.shutdown);
    }

    /// State executed by the next [`execute_current_state`](Self::execute_current_state).
    pub fn current_state(&self) -> SendingState {
        self.current_state
    }

    /// State scheduled to replace the current one, if any.
    pub fn next_state(&self) -> Option<SendingState> {
        self.next_state
    }

    /// Schedules the state to switch to after the current one ran.
    pub fn set_next_state(&mut self, state: SendingState) {
        self.next_state = Some(state);
    }

    /// Whether the machine reached its absorbing state.
    pub fn is_in_terminal_state(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Runs the current state once and applies the scheduled transition.
    pub fn execute_current_state(&mut self) {
        let state = self.current_state;
        state.execute(self);
        if let Some(next) = self.next_state.take() {
            if next != state {
                debug!(from = state.name(), to = next.name(), "state transition");
            }
            self.current_state = next;
        }
    }

    /// Reports the end of initialization.
    pub fn init_completed(&self, success: bool) {
        info!(success, "initialization completed");
        self.init.complete(success);
    }

    /// Whether initialization already reported an outcome.
    pub fn is_init_completed(&self) -> bool {
        self.init.outcome().is_some()
    }

    /// Whether capturing is on.
    pub fn is_capture_on(&self) -> bool {
        self.attributes.is_capture_on()
    }

    /// Applies a non-erroneous response to the attributes.
    ///
    /// Erroneous responses are ignored. If capture ends up off, every
    /// buffer is cleared.
    pub fn handle_status_response(&self, response: &Response) {
        let Some(update) = response.attributes() else {
            return;
        };
        let was_on = self.attributes.is_capture_on();
        let attributes = self.attributes.apply(update);
        if was_on != attributes.is_capture_on() {
            info!(capture = attributes.is_capture_on(), "capture toggled by collector");
        }
        if !attributes.is_capture_on() {
            self.clear_all_session_data();
        }
    }

    /// Turns capture off and discards every buffered record unsent.
    pub fn disable_capture_and_clear(&self) {
        info!("capture disabled, discarding buffered telemetry");
        self.attributes.disable_capture();
        self.clear_all_session_data();
    }

    /// Clears every buffer and forgets finished sessions.
    pub fn clear_all_session_data(&self) {
        self.sessions.clear_all_buffers();
        for session in self.sessions.finished_sessions() {
            self.sessions.remove(&session);
        }
    }

    /// Sends one status request to the current server id.
    pub fn send_status_request(&self) -> Response {
        let request = StatusRequest {
            server_id: self.attributes.load().server_id(),
        };
        self.transport.send_status_request(&request)
    }

    /// Sends one time-sync request to the current server id.
    pub fn send_time_sync_request(&self) -> Response {
        let request = TimeSyncRequest {
            server_id: self.attributes.load().server_id(),
        };
        self.transport.send_time_sync_request(&request)
    }

    /// Delivers the buffered records of `session` chunk by chunk.
    ///
    /// Stops at the first erroneous response, putting that chunk back.
    /// With `apply_attributes`, every successful reply is also handled as
    /// a status response. Returns the last response, `None` if there was
    /// nothing to send.
    pub fn send_session(&self, session: &Session, apply_attributes: bool) -> Option<Response> {
        let beacon = session.beacon();
        let mut last = None;
        while let Some(chunk) = beacon.next_chunk() {
            let request = BeaconRequest {
                server_id: self.attributes.load().server_id(),
                session_number: beacon.session_number(),
                client_ip: beacon.client_ip(),
                payload: chunk.as_bytes(),
            };
            let response = self.transport.send_beacon_request(&request);
            if response.is_erroneous() {
                debug!(
                    session = beacon.session_number(),
                    code = response.code(),
                    "beacon send failed, keeping records"
                );
                beacon.reset_chunk();
                return Some(response);
            }
            trace!(
                session = beacon.session_number(),
                bytes = chunk.len(),
                "beacon chunk delivered"
            );
            beacon.confirm_chunk();
            if apply_attributes {
                self.handle_status_response(&response);
            }
            last = Some(response);
        }
        last
    }

    /// Time of the last status check.
    pub fn last_status_check(&self) -> i64 {
        self.last_status_check
    }

    /// Records the time of a status check.
    pub fn set_last_status_check(&mut self, timestamp: i64) {
        self.last_status_check = timestamp;
    }

    /// Time open sessions were last sent.
    pub fn last_open_session_send(&self) -> i64 {
        self.last_open_session_send
    }

    /// Records the time open sessions were sent.
    pub fn set_last_open_session_send(&mut self, timestamp: i64) {
        self.last_open_session_send = timestamp;
    }

    /// Time of the last time-sync round, successful or not.
    pub fn last_time_sync(&self) -> Option<i64> {
        self.last_time_sync
    }

    /// Records the time of a time-sync round.
    pub fn set_last_time_sync(&mut self, timestamp: i64) {
        self.last_time_sync = Some(timestamp);
    }

    /// Whether the status check interval elapsed.
    pub fn is_status_check_due(&self) -> bool {
        elapsed(self.current_timestamp(), self.last_status_check) >= self.config.status_check_interval
    }

    /// Whether open sessions are due for sending.
    pub fn is_open_session_send_due(&self) -> bool {
        elapsed(self.current_timestamp(), self.last_open_session_send)
            >= self.attributes.load().send_interval()
    }

    /// Whether a time-sync round is supported and due.
    pub fn is_time_sync_due(&self) -> bool {
        if !self.attributes.load().is_time_sync_supported() {
            return false;
        }
        match self.last_time_sync {
            None => true,
            Some(last) => elapsed(self.current_timestamp(), last) >= self.config.time_sync_interval,
        }
    }
}

fn elapsed(now: i64, since: i64) -> Duration {
    Duration::from_millis(u64::try_from(now.saturating_sub(since)).unwrap_or(0))
}

impl std::fmt::Debug for SendingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingContext")
            .field("current_state", &self.current_state)
            .field("next_state", &self.next_state)
            .field("last_status_check", &self.last_status_check)
            .field("last_open_session_send", &self.last_open_session_send)
            .field("shutdown", &self.is_shutdown_requested())
            .finish()
    }
}
