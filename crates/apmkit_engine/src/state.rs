//! Beacon sending state machine.

use crate::context::SendingContext;
use apmkit_core::TimeSync;
use apmkit_protocol::Response;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The states of the beacon sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendingState {
    /// Negotiating attributes with the collector.
    Init,
    /// Capturing and delivering telemetry.
    CaptureOn,
    /// Only polling the collector; telemetry is discarded.
    CaptureOff {
        /// Sleep before the next status check, replacing the regular
        /// status check interval once.
        sleep_override: Option<Duration>,
    },
    /// Delivering everything once before stopping.
    FlushSessions,
    /// Absorbing state; no more network activity.
    Terminal,
}

impl SendingState {
    /// Capture off with the regular status check interval.
    pub fn capture_off() -> Self {
        SendingState::CaptureOff {
            sleep_override: None,
        }
    }

    /// Capture off, checking the status again after `sleep`.
    pub fn capture_off_for(sleep: Duration) -> Self {
        SendingState::CaptureOff {
            sleep_override: Some(sleep),
        }
    }

    /// Returns true for the absorbing state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendingState::Terminal)
    }

    /// The state to switch to when shutdown is requested in this state.
    pub fn shutdown_state(&self) -> SendingState {
        match self {
            SendingState::Init | SendingState::FlushSessions | SendingState::Terminal => {
                SendingState::Terminal
            }
            SendingState::CaptureOn | SendingState::CaptureOff { .. } => {
                SendingState::FlushSessions
            }
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SendingState::Init => "init",
            SendingState::CaptureOn => "capture_on",
            SendingState::CaptureOff { .. } => "capture_off",
            SendingState::FlushSessions => "flush_sessions",
            SendingState::Terminal => "terminal",
        }
    }

    /// Runs this state once against `ctx`.
    ///
    /// If shutdown was requested meanwhile, the state is interrupted and
    /// its shutdown state is scheduled.
    pub fn execute(self, ctx: &mut SendingContext) {
        match self {
            SendingState::Init => execute_init(ctx),
            SendingState::CaptureOn => execute_capture_on(ctx),
            SendingState::CaptureOff { sleep_override } => execute_capture_off(ctx, sleep_override),
            SendingState::FlushSessions => execute_flush_sessions(ctx),
            SendingState::Terminal => ctx.request_shutdown(),
        }

        if ctx.is_shutdown_requested() {
            self.on_interrupted(ctx);
            ctx.set_next_state(self.shutdown_state());
        }
    }

    fn on_interrupted(&self, ctx: &mut SendingContext) {
        if matches!(self, SendingState::Init) && !ctx.is_init_completed() {
            ctx.init_completed(false);
        }
    }
}

fn execute_init(ctx: &mut SendingContext) {
    let mut reinit_index = 0;
    loop {
        let Some(response) = send_status_with_retries(ctx) else {
            return;
        };
        if ctx.is_shutdown_requested() {
            return;
        }

        if !response.is_erroneous() {
            ctx.handle_status_response(&response);
            let now = ctx.current_timestamp();
            ctx.set_last_status_check(now);
            ctx.set_last_open_session_send(now);
            ctx.init_completed(true);

            if ctx.is_time_sync_due() {
                if let Err(limited) = synchronize_time(ctx) {
                    rate_limited(ctx, &limited);
                    return;
                }
            }
            let next = if ctx.is_capture_on() {
                SendingState::CaptureOn
            } else {
                SendingState::capture_off()
            };
            ctx.set_next_state(next);
            return;
        }

        if response.is_too_many_requests() {
            let retry_after = response.retry_after_or(ctx.config().default_retry_after);
            warn!(secs = retry_after.as_secs(), "collector rate-limited initialization");
            ctx.sleep(retry_after);
            ctx.disable_capture_and_clear();
        } else {
            let delay = ctx.config().retry.reinit_delay(reinit_index);
            info!(secs = delay.as_secs(), "initialization failed, reinitializing later");
            ctx.sleep(delay);
            reinit_index = ctx.config().retry.next_reinit_index(reinit_index);
        }

        if ctx.is_shutdown_requested() {
            return;
        }
    }
}

/// One retry cycle: a status request plus up to `max_retries` retries.
///
/// Returns `None` when shutdown was requested before the first request.
fn send_status_with_retries(ctx: &SendingContext) -> Option<Response> {
    let retry = ctx.config().retry.clone();
    let mut last = None;
    for attempt in 0..=retry.max_retries {
        if ctx.is_shutdown_requested() {
            break;
        }
        let response = ctx.send_status_request();
        if !response.is_erroneous() || response.is_too_many_requests() {
            return Some(response);
        }
        debug!(attempt, code = response.code(), "status request failed");
        last = Some(response);
        if attempt < retry.max_retries {
            ctx.sleep(retry.delay_for_attempt(attempt));
        }
    }
    last
}

fn execute_capture_on(ctx: &mut SendingContext) {
    ctx.sleep(ctx.config().capture_on_interval);
    if ctx.is_shutdown_requested() {
        return;
    }

    if ctx.is_time_sync_due() {
        if let Err(limited) = synchronize_time(ctx) {
            rate_limited(ctx, &limited);
            return;
        }
    }

    if ctx.is_status_check_due() {
        let response = ctx.send_status_request();
        let now = ctx.current_timestamp();
        ctx.set_last_status_check(now);
        if response.is_too_many_requests() {
            rate_limited(ctx, &response);
            return;
        }
        ctx.handle_status_response(&response);
    }

    if ctx.is_capture_on() {
        if let Err(limited) = send_finished_sessions(ctx) {
            rate_limited(ctx, &limited);
            return;
        }
    }

    if ctx.is_capture_on() && ctx.is_open_session_send_due() {
        if let Err(limited) = send_open_sessions(ctx) {
            rate_limited(ctx, &limited);
            return;
        }
        let now = ctx.current_timestamp();
        ctx.set_last_open_session_send(now);
    }

    if !ctx.is_capture_on() {
        ctx.set_next_state(SendingState::capture_off());
    }
}

/// Sends every ended session and forgets it once delivered.
///
/// A failed delivery keeps the session for the next cycle and stops the
/// pass. `Err` carries a rate-limiting response.
fn send_finished_sessions(ctx: &SendingContext) -> Result<(), Response> {
    for session in ctx.sessions().finished_sessions() {
        if ctx.is_shutdown_requested() || !ctx.is_capture_on() {
            break;
        }
        match ctx.send_session(&session, true) {
            Some(response) if response.is_too_many_requests() => return Err(response),
            Some(response) if response.is_erroneous() => break,
            _ => {
                ctx.sessions().remove(&session);
            }
        }
    }
    Ok(())
}

fn send_open_sessions(ctx: &SendingContext) -> Result<(), Response> {
    for session in ctx.sessions().open_sessions() {
        if ctx.is_shutdown_requested() || !ctx.is_capture_on() {
            break;
        }
        if let Some(response) = ctx.send_session(&session, true) {
            if response.is_too_many_requests() {
                return Err(response);
            }
        }
    }
    Ok(())
}

fn execute_capture_off(ctx: &mut SendingContext, sleep_override: Option<Duration>) {
    ctx.clear_all_session_data();

    let delay = sleep_override.unwrap_or_else(|| {
        let since = Duration::from_millis(
            u64::try_from(ctx.current_timestamp() - ctx.last_status_check()).unwrap_or(0),
        );
        ctx.config().status_check_interval.saturating_sub(since)
    });
    if !delay.is_zero() && !ctx.is_shutdown_requested() {
        ctx.sleep(delay);
    }
    if ctx.is_shutdown_requested() {
        return;
    }

    let response = ctx.send_status_request();
    let now = ctx.current_timestamp();
    ctx.set_last_status_check(now);

    if response.is_too_many_requests() {
        rate_limited(ctx, &response);
        return;
    }
    ctx.handle_status_response(&response);

    if ctx.is_capture_on() {
        ctx.set_next_state(SendingState::CaptureOn);
    } else {
        ctx.set_next_state(SendingState::capture_off());
    }
}

fn execute_flush_sessions(ctx: &mut SendingContext) {
    for session in ctx.sessions().open_sessions() {
        session.end();
    }

    let sessions = ctx.sessions().all_sessions();
    info!(sessions = sessions.len(), "flushing sessions");
    for session in sessions {
        if let Some(response) = ctx.send_session(&session, false) {
            if response.is_erroneous() {
                warn!(
                    session = session.session_number(),
                    code = response.code(),
                    "final beacon delivery failed, records dropped"
                );
            }
        }
        session.beacon().clear();
        ctx.sessions().remove(&session);
    }

    ctx.set_next_state(SendingState::Terminal);
}

fn rate_limited(ctx: &mut SendingContext, response: &Response) {
    let retry_after = response.retry_after_or(ctx.config().default_retry_after);
    warn!(secs = retry_after.as_secs(), "collector rate-limited the agent");
    ctx.disable_capture_and_clear();
    ctx.set_next_state(SendingState::capture_off_for(retry_after));
}

/// Runs one time-sync round and publishes the resulting offset.
///
/// An erroneous or implausible exchange aborts the round, keeping the
/// previous offset.
/// `Err` carries a rate-limiting response.
fn synchronize_time(ctx: &mut SendingContext) -> Result<(), Response> {
    let requests = ctx.config().time_sync_requests;
    let mut offsets = Vec::with_capacity(requests as usize);
    let mut received_at = ctx.current_timestamp();

    for _ in 0..requests {
        if ctx.is_shutdown_requested() {
            break;
        }
        let sent_at = ctx.current_timestamp();
        let response = ctx.send_time_sync_request();
        received_at = ctx.current_timestamp();

        let Some(timestamps) = response.time_sync_timestamps() else {
            ctx.set_last_time_sync(received_at);
            if response.is_too_many_requests() {
                return Err(response);
            }
            debug!(code = response.code(), "time sync aborted, keeping previous offset");
            return Ok(());
        };
        let Some(offset) = TimeSync::exchange_offset(
            sent_at,
            timestamps.request_receive_time,
            timestamps.response_send_time,
            received_at,
        ) else {
            ctx.set_last_time_sync(received_at);
            warn!(
                receive = timestamps.request_receive_time,
                send = timestamps.response_send_time,
                "implausible time sync timestamps, keeping previous offset"
            );
            return Ok(());
        };
        offsets.push(offset);
    }

    ctx.set_last_time_sync(received_at);
    if offsets.len() as u32 == requests {
        if let Some(offset) = TimeSync::compute_cluster_offset(&offsets) {
            info!(offset, "cluster time synchronized");
            ctx.time_sync().set_cluster_offset(offset, received_at);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SenderConfig;
    use apmkit_core::SessionRegistry;
    use apmkit_protocol::AttributeUpdate;
    use apmkit_testkit::prelude::*;
    use apmkit_testkit::fixtures::rate_limited;
    use std::sync::Arc;

    fn context(fixture: &SessionFixture, transport: &Arc<ScriptedTransport>) -> SendingContext {
        SendingContext::new(
            SenderConfig::default(),
            Arc::clone(transport) as Arc<dyn apmkit_protocol::BeaconTransport>,
            &fixture.sessions,
            Arc::new(SessionRegistry::new()),
        )
    }

    fn context_in(
        fixture: &SessionFixture,
        transport: &Arc<ScriptedTransport>,
        state: SendingState,
    ) -> SendingContext {
        context(fixture, transport).with_state(state)
    }

    #[test]
    fn shutdown_states() {
        assert!(SendingState::Init.shutdown_state().is_terminal());
        assert!(SendingState::Terminal.shutdown_state().is_terminal());
        assert!(SendingState::FlushSessions.shutdown_state().is_terminal());
        assert_eq!(
            SendingState::CaptureOn.shutdown_state(),
            SendingState::FlushSessions
        );
        assert_eq!(
            SendingState::capture_off_for(Duration::from_secs(3)).shutdown_state(),
            SendingState::FlushSessions
        );
    }

    #[test]
    fn init_success_schedules_capture_state() {
        for (capture, expected) in [
            (true, SendingState::CaptureOn),
            (false, SendingState::capture_off()),
        ] {
            let fixture = SessionFixture::new(0);
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_status(status_ok(capture));
            let mut ctx = context(&fixture, &transport);

            ctx.execute_current_state();
            assert_eq!(ctx.current_state(), expected);
            assert_eq!(ctx.init_latch().outcome(), Some(true));
            assert_eq!(ctx.init_latch().completions(), 1);
            assert!(fixture.clock.sleeps().is_empty());
        }
    }

    #[test]
    fn init_retries_with_backoff() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..3 {
            transport.push_status(server_error());
        }
        transport.push_status(status_ok(true));
        let mut ctx = context(&fixture, &transport);

        ctx.execute_current_state();
        assert_eq!(fixture.clock.sleep_millis(), vec![1_000, 2_000, 4_000]);
        assert_eq!(transport.status_count(), 4);
        assert_eq!(ctx.current_state(), SendingState::CaptureOn);
    }

    #[test]
    fn init_rate_limit_sleeps_retry_after_and_disables_capture() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(rate_limited(45));
        transport.push_status(status_ok(true));
        let mut ctx = context(&fixture, &transport);
        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());

        fixture.clock.shutdown_after_sleeps(1);
        ctx.execute_current_state();

        assert_eq!(fixture.clock.sleep_millis(), vec![45_000]);
        assert!(!ctx.is_capture_on());
        assert!(session.beacon().is_empty());
        assert_eq!(transport.status_count(), 1);
        assert_eq!(ctx.current_state(), SendingState::Terminal);
        assert_eq!(ctx.init_latch().outcome(), Some(false));
    }

    #[test]
    fn shutdown_before_init_goes_terminal() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        let mut ctx = context(&fixture, &transport);
        ctx.request_shutdown();

        ctx.execute_current_state();
        assert!(ctx.is_in_terminal_state());
        assert_eq!(transport.call_count(), 0);
        assert_eq!(ctx.init_latch().completions(), 1);
        assert_eq!(ctx.init_latch().outcome(), Some(false));
    }

    #[test]
    fn capture_on_sends_finished_sessions() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        let mut ctx = context_in(&fixture, &transport, SendingState::CaptureOn);

        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());
        session.enter_action("A").leave();
        session.end();

        ctx.execute_current_state();
        assert_eq!(transport.beacon_payloads().len(), 1);
        assert!(ctx.sessions().is_empty());
        assert_eq!(ctx.current_state(), SendingState::CaptureOn);
        assert_eq!(fixture.clock.sleep_millis().last(), Some(&1_000));
    }

    #[test]
    fn capture_on_keeps_session_after_failed_send() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_beacon(server_error());
        let mut ctx = context_in(&fixture, &transport, SendingState::CaptureOn);

        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());
        session.end();
        let records = session.beacon().records();

        ctx.execute_current_state();
        assert_eq!(ctx.sessions().len(), 1);
        assert_eq!(session.beacon().records(), records);

        ctx.execute_current_state();
        assert!(ctx.sessions().is_empty());
        assert_eq!(transport.beacon_payloads().len(), 2);
    }

    #[test]
    fn capture_on_rate_limit_moves_to_capture_off() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_beacon(rate_limited(90));
        let mut ctx = context_in(&fixture, &transport, SendingState::CaptureOn);

        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());
        session.end();

        ctx.execute_current_state();
        assert_eq!(
            ctx.current_state(),
            SendingState::capture_off_for(Duration::from_secs(90))
        );
        assert!(!ctx.is_capture_on());
        assert!(ctx.sessions().is_empty());
    }

    #[test]
    fn capture_on_sends_open_sessions_when_due() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        let mut ctx = context_in(&fixture, &transport, SendingState::CaptureOn);

        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());
        session.enter_action("A").leave();

        ctx.execute_current_state();
        assert!(transport.beacon_payloads().is_empty());

        fixture.clock.advance(120_000);
        ctx.execute_current_state();
        assert_eq!(transport.beacon_payloads().len(), 1);
        assert!(session.beacon().is_empty());
        assert_eq!(ctx.sessions().len(), 1);
    }

    #[test]
    fn capture_on_status_check_turns_capture_off() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(status_ok(false));
        let mut ctx = context_in(&fixture, &transport, SendingState::CaptureOn);

        fixture.clock.advance(2 * 60 * 60 * 1000);
        ctx.execute_current_state();
        assert_eq!(transport.status_count(), 1);
        assert_eq!(ctx.current_state(), SendingState::capture_off());
    }

    #[test]
    fn capture_off_waits_for_status_interval() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(server_error());
        transport.push_status(status_ok(true));
        let mut ctx = context_in(&fixture, &transport, SendingState::capture_off());
        ctx.attributes().disable_capture();

        ctx.execute_current_state();
        assert_eq!(fixture.clock.sleep_millis(), vec![7_200_000]);
        assert_eq!(ctx.current_state(), SendingState::capture_off());
        assert_eq!(transport.status_count(), 1);

        ctx.execute_current_state();
        assert_eq!(fixture.clock.sleep_millis(), vec![7_200_000, 7_200_000]);
        assert_eq!(ctx.current_state(), SendingState::CaptureOn);
    }

    #[test]
    fn capture_off_honours_sleep_override() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(rate_limited(30));
        let mut ctx = context_in(
            &fixture,
            &transport,
            SendingState::capture_off_for(Duration::from_secs(5)),
        );
        ctx.attributes().disable_capture();

        ctx.execute_current_state();
        assert_eq!(fixture.clock.sleep_millis(), vec![5_000]);
        assert_eq!(
            ctx.current_state(),
            SendingState::capture_off_for(Duration::from_secs(30))
        );
    }

    #[test]
    fn capture_off_discards_buffers() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        let mut ctx = context_in(&fixture, &transport, SendingState::capture_off());
        let session = fixture.sessions.create_session(None);
        ctx.sessions().add(session.clone());
        ctx.attributes().disable_capture();

        ctx.execute_current_state();
        assert!(session.beacon().is_empty());
        assert!(transport.beacon_payloads().is_empty());
    }

    #[test]
    fn flush_ends_and_sends_every_session() {
        let fixture = SessionFixture::new(0);
        let transport = Arc::new(ScriptedTransport::new());
        let mut ctx = context_in(&fixture, &transport, SendingState::FlushSessions);
        let open = fixture.sessions.create_session(None);
        let done = fixture.sessions.create_session(None);
        done.end();
        ctx.sessions().add(open.clone());
        ctx.sessions().add(done.clone());
        ctx.attributes().disable_capture();

        ctx.execute_current_state();
        assert!(ctx.is_in_terminal_state());
        ctx.execute_current_state();

        assert!(open.is_ended());
        assert_eq!(transport.beacon_payloads().len(), 2);
        assert!(ctx.sessions().is_empty());
        assert!(ctx.is_in_terminal_state());
    }

    #[test]
    fn time_sync_round_publishes_offset() {
        let fixture = SessionFixture::new(1_000);
        let transport = Arc::new(ScriptedTransport::new());
        for t in [1_500, 1_500, 1_500, 1_500, 2_500] {
            transport.push_time_sync(time_sync_ok(t, t));
        }
        let mut ctx = context(&fixture, &transport);
        ctx.attributes()
            .apply(&AttributeUpdate::new().with_time_sync_supported(true));

        assert!(synchronize_time(&mut ctx).is_ok());
        assert_eq!(transport.time_sync_count(), 5);
        assert_eq!(ctx.time_sync().cluster_offset(), 500);
        assert!(ctx.time_sync().is_synchronized());
        assert_eq!(ctx.last_time_sync(), Some(1_000));
    }

    #[test]
    fn time_sync_error_keeps_previous_offset() {
        let fixture = SessionFixture::new(1_000);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_time_sync(time_sync_ok(1_200, 1_200));
        let mut ctx = context(&fixture, &transport);
        ctx.time_sync().set_cluster_offset(42, 0);

        assert!(synchronize_time(&mut ctx).is_ok());
        assert_eq!(transport.time_sync_count(), 2);
        assert_eq!(ctx.time_sync().cluster_offset(), 42);
    }

    #[test]
    fn init_runs_time_sync_when_supported() {
        let fixture = SessionFixture::new(1_000);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(status_with(
            AttributeUpdate::new()
                .with_capture(true)
                .with_time_sync_supported(true),
        ));
        for _ in 0..5 {
            transport.push_time_sync(time_sync_ok(1_100, 1_100));
        }
        let mut ctx = context(&fixture, &transport);

        ctx.execute_current_state();
        assert_eq!(transport.time_sync_count(), 5);
        assert_eq!(ctx.time_sync().cluster_offset(), 100);
        assert_eq!(ctx.current_state(), SendingState::CaptureOn);
    }

    #[test]
    fn extreme_time_sync_timestamps_are_not_published() {
        for (receive, send) in [(i64::MIN, 0), (i64::MAX, i64::MAX), (0, i64::MIN)] {
            let fixture = SessionFixture::new(1_000);
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_time_sync(time_sync_ok(receive, send));
            let mut ctx = context(&fixture, &transport);

            assert!(synchronize_time(&mut ctx).is_ok());
            assert_eq!(transport.time_sync_count(), 1);
            assert!(!ctx.time_sync().is_synchronized());
            assert_eq!(ctx.time_sync().cluster_offset(), 0);
            assert_eq!(ctx.last_time_sync(), Some(1_000));
        }
    }

    #[test]
    fn init_survives_extreme_time_sync_reply() {
        let fixture = SessionFixture::new(1_000);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(status_with(
            AttributeUpdate::new()
                .with_capture(true)
                .with_time_sync_supported(true),
        ));
        transport.push_time_sync(time_sync_ok(i64::MIN, 0));
        let mut ctx = context(&fixture, &transport);

        ctx.execute_current_state();
        assert!(ctx.is_init_completed());
        assert!(!ctx.time_sync().is_synchronized());
        assert_eq!(ctx.current_state(), SendingState::CaptureOn);
    }
}
