//! The agent: session factory plus the background beacon sender.

use crate::config::SenderConfig;
use crate::context::{InitLatch, SendingContext};
use crate::error::{EngineError, EngineResult};
use crate::http::{HttpClient, HttpTransport};
use apmkit_core::{
    AgentConfig, AttributeCell, Clock, Session, SessionContext, SessionRegistry, ShutdownSignal,
    SystemClock, TimeSync,
};
use apmkit_protocol::{BeaconTransport, ResponseAttributes};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SENDER_THREAD_NAME: &str = "apmkit-beacon-sender";

/// A running monitoring agent.
///
/// Creating an agent starts the beacon sender thread. Sessions may be
/// created from any thread; [`shutdown`](Self::shutdown) flushes whatever
/// was recorded and stops the sender. Dropping the agent shuts it down.
pub struct Agent {
    sessions: SessionContext,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownSignal>,
    init: Arc<InitLatch>,
    stopped: Arc<InitLatch>,
    shutdown_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Starts an agent talking HTTP through `client`.
    pub fn with_http<C>(config: AgentConfig, client: C) -> EngineResult<Self>
    where
        C: HttpClient + 'static,
    {
        Self::with_http_config(config, SenderConfig::default(), client)
    }

    /// Like [`with_http`](Self::with_http) with explicit sender timings.
    pub fn with_http_config<C>(
        config: AgentConfig,
        sender: SenderConfig,
        client: C,
    ) -> EngineResult<Self>
    where
        C: HttpClient + 'static,
    {
        let transport = HttpTransport::new(&config, client)?.with_timeout(sender.request_timeout);
        Self::start(
            config,
            sender,
            Arc::new(transport),
            Arc::new(SystemClock::new()),
        )
    }

    /// Starts an agent with explicit transport, timings and clock.
    pub fn start(
        config: AgentConfig,
        sender: SenderConfig,
        transport: Arc<dyn BeaconTransport>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        sender.validate()?;

        let server_id = config.server_id;
        let shutdown_timeout = sender.shutdown_timeout;
        let time_sync = Arc::new(TimeSync::new(clock));
        let attributes = Arc::new(AttributeCell::new(ResponseAttributes::with_defaults(
            server_id,
        )));
        let sessions = SessionContext::new(Arc::new(config), time_sync, attributes);
        let registry = Arc::new(SessionRegistry::new());

        let mut ctx = SendingContext::new(sender, transport, &sessions, Arc::clone(&registry));
        let shutdown = Arc::clone(ctx.shutdown_signal());
        let init = Arc::clone(ctx.init_latch());
        let stopped = Arc::new(InitLatch::new());

        let exit = SenderExit {
            init: Arc::clone(&init),
            stopped: Arc::clone(&stopped),
        };
        let worker = thread::Builder::new()
            .name(SENDER_THREAD_NAME.into())
            .spawn(move || {
                let _exit = exit;
                run_sender(&mut ctx);
            })
            .map_err(EngineError::Spawn)?;
        info!(server_id, "agent started");

        Ok(Self {
            sessions,
            registry,
            shutdown,
            init,
            stopped,
            shutdown_timeout,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Opens a new session.
    ///
    /// After shutdown the session still works locally but is never sent.
    pub fn create_session(&self, client_ip: Option<&str>) -> Session {
        let session = self.sessions.create_session(client_ip);
        if self.shutdown.is_requested() {
            debug!(
                session = session.session_number(),
                "agent shut down, session not registered"
            );
        } else {
            self.registry.add(session.clone());
        }
        session
    }

    /// Blocks until initialization finished; returns whether it succeeded.
    pub fn wait_for_init(&self) -> bool {
        self.init.wait()
    }

    /// Like [`wait_for_init`](Self::wait_for_init), giving up after `timeout`.
    pub fn wait_for_init_timeout(&self, timeout: Duration) -> bool {
        self.init.wait_timeout(timeout)
    }

    /// Whether initialization succeeded.
    pub fn is_initialized(&self) -> bool {
        self.init.outcome() == Some(true)
    }

    /// Session factory of this agent.
    pub fn session_context(&self) -> &SessionContext {
        &self.sessions
    }

    /// Requests shutdown and waits for the final flush.
    ///
    /// Waits at most the configured shutdown timeout; a sender still busy
    /// after that is detached. Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.shutdown.request();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        self.stopped.wait_timeout(self.shutdown_timeout);
        if self.stopped.outcome().is_none() {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "beacon sender did not finish in time, detaching"
            );
            return;
        }
        if worker.join().is_err() {
            warn!("beacon sender panicked");
        }
        info!("agent stopped");
    }

    /// Whether the sender thread has exited.
    pub fn is_stopped(&self) -> bool {
        self.stopped.outcome().is_some()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("sessions", &self.registry.len())
            .field("initialized", &self.init.outcome())
            .field("shutdown", &self.shutdown.is_requested())
            .finish()
    }
}

/// Releases everyone waiting on the sender when its thread exits,
/// including by unwinding.
struct SenderExit {
    init: Arc<InitLatch>,
    stopped: Arc<InitLatch>,
}

impl Drop for SenderExit {
    fn drop(&mut self) {
        let panicked = thread::panicking();
        if panicked {
            error!("beacon sender panicked");
        }
        if self.init.outcome().is_none() {
            self.init.complete(false);
        }
        self.stopped.complete(!panicked);
    }
}

fn run_sender(ctx: &mut SendingContext) {
    debug!("beacon sender running");
    while !ctx.is_in_terminal_state() {
        ctx.execute_current_state();
    }
    debug!("beacon sender reached terminal state");
}
