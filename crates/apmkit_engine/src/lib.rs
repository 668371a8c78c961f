//! # apmkit Engine
//!
//! Beacon sending state machine and agent for apmkit.
//!
//! This crate provides:
//! - Sending state machine (init → capture on / capture off → flush → terminal)
//! - Retry with exponential backoff and escalating reinit delays
//! - Rate-limit handling driven by the collector's retry-after hint
//! - Time synchronization rounds against the collector
//! - HTTP transport abstraction with a loopback client
//! - The [`Agent`] facade running the sender on a background thread
//!
//! ## Architecture
//!
//! Application threads only record: sessions append to their beacons.
//! A single background thread owns the [`SendingContext`] and executes
//! one [`SendingState`] after the other until it reaches
//! [`SendingState::Terminal`]:
//! 1. Init negotiates attributes with the collector
//! 2. CaptureOn delivers finished and due open sessions
//! 3. CaptureOff only polls the collector, discarding telemetry
//! 4. FlushSessions delivers everything once on shutdown
//!
//! ## Key Invariants
//!
//! - Buffered records are dropped only after a non-erroneous response
//! - Capture off implies no beacon requests and empty buffers
//! - Erroneous responses never change the capture flags
//! - Shutdown is observed at every sleep and before every request

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod config;
mod context;
mod error;
mod http;
mod state;

pub use agent::Agent;
pub use config::{RetryConfig, SenderConfig, DEFAULT_REQUEST_TIMEOUT};
pub use context::{InitLatch, SendingContext};
pub use error::{EngineError, EngineResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackCollector};
pub use state::SendingState;
