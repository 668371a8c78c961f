//! # apmkit Core
//!
//! Telemetry model for apmkit.
//!
//! This crate provides:
//! - Sessions, actions and web request tracers used by application threads
//! - Per-session beacon buffers with sequence numbers and chunk staging
//! - The beacon wire encoder
//! - Time synchronization with the collector cluster clock
//! - The session registry and shared capture attributes read by producers
//!
//! ## Key Invariants
//!
//! - Sequence numbers within one session are strictly increasing
//! - Sequence numbers and timestamps are assigned under the buffer lock
//! - Staged records are only dropped after a confirmed transmission
//! - Misuse (reporting on an ended session or a left action) is a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod attributes;
mod beacon;
mod buffer;
mod clock;
mod config;
mod encoder;
mod error;
mod event;
mod ids;
mod registry;
mod session;
#[cfg(test)]
mod test_support;
mod time_sync;
mod web_request;

pub use action::Action;
pub use attributes::AttributeCell;
pub use beacon::{Beacon, Stamp};
pub use buffer::BeaconBuffer;
pub use clock::{Clock, ShutdownSignal, SystemClock};
pub use config::{AgentConfig, DeviceMetadata};
pub use encoder::BeaconEncoder;
pub use error::{CoreError, CoreResult};
pub use event::{EventRecord, RecordKind, Value};
pub use ids::{current_thread_id, SessionIdProvider};
pub use registry::SessionRegistry;
pub use session::{Session, SessionContext};
pub use time_sync::{TimeSync, MAX_CLUSTER_OFFSET};
pub use web_request::WebRequestTracer;
