//! # apmkit Testkit
//!
//! Test utilities for apmkit.
//!
//! This crate provides:
//! - A manual clock that records sleeps and can trigger shutdown
//! - A scripted transport that replays responses and records every call
//! - Response and configuration fixtures
//! - A payload parser that splits delivered beacons into header and records
//! - Property-based generators for telemetry scripts using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apmkit_testkit::prelude::*;
//!
//! let clock = ManualClock::starting_at(1_000);
//! let transport = ScriptedTransport::new();
//! transport.push_status(status_ok(true));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod fixtures;
pub mod generators;
pub mod payload;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::payload::*;
    pub use crate::transport::*;
}

pub use clock::*;
pub use fixtures::*;
pub use generators::*;
pub use payload::*;
pub use transport::*;
