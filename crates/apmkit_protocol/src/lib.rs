//! # apmkit Protocol
//!
//! Beacon wire protocol types for apmkit.
//!
//! This crate provides:
//! - Wire keys and event type codes for the beacon format
//! - RFC 3986 percent-encoding of token values
//! - `ResponseAttributes` negotiated with the collector and their merge rule
//! - `Response` parsing for the key-value and JSON status encodings
//! - The `BeaconTransport` contract implemented by HTTP transports
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attributes;
mod error;
mod escape;
pub mod keys;
mod response;
mod transport;

pub use attributes::{AttributeUpdate, ResponseAttributes};
pub use error::{ProtocolError, ProtocolResult};
pub use escape::{percent_encode, percent_encode_with};
pub use keys::EventType;
pub use response::{parse_retry_after, parse_status_body, parse_time_sync_body, Response, TimeSyncTimestamps};
pub use transport::{BeaconRequest, BeaconTransport, StatusRequest, TimeSyncRequest};
