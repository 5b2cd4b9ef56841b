//! ABOUTME: Core types, errors, IDs, time helpers, and tracing utilities
//! ABOUTME: Foundation crate used by all other borgwatch components

pub mod error;
pub mod id;
pub mod telemetry;
pub mod time;

pub use error::{Error, FailureKind, Result};
pub use id::Id;
pub use time::{parse_timestamp, to_rfc3339, utc_now, MonotonicTimer};
