//! Core types shared by the adaptive playback orchestrator: the data model
//! (manifests through protection state), the error taxonomy, a fan-out
//! pub/sub broker, a retry harness, and the transport-facing traits the host
//! environment implements.

pub mod broker;
pub mod error;
pub mod model;
pub mod retry;
pub mod time;
pub mod transport;

pub use broker::{Broker, Subscription};
pub use error::{Cause, Error, Result};
pub use retry::{RetryConfig, RetryHarness};
pub use time::{TimeRange, PLATFORM_MAX_DURATION};
