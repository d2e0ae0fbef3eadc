//! # hitoe-core
//!
//! Session management for hitoe heart-rate sensors.
//!
//! This crate provides:
//! - Sensor discovery and pincode-authenticated connection
//! - Heartrate receiver registration and stream decoding
//! - Detection of an already-streaming session through the status query
//! - Handling of unsolicited disconnect notices
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`transport`] - The vendor request/callback seam and an in-memory mock
//! - [`protocol`] - Vendor ids and the decode table for callbacks
//! - [`router`] - Correlates callbacks with the operations waiting for them
//! - [`sensor`] - Sensor descriptor and status block codec
//! - [`session`] - The session state machine
//! - [`stream`] - Heartrate row decoding and sink delivery
//! - [`status`] - Live-session predicate over a status block
//! - [`callback`] and [`blocking`] - Non-async front ends
//! - [`config`] - Core settings and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod blocking;
pub mod callback;
pub mod config;
pub mod error;
pub mod protocol;
pub mod router;
pub mod sensor;
pub mod session;
pub mod status;
pub mod stream;
pub mod transport;

// Re-export primary types for convenience
pub use blocking::BlockingClient;
pub use callback::CallbackClient;
pub use config::{ConfigError, ConfigResult, CoreConfig};
pub use error::{HitoeError, Result};
pub use protocol::{Request, RequestKind, ResponseCode, DATA_KEY_HEARTRATE, DEFAULT_DEVICE_TYPE};
pub use sensor::{parse_sensor, parse_sensor_list, ParseError, SensorDescriptor};
pub use session::{ConnectResult, Session, SessionManager, SessionState};
pub use stream::HeartrateSample;
#[cfg(any(test, feature = "mock-transport"))]
pub use transport::mock::{MockResponse, MockTransport};
pub use transport::{ResponseHandler, StreamHandler, Transport};
