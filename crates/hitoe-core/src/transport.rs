//! The vendor transport seam.
//!
//! The vendor driver is an opaque request/callback API:
//!
//! - [`Transport::send`] issues a request and returns an immediate
//!   acknowledgement code. Anything other than success means the request was
//!   never accepted.
//! - The outcome arrives later, on a thread owned by the driver, through the
//!   single [`ResponseHandler`] registered with the transport.
//! - Streamed rows for active receivers arrive through the single
//!   [`StreamHandler`].
//!
//! The session manager registers both handlers once, when it is created.

use std::sync::Arc;

use crate::protocol::Request;

#[cfg(any(test, feature = "mock-transport"))]
pub mod mock;

/// Callback for every request outcome and unsolicited notice:
/// `(request kind id, response code, payload)`.
pub type ResponseHandler = Arc<dyn Fn(u32, u32, &str) + Send + Sync>;

/// Callback for streamed rows:
/// `(receiver handle, response code, data key, rows)`.
pub type StreamHandler = Arc<dyn Fn(&str, u32, &str, &str) + Send + Sync>;

/// A vendor sensor driver.
///
/// Implementations must never call the registered handlers from inside
/// [`Transport::send`] while holding a lock the handlers could need; the
/// session manager itself tolerates synchronous delivery.
pub trait Transport: Send + Sync {
    /// Issues `request` and returns the synchronous acknowledgement code.
    fn send(&self, request: &Request) -> u32;

    /// Registers the response callback, replacing any previous one.
    fn set_response_handler(&self, handler: ResponseHandler);

    /// Registers the stream callback, replacing any previous one.
    fn set_stream_handler(&self, handler: StreamHandler);
}
