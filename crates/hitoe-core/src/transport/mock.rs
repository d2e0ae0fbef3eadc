//! Scriptable in-memory transport for tests and demos.
//!
//! [`MockTransport`] records every request it receives, acknowledges with a
//! configurable code, and delivers scripted responses from a separate thread
//! the way the vendor driver does.
//!
//! ```rust
//! use std::sync::Arc;
//! use hitoe_core::protocol::{Request, RequestKind, ResponseCode};
//! use hitoe_core::transport::mock::{MockResponse, MockTransport};
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.respond_with(|request| match request {
//!     Request::GetStatus => vec![MockResponse::new(RequestKind::GetStatus, ResponseCode::Success, "")],
//!     _ => Vec::new(),
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{ResponseHandler, StreamHandler, Transport};
use crate::protocol::{Request, RequestKind, ResponseCode};

/// One scripted callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    /// Raw request kind id.
    pub kind: u32,
    /// Raw response code.
    pub code: u32,
    /// Payload text.
    pub payload: String,
}

impl MockResponse {
    /// Builds a response from typed ids.
    pub fn new(kind: RequestKind, code: ResponseCode, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.id(),
            code: code.raw(),
            payload: payload.into(),
        }
    }
}

/// Delay before scripted responses are delivered.
const DELIVERY_DELAY: Duration = Duration::from_millis(5);

type Responder = Arc<dyn Fn(&Request) -> Vec<MockResponse> + Send + Sync>;

/// In-memory [`Transport`].
pub struct MockTransport {
    acks: Mutex<HashMap<RequestKind, u32>>,
    requests: Mutex<Vec<Request>>,
    responder: RwLock<Option<Responder>>,
    response_handler: RwLock<Option<ResponseHandler>>,
    stream_handler: RwLock<Option<StreamHandler>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a transport that acknowledges everything and never replies.
    #[must_use]
    pub fn new() -> Self {
        Self {
            acks: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            responder: RwLock::new(None),
            response_handler: RwLock::new(None),
            stream_handler: RwLock::new(None),
        }
    }

    /// Acknowledges requests of `kind` with `code` instead of success.
    pub fn set_ack(&self, kind: RequestKind, code: ResponseCode) {
        self.acks.lock().insert(kind, code.raw());
    }

    /// Scripts replies: `responder` runs for every accepted request and its
    /// responses are delivered in order on a background thread.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Request) -> Vec<MockResponse> + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Arc::new(responder));
    }

    /// Every request received so far, accepted or not.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Kinds of every request received so far.
    #[must_use]
    pub fn request_kinds(&self) -> Vec<RequestKind> {
        self.requests.lock().iter().map(Request::kind).collect()
    }

    /// Number of requests of `kind` received so far.
    #[must_use]
    pub fn count(&self, kind: RequestKind) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Delivers a response on the calling thread.
    pub fn respond(&self, kind: RequestKind, code: ResponseCode, payload: &str) {
        let handler = self.response_handler.read().clone();
        if let Some(handler) = handler {
            handler(kind.id(), code.raw(), payload);
        }
    }

    /// Delivers streamed rows on the calling thread.
    pub fn stream(&self, handle: &str, data_key: &str, rows: &str) {
        let handler = self.stream_handler.read().clone();
        if let Some(handler) = handler {
            handler(handle, ResponseCode::Success.raw(), data_key, rows);
        }
    }

    fn deliver_later(&self, responses: Vec<MockResponse>) {
        let Some(handler) = self.response_handler.read().clone() else {
            return;
        };
        thread::spawn(move || {
            thread::sleep(DELIVERY_DELAY);
            for response in responses {
                handler(response.kind, response.code, &response.payload);
            }
        });
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> u32 {
        self.requests.lock().push(request.clone());

        let ack = self
            .acks
            .lock()
            .get(&request.kind())
            .copied()
            .unwrap_or(ResponseCode::Success.raw());
        if ack != ResponseCode::Success.raw() {
            return ack;
        }

        let responder = self.responder.read().clone();
        if let Some(responder) = responder {
            let responses = responder(request);
            if !responses.is_empty() {
                self.deliver_later(responses);
            }
        }
        ack
    }

    fn set_response_handler(&self, handler: ResponseHandler) {
        *self.response_handler.write() = Some(handler);
    }

    fn set_stream_handler(&self, handler: StreamHandler) {
        *self.stream_handler.write() = Some(handler);
    }
}
