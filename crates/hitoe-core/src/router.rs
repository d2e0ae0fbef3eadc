//! Response router: demultiplexes the shared callback stream.
//!
//! Every operation registers a [`PendingWait`] for its [`RequestKind`] *before*
//! issuing its request, then awaits it with a timeout. The transport's
//! callback thread calls [`ResponseRouter::dispatch`], which classifies the
//! callback through [`protocol::route`] and either
//!
//! 1. completes the single pending wait for that kind,
//! 2. drops the reply when nobody is waiting, or
//! 3. runs the caller-supplied teardown for disconnect notices, bypassing
//!    every pending wait.
//!
//! # Single slot per kind
//!
//! There is at most one pending wait per kind. Registering a second one
//! replaces the first; the replaced waiter sees its slot closed and resolves
//! as if it had timed out. Callers that need both replies must not overlap
//! requests of the same kind.
//!
//! # Cancellation
//!
//! Dropping a [`PendingWait`] (timeout, early return, a cancelled future)
//! clears its slot, but only if the slot still belongs to it, so an expired
//! wait can never swallow the reply meant for a later one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::protocol::{self, ConnectReply, Reply, RequestKind, Route};

struct Slot {
    token: u64,
    tx: oneshot::Sender<Reply>,
}

type SlotMap = Arc<Mutex<HashMap<RequestKind, Slot>>>;

/// What [`ResponseRouter::dispatch`] did with a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Delivered to the waiter for this kind.
    Delivered(RequestKind),
    /// A reply for this kind arrived with nobody waiting.
    Dropped(RequestKind),
    /// A disconnect notice for this session was handed to teardown.
    Teardown(String),
    /// The callback is of no interest.
    Ignored,
}

/// Single-slot-per-kind response demultiplexer.
#[derive(Default)]
pub struct ResponseRouter {
    slots: SlotMap,
    next_token: AtomicU64,
}

impl ResponseRouter {
    /// Creates a router with no pending waits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the pending wait for `kind`, replacing any existing one.
    pub fn register(&self, kind: RequestKind) -> PendingWait {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if self.slots.lock().insert(kind, Slot { token, tx }).is_some() {
            warn!(%kind, "Replacing a pending wait; the earlier waiter will not get a reply");
        }

        PendingWait {
            kind,
            token,
            rx,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Returns `true` while a wait for `kind` is registered.
    #[must_use]
    pub fn is_pending(&self, kind: RequestKind) -> bool {
        self.slots.lock().contains_key(&kind)
    }

    /// Routes one callback from the transport. Never blocks.
    ///
    /// `teardown` runs synchronously, on the calling thread, for disconnect
    /// notices. When the notice arrived on the connect channel, the pending
    /// connect is resolved as [`ConnectReply::Interrupted`] after teardown.
    pub fn dispatch<F>(&self, kind: u32, code: u32, payload: &str, teardown: F) -> Dispatched
    where
        F: FnOnce(&str),
    {
        debug!(kind = format_args!("{kind:#06x}"), code = format_args!("{code:#04x}"), payload, "Callback");

        match protocol::route(kind, code, payload) {
            Route::Deliver { kind, reply } => {
                if self.deliver(kind, reply) {
                    Dispatched::Delivered(kind)
                } else {
                    debug!(%kind, "No pending wait; reply dropped");
                    Dispatched::Dropped(kind)
                }
            }
            Route::Teardown {
                session_id,
                interrupts,
            } => {
                teardown(&session_id);
                if let Some(kind) = interrupts {
                    self.deliver(kind, Reply::Connect(ConnectReply::Interrupted));
                }
                Dispatched::Teardown(session_id)
            }
            Route::Ignore => Dispatched::Ignored,
        }
    }

    fn deliver(&self, kind: RequestKind, reply: Reply) -> bool {
        let slot = self.slots.lock().remove(&kind);
        slot.is_some_and(|slot| slot.tx.send(reply).is_ok())
    }
}

/// A registered wait for the reply to one request.
#[must_use = "a pending wait does nothing unless awaited"]
pub struct PendingWait {
    kind: RequestKind,
    token: u64,
    rx: oneshot::Receiver<Reply>,
    slots: SlotMap,
}

impl PendingWait {
    /// Kind this wait is registered for.
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Waits up to `timeout` for the reply.
    ///
    /// Returns `None` on timeout or when the wait was replaced by a newer
    /// one. The slot is released either way.
    pub async fn wait(mut self, timeout: Duration) -> Option<Reply> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(_)) => {
                debug!(kind = %self.kind, "Pending wait was replaced");
                None
            }
            Err(_) => {
                debug!(kind = %self.kind, ?timeout, "Pending wait timed out");
                None
            }
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if slots.get(&self.kind).is_some_and(|slot| slot.token == self.token) {
            slots.remove(&self.kind);
        }
    }
}
