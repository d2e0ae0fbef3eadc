//! Session state machine for one heart-rate sensor.
//!
//! [`SessionManager`] drives the lifecycle
//!
//! ```text
//! Idle ──connect──▶ Connecting ──session id──▶ Registering ──receiver──▶ Connected
//!  ▲                    │                           │                       │
//!  └────────────────────┴───── disconnect / disconnect notice ──────────────┘
//! ```
//!
//! Each operation registers a wait with the [`ResponseRouter`], issues one
//! vendor request and awaits the matching reply with a timeout. Disconnect
//! notices arrive on the transport thread at any time and clear the session
//! immediately, without waiting for any in-flight operation.
//!
//! # Locking
//!
//! - The session value sits behind a `parking_lot` mutex that is never held
//!   across an `.await` or while a sink runs.
//! - `search`, `connect` and `register_receiver` are serialized by an async
//!   operation lock. `disconnect`, `get_status` and the notice path do not
//!   take it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::error::{HitoeError, Result};
use crate::protocol::{ConnectReply, Reply, Request, ResponseCode, DATA_KEY_HEARTRATE};
use crate::router::ResponseRouter;
use crate::sensor::{parse_sensor_list, parse_status_block, SensorDescriptor};
use crate::status::find_connected_sensor;
use crate::stream::{decode_heartrate, Sinks};
use crate::transport::Transport;

/// Outcome of [`SessionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectResult {
    /// Connected and streaming heartrate.
    Ok,
    /// The sensor did not answer, refused, or the session ended while
    /// connecting. Callers usually search again.
    NotFound,
    /// The pincode was rejected. Callers should forget it.
    InvalidPincode,
    /// Connected, but the heartrate receiver could not be registered.
    /// Retrying [`SessionManager::connect`] or
    /// [`SessionManager::register_receiver`] does not reconnect.
    ReceiverError,
}

impl ConnectResult {
    /// Returns `true` for [`ConnectResult::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ConnectResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidPincode => "INVALID_PINCODE",
            Self::ReceiverError => "RECEIVER_ERROR",
        })
    }
}

/// Snapshot of the live session.
///
/// `receiver_handle` is set only with `session_id`, and `session_id` only
/// with `sensor`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    sensor: Option<SensorDescriptor>,
    session_id: Option<String>,
    receiver_handle: Option<String>,
}

impl Session {
    /// Connected sensor.
    #[must_use]
    pub const fn sensor(&self) -> Option<&SensorDescriptor> {
        self.sensor.as_ref()
    }

    /// Vendor session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Heartrate receiver handle.
    #[must_use]
    pub fn receiver_handle(&self) -> Option<&str> {
        self.receiver_handle.as_deref()
    }

    /// Returns `true` when no sensor is connected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sensor.is_none()
    }
}

/// Coarse lifecycle state, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No sensor.
    Idle,
    /// Connect request issued, waiting for the session id.
    Connecting,
    /// Session established, waiting for receiver registration.
    Registering,
    /// Session established; `streaming` once the receiver is registered.
    Connected {
        /// Heartrate receiver registered.
        streaming: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Registering,
}

#[derive(Default)]
struct Shared {
    session: Session,
    phase: Option<Phase>,
    /// Session id whose release requests are in flight.
    releasing: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: CoreConfig,
    router: ResponseRouter,
    shared: Mutex<Shared>,
    sinks: Sinks,
    op_lock: tokio::sync::Mutex<()>,
}

/// Resets the in-flight phase when an operation ends or is cancelled.
struct PhaseGuard<'a> {
    shared: &'a Mutex<Shared>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().phase = None;
    }
}

/// Cloneable handle to the session state machine of one sensor client.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager and registers its callbacks with `transport`.
    ///
    /// The transport only keeps weak references to the manager; callbacks
    /// arriving after the last handle is dropped are ignored.
    pub fn new(transport: Arc<dyn Transport>, config: CoreConfig) -> Self {
        let inner = Arc::new(Inner {
            transport: Arc::clone(&transport),
            config,
            router: ResponseRouter::new(),
            shared: Mutex::new(Shared::default()),
            sinks: Sinks::default(),
            op_lock: tokio::sync::Mutex::new(()),
        });

        let weak = Arc::downgrade(&inner);
        transport.set_response_handler(Arc::new(move |kind, code, payload: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.on_response(kind, code, payload);
            }
        }));

        let weak = Arc::downgrade(&inner);
        transport.set_stream_handler(Arc::new(
            move |handle: &str, code, data_key: &str, rows: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_stream(handle, code, data_key, rows);
                }
            },
        ));

        Self { inner }
    }

    /// Configuration this manager runs with.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let shared = self.inner.shared.lock();
        match shared.phase {
            Some(Phase::Connecting) => SessionState::Connecting,
            Some(Phase::Registering) => SessionState::Registering,
            None if shared.session.is_empty() => SessionState::Idle,
            None => SessionState::Connected {
                streaming: shared.session.receiver_handle.is_some(),
            },
        }
    }

    /// Snapshot of the live session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.shared.lock().session.clone()
    }

    /// The connected sensor, if any.
    #[must_use]
    pub fn current_sensor(&self) -> Option<SensorDescriptor> {
        self.inner.shared.lock().session.sensor.clone()
    }

    /// Sets the sink receiving `(timestamp_ms, bpm)` heartrate samples.
    pub fn set_heartrate_sink<F>(&self, sink: F)
    where
        F: Fn(i64, i32) + Send + Sync + 'static,
    {
        self.inner.sinks.set_heartrate(Some(Arc::new(sink)));
    }

    /// Removes the heartrate sink; samples are dropped until a new one is set.
    pub fn clear_heartrate_sink(&self) {
        self.inner.sinks.set_heartrate(None);
    }

    /// Sets the sink invoked whenever the session ends.
    pub fn set_disconnect_sink<F>(&self, sink: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.sinks.set_disconnect(Some(Arc::new(sink)));
    }

    /// Removes the disconnect sink.
    pub fn clear_disconnect_sink(&self) {
        self.inner.sinks.set_disconnect(None);
    }

    /// Discovers sensors for `search_time`.
    ///
    /// Waits at most `search_time` times the configured timeout factor. Only
    /// realtime heartrate-capable sensors are returned; an empty reply, a
    /// failure reply or a timeout yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`HitoeError::RequestRejected`] if the transport refuses the
    /// request.
    pub async fn search(&self, search_time: Duration) -> Result<Vec<SensorDescriptor>> {
        let _op = self.inner.op_lock.lock().await;
        info!(?search_time, "Searching for sensors");

        let request = Request::GetAvailableSensor {
            device_type: self.inner.config.device_type.clone(),
            search_time_ms: millis(search_time),
        };
        let timeout = self.inner.config.search_timeout(search_time);
        let text = match self.inner.request(request, timeout).await? {
            Some(Reply::Sensors(Some(text))) if !text.is_empty() => text,
            _ => {
                debug!("No raw sensors were found");
                return Ok(Vec::new());
            }
        };

        let sensors = parse_sensor_list(&text);
        info!(count = sensors.len(), "Search finished");
        Ok(sensors)
    }

    /// Connects to `sensor` and registers the heartrate receiver.
    ///
    /// Already connected to the same sensor: returns [`ConnectResult::Ok`]
    /// without contacting the sensor, unless a heartrate sink is set and no
    /// receiver is registered yet, in which case registration is retried.
    /// Connected to a different sensor: the old session is released first.
    ///
    /// `timeout` bounds the connect reply and, separately, the registration
    /// reply.
    ///
    /// # Errors
    ///
    /// Returns [`HitoeError::RequestRejected`] if the transport refuses a
    /// request.
    pub async fn connect(
        &self,
        sensor: &SensorDescriptor,
        pincode: &str,
        timeout: Duration,
    ) -> Result<ConnectResult> {
        let _op = self.inner.op_lock.lock().await;

        let current = self.session();
        if let Some(connected) = current.sensor() {
            if connected == sensor {
                if current.receiver_handle.is_none() && self.inner.sinks.has_heartrate() {
                    return self.inner.register_receiver(timeout).await;
                }
                debug!(%sensor, "Already connected");
                return Ok(ConnectResult::Ok);
            }

            info!(from = %connected, to = %sensor, "Switching sensors");
            self.inner.release()?;
        }

        self.inner.connect_fresh(sensor, pincode, timeout).await
    }

    /// Retries heartrate receiver registration on the current session.
    ///
    /// Returns [`ConnectResult::Ok`] at once if a receiver is already
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`HitoeError::NotConnected`] without a session, or
    /// [`HitoeError::RequestRejected`] if the transport refuses the request.
    pub async fn register_receiver(&self, timeout: Duration) -> Result<ConnectResult> {
        let _op = self.inner.op_lock.lock().await;
        if self.session().receiver_handle.is_some() {
            return Ok(ConnectResult::Ok);
        }
        self.inner.register_receiver(timeout).await
    }

    /// Ends the session.
    ///
    /// Removes the receiver and closes the session if they exist, clears
    /// local state and invokes the disconnect sink once. Disconnecting
    /// without a session is a harmless no-op that still invokes the sink.
    ///
    /// # Errors
    ///
    /// Returns [`HitoeError::RequestRejected`] if the transport refuses a
    /// request; the session is kept in that case.
    pub fn disconnect(&self) -> Result<()> {
        let released = self.inner.release()?;
        match released.sensor() {
            Some(sensor) => info!(%sensor, "Disconnected"),
            None => debug!("Disconnect without a session"),
        }
        self.inner.sinks.emit_disconnect();
        Ok(())
    }

    /// Asks the transport whether this client already streams heartrate.
    ///
    /// Returns the sensor id of the first such live session. Does not touch
    /// the local session.
    ///
    /// # Errors
    ///
    /// Returns [`HitoeError::Parse`] if the status block is malformed, or
    /// [`HitoeError::RequestRejected`] if the transport refuses the request.
    pub async fn get_status(&self) -> Result<Option<String>> {
        debug!("Get status");
        let timeout = self.inner.config.status_timeout();
        let Some(Reply::Status(Some(text))) = self.inner.request(Request::GetStatus, timeout).await?
        else {
            debug!("No status available");
            return Ok(None);
        };

        let status = parse_status_block(&text)?;
        Ok(find_connected_sensor(&status))
    }
}

impl Inner {
    fn on_response(&self, kind: u32, code: u32, payload: &str) {
        self.router
            .dispatch(kind, code, payload, |session_id| self.teardown(session_id));
    }

    fn on_stream(&self, handle: &str, code: u32, data_key: &str, rows: &str) {
        if data_key != DATA_KEY_HEARTRATE {
            debug!(handle, data_key, "Ignoring stream for another data key");
            return;
        }
        let Some(sample) = decode_heartrate(rows) else {
            return;
        };
        if !self.sinks.emit_heartrate(sample) {
            debug!(handle, code, "No heartrate sink; sample dropped");
        }
    }

    /// Clears the session named by a disconnect notice.
    ///
    /// Notices for a session this manager is releasing itself are left to
    /// [`Inner::release`].
    fn teardown(&self, session_id: &str) {
        {
            let mut shared = self.shared.lock();
            if shared.releasing.as_deref() == Some(session_id) {
                debug!(session_id, "Disconnect notice for a session being released");
                return;
            }
            if shared.session.session_id.as_deref() != Some(session_id) {
                debug!(session_id, "Ignoring disconnect notice for another session");
                return;
            }
            shared.session = Session::default();
        }
        info!(session_id, "Session ended by disconnect notice");
        self.sinks.emit_disconnect();
    }

    fn enter(&self, phase: Phase) -> PhaseGuard<'_> {
        self.shared.lock().phase = Some(phase);
        PhaseGuard {
            shared: &self.shared,
        }
    }

    fn send(&self, request: &Request) -> Result<()> {
        let ack = self.transport.send(request);
        if ResponseCode::from_raw(ack).is_success() {
            return Ok(());
        }
        error!(kind = %request.kind(), ack = format_args!("{ack:#04x}"), "Transport rejected request");
        Err(HitoeError::RequestRejected {
            kind: request.kind(),
            code: ack,
        })
    }

    /// Registers the wait, sends `request` and awaits its reply.
    async fn request(&self, request: Request, timeout: Duration) -> Result<Option<Reply>> {
        let wait = self.router.register(request.kind());
        self.send(&request)?;
        Ok(wait.wait(timeout).await)
    }

    /// Removes the receiver and closes the session, without invoking sinks.
    ///
    /// The session stays in place until the transport acknowledges the
    /// disconnect request. A rejected request keeps what is left of it.
    fn release(&self) -> Result<Session> {
        let current = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;
            shared.releasing.clone_from(&shared.session.session_id);
            shared.session.clone()
        };

        let sent = self.send_release(&current);

        let mut shared = self.shared.lock();
        shared.releasing = None;
        sent?;
        if shared.session.session_id == current.session_id {
            shared.session = Session::default();
        }
        Ok(current)
    }

    fn send_release(&self, current: &Session) -> Result<()> {
        if let Some(receiver_handle) = current.receiver_handle.clone() {
            self.send(&Request::RemoveReceiver { receiver_handle })?;
            let mut shared = self.shared.lock();
            if shared.session.session_id == current.session_id {
                shared.session.receiver_handle = None;
            }
        }
        if let Some(session_id) = current.session_id.clone() {
            self.send(&Request::Disconnect { session_id })?;
        }
        Ok(())
    }

    async fn connect_fresh(
        &self,
        sensor: &SensorDescriptor,
        pincode: &str,
        timeout: Duration,
    ) -> Result<ConnectResult> {
        info!(%sensor, "Connecting to sensor");
        let session_id = {
            let _phase = self.enter(Phase::Connecting);
            let request = Request::Connect {
                sensor_type: sensor.kind().to_owned(),
                address: sensor.address().to_owned(),
                mode: sensor.mode().to_owned(),
                pincode: pincode.to_owned(),
            };
            match self.request(request, timeout).await? {
                Some(Reply::Connect(ConnectReply::Connected(session_id))) => session_id,
                Some(Reply::Connect(ConnectReply::Unauthorized)) => {
                    warn!(%sensor, "Pincode rejected");
                    return Ok(ConnectResult::InvalidPincode);
                }
                Some(Reply::Connect(ConnectReply::Interrupted)) => {
                    info!(%sensor, "Disconnect notice while connecting");
                    return Ok(ConnectResult::NotFound);
                }
                _ => {
                    info!(%sensor, "Could not connect to sensor");
                    return Ok(ConnectResult::NotFound);
                }
            }
        };

        self.shared.lock().session = Session {
            sensor: Some(sensor.clone()),
            session_id: Some(session_id.clone()),
            receiver_handle: None,
        };
        info!(%sensor, session_id, "Connected to sensor");

        self.register_receiver(timeout).await
    }

    async fn register_receiver(&self, timeout: Duration) -> Result<ConnectResult> {
        let Some(session_id) = self.shared.lock().session.session_id.clone() else {
            return Err(HitoeError::NotConnected);
        };
        let _phase = self.enter(Phase::Registering);
        debug!(session_id, "Registering heartrate receiver");

        let request = Request::AddReceiver {
            session_id: session_id.clone(),
            data_keys: vec![DATA_KEY_HEARTRATE.to_owned()],
        };
        let handle = match self.request(request, timeout).await? {
            Some(Reply::Receiver(handle)) => handle,
            _ => None,
        };

        let mut shared = self.shared.lock();
        if shared.session.session_id.as_deref() != Some(session_id.as_str()) {
            drop(shared);
            info!(session_id, "Session ended during receiver registration");
            return Ok(ConnectResult::NotFound);
        }
        let Some(handle) = handle else {
            drop(shared);
            warn!(session_id, "Heartrate receiver registration failed");
            return Ok(ConnectResult::ReceiverError);
        };
        shared.session.receiver_handle = Some(handle);
        drop(shared);
        info!(session_id, "Heartrate receiver registered");
        Ok(ConnectResult::Ok)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestKind;
    use crate::transport::mock::{MockResponse, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn sensor(id: &str) -> SensorDescriptor {
        SensorDescriptor::new("hitoe D01", id, "00:11:22", "realtime", ["raw.hr"])
    }

    fn connecting_transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(|request| match request {
            Request::Connect { address, .. } => vec![MockResponse::new(
                RequestKind::Connect,
                ResponseCode::SensorConnect,
                format!("session-{address}"),
            )],
            Request::AddReceiver { .. } => vec![MockResponse::new(
                RequestKind::AddReceiver,
                ResponseCode::Success,
                "receiver-1",
            )],
            _ => Vec::new(),
        });
        transport
    }

    fn manager(transport: &Arc<MockTransport>) -> SessionManager {
        SessionManager::new(transport.clone(), CoreConfig::default())
    }

    #[tokio::test]
    async fn test_connect_walks_through_states() {
        let transport = connecting_transport();
        let manager = manager(&transport);
        assert_eq!(manager.state(), SessionState::Idle);

        let result = manager.connect(&sensor("S1"), "0000", TIMEOUT).await.unwrap();

        assert_eq!(result, ConnectResult::Ok);
        assert_eq!(manager.state(), SessionState::Connected { streaming: true });
        let session = manager.session();
        assert_eq!(session.sensor(), Some(&sensor("S1")));
        assert_eq!(session.session_id(), Some("session-00:11:22"));
        assert_eq!(session.receiver_handle(), Some("receiver-1"));
    }

    #[tokio::test]
    async fn test_state_is_connecting_while_waiting() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(&transport);

        let connecting = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .connect(&sensor("S1"), "0000", Duration::from_millis(200))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), SessionState::Connecting);

        assert_eq!(connecting.await.unwrap().unwrap(), ConnectResult::NotFound);
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_ack_is_an_error_and_leaves_no_wait() {
        let transport = Arc::new(MockTransport::new());
        transport.set_ack(RequestKind::Connect, ResponseCode::ApiBusy);
        let manager = manager(&transport);

        let err = manager
            .connect(&sensor("S1"), "0000", TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HitoeError::RequestRejected {
                kind: RequestKind::Connect,
                code: 0x09
            }
        ));
        assert!(!manager.inner.router.is_pending(RequestKind::Connect));
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_register_receiver_requires_session() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(&transport);
        assert!(matches!(
            manager.register_receiver(TIMEOUT).await,
            Err(HitoeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_teardown_ignores_stale_session() {
        let transport = connecting_transport();
        let manager = manager(&transport);
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        manager.set_disconnect_sink(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect(&sensor("S1"), "0000", TIMEOUT).await.unwrap();
        manager.inner.teardown("session-other");

        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
        assert!(!manager.session().is_empty());

        manager.inner.teardown("session-00:11:22");
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(manager.session().is_empty());
    }

    #[tokio::test]
    async fn test_notice_during_release_fires_the_sink_once() {
        let transport = connecting_transport();
        let manager = manager(&transport);
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        manager.set_disconnect_sink(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.connect(&sensor("S1"), "0000", TIMEOUT).await.unwrap();

        // The driver answers our own Disconnect before the ack returns.
        let echo = manager.clone();
        transport.respond_with(move |request| {
            if let Request::Disconnect { session_id } = request {
                echo.inner.teardown(session_id);
            }
            Vec::new()
        });
        manager.disconnect().unwrap();
        transport.respond_with(|_| Vec::new());

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(manager.session().is_empty());
        assert!(manager.inner.shared.lock().releasing.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_session_still_notifies() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager(&transport);
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        manager.set_disconnect_sink(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.disconnect().unwrap();

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_connect_result_display_and_serde_names() {
        assert_eq!(ConnectResult::InvalidPincode.to_string(), "INVALID_PINCODE");
        assert_eq!(
            toml::Value::try_from(ConnectResult::ReceiverError).unwrap(),
            toml::Value::String("RECEIVER_ERROR".into())
        );
    }
}
