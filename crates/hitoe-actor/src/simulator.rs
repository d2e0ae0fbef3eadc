//! Simulated hitoe driver.
//!
//! Behaves like the vendor driver as far as the session manager can tell:
//! requests are acknowledged at once, outcomes arrive later on a driver
//! thread with the vendor's codes and payload formats, and registered
//! receivers stream heartrate rows until removed.
//!
//! | Request | Reply |
//! |---|---|
//! | search | `Success`, one canonical sensor per line |
//! | connect | `SensorConnect` + session id, `SensorUnauthorized` on a wrong pincode, `SensorConnectFailure` for an unknown address |
//! | disconnect | `SensorDisconnect` + session id |
//! | add receiver | `Success` + receiver handle, `Failure` for an unknown session |
//! | remove receiver | `Success` |
//! | status | `Success`, one six-column row per session |

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use hitoe_core::protocol::{Request, RequestKind, ResponseCode, DATA_KEY_HEARTRATE};
use hitoe_core::{ResponseHandler, SensorDescriptor, StreamHandler, Transport};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::SimulatorConfig;

const BPM_SWING: f64 = 4.0;
const BPM_PERIOD_TICKS: u32 = 20;

struct Receiver {
    handle: String,
    data_keys: Vec<String>,
    active: Arc<AtomicBool>,
}

struct SimSession {
    sensor: SensorDescriptor,
    connection_id: String,
    receiver: Option<Receiver>,
}

impl SimSession {
    fn stop_receiver(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.active.store(false, Ordering::Release);
        }
    }
}

/// In-process stand-in for the vendor driver.
pub struct SimulatedTransport {
    config: SimulatorConfig,
    response_handler: RwLock<Option<ResponseHandler>>,
    stream_handler: Arc<RwLock<Option<StreamHandler>>>,
    sessions: Mutex<HashMap<String, SimSession>>,
    next_id: AtomicU32,
}

impl SimulatedTransport {
    /// Creates a driver simulating `config.sensors`.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            response_handler: RwLock::new(None),
            stream_handler: Arc::new(RwLock::new(None)),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Ends every session as if the wearer walked out of range, sending the
    /// unsolicited disconnect notices.
    pub fn lose_connection(&self) {
        let lost: Vec<String> = {
            let mut sessions = self.sessions.lock();
            sessions.values_mut().for_each(SimSession::stop_receiver);
            sessions.drain().map(|(id, _)| id).collect()
        };
        for session_id in lost {
            info!(session_id, "Simulated sensor out of range");
            self.reply(
                RequestKind::Disconnect,
                ResponseCode::SensorDisconnectNotice,
                session_id,
            );
        }
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn reply(&self, kind: RequestKind, code: ResponseCode, payload: String) {
        let Some(handler) = self.response_handler.read().clone() else {
            return;
        };
        let latency = self.config.latency();
        thread::spawn(move || {
            thread::sleep(latency);
            handler(kind.id(), code.raw(), &payload);
        });
    }

    fn search(&self) {
        let lines: Vec<String> = self
            .config
            .sensors
            .iter()
            .map(SensorDescriptor::to_canonical)
            .collect();
        self.reply(
            RequestKind::GetAvailableSensor,
            ResponseCode::Success,
            lines.join("\n"),
        );
    }

    fn connect(&self, address: &str, pincode: &str) {
        let Some(sensor) = self.config.sensors.iter().find(|s| s.address() == address) else {
            self.reply(
                RequestKind::Connect,
                ResponseCode::SensorConnectFailure,
                String::new(),
            );
            return;
        };
        if pincode != self.config.pincode {
            self.reply(
                RequestKind::Connect,
                ResponseCode::SensorUnauthorized,
                String::new(),
            );
            return;
        }

        let id = self.next_id();
        let session_id = format!("sim-session-{id}");
        self.sessions.lock().insert(
            session_id.clone(),
            SimSession {
                sensor: sensor.clone(),
                connection_id: format!("sim-connection-{id}"),
                receiver: None,
            },
        );
        debug!(session_id, address, "Simulated session opened");
        self.reply(RequestKind::Connect, ResponseCode::SensorConnect, session_id);
    }

    fn disconnect(&self, session_id: &str) -> u32 {
        let Some(mut session) = self.sessions.lock().remove(session_id) else {
            return ResponseCode::InvalidParam.raw();
        };
        session.stop_receiver();
        self.reply(
            RequestKind::Disconnect,
            ResponseCode::SensorDisconnect,
            session_id.to_owned(),
        );
        ResponseCode::Success.raw()
    }

    fn add_receiver(&self, session_id: &str, data_keys: &[String]) {
        let handle = format!("sim-receiver-{}", self.next_id());
        let started = {
            let mut sessions = self.sessions.lock();
            sessions.get_mut(session_id).map(|session| {
                session.stop_receiver();
                let active = Arc::new(AtomicBool::new(true));
                session.receiver = Some(Receiver {
                    handle: handle.clone(),
                    data_keys: data_keys.to_vec(),
                    active: Arc::clone(&active),
                });
                active
            })
        };

        match started {
            Some(active) => {
                if data_keys.iter().any(|key| key == DATA_KEY_HEARTRATE) {
                    self.start_stream(handle.clone(), active);
                }
                self.reply(RequestKind::AddReceiver, ResponseCode::Success, handle);
            }
            None => self.reply(RequestKind::AddReceiver, ResponseCode::Failure, String::new()),
        }
    }

    fn remove_receiver(&self, handle: &str) -> u32 {
        let removed = {
            let mut sessions = self.sessions.lock();
            let owner = sessions
                .values_mut()
                .find(|session| session.receiver.as_ref().is_some_and(|r| r.handle == handle));
            match owner {
                Some(session) => {
                    session.stop_receiver();
                    true
                }
                None => false,
            }
        };
        if !removed {
            return ResponseCode::InvalidParam.raw();
        }
        self.reply(
            RequestKind::RemoveReceiver,
            ResponseCode::Success,
            String::new(),
        );
        ResponseCode::Success.raw()
    }

    fn status(&self) {
        let rows: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .map(|(session_id, session)| {
                let keys = session
                    .receiver
                    .as_ref()
                    .map(|r| r.data_keys.join("|"))
                    .unwrap_or_default();
                format!(
                    "{session_id},{},{},{keys},,",
                    session.sensor.id(),
                    session.connection_id
                )
            })
            .collect();
        self.reply(RequestKind::GetStatus, ResponseCode::Success, rows.join("\r\n"));
    }

    fn start_stream(&self, handle: String, active: Arc<AtomicBool>) {
        let handler = Arc::clone(&self.stream_handler);
        let interval = self.config.stream_interval();
        let base_bpm = self.config.base_bpm;
        thread::spawn(move || {
            let mut tick = 0_u32;
            let mut previous: Option<String> = None;
            loop {
                thread::sleep(interval);
                if !active.load(Ordering::Acquire) {
                    break;
                }
                let row = format!(
                    "{},{:.1}",
                    Utc::now().timestamp_millis(),
                    simulated_bpm(base_bpm, tick)
                );
                // The driver buffers: each delivery repeats the previous row.
                let rows = previous.map_or_else(|| row.clone(), |p| format!("{p}\n{row}"));
                let current = handler.read().clone();
                if let Some(handler) = current {
                    handler(&handle, ResponseCode::Success.raw(), DATA_KEY_HEARTRATE, &rows);
                }
                previous = Some(row);
                tick = tick.wrapping_add(1);
            }
            debug!(handle, "Simulated stream stopped");
        });
    }
}

/// Heartrate oscillating gently around `base`.
fn simulated_bpm(base: f64, tick: u32) -> f64 {
    let phase = f64::from(tick % BPM_PERIOD_TICKS) / f64::from(BPM_PERIOD_TICKS);
    BPM_SWING.mul_add((phase * std::f64::consts::TAU).sin(), base)
}

impl Transport for SimulatedTransport {
    fn send(&self, request: &Request) -> u32 {
        debug!(kind = %request.kind(), params = request.params(), "Simulated request");
        match request {
            Request::GetAvailableSensor { .. } => self.search(),
            Request::Connect {
                address, pincode, ..
            } => self.connect(address, pincode),
            Request::Disconnect { session_id } => return self.disconnect(session_id),
            Request::AddReceiver {
                session_id,
                data_keys,
            } => self.add_receiver(session_id, data_keys),
            Request::RemoveReceiver { receiver_handle } => {
                return self.remove_receiver(receiver_handle)
            }
            Request::GetStatus => self.status(),
        }
        ResponseCode::Success.raw()
    }

    fn set_response_handler(&self, handler: ResponseHandler) {
        *self.response_handler.write() = Some(handler);
    }

    fn set_stream_handler(&self, handler: StreamHandler) {
        *self.stream_handler.write() = Some(handler);
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.sessions
            .get_mut()
            .values_mut()
            .for_each(SimSession::stop_receiver);
    }
}
