//! Vendor API identifiers and the response decode table.
//!
//! The vendor transport reports every outcome through one callback keyed by
//! an opaque numeric *request kind* and *response code*. This module names
//! those numbers and turns each `(kind, code, payload)` triple into a
//! [`Route`]: either a typed [`Reply`] for whoever is waiting on that kind,
//! a session teardown for unsolicited disconnect notices, or nothing.
//!
//! [`route`] is a pure function so the whole table can be tested without a
//! transport.

use std::fmt;

/// Device type passed to sensor discovery.
pub const DEFAULT_DEVICE_TYPE: &str = "hitoe D01";

/// Data key of the raw heartrate stream.
pub const DATA_KEY_HEARTRATE: &str = "raw.hr";

/// Sensor mode that supports live streaming.
pub const MODE_REALTIME: &str = "realtime";

const PARAM_SEARCH_TIME: &str = "search_time";
const PARAM_PINCODE: &str = "pincode";

/// Logical operation a request or response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    /// Sensor discovery.
    GetAvailableSensor,
    /// Connect and authenticate to a sensor.
    Connect,
    /// Close a session.
    Disconnect,
    /// Query the data keys a session offers.
    GetAvailableData,
    /// Start streaming a data key.
    AddReceiver,
    /// Stop streaming.
    RemoveReceiver,
    /// List live sessions.
    GetStatus,
}

impl RequestKind {
    /// Every known kind, in id order.
    pub const ALL: [Self; 7] = [
        Self::GetAvailableSensor,
        Self::Connect,
        Self::Disconnect,
        Self::GetAvailableData,
        Self::AddReceiver,
        Self::RemoveReceiver,
        Self::GetStatus,
    ];

    /// Vendor API id.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::GetAvailableSensor => 0x1010,
            Self::Connect => 0x1020,
            Self::Disconnect => 0x1021,
            Self::GetAvailableData => 0x1030,
            Self::AddReceiver => 0x1040,
            Self::RemoveReceiver => 0x1041,
            Self::GetStatus => 0x1090,
        }
    }

    /// Looks up a kind by vendor API id.
    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Short lowercase name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetAvailableSensor => "search",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::GetAvailableData => "get-available-data",
            Self::AddReceiver => "add-receiver",
            Self::RemoveReceiver => "remove-receiver",
            Self::GetStatus => "get-status",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vendor response code, shared by synchronous acks and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Request accepted / operation succeeded.
    Success,
    /// Generic failure.
    Failure,
    /// More data follows.
    Continue,
    /// The API is busy with another request.
    ApiBusy,
    /// Malformed argument.
    InvalidArg,
    /// Malformed parameter string.
    InvalidParam,
    /// Sensor connected; payload is the session id.
    SensorConnect,
    /// Sensor could not be reached.
    SensorConnectFailure,
    /// Informational connect notice.
    SensorConnectNotice,
    /// Pincode rejected.
    SensorUnauthorized,
    /// Session closed in response to a request.
    SensorDisconnect,
    /// Session closed by the sensor or the vendor stack.
    SensorDisconnectNotice,
    /// A code this crate does not know.
    Unknown(u32),
}

impl ResponseCode {
    /// Decodes a raw vendor code.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::Success,
            0x01 => Self::Failure,
            0x05 => Self::Continue,
            0x09 => Self::ApiBusy,
            0x10 => Self::InvalidArg,
            0x30 => Self::InvalidParam,
            0x60 => Self::SensorConnect,
            0x61 => Self::SensorConnectFailure,
            0x62 => Self::SensorConnectNotice,
            0x63 => Self::SensorUnauthorized,
            0x65 => Self::SensorDisconnect,
            0x66 => Self::SensorDisconnectNotice,
            other => Self::Unknown(other),
        }
    }

    /// Raw vendor code.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Success => 0x00,
            Self::Failure => 0x01,
            Self::Continue => 0x05,
            Self::ApiBusy => 0x09,
            Self::InvalidArg => 0x10,
            Self::InvalidParam => 0x30,
            Self::SensorConnect => 0x60,
            Self::SensorConnectFailure => 0x61,
            Self::SensorConnectNotice => 0x62,
            Self::SensorUnauthorized => 0x63,
            Self::SensorDisconnect => 0x65,
            Self::SensorDisconnectNotice => 0x66,
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns `true` for [`ResponseCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A typed outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Discover sensors of `device_type` for `search_time_ms`.
    GetAvailableSensor {
        /// Vendor device type, e.g. [`DEFAULT_DEVICE_TYPE`].
        device_type: String,
        /// Discovery window in milliseconds.
        search_time_ms: u64,
    },
    /// Connect to a discovered sensor.
    Connect {
        /// Sensor device type.
        sensor_type: String,
        /// Physical address.
        address: String,
        /// Capability mode.
        mode: String,
        /// Pincode credential.
        pincode: String,
    },
    /// Close a session.
    Disconnect {
        /// Session to close.
        session_id: String,
    },
    /// Start streaming `data_keys` on a session.
    AddReceiver {
        /// Session to stream from.
        session_id: String,
        /// Data keys to stream.
        data_keys: Vec<String>,
    },
    /// Stop a receiver.
    RemoveReceiver {
        /// Receiver handle returned by add-receiver.
        receiver_handle: String,
    },
    /// List live sessions.
    GetStatus,
}

impl Request {
    /// Kind this request is answered under.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::GetAvailableSensor { .. } => RequestKind::GetAvailableSensor,
            Self::Connect { .. } => RequestKind::Connect,
            Self::Disconnect { .. } => RequestKind::Disconnect,
            Self::AddReceiver { .. } => RequestKind::AddReceiver,
            Self::RemoveReceiver { .. } => RequestKind::RemoveReceiver,
            Self::GetStatus => RequestKind::GetStatus,
        }
    }

    /// Vendor `key=value` parameter string, empty when the request has none.
    #[must_use]
    pub fn params(&self) -> String {
        match self {
            Self::GetAvailableSensor { search_time_ms, .. } => {
                format!("{PARAM_SEARCH_TIME}={search_time_ms}")
            }
            Self::Connect { pincode, .. } => format!("{PARAM_PINCODE}={pincode}"),
            _ => String::new(),
        }
    }
}

/// Outcome of a connect request as seen by the connect waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectReply {
    /// Connected; carries the new session id.
    Connected(String),
    /// The sensor could not be reached.
    ConnectFailed,
    /// The pincode was rejected.
    Unauthorized,
    /// A disconnect notice arrived while the connect was pending.
    Interrupted,
}

/// A solicited reply delivered to the waiter of one [`RequestKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Discovery result: raw sensor lines on success.
    Sensors(Option<String>),
    /// Connect result.
    Connect(ConnectReply),
    /// Receiver registration result: the receiver handle on success.
    Receiver(Option<String>),
    /// Status result: the raw status block on success.
    Status(Option<String>),
}

/// What to do with one inbound callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Deliver `reply` to the waiter for `kind`.
    Deliver {
        /// Waiter to deliver to.
        kind: RequestKind,
        /// Typed reply.
        reply: Reply,
    },
    /// The session named by `session_id` ended; tear it down immediately.
    Teardown {
        /// Session id carried by the notice.
        session_id: String,
        /// A pending waiter that the notice also resolves, if any.
        interrupts: Option<RequestKind>,
    },
    /// Nothing is interested in this callback.
    Ignore,
}

/// Classifies one inbound `(kind, code, payload)` callback.
#[must_use]
pub fn route(kind: u32, code: u32, payload: &str) -> Route {
    let code = ResponseCode::from_raw(code);
    let Some(kind) = RequestKind::from_id(kind) else {
        return Route::Ignore;
    };

    if kind == RequestKind::Disconnect
        || matches!(
            code,
            ResponseCode::SensorDisconnect | ResponseCode::SensorDisconnectNotice
        )
    {
        return Route::Teardown {
            session_id: payload.to_owned(),
            interrupts: (kind == RequestKind::Connect).then_some(RequestKind::Connect),
        };
    }

    let reply = match kind {
        RequestKind::GetAvailableSensor => Reply::Sensors(success_payload(code, payload)),
        RequestKind::Connect => Reply::Connect(match code {
            ResponseCode::SensorConnect => ConnectReply::Connected(payload.to_owned()),
            ResponseCode::SensorUnauthorized => ConnectReply::Unauthorized,
            _ => ConnectReply::ConnectFailed,
        }),
        RequestKind::AddReceiver => Reply::Receiver(success_payload(code, payload)),
        RequestKind::GetStatus => Reply::Status(success_payload(code, payload)),
        RequestKind::Disconnect | RequestKind::GetAvailableData | RequestKind::RemoveReceiver => {
            return Route::Ignore;
        }
    };

    Route::Deliver { kind, reply }
}

fn success_payload(code: ResponseCode, payload: &str) -> Option<String> {
    code.is_success().then(|| payload.to_owned())
}
