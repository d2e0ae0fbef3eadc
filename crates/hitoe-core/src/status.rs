//! Status query: is this client already streaming heartrate from a sensor?
//!
//! Used by callers deciding whether discovery can be skipped. Reading the
//! status never changes the session.

use crate::protocol::DATA_KEY_HEARTRATE;
use crate::sensor::StatusRecord;

/// Returns the sensor id of the first live heartrate session in `status`.
///
/// Entries with an empty session id or connection id are half-open sessions
/// and are skipped, as are sessions that do not stream heartrate.
#[must_use]
pub fn find_connected_sensor(status: &StatusRecord) -> Option<String> {
    status
        .iter()
        .filter(|((session, connection), _)| !session.is_empty() && !connection.is_empty())
        .find(|(_, entry)| entry.data_keys.contains(DATA_KEY_HEARTRATE))
        .map(|(_, entry)| entry.sensor_id.clone())
}
