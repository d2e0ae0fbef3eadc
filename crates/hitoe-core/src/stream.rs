//! Heartrate stream adapter.
//!
//! Once a receiver is registered the vendor pushes heartrate rows through the
//! stream callback, outside any request/response cycle:
//!
//! ```text
//! 1000,70
//! 1010,72        <- only the last row is used
//! ```
//!
//! Each row is `timestamp_ms,bpm[,...]`. Earlier rows in one delivery are
//! vendor-side buffering and are discarded.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sensor::split_rows;

const COLUMN_SEPARATOR: char = ',';
const TIMESTAMP_COLUMN: usize = 0;
const BPM_COLUMN: usize = 1;
const MIN_COLUMNS: usize = 2;

/// Receives decoded heartrate samples: `(timestamp_ms, bpm)`.
pub type HeartrateSink = Arc<dyn Fn(i64, i32) + Send + Sync>;

/// Called once whenever the session ends.
pub type DisconnectSink = Arc<dyn Fn() + Send + Sync>;

/// One heartrate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartrateSample {
    /// Unix time in milliseconds.
    pub timestamp_ms: i64,
    /// Beats per minute.
    pub bpm: i32,
}

/// Decodes one stream delivery into its latest sample.
///
/// Returns `None` when the last row has fewer than two columns or when its
/// numbers do not parse. The bpm column is read as a float and truncated.
#[must_use]
pub fn decode_heartrate(rows: &str) -> Option<HeartrateSample> {
    let last = split_rows(rows).filter(|row| !row.is_empty()).last()?;
    let columns: Vec<&str> = last.split(COLUMN_SEPARATOR).collect();
    if columns.len() < MIN_COLUMNS {
        return None;
    }

    let timestamp = columns[TIMESTAMP_COLUMN].trim().parse::<i64>();
    let bpm = columns[BPM_COLUMN].trim().parse::<f64>();
    match (timestamp, bpm) {
        (Ok(timestamp_ms), Ok(bpm)) => {
            #[allow(clippy::cast_possible_truncation)]
            let bpm = bpm as i32;
            Some(HeartrateSample { timestamp_ms, bpm })
        }
        _ => {
            warn!(row = last, "Undecodable heartrate row");
            None
        }
    }
}

/// The heartrate and disconnect sinks of one session manager.
///
/// Sinks are read by cloning the `Arc` out of the lock, so they are always
/// invoked without any lock held and may call back into the manager.
#[derive(Default)]
pub struct Sinks {
    heartrate: RwLock<Option<HeartrateSink>>,
    disconnect: RwLock<Option<DisconnectSink>>,
}

impl Sinks {
    /// Replaces the heartrate sink.
    pub fn set_heartrate(&self, sink: Option<HeartrateSink>) {
        *self.heartrate.write() = sink;
    }

    /// Replaces the disconnect sink.
    pub fn set_disconnect(&self, sink: Option<DisconnectSink>) {
        *self.disconnect.write() = sink;
    }

    /// Returns `true` while a heartrate sink is registered.
    pub fn has_heartrate(&self) -> bool {
        self.heartrate.read().is_some()
    }

    /// Forwards `sample` to the heartrate sink. Returns `false` if none is set.
    pub fn emit_heartrate(&self, sample: HeartrateSample) -> bool {
        let sink = self.heartrate.read().clone();
        sink.map_or(false, |sink| {
            sink(sample.timestamp_ms, sample.bpm);
            true
        })
    }

    /// Invokes the disconnect sink, if any.
    pub fn emit_disconnect(&self) {
        let sink = self.disconnect.read().clone();
        if let Some(sink) = sink {
            sink();
        }
    }
}
