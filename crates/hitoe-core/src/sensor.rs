//! Sensor descriptor and status block codec.
//!
//! The vendor transport describes sensors and live sessions as plain text:
//!
//! ```text
//! sensor descriptor:  type,id,address,mode,key1|key2|...
//! status row:         session,sensor,connection,key1|key2,_,_
//! ```
//!
//! Rows are separated by `\n`, `\r` or `\r\n`. The canonical form of a
//! [`SensorDescriptor`] is also used as a lookup key (pincodes are stored
//! under it), so data keys are always rendered in sorted order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{DATA_KEY_HEARTRATE, MODE_REALTIME};

const COLUMN_SEPARATOR: char = ',';
const DATA_KEYS_SEPARATOR: char = '|';

const STATUS_COLUMNS: usize = 6;

const STATUS_SESSION_COLUMN: usize = 0;
const STATUS_ID_COLUMN: usize = 1;
const STATUS_CONNECTION_COLUMN: usize = 2;
const STATUS_DATA_KEYS_COLUMN: usize = 3;

static ROW_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r\n|\n|\r").expect("row separator pattern is valid"));

/// Errors produced while decoding vendor text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A sensor line did not have exactly five columns.
    #[error("invalid sensor info '{line}': expected 5 columns, found {found}")]
    SensorColumns {
        /// The offending line.
        line: String,
        /// Number of columns found.
        found: usize,
    },

    /// A status row did not have exactly six columns.
    #[error("invalid status row '{row}': expected 6 columns, found {found}")]
    StatusColumns {
        /// The offending row.
        row: String,
        /// Number of columns found.
        found: usize,
    },
}

/// One discoverable sensor.
///
/// Equality and hashing are structural over every field, including the set
/// of data keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SensorDescriptor {
    kind: String,
    id: String,
    address: String,
    mode: String,
    data_keys: BTreeSet<String>,
}

impl SensorDescriptor {
    /// Builds a descriptor from its parts.
    pub fn new<I, S>(
        kind: impl Into<String>,
        id: impl Into<String>,
        address: impl Into<String>,
        mode: impl Into<String>,
        data_keys: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            id: id.into(),
            address: address.into(),
            mode: mode.into(),
            data_keys: data_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Device type.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Stable sensor identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Physical address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Capability mode.
    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Capability tags, sorted.
    #[must_use]
    pub const fn data_keys(&self) -> &BTreeSet<String> {
        &self.data_keys
    }

    /// Returns `true` if this sensor can stream heartrate live.
    #[must_use]
    pub fn is_realtime_heartrate(&self) -> bool {
        self.mode == MODE_REALTIME && self.data_keys.contains(DATA_KEY_HEARTRATE)
    }

    /// Canonical text form, identical to the vendor wire encoding.
    #[must_use]
    pub fn to_canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},",
            self.kind, self.id, self.address, self.mode
        )?;
        for (i, key) in self.data_keys.iter().enumerate() {
            if i > 0 {
                write!(f, "{DATA_KEYS_SEPARATOR}")?;
            }
            f.write_str(key)?;
        }
        Ok(())
    }
}

impl FromStr for SensorDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sensor(s)
    }
}

impl TryFrom<String> for SensorDescriptor {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_sensor(&value)
    }
}

impl From<SensorDescriptor> for String {
    fn from(sensor: SensorDescriptor) -> Self {
        sensor.to_string()
    }
}

/// Parses one sensor line.
///
/// The line must split into exactly five columns. An empty data-key column
/// yields a set holding one empty string.
///
/// # Errors
///
/// Returns [`ParseError::SensorColumns`] when the column count is wrong.
pub fn parse_sensor(line: &str) -> Result<SensorDescriptor, ParseError> {
    let columns: Vec<&str> = line.split(COLUMN_SEPARATOR).collect();
    let [kind, id, address, mode, data_keys] = columns[..] else {
        return Err(ParseError::SensorColumns {
            line: line.to_owned(),
            found: columns.len(),
        });
    };
    Ok(SensorDescriptor::new(
        kind,
        id,
        address,
        mode,
        data_keys.split(DATA_KEYS_SEPARATOR),
    ))
}

/// Splits vendor text into rows on `\r\n`, `\n` or `\r`.
pub fn split_rows(text: &str) -> impl Iterator<Item = &str> {
    ROW_SEPARATOR.split(text)
}

/// Parses a discovery response into the sensors usable for live heartrate.
///
/// Blank lines are skipped. Lines that fail to parse and sensors that are
/// not realtime-heartrate capable are dropped with a log entry.
#[must_use]
pub fn parse_sensor_list(text: &str) -> Vec<SensorDescriptor> {
    let mut sensors = Vec::new();
    for line in split_rows(text).map(str::trim).filter(|l| !l.is_empty()) {
        debug!(line, "Raw sensor found");
        match parse_sensor(line) {
            Ok(sensor) if sensor.is_realtime_heartrate() => sensors.push(sensor),
            Ok(sensor) => debug!(%sensor, "Skipping sensor without realtime heartrate"),
            Err(e) => warn!(error = %e, "Skipping unparsable sensor"),
        }
    }
    sensors
}

/// One live session as reported by the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Sensor the session is connected to.
    pub sensor_id: String,
    /// Data keys being streamed.
    pub data_keys: BTreeSet<String>,
}

/// Key of a [`StatusRecord`] entry: `(session id, connection id)`.
pub type StatusKey = (String, String);

/// Live sessions keyed by `(session id, connection id)`.
pub type StatusRecord = BTreeMap<StatusKey, StatusEntry>;

/// Parses a status block.
///
/// Rows are trimmed and blank rows skipped. Every remaining row must have
/// exactly six columns; unlike discovery, one bad row fails the whole block.
///
/// # Errors
///
/// Returns [`ParseError::StatusColumns`] for the first malformed row.
pub fn parse_status_block(text: &str) -> Result<StatusRecord, ParseError> {
    let mut status = StatusRecord::new();
    for row in split_rows(text).map(str::trim).filter(|r| !r.is_empty()) {
        let columns: Vec<&str> = row.split(COLUMN_SEPARATOR).collect();
        if columns.len() != STATUS_COLUMNS {
            return Err(ParseError::StatusColumns {
                row: row.to_owned(),
                found: columns.len(),
            });
        }
        status.insert(
            (
                columns[STATUS_SESSION_COLUMN].to_owned(),
                columns[STATUS_CONNECTION_COLUMN].to_owned(),
            ),
            StatusEntry {
                sensor_id: columns[STATUS_ID_COLUMN].to_owned(),
                data_keys: columns[STATUS_DATA_KEYS_COLUMN]
                    .split(DATA_KEYS_SEPARATOR)
                    .map(str::to_owned)
                    .collect(),
            },
        );
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor1() -> SensorDescriptor {
        SensorDescriptor::new(
            "TypeA",
            "Sensor1",
            "00:11:22",
            "realtime",
            ["raw.hr", "raw.ecg"],
        )
    }

    #[test]
    fn test_parse_sensor() {
        let sensor = parse_sensor("TypeA,Sensor1,00:11:22,realtime,raw.hr|raw.ecg").unwrap();
        assert_eq!(sensor, sensor1());
        assert_eq!(sensor.kind(), "TypeA");
        assert_eq!(sensor.id(), "Sensor1");
        assert_eq!(sensor.address(), "00:11:22");
        assert_eq!(sensor.mode(), "realtime");
        assert!(sensor.data_keys().contains("raw.ecg"));
    }

    #[test]
    fn test_parse_sensor_rejects_wrong_column_count() {
        assert_eq!(
            parse_sensor("TypeA,Sensor1,00:11:22,realtime"),
            Err(ParseError::SensorColumns {
                line: "TypeA,Sensor1,00:11:22,realtime".into(),
                found: 4,
            })
        );
        assert!(parse_sensor("a,b,c,d,e,f").is_err());
    }

    #[test]
    fn test_empty_data_keys_column_keeps_empty_key() {
        let sensor = parse_sensor("TypeA,Sensor1,00:11:22,realtime,").unwrap();
        assert_eq!(sensor.data_keys().len(), 1);
        assert!(sensor.data_keys().contains(""));
        assert!(!sensor.is_realtime_heartrate());
    }

    #[test]
    fn test_canonical_form_sorts_data_keys() {
        let sensor = SensorDescriptor::new("T", "S", "A", "realtime", ["z.key", "a.key", "m.key"]);
        assert_eq!(sensor.to_canonical(), "T,S,A,realtime,a.key|m.key|z.key");
    }

    #[test]
    fn test_canonical_form_parses_back() {
        let sensors = [
            sensor1(),
            SensorDescriptor::new("hitoe D01", "S2", "AA:BB:CC:DD:EE:FF", "realtime", ["raw.hr"]),
            SensorDescriptor::new(
                "hitoe D01",
                "S3",
                "00:11:22",
                "memory",
                ["raw.acc", "raw.ecg", "raw.hr", "ex.rri.v2"],
            ),
            SensorDescriptor::new("TypeB", "Sensor.4", "00:11:24", "batch", ["zz.last", "aa.first"]),
            SensorDescriptor::new("TypeC", "S5", "00:11:25", "realtime", [""]),
        ];

        for sensor in sensors {
            let canonical = sensor.to_canonical();
            assert_eq!(parse_sensor(&canonical).unwrap(), sensor, "{canonical}");
            assert_eq!(canonical.parse::<SensorDescriptor>().unwrap(), sensor);
            assert_eq!(parse_sensor(&canonical).unwrap().to_canonical(), canonical);
        }
    }

    #[test]
    fn test_unsorted_keys_render_sorted() {
        let sensor = parse_sensor("TypeB,S6,00:11:26,realtime,raw.hr|ex.stress|raw.acc").unwrap();
        assert_eq!(
            sensor.to_canonical(),
            "TypeB,S6,00:11:26,realtime,ex.stress|raw.acc|raw.hr"
        );
        assert_eq!(
            sensor,
            SensorDescriptor::new("TypeB", "S6", "00:11:26", "realtime", ["raw.acc", "ex.stress", "raw.hr"])
        );
    }

    #[test]
    fn test_split_rows_tolerates_line_endings() {
        let rows: Vec<&str> = split_rows("a\nb\r\nc\rd").collect();
        assert_eq!(rows, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_parse_sensor_list_filters_candidates() {
        let sensors = parse_sensor_list(
            "TypeA,Sensor1,00:11:22,realtime,raw.hr|raw.ecg\nTypeA,Sensor2,00:11:23,batch,raw.hr",
        );
        assert_eq!(sensors, vec![sensor1()]);
    }

    #[test]
    fn test_parse_sensor_list_skips_bad_lines_and_blanks() {
        let sensors = parse_sensor_list(
            "\r\nbroken,line\r\n  TypeA,Sensor1,00:11:22,realtime,raw.ecg|raw.hr  \r\nT,S3,A,realtime,raw.acc\n",
        );
        assert_eq!(sensors, vec![sensor1()]);
        assert!(parse_sensor_list("").is_empty());
    }

    #[test]
    fn test_parse_status_block() {
        let status = parse_status_block(
            "s1,Sensor1,c1,raw.hr|raw.ecg,x,y\r\n\r\n s2,Sensor2,,raw.acc,x,y \n",
        )
        .unwrap();

        assert_eq!(status.len(), 2);
        let entry = &status[&("s1".to_owned(), "c1".to_owned())];
        assert_eq!(entry.sensor_id, "Sensor1");
        assert!(entry.data_keys.contains("raw.hr"));
        assert!(status.contains_key(&("s2".to_owned(), String::new())));
    }

    #[test]
    fn test_parse_status_block_rejects_short_row() {
        let err = parse_status_block("s1,Sensor1,c1,raw.hr,x,y\ns2,Sensor2,c2").unwrap_err();
        assert_eq!(
            err,
            ParseError::StatusColumns {
                row: "s2,Sensor2,c2".into(),
                found: 3,
            }
        );
    }

    #[test]
    fn test_parse_status_block_empty_text() {
        assert!(parse_status_block("").unwrap().is_empty());
        assert!(parse_status_block("\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_descriptor_serializes_as_canonical_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            sensor: SensorDescriptor,
        }

        let text = toml::to_string(&Wrapper { sensor: sensor1() }).unwrap();
        assert!(text.contains("TypeA,Sensor1,00:11:22,realtime,raw.ecg|raw.hr"));
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.sensor, sensor1());
    }
}
