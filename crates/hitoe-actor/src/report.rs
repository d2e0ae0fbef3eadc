//! Periodic heartrate reports.
//!
//! Every interval the latest sample is wrapped as
//!
//! ```json
//! {"key":"hitoe:1","module":"hitoe","event":"main",
//!  "data":{"id":42,"date":"2024-05-01T09:30:00.250+09:00","heartRate":72,"location":[0.0,0.0,0.0]}}
//! ```
//!
//! and emitted as a structured log event under [`REPORT_TARGET`]. Nothing is
//! sent over the network.

use std::fmt;

use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ReportConfig;
use crate::state::ActorState;
use hitoe_core::HeartrateSample;

/// Event name of regular reports.
pub const EVENT_MAIN: &str = "main";

/// Tracing target of emitted reports.
pub const REPORT_TARGET: &str = "hitoe::report";

/// Report body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Identifies one reporting run.
    pub id: u32,
    /// Sample time, RFC 3339 with milliseconds and offset.
    pub date: String,
    /// Beats per minute.
    pub heart_rate: i32,
    /// Latitude, longitude, altitude. Always zero.
    pub location: [f64; 3],
}

/// A report addressed to its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEnvelope {
    /// Actor key.
    pub key: String,
    /// Module name.
    pub module: String,
    /// Event name.
    pub event: String,
    /// Report body.
    pub data: Report,
}

impl Report {
    /// Builds the report for `sample`, dating it in `tz`.
    ///
    /// Returns `None` if the sample timestamp is out of range.
    #[must_use]
    pub fn from_sample<Tz>(id: u32, sample: HeartrateSample, tz: &Tz) -> Option<Self>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let date = tz.timestamp_millis_opt(sample.timestamp_ms).single()?;
        Some(Self {
            id,
            date: date.to_rfc3339_opts(SecondsFormat::Millis, false),
            heart_rate: sample.bpm,
            location: [0.0; 3],
        })
    }
}

/// Produces reports from the shared state.
#[derive(Debug, Clone)]
pub struct Reporter {
    config: ReportConfig,
    id: u32,
}

impl Reporter {
    /// Creates a reporter for one run, identified by `id`.
    #[must_use]
    pub const fn new(config: ReportConfig, id: u32) -> Self {
        Self { config, id }
    }

    /// Creates a reporter whose run id comes from the clock.
    #[must_use]
    pub fn starting_now(config: ReportConfig) -> Self {
        let now: DateTime<Local> = Local::now();
        Self::new(config, now.timestamp_subsec_nanos())
    }

    /// Builds the envelope for the latest sample in `state`.
    #[must_use]
    pub fn envelope(&self, state: &ActorState) -> Option<ReportEnvelope> {
        let sample = state.latest()?;
        Some(ReportEnvelope {
            key: self.config.actor_key.clone(),
            module: self.config.module.clone(),
            event: EVENT_MAIN.to_owned(),
            data: Report::from_sample(self.id, sample, &Local)?,
        })
    }

    /// Emits one report every interval while the sensor is ready. Never
    /// returns.
    pub async fn run(self, state: ActorState) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !state.is_ready() {
                debug!("Sensor not ready; skipping report");
                continue;
            }
            let Some(envelope) = self.envelope(&state) else {
                debug!("No heartrate yet; skipping report");
                continue;
            };
            match serde_json::to_string(&envelope) {
                Ok(json) => info!(
                    target: REPORT_TARGET,
                    event = %envelope.event,
                    heart_rate = envelope.data.heart_rate,
                    report = %json,
                    "Report"
                ),
                Err(e) => debug!(error = %e, "Could not encode report"),
            }
        }
    }
}
