//! Session manager configuration.
//!
//! The settings the core needs:
//! - Vendor device type used for discovery
//! - Discovery window and its timeout multiplier
//! - Connect and status timeouts
//!
//! Loading is left to the embedding application; the core only validates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DEFAULT_DEVICE_TYPE;

/// Errors found while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A single field failed validation.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Name of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} configuration fields are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration validation.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Core session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Vendor device type passed to discovery.
    pub device_type: String,

    /// Discovery window in milliseconds.
    pub search_time_ms: u64,

    /// Discovery waits at most `search_time_ms * search_timeout_factor`.
    pub search_timeout_factor: u32,

    /// Wait for the connect reply and again for receiver registration.
    pub connect_timeout_ms: u64,

    /// Wait for the status reply.
    pub status_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            device_type: DEFAULT_DEVICE_TYPE.to_owned(),
            search_time_ms: 5_000,
            search_timeout_factor: 2,
            connect_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
        }
    }
}

impl CoreConfig {
    /// Checks every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_owned(),
                    message: message.to_owned(),
                });
            }
        };

        check(
            !self.device_type.trim().is_empty(),
            "device_type",
            "must not be empty",
        );
        check(self.search_time_ms > 0, "search_time_ms", "must be positive");
        check(
            self.search_timeout_factor > 0,
            "search_timeout_factor",
            "must be positive",
        );
        check(
            self.connect_timeout_ms > 0,
            "connect_timeout_ms",
            "must be positive",
        );
        check(
            self.status_timeout_ms > 0,
            "status_timeout_ms",
            "must be positive",
        );

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Discovery window.
    #[must_use]
    pub const fn search_time(&self) -> Duration {
        Duration::from_millis(self.search_time_ms)
    }

    /// Connect and registration timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Status reply timeout.
    #[must_use]
    pub const fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Upper bound on the discovery wait for a `search_time` window.
    #[must_use]
    pub fn search_timeout(&self, search_time: Duration) -> Duration {
        search_time.saturating_mul(self.search_timeout_factor)
    }
}
