//! Unified error types for the hitoe core library.
//!
//! This module provides a unified error type [`HitoeError`] that covers every
//! failure the session manager can surface to its callers. The sensor codec
//! keeps its own [`ParseError`] and converts into [`HitoeError`] at the
//! boundary.
//!
//! Outcomes that are part of normal operation (a sensor that could not be
//! found, a wrong pincode, a failed receiver registration) are *not* errors;
//! they are reported through [`crate::ConnectResult`].
//!
//! # Example
//!
//! ```rust
//! use hitoe_core::error::{HitoeError, Result};
//! use hitoe_core::protocol::RequestKind;
//!
//! fn check_ack(ack: u32) -> Result<()> {
//!     if ack != 0 {
//!         return Err(HitoeError::RequestRejected { kind: RequestKind::Connect, code: ack });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`ParseError`]: crate::sensor::ParseError

use thiserror::Error;

use crate::protocol::RequestKind;

/// The unified error type for all hitoe operations.
#[derive(Debug, Error)]
pub enum HitoeError {
    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// The vendor transport refused a request synchronously.
    ///
    /// The vendor API is assumed to be misused when this happens, so it is
    /// never retried by the core.
    #[error("Transport rejected {kind} request with ack code {code:#04x}")]
    RequestRejected {
        /// Kind of the rejected request.
        kind: RequestKind,
        /// Raw acknowledgement code returned by the transport.
        code: u32,
    },

    // =========================================================================
    // PARSE ERRORS
    // =========================================================================
    /// A sensor descriptor or status block had the wrong shape.
    #[error("Parse error: {0}")]
    Parse(#[from] crate::sensor::ParseError),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// Receiver registration was requested without an established session.
    #[error("No sensor session is established. Connect to a sensor first.")]
    NotConnected,

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for hitoe operations.
pub type Result<T> = std::result::Result<T, HitoeError>;

impl HitoeError {
    /// Returns `true` if the vendor transport was involved in this failure.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::RequestRejected { .. })
    }

    /// Returns `true` if this error came from decoding vendor text.
    #[inline]
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns `true` if retrying the same call later may succeed.
    ///
    /// A malformed status block is usually a transient vendor state; a
    /// rejected request means the API was called incorrectly and will keep
    /// failing.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::NotConnected)
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RequestRejected { .. } => "REQUEST_REJECTED",
            Self::Parse(_) => "PARSE_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
