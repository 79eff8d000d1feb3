//! Error types for the Speculos device farm.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use speculos_farm::{Result, Error};
//!
//! async fn example(farm: &Farm, spec: DeviceSpec) -> Result<()> {
//!     let device = farm.create_device(&spec).await?;
//!     device.destroy().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Launch | [`Error::LaunchConflict`], [`Error::LaunchFatal`], [`Error::LaunchFailure`], [`Error::LaunchCancelled`] |
//! | Lookup | [`Error::UnknownDevice`] |
//! | Protocol | [`Error::Protocol`] |
//! | Teardown | [`Error::Teardown`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::DeviceId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a mandatory setting is missing or invalid. Fatal at
    /// startup: the service refuses to open any listener with a bad
    /// configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Launch Errors
    // ========================================================================
    /// A host port of the allocated block was already bound.
    ///
    /// Retryable: the launcher tears the attempt down and tries again with a
    /// fresh port block.
    #[error("Port {port} already in use")]
    LaunchConflict {
        /// First port of the block that failed to bind.
        port: u16,
    },

    /// The container name was already taken.
    ///
    /// Not retryable: a stale emulator container from an earlier run holds
    /// the name, and an operator has to remove it.
    #[error("Launch failed: {message}")]
    LaunchFatal {
        /// Actionable description of the collision.
        message: String,
    },

    /// The emulator exited before signalling readiness.
    ///
    /// Carries the last diagnostic line observed, if any.
    #[error("Emulator failed to start: {message}")]
    LaunchFailure {
        /// Last diagnostic output before the process went away.
        message: String,
    },

    /// The launch was cancelled before the device was registered.
    ///
    /// Returned when the device was destroyed mid-launch or the registry is
    /// draining for shutdown.
    #[error("Launch of {id} was cancelled")]
    LaunchCancelled {
        /// Id of the rejected launch.
        id: DeviceId,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Operation against a missing or destroyed device.
    #[error("Unknown device: {id}")]
    UnknownDevice {
        /// The id that did not resolve to a live device.
        id: DeviceId,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unparseable realtime frame.
    ///
    /// Recovered locally: the client gets an error frame and the connection
    /// stays open.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Teardown Errors
    // ========================================================================
    /// Container removal failed.
    ///
    /// Surfaced to the caller that requested the destroy; logged and
    /// swallowed everywhere else.
    #[error("Teardown of {id} failed: {message}")]
    Teardown {
        /// Device whose container could not be removed.
        id: DeviceId,
        /// Description of the removal failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a port conflict error.
    #[inline]
    pub fn launch_conflict(port: u16) -> Self {
        Self::LaunchConflict { port }
    }

    /// Creates a non-retryable launch error.
    #[inline]
    pub fn launch_fatal(message: impl Into<String>) -> Self {
        Self::LaunchFatal {
            message: message.into(),
        }
    }

    /// Creates a launch failure error.
    #[inline]
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::LaunchFailure {
            message: message.into(),
        }
    }

    /// Creates a cancelled launch error.
    #[inline]
    pub fn launch_cancelled(id: DeviceId) -> Self {
        Self::LaunchCancelled { id }
    }

    /// Creates an unknown device error.
    #[inline]
    pub fn unknown_device(id: DeviceId) -> Self {
        Self::UnknownDevice { id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a teardown error.
    #[inline]
    pub fn teardown(id: DeviceId, message: impl Into<String>) -> Self {
        Self::Teardown {
            id,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transient port conflict.
    ///
    /// Conflicts are the only launch outcome the launcher retries.
    #[inline]
    #[must_use]
    pub fn is_port_conflict(&self) -> bool {
        matches!(self, Self::LaunchConflict { .. })
    }

    /// Returns `true` if this is any launch error.
    #[inline]
    #[must_use]
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            Self::LaunchConflict { .. }
                | Self::LaunchFatal { .. }
                | Self::LaunchFailure { .. }
                | Self::LaunchCancelled { .. }
        )
    }

    /// Returns `true` if this error names a missing device.
    #[inline]
    #[must_use]
    pub fn is_unknown_device(&self) -> bool {
        matches!(self, Self::UnknownDevice { .. })
    }

    /// Returns `true` if the realtime layer recovers from this error
    /// without closing the client connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::UnknownDevice { .. } | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
