//! Realtime frame types.
//!
//! Frames cross the realtime socket as JSON text messages; the `type`
//! field selects the variant. Unrecognized client frame types deserialize
//! to [`ClientFrame::Unknown`] and are silently ignored, so newer clients
//! can talk to older farms without breaking the session.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ClientFrame
// ============================================================================

/// A frame sent by a realtime client.
///
/// # Format
///
/// ```json
/// { "type": "open" }
/// { "type": "exchange", "data": "00a40400" }
/// { "type": "button", "data": "right" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Session handshake; answered with [`ServerFrame::Opened`].
    Open,

    /// Request to exchange on the device's control channel.
    Exchange {
        /// Hex-encoded request body.
        data: String,
    },

    /// Button press to forward to the device.
    Button {
        /// One of `left`, `right` or `both`.
        data: String,
    },

    /// Any frame type this farm does not know; ignored.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// ServerFrame
// ============================================================================

/// A frame sent to a realtime client.
///
/// # Format
///
/// ```json
/// { "type": "opened" }
/// { "type": "response", "data": "9000" }
/// { "type": "screen", "data": { "text": "Application", "x": 20, "y": 11 } }
/// { "type": "error", "error": "Unknown device speculos-7" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// The session is attached and serving.
    Opened,

    /// Result of one exchange request.
    Response {
        /// Hex-encoded response body, status word included.
        data: String,
    },

    /// One event from the device's automation stream.
    Screen {
        /// The event exactly as the device emitted it.
        data: Value,
    },

    /// A recoverable failure; the connection stays open.
    Error {
        /// Short human-readable description.
        error: String,
    },
}

// ============================================================================
// Tests
// ============================================================================
