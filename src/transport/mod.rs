//! Device transport layer.
//!
//! Each emulator instance exposes three localhost TCP endpoints, one per
//! mapped host port of its block. This module owns the socket handling for
//! all of them; nothing above it touches raw bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │  Device (Rust)   │                          │  Emulator        │
//! │                  │   length-framed TCP      │  (container)     │
//! │  ApduLink        │◄────────────────────────►│  APDU endpoint   │
//! │  ButtonLink      │─────────────────────────►│  button endpoint │
//! │  AutomationHub   │◄─────────────────────────│  UI event stream │
//! └──────────────────┘   newline-delimited JSON └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `apdu` | Serialized request/response exchanges on the control channel |
//! | `buttons` | Fire-and-forget button presses |
//! | `automation` | Broadcast relay for device-originated UI events |

// ============================================================================
// Submodules
// ============================================================================

/// APDU control channel.
pub mod apdu;

/// Automation event relay.
pub mod automation;

/// Button press channel.
pub mod buttons;

// ============================================================================
// Re-exports
// ============================================================================

pub use apdu::ApduLink;
pub use automation::AutomationHub;
pub use buttons::{ButtonCommand, ButtonLink};
