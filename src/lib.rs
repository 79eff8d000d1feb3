//! Speculos farm - ephemeral Ledger emulator instances over HTTP and WebSocket.
//!
//! This library spawns [Speculos](https://github.com/LedgerHQ/speculos)
//! hardware-wallet emulators in containers and proxies their binary device
//! protocols to test clients.
//!
//! # Architecture
//!
//! The farm follows a service model with two client surfaces:
//!
//! - **HTTP**: create and destroy devices, resolve application binaries
//! - **Realtime (WebSocket)**: per-device JSON frames for APDU exchanges,
//!   button presses and streamed screen events
//!
//! Key design principles:
//!
//! - Each [`Device`] owns: container handle + APDU link + button link +
//!   automation hub
//! - Every launch draws a fresh disjoint four-port block; ids are never
//!   reused within a process lifetime
//! - Readiness is decided by classifying the emulator's diagnostic stream,
//!   with bounded retries on port conflicts
//! - Destroy is reconciled through the registry so it runs exactly once,
//!   even against a launch still in flight
//!
//! # Quick Start
//!
//! ```no_run
//! use speculos_farm::{Config, DeviceModel, DeviceSpec, Farm, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // SEED and COINAPPS come from the environment
//!     let config = Config::from_env()?;
//!     let farm = Farm::new(&config);
//!
//!     // Boot an emulator running the Bitcoin app
//!     let device = farm
//!         .create_device(&DeviceSpec {
//!             model: DeviceModel::NanoS,
//!             firmware: "2.1.0".to_owned(),
//!             app_name: "Bitcoin".to_owned(),
//!             app_version: "2.4.1".to_owned(),
//!             dependency: None,
//!         })
//!         .await?;
//!
//!     // Talk to it over the APDU channel
//!     let response = device.exchange(&[0xe0, 0x01, 0x00, 0x00, 0x00]).await?;
//!     println!("response: {}", hex::encode(&response));
//!
//!     farm.release_device(device.id()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | HTTP control surface |
//! | [`catalog`] | Application binary scanning and search |
//! | [`config`] | Environment configuration |
//! | [`device`] | Live device handle: [`Device`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`farm`] | Service object tying lifecycle and lookups together |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`launcher`] | Port allocation, container launch and readiness |
//! | [`proxy`] | Realtime WebSocket surface |
//! | [`registry`] | Device bookkeeping and destroy reconciliation |
//! | [`transport`] | Binary device transports (internal) |

// ============================================================================
// Modules
// ============================================================================

/// HTTP control surface.
///
/// [`api::router`] builds the axum router served by the binary.
pub mod api;

/// Application binary scanning and search.
///
/// Resolves which `app_<version>.elf` under the binaries root satisfies a
/// client's [`AppSearch`].
pub mod catalog;

/// Environment configuration.
///
/// [`Config::from_env`] validates the mandatory variables up front.
pub mod config;

/// Live device handle.
///
/// A [`Device`] multiplexes one emulator's transports behind a cloneable
/// handle with exactly-once teardown.
pub mod device;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Service object tying lifecycle and lookups together.
pub mod farm;

/// Type-safe identifiers for devices and realtime clients.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Port allocation, container launch and readiness classification.
pub mod launcher;

/// Realtime WebSocket surface.
///
/// JSON frames in, APDU/button calls down, screen events out.
pub mod proxy;

/// Device bookkeeping and destroy reconciliation.
pub mod registry;

/// Binary device transports.
///
/// Internal module speaking the emulator's TCP protocols.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Service types
pub use config::Config;
pub use device::Device;
pub use farm::Farm;

// Catalog types
pub use catalog::{AppCandidate, AppSearch};

// Launch types
pub use launcher::{DeviceModel, DeviceSpec};

// Realtime types
pub use proxy::{ClientFrame, RealtimeServer, ServerFrame};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, DeviceId};
