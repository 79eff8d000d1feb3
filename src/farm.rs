//! Device farm coordinator.
//!
//! [`Farm`] is the entry point the HTTP and realtime layers share. It wires
//! a [`Launcher`] to a [`DeviceRegistry`] and exposes the whole device
//! lifecycle behind a cheaply cloneable handle.
//!
//! # Example
//!
//! ```no_run
//! use speculos_farm::{Config, DeviceModel, DeviceSpec, Farm};
//!
//! # async fn example() -> speculos_farm::Result<()> {
//! let config = Config::from_env()?;
//! let farm = Farm::new(&config);
//!
//! let device = farm
//!     .create_device(&DeviceSpec {
//!         model: DeviceModel::NanoS,
//!         firmware: "2.1.0".to_owned(),
//!         app_name: "Bitcoin".to_owned(),
//!         app_version: "2.4.1".to_owned(),
//!         dependency: None,
//!     })
//!     .await?;
//!
//! let reply = device.exchange(&[0x00, 0xa4, 0x04, 0x00]).await?;
//! # let _ = reply;
//! farm.release_device(device.id()).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{self, AppCandidate, AppSearch};
use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::identifiers::DeviceId;
use crate::launcher::{ContainerRuntime, DeviceSpec, DockerCli, Launcher, PortAllocator};
use crate::registry::DeviceRegistry;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the farm.
pub(crate) struct FarmInner {
    /// Root directory with the application binaries.
    pub coinapps: PathBuf,

    /// Live device records.
    pub registry: Arc<DeviceRegistry>,

    /// Launch pipeline feeding the registry.
    pub launcher: Launcher,
}

// ============================================================================
// Farm
// ============================================================================

/// Emulator farm coordinator.
///
/// The farm is responsible for:
/// - Launching emulator instances and registering them as devices
/// - Resolving device ids for the realtime and HTTP layers
/// - Tearing devices down, individually or all at once
#[derive(Clone)]
pub struct Farm {
    /// Shared inner state.
    pub(crate) inner: Arc<FarmInner>,
}

impl fmt::Debug for Farm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Farm")
            .field("coinapps", &self.inner.coinapps)
            .field("device_count", &self.device_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Farm - Public API
// ============================================================================

impl Farm {
    /// Creates a farm backed by the `docker` command-line client.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_runtime(config, Arc::new(DockerCli))
    }

    /// Creates a farm on an explicit container backend.
    #[must_use]
    pub fn with_runtime(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::assemble(
            config.seed.clone(),
            config.coinapps.clone(),
            PortAllocator::new(),
            runtime,
        )
    }

    /// Launches an emulator for `spec` and returns the registered device.
    ///
    /// # Errors
    ///
    /// Returns the launch taxonomy of [`Launcher::launch`].
    pub async fn create_device(&self, spec: &DeviceSpec) -> Result<Device> {
        self.inner.launcher.launch(spec).await
    }

    /// Looks up a live device.
    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.inner.registry.get(id)
    }

    /// Number of live devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.inner.registry.device_count()
    }

    /// Destroys a device by id.
    ///
    /// Unknown ids are a no-op, so repeated or racing releases of the same
    /// device all succeed while the underlying teardown runs exactly once.
    /// A release that races an in-flight launch for the same id rejects
    /// that launch instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Teardown`](crate::Error::Teardown) when container
    /// removal fails.
    pub async fn release_device(&self, id: &DeviceId) -> Result<()> {
        if let Some(device) = self.inner.registry.remove(id) {
            return device.destroy().await;
        }

        if self.inner.registry.cancel_pending(id) {
            debug!(id = %id, "Release raced an in-flight launch; launch will be rejected");
            return Ok(());
        }

        // The launch may have completed between the two checks above.
        if let Some(device) = self.inner.registry.remove(id) {
            return device.destroy().await;
        }

        debug!(id = %id, "Release of unknown device id is a no-op");
        Ok(())
    }

    /// Destroys every device and refuses launches from here on.
    ///
    /// Teardown failures are logged, not returned; one stuck container must
    /// not keep the rest alive.
    pub async fn destroy_all(&self) -> Result<()> {
        let devices = self.inner.registry.drain();
        info!(count = devices.len(), "Destroying all devices");

        for device in devices {
            if let Err(error) = device.destroy().await {
                warn!(id = %device.id(), error = %error, "Teardown failed during shutdown");
            }
        }

        Ok(())
    }

    /// Resolves an application binary matching `search` under the
    /// configured binaries root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) when the root cannot be read.
    pub async fn find_app_candidate(&self, search: &AppSearch) -> Result<Option<AppCandidate>> {
        catalog::find_app_candidate(&self.inner.coinapps, search).await
    }
}

// ============================================================================
// Farm - Internal API
// ============================================================================

impl Farm {
    fn assemble(
        seed: String,
        coinapps: PathBuf,
        allocator: PortAllocator,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let launcher = Launcher::new(
            seed,
            coinapps.clone(),
            allocator,
            Arc::clone(&registry),
            runtime,
        );

        Self {
            inner: Arc::new(FarmInner {
                coinapps,
                registry,
                launcher,
            }),
        }
    }

    /// Farm on a scripted runtime with an offset port range, so tests
    /// binding real sockets stay out of each other's way.
    #[cfg(test)]
    pub(crate) fn for_tests(runtime: Arc<dyn ContainerRuntime>, first_index: u64) -> Self {
        Self::assemble(
            "abandon abandon about".to_owned(),
            PathBuf::from("./apps-root"),
            PortAllocator::starting_at(first_index),
            runtime,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
