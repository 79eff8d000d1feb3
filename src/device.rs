//! Device records and their lifecycle.
//!
//! Each [`Device`] owns:
//! - One emulator container (addressed by name for teardown)
//! - One APDU control channel (unique port)
//! - One button link and one automation hub
//!
//! Handles are cheap clones over shared state; the registry hands them out
//! to the HTTP and realtime layers. Once destroyed, every operation on any
//! clone fails with [`Error::UnknownDevice`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::launcher::{ContainerRuntime, PortBlock};
use crate::transport::{ApduLink, AutomationHub, ButtonCommand, ButtonLink};

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards the container client process and kills it when dropped.
struct ProcessGuard {
    /// The child process handle, if the runtime exposed one.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    /// Creates a new process guard.
    fn new(child: Option<Child>) -> Self {
        let pid = child.as_ref().and_then(Child::id).unwrap_or(0);
        debug!(pid, "Process guard created");
        Self { child, pid }
    }

    /// Takes the child out; the caller owns the kill.
    fn take(&mut self) -> Option<Child> {
        self.child.take()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for a device.
pub(crate) struct DeviceInner {
    /// Unique identifier, also the container name.
    id: DeviceId,
    /// Host ports reserved for this instance.
    ports: PortBlock,
    /// Runtime used to remove the container on destroy.
    runtime: Arc<dyn ContainerRuntime>,
    /// Protected process handle.
    process: Mutex<ProcessGuard>,
    /// Control channel.
    apdu: ApduLink,
    /// Button endpoint.
    buttons: ButtonLink,
    /// Automation event fan-out.
    automation: AutomationHub,
    /// Set exactly once; everything afterwards is UnknownDevice.
    destroyed: AtomicBool,
}

// ============================================================================
// Device
// ============================================================================

/// A handle to a live emulator instance.
///
/// The device owns the container, its control channel and its event hub.
/// Clones share one underlying record.
#[derive(Clone)]
pub struct Device {
    /// Shared inner state.
    inner: Arc<DeviceInner>,
}

// ============================================================================
// Device - Display
// ============================================================================

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("apdu_port", &self.inner.ports.apdu)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Device - Constructor
// ============================================================================

impl Device {
    /// Creates a device record over an already-ready instance.
    pub(crate) fn new(
        id: DeviceId,
        ports: PortBlock,
        runtime: Arc<dyn ContainerRuntime>,
        child: Option<Child>,
        apdu: ApduLink,
        buttons: ButtonLink,
        automation: AutomationHub,
    ) -> Self {
        debug!(id = %id, apdu_port = ports.apdu, "Device record created");
        Self {
            inner: Arc::new(DeviceInner {
                id,
                ports,
                runtime,
                process: Mutex::new(ProcessGuard::new(child)),
                apdu,
                buttons,
                automation,
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Device - Accessors
// ============================================================================

impl Device {
    /// Returns the device id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    /// Returns the host ports reserved for this instance.
    #[inline]
    #[must_use]
    pub fn ports(&self) -> PortBlock {
        self.inner.ports
    }

    /// Returns `true` once the device has been destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Number of realtime subscribers currently attached.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.automation.subscriber_count()
    }

    /// Fails with UnknownDevice once the destroyed flag is set.
    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::unknown_device(self.inner.id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// Device - Operations
// ============================================================================

impl Device {
    /// Performs one APDU exchange against the instance.
    ///
    /// Exchanges are serialized per device by the control channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] after destroy, otherwise whatever
    /// the control channel reports.
    pub async fn exchange(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        self.ensure_live()?;
        self.inner.apdu.exchange(apdu).await
    }

    /// Sends a button tap to the instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] after destroy, otherwise whatever
    /// the button link reports.
    pub async fn press_button(&self, command: ButtonCommand) -> Result<()> {
        self.ensure_live()?;
        self.inner.buttons.press(command).await
    }

    /// Subscribes to the instance's automation events.
    ///
    /// The first subscriber starts the relay; later ones share it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] after destroy.
    pub fn subscribe_events(&self) -> Result<broadcast::Receiver<Value>> {
        self.ensure_live()?;
        Ok(self.inner.automation.subscribe())
    }
}

// ============================================================================
// Device - Lifecycle
// ============================================================================

impl Device {
    /// Destroys the instance: kills the client process and removes the
    /// container.
    ///
    /// Idempotent. The first caller performs the teardown; every later or
    /// racing call observes the destroyed flag and returns `Ok` without
    /// touching the container again.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error when container removal fails; the record
    /// still counts as destroyed.
    pub async fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            debug!(id = %self.inner.id, "Destroy already performed");
            return Ok(());
        }

        info!(id = %self.inner.id, "Destroying device");

        // The swap above makes this the only task that ever takes the
        // child, so the lock is never held across an await.
        let child = self.inner.process.lock().take();
        if let Some(mut child) = child {
            debug!(id = %self.inner.id, "Killing container client process");
            if let Err(e) = child.kill().await {
                debug!(id = %self.inner.id, error = %e, "Failed to kill process");
            }
            if let Err(e) = child.wait().await {
                debug!(id = %self.inner.id, error = %e, "Failed to wait for process");
            }
        }

        self.inner.runtime.remove(self.inner.id.as_str()).await?;
        info!(id = %self.inner.id, "Device destroyed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
