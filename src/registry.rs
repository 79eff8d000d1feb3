//! Device registry.
//!
//! Single source of truth for "is this device alive". The realtime and HTTP
//! layers validate every id against it before acting. Besides live records
//! the registry tracks launches still in flight and ids destroyed before
//! their launch completed, so a destroy can reject a pending launch instead
//! of letting it complete into an orphaned record.
//!
//! All state is guarded by sync locks taken in a fixed order
//! (pending, cancelled, records) and never held across await points.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::identifiers::DeviceId;

// ============================================================================
// DeviceRegistry
// ============================================================================

/// Process-wide map from device id to live record.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Live devices.
    records: RwLock<FxHashMap<DeviceId, Device>>,
    /// Ids whose launch is in flight.
    pending: Mutex<FxHashSet<DeviceId>>,
    /// Pending ids destroyed before their launch completed.
    cancelled: Mutex<FxHashSet<DeviceId>>,
    /// Set at shutdown; blocks new launches and inserts.
    draining: AtomicBool,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the registry started draining for shutdown.
    #[inline]
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of live devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.records.read().len()
    }
}

// ============================================================================
// DeviceRegistry - Launch Tracking
// ============================================================================

impl DeviceRegistry {
    /// Marks a launch as in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchCancelled`] when the registry is draining.
    pub fn begin_launch(&self, id: &DeviceId) -> Result<()> {
        if self.is_draining() {
            return Err(Error::launch_cancelled(id.clone()));
        }
        self.pending.lock().insert(id.clone());
        debug!(id = %id, "Launch pending");
        Ok(())
    }

    /// Clears a failed launch's bookkeeping.
    pub fn abort_launch(&self, id: &DeviceId) {
        self.pending.lock().remove(id);
        self.cancelled.lock().remove(id);
    }

    /// Requests cancellation of an in-flight launch.
    ///
    /// Returns `true` when a pending launch was marked; its insert will then
    /// fail and the launcher tears the instance down.
    pub fn cancel_pending(&self, id: &DeviceId) -> bool {
        let pending = self.pending.lock();
        if pending.contains(id) {
            self.cancelled.lock().insert(id.clone());
            debug!(id = %id, "Pending launch marked for cancellation");
            true
        } else {
            false
        }
    }
}

// ============================================================================
// DeviceRegistry - Records
// ============================================================================

impl DeviceRegistry {
    /// Promotes a pending launch into a live record.
    ///
    /// Pending bookkeeping and the record map are updated under one lock
    /// sequence, so a concurrent destroy either cancels the pending launch
    /// or finds the inserted record; it cannot fall between the two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchCancelled`] when the id was destroyed
    /// mid-launch or the registry is draining; the caller still owns the
    /// instance and must tear it down.
    pub fn insert(&self, device: Device) -> Result<()> {
        let id = device.id().clone();

        let mut pending = self.pending.lock();
        let mut cancelled = self.cancelled.lock();
        let mut records = self.records.write();

        pending.remove(&id);
        if cancelled.remove(&id) {
            return Err(Error::launch_cancelled(id));
        }
        if self.is_draining() {
            return Err(Error::launch_cancelled(id));
        }

        records.insert(id.clone(), device);
        debug!(id = %id, live = records.len(), "Device registered");
        Ok(())
    }

    /// Looks up a live device.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.records.read().get(id).cloned()
    }

    /// Removes a device from the map, returning it for teardown.
    #[must_use]
    pub fn remove(&self, id: &DeviceId) -> Option<Device> {
        let removed = self.records.write().remove(id);
        if removed.is_some() {
            debug!(id = %id, "Device removed from registry");
        }
        removed
    }

    /// Starts draining: blocks new launches, cancels pending ones and
    /// empties the map, returning every live record for teardown.
    #[must_use]
    pub fn drain(&self) -> Vec<Device> {
        self.draining.store(true, Ordering::SeqCst);

        {
            let pending = self.pending.lock();
            let mut cancelled = self.cancelled.lock();
            for id in pending.iter() {
                cancelled.insert(id.clone());
            }
        }

        let mut records = self.records.write();
        records.drain().map(|(_, device)| device).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
