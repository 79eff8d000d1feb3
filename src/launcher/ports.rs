//! Host port allocation for emulator instances.
//!
//! Every instance needs four host ports, one per container-internal
//! endpoint. Blocks are derived from a process-wide counter against fixed
//! bases, so any two live instances always hold disjoint ports and the
//! counter draw doubles as the device number.
//!
//! | Endpoint | Base | Container port |
//! |----------|------|----------------|
//! | APDU (control) | 40000 | 40000 |
//! | VNC (display) | 41000 | 41000 |
//! | Button | 42000 | 42000 |
//! | Automation | 43000 | 43000 |

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Constants
// ============================================================================

/// Host base port for the APDU (control channel) endpoint.
pub const APDU_PORT_BASE: u16 = 40000;

/// Host base port for the VNC (display) endpoint.
pub const VNC_PORT_BASE: u16 = 41000;

/// Host base port for the button endpoint.
pub const BUTTON_PORT_BASE: u16 = 42000;

/// Host base port for the automation (UI events) endpoint.
pub const AUTOMATION_PORT_BASE: u16 = 43000;

// ============================================================================
// PortBlock
// ============================================================================

/// The four host ports reserved for one emulator instance.
///
/// A block belongs to exactly one device record at a time; it is only free
/// for reuse after that record is destroyed and the process restarts the
/// counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBlock {
    index: u64,

    /// Host port mapped to the container's APDU endpoint.
    pub apdu: u16,

    /// Host port mapped to the container's VNC endpoint.
    pub vnc: u16,

    /// Host port mapped to the container's button endpoint.
    pub button: u16,

    /// Host port mapped to the container's automation endpoint.
    pub automation: u16,
}

impl PortBlock {
    /// Computes the block for a given counter draw.
    fn at(index: u64) -> Self {
        let offset = index as u16;
        Self {
            index,
            apdu: APDU_PORT_BASE + offset,
            vnc: VNC_PORT_BASE + offset,
            button: BUTTON_PORT_BASE + offset,
            automation: AUTOMATION_PORT_BASE + offset,
        }
    }

    /// Returns the counter draw this block was derived from.
    ///
    /// The same value names the device id.
    #[inline]
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }
}

// ============================================================================
// PortAllocator
// ============================================================================

/// Process-wide source of disjoint [`PortBlock`]s.
///
/// A single atomic fetch-add makes concurrent draws disjoint and strictly
/// increasing without any locking.
#[derive(Debug)]
pub struct PortAllocator {
    counter: AtomicU64,
}

impl PortAllocator {
    /// Creates an allocator starting at block 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Creates an allocator whose next draw is `index`.
    ///
    /// Tests binding real sockets use this to keep their port ranges apart.
    #[cfg(test)]
    pub(crate) fn starting_at(index: u64) -> Self {
        Self {
            counter: AtomicU64::new(index.saturating_sub(1)),
        }
    }

    /// Reserves the next port block.
    pub fn next(&self) -> PortBlock {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        PortBlock::at(index)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
