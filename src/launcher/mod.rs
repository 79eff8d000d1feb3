//! Emulator launching.
//!
//! Everything between "a client asked for a device" and "a registered,
//! ready [`Device`](crate::Device)" lives here.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Launcher`] | Launch pipeline with readiness detection and retry |
//! | [`PortAllocator`] | Process-wide source of disjoint port blocks |
//! | [`PortBlock`] | The four host ports reserved for one instance |
//! | [`DeviceSpec`] | Model, firmware and application selection |
//! | [`DeviceModel`] | Supported hardware wallet models |
//! | [`ReadinessSignal`] | Verdict classified from one diagnostic line |
//! | [`ContainerRuntime`] | Seam over the container backend |
//! | [`DockerCli`] | Production backend shelling out to `docker` |

// ============================================================================
// Submodules
// ============================================================================

/// Launch pipeline.
pub mod core;

/// Port block allocation.
pub mod ports;

/// Diagnostic line classification.
pub mod readiness;

/// Container backends.
pub mod runtime;

/// Device and application selection.
pub mod spec;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Launcher, MAX_LAUNCH_RETRIES};
pub use ports::{
    PortAllocator, PortBlock, APDU_PORT_BASE, AUTOMATION_PORT_BASE, BUTTON_PORT_BASE,
    VNC_PORT_BASE,
};
pub use readiness::{classify_line, ReadinessSignal};
pub use runtime::{ContainerRuntime, DockerCli, EmulatorHandle, OutputStream};
pub use spec::{DeviceModel, DeviceSpec, SPECULOS_IMAGE};

pub(crate) use readiness::is_apdu_echo;
