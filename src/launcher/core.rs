//! Emulator launch pipeline.
//!
//! [`Launcher`] turns a [`DeviceSpec`] into a live [`Device`]. Each attempt
//! allocates a fresh [`PortBlock`], starts a container and watches its
//! diagnostic stream until [`classify_line`] yields a verdict:
//!
//! - ready: settle briefly, open the control channel, register the device
//! - port conflict: tear the instance down and retry with a fresh block,
//!   up to [`MAX_LAUNCH_RETRIES`] times
//! - name conflict: fail without retry; an operator must remove the stale
//!   container
//! - stream ends first: fail, carrying the last diagnostic line observed
//!
//! After registration a supervisor task keeps draining the diagnostic
//! stream so an emulator that dies on its own is removed from the registry
//! instead of lingering as a dead record.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::Child;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::registry::DeviceRegistry;
use crate::transport::{ApduLink, AutomationHub, ButtonLink};

use super::ports::{PortAllocator, PortBlock};
use super::readiness::{classify_line, is_apdu_echo, ReadinessSignal};
use super::runtime::{ContainerRuntime, EmulatorHandle, OutputStream};
use super::spec::DeviceSpec;

// ============================================================================
// Constants
// ============================================================================

/// Fresh-block retries granted after a port conflict.
pub const MAX_LAUNCH_RETRIES: u32 = 3;

/// Pause between the readiness line and the first control-channel connect.
/// The emulator logs readiness slightly before its sockets accept.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Pause before re-attempting a conflicted launch.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Remaining diagnostic stream handed to the supervisor once ready.
type DiagnosticLines = Lines<BufReader<OutputStream>>;

// ============================================================================
// Launcher
// ============================================================================

/// Spawns emulator instances and registers them as live devices.
pub struct Launcher {
    /// Master seed passed to every instance.
    seed: String,

    /// Host directory holding the application binaries, mounted into each
    /// container.
    coinapps: PathBuf,

    /// Source of disjoint port blocks.
    allocator: PortAllocator,

    /// Registry receiving launched devices.
    registry: Arc<DeviceRegistry>,

    /// Container backend.
    runtime: Arc<dyn ContainerRuntime>,
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("coinapps", &self.coinapps)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Launcher - Public API
// ============================================================================

impl Launcher {
    /// Creates a launcher feeding the given registry.
    pub(crate) fn new(
        seed: String,
        coinapps: PathBuf,
        allocator: PortAllocator,
        registry: Arc<DeviceRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            seed,
            coinapps,
            allocator,
            registry,
            runtime,
        }
    }

    /// Launches an emulator for `spec` and registers it.
    ///
    /// Port conflicts are retried with a freshly allocated block (and a
    /// fresh device id) up to [`MAX_LAUNCH_RETRIES`] times; any other
    /// failure is returned as-is after the half-started instance is torn
    /// down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchFatal`] on a container name collision,
    /// [`Error::LaunchCancelled`] when the device was destroyed before the
    /// launch completed, and [`Error::LaunchFailure`] when the emulator
    /// exits early or conflicts persist past the retry budget.
    pub async fn launch(&self, spec: &DeviceSpec) -> Result<Device> {
        let mut retries_left = MAX_LAUNCH_RETRIES;

        loop {
            let ports = self.allocator.next();
            let id = DeviceId::from_index(ports.index());
            self.registry.begin_launch(&id)?;

            match self.launch_once(&id, spec, ports).await {
                Ok(device) => return Ok(device),
                Err(error) => {
                    self.registry.abort_launch(&id);

                    if error.is_port_conflict() {
                        if retries_left == 0 {
                            return Err(Error::launch_failure(format!(
                                "Port conflict persisted through {} attempts",
                                MAX_LAUNCH_RETRIES + 1
                            )));
                        }
                        retries_left -= 1;
                        warn!(
                            id = %id,
                            retries_left,
                            "Port conflict, retrying with a fresh block"
                        );
                        sleep(RETRY_DELAY).await;
                        continue;
                    }

                    return Err(error);
                }
            }
        }
    }
}

// ============================================================================
// Launcher - Internal API
// ============================================================================

impl Launcher {
    /// Runs one launch attempt end to end.
    async fn launch_once(
        &self,
        id: &DeviceId,
        spec: &DeviceSpec,
        ports: PortBlock,
    ) -> Result<Device> {
        let mut args = spec.container_args(id, &ports, &self.coinapps);
        info!(id = %id, "Launching emulator: docker {}", args.join(" "));

        // The seed goes on the command line but never into the logs.
        args.push("--seed".to_owned());
        args.push(self.seed.clone());

        let EmulatorHandle {
            child,
            diagnostics,
            output,
        } = self.runtime.run(&args).await?;

        let lines = match self.drive_readiness(id, ports, diagnostics).await {
            Ok(lines) => lines,
            Err(error) => {
                // On a name collision the container with that name belongs
                // to someone else; removing it would destroy theirs.
                let remove_container = !matches!(error, Error::LaunchFatal { .. });
                self.teardown_failed(id, child, remove_container).await;
                return Err(error);
            }
        };

        sleep(SETTLE_DELAY).await;

        let control = SocketAddr::from(([127, 0, 0, 1], ports.apdu));
        let apdu = match ApduLink::connect(control).await {
            Ok(link) => link,
            Err(error) => {
                self.teardown_failed(id, child, true).await;
                return Err(Error::launch_failure(format!(
                    "Control channel on port {} refused after readiness: {error}",
                    ports.apdu
                )));
            }
        };

        let device = Device::new(
            id.clone(),
            ports,
            Arc::clone(&self.runtime),
            child,
            apdu,
            ButtonLink::new(SocketAddr::from(([127, 0, 0, 1], ports.button))),
            AutomationHub::new(id.clone(), SocketAddr::from(([127, 0, 0, 1], ports.automation))),
        );

        if let Err(error) = self.registry.insert(device.clone()) {
            // Destroyed mid-launch or the process is shutting down.
            if let Err(teardown) = device.destroy().await {
                warn!(id = %id, error = %teardown, "Teardown of cancelled launch failed");
            }
            return Err(error);
        }

        self.spawn_supervisor(device.clone(), lines);
        if let Some(output) = output {
            Self::spawn_output_drain(id.clone(), output);
        }

        info!(id = %id, apdu_port = ports.apdu, "Device ready");
        Ok(device)
    }

    /// Consumes diagnostic lines until the attempt reaches a verdict.
    ///
    /// On success the remaining stream is returned so the supervisor can
    /// keep draining it.
    async fn drive_readiness(
        &self,
        id: &DeviceId,
        ports: PortBlock,
        diagnostics: OutputStream,
    ) -> Result<DiagnosticLines> {
        let mut lines = BufReader::new(diagnostics).lines();
        let mut last_line: Option<String> = None;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(Error::launch_failure(match last_line {
                        Some(last) => format!("Emulator exited before readiness: {last}"),
                        None => "Emulator exited before readiness".to_owned(),
                    }));
                }
                Err(error) => {
                    return Err(Error::launch_failure(format!(
                        "Diagnostic stream failed before readiness: {error}"
                    )));
                }
            };

            match classify_line(&line) {
                ReadinessSignal::Ready => {
                    debug!(id = %id, "Emulator reported ready");
                    return Ok(lines);
                }
                ReadinessSignal::PortConflict => {
                    warn!(id = %id, line = %line, "Port block already bound");
                    return Err(Error::launch_conflict(ports.apdu));
                }
                ReadinessSignal::Fatal => {
                    return Err(Error::launch_fatal(format!(
                        "Container name {id} is already in use; remove the stale \
                         container (docker rm -f {id}) and retry"
                    )));
                }
                ReadinessSignal::Pending => {
                    debug!(id = %id, "{line}");
                    last_line = Some(line);
                }
            }
        }
    }

    /// Kills the spawned process and, unless the container name belongs to
    /// another instance, removes the container.
    async fn teardown_failed(&self, id: &DeviceId, child: Option<Child>, remove_container: bool) {
        if let Some(mut child) = child
            && let Err(error) = child.kill().await
        {
            debug!(id = %id, error = %error, "Failed to kill launch process");
        }

        if remove_container
            && let Err(error) = self.runtime.remove(id.as_str()).await
        {
            debug!(id = %id, error = %error, "Failed to remove half-started container");
        }
    }

    /// Follows a registered device's diagnostic stream until it ends.
    ///
    /// An end of stream with the destroyed flag unset means the emulator
    /// died on its own; the record is removed and torn down so later
    /// lookups fail fast instead of hitting a dead socket.
    fn spawn_supervisor(&self, device: Device, mut lines: DiagnosticLines) {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let id = device.id().clone();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        // Exchange echoes are already visible on the
                        // realtime side; don't duplicate them here.
                        if !is_apdu_echo(&line) {
                            debug!(id = %id, "{line}");
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            if !device.is_destroyed() {
                warn!(id = %id, "Emulator exited unexpectedly");
                let _ = registry.remove(&id);
                if let Err(error) = device.destroy().await {
                    warn!(id = %id, error = %error, "Teardown after unexpected exit failed");
                }
            }
        });
    }

    /// Drains an instance's stdout so the pipe never fills up.
    fn spawn_output_drain(id: DeviceId, output: OutputStream) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(output).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(id = %id, "{line}");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
