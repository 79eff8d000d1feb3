//! Container runtime seam.
//!
//! The launcher drives containers through [`ContainerRuntime`] instead of
//! shelling out directly, so the whole launch path (readiness, retry,
//! teardown, supervision) runs in tests against an in-process fake. The
//! production implementation is [`DockerCli`].

// ============================================================================
// Imports
// ============================================================================

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;

// ============================================================================
// EmulatorHandle
// ============================================================================

/// Boxed byte stream carrying one of a container's output channels.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A started container, as seen by the launcher.
pub struct EmulatorHandle {
    /// Client process driving the container, if the runtime has one.
    ///
    /// Killed (not waited) when the device is destroyed; removing the
    /// container is what actually stops the emulator.
    pub child: Option<Child>,

    /// Diagnostic stream; readiness is classified from its lines.
    pub diagnostics: OutputStream,

    /// Regular output stream, drained into the logs when present.
    pub output: Option<OutputStream>,
}

// ============================================================================
// ContainerRuntime
// ============================================================================

/// Starts and removes emulator containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Starts a container with `docker run`-shaped arguments.
    async fn run(&self, args: &[String]) -> Result<EmulatorHandle>;

    /// Force-removes the named container.
    async fn remove(&self, name: &str) -> Result<()>;
}

// ============================================================================
// DockerCli
// ============================================================================

/// [`ContainerRuntime`] backed by the `docker` command-line client.
#[derive(Debug, Default)]
pub struct DockerCli;

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, args: &[String]) -> Result<EmulatorHandle> {
        let mut child = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::launch_failure(format!("failed to spawn docker: {err}")))?;

        let diagnostics = child
            .stderr
            .take()
            .map(|stream| Box::new(stream) as OutputStream)
            .ok_or_else(|| Error::launch_failure("docker child has no stderr handle"))?;
        let output = child
            .stdout
            .take()
            .map(|stream| Box::new(stream) as OutputStream);

        Ok(EmulatorHandle {
            child: Some(child),
            diagnostics,
            output,
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let result = Command::new("docker")
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                Error::teardown(DeviceId::from(name), format!("failed to spawn docker: {err}"))
            })?;

        if result.status.success() {
            Ok(())
        } else {
            let detail = String::from_utf8_lossy(&result.stderr);
            let first_line = detail.lines().next().unwrap_or("unknown error");
            Err(Error::teardown(DeviceId::from(name), first_line))
        }
    }
}
