//! Launch specification and container argument construction.
//!
//! A [`DeviceSpec`] is the client-supplied half of a launch: which model,
//! firmware and application to boot. The process-wide half (seed, binaries
//! root) comes from [`crate::config::Config`]. Argument construction is pure
//! so every flag can be unit-tested without a container runtime.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identifiers::DeviceId;
use crate::launcher::ports::{
    APDU_PORT_BASE, AUTOMATION_PORT_BASE, BUTTON_PORT_BASE, PortBlock, VNC_PORT_BASE,
};

// ============================================================================
// Constants
// ============================================================================

/// Container image every instance runs.
pub const SPECULOS_IMAGE: &str = "ghcr.io/ledgerhq/speculos";

/// Mount point of the binaries root inside the container.
const APPS_MOUNT: &str = "/speculos/apps";

// ============================================================================
// DeviceModel
// ============================================================================

/// Hardware wallet model an instance emulates.
///
/// The serde spelling matches the wire format clients send
/// (`"nanoS"`, `"nanoSP"`, ...); the directory spelling is the lowercase
/// form used for on-disk paths and the emulator's `--model` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    /// Ledger Blue.
    #[serde(rename = "blue")]
    Blue,

    /// Ledger Nano S.
    #[serde(rename = "nanoS")]
    NanoS,

    /// Ledger Nano S Plus.
    #[serde(rename = "nanoSP")]
    NanoSP,

    /// Ledger Nano X.
    #[serde(rename = "nanoX")]
    NanoX,
}

impl DeviceModel {
    /// Returns the lowercase directory spelling.
    #[inline]
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::NanoS => "nanos",
            Self::NanoSP => "nanosp",
            Self::NanoX => "nanox",
        }
    }

    /// Returns the wire spelling clients send.
    #[inline]
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Blue => "blue",
            Self::NanoS => "nanoS",
            Self::NanoSP => "nanoSP",
            Self::NanoX => "nanoX",
        }
    }

    /// Resolves a model from a binaries-root directory name.
    #[must_use]
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "blue" => Some(Self::Blue),
            "nanos" => Some(Self::NanoS),
            "nanosp" => Some(Self::NanoSP),
            "nanox" => Some(Self::NanoX),
            _ => None,
        }
    }

    /// Returns the SDK version to force for this model, if any.
    ///
    /// The nanoX image always runs SDK 1.2; the nanoS SDK tracks the major
    /// and minor of the requested firmware. Other models let the emulator
    /// pick.
    #[must_use]
    fn sdk_version(&self, firmware: &str) -> Option<String> {
        match self {
            Self::NanoX => Some("1.2".to_owned()),
            Self::NanoS => Some(firmware.chars().take(3).collect()),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ============================================================================
// DeviceSpec
// ============================================================================

/// Client-supplied description of the instance to launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Hardware model to emulate.
    pub model: DeviceModel,

    /// Firmware version directory under the model.
    pub firmware: String,

    /// Application name; spaces are stripped for the on-disk directory.
    pub app_name: String,

    /// Application version (the `app_<version>.elf` suffix).
    pub app_version: String,

    /// Optional second application loaded alongside the main one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
}

impl DeviceSpec {
    /// Container-side path of the requested application binary.
    #[must_use]
    pub fn app_path(&self) -> String {
        format!(
            "./apps/{}/{}/{}/app_{}.elf",
            self.model.dir_name(),
            self.firmware,
            self.app_name.replace(' ', ""),
            self.app_version
        )
    }

    /// Container-side path of the dependency binary.
    ///
    /// The dependency directory name is used verbatim; the version is the
    /// main application's.
    fn dependency_path(&self, dependency: &str) -> String {
        format!(
            "./apps/{}/{}/{}/app_{}.elf",
            self.model.dir_name(),
            self.firmware,
            dependency,
            self.app_version
        )
    }

    /// Builds the container runtime argument list for this launch.
    ///
    /// The seed is deliberately absent: the launcher appends it after the
    /// argument list has been logged, so it never reaches the logs.
    #[must_use]
    pub fn container_args(&self, id: &DeviceId, ports: &PortBlock, coinapps: &Path) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            "-v".to_owned(),
            format!("{}:{APPS_MOUNT}", coinapps.display()),
            "-p".to_owned(),
            format!("{}:{APDU_PORT_BASE}", ports.apdu),
            "-p".to_owned(),
            format!("{}:{VNC_PORT_BASE}", ports.vnc),
            "-p".to_owned(),
            format!("{}:{BUTTON_PORT_BASE}", ports.button),
            "-p".to_owned(),
            format!("{}:{AUTOMATION_PORT_BASE}", ports.automation),
            "-e".to_owned(),
            format!("SPECULOS_APPNAME={}:{}", self.app_name, self.app_version),
            "--name".to_owned(),
            id.to_string(),
            SPECULOS_IMAGE.to_owned(),
            "--model".to_owned(),
            self.model.dir_name().to_owned(),
            self.app_path(),
        ];

        if let Some(dependency) = &self.dependency {
            args.push("-l".to_owned());
            args.push(format!("{dependency}:{}", self.dependency_path(dependency)));
        }
        if let Some(sdk) = self.model.sdk_version(&self.firmware) {
            args.push("--sdk".to_owned());
            args.push(sdk);
        }

        args.extend(
            [
                "--display",
                "headless",
                "--vnc-password",
                "live",
                "--apdu-port",
                "40000",
                "--vnc-port",
                "41000",
                "--button-port",
                "42000",
                "--automation-port",
                "43000",
            ]
            .map(str::to_owned),
        );
        args
    }
}

// ============================================================================
// Tests
// ============================================================================
