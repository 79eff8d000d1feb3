//! Application catalog: scanning and resolving emulator binaries.
//!
//! The binaries root is laid out as
//! `<model>/<firmware>/<app>/app_<version>.elf`. The catalog scans that tree
//! into [`AppCandidate`] values and answers search queries where every field
//! is optional; clients use it to discover which combination to request
//! before creating a device.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::launcher::DeviceModel;

// ============================================================================
// Constants
// ============================================================================

/// Filename shape of an application binary, capturing the version.
static ELF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^app_(.+)\.elf$").expect("hardcoded pattern"));

// ============================================================================
// AppCandidate
// ============================================================================

/// One application binary found in the binaries root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCandidate {
    /// Host path of the binary.
    pub path: PathBuf,

    /// Model whose directory the binary sits under.
    pub model: DeviceModel,

    /// Firmware directory name.
    pub firmware: String,

    /// Application directory name.
    pub app_name: String,

    /// Version captured from the filename.
    pub app_version: String,
}

// ============================================================================
// AppSearch
// ============================================================================

/// Search predicate over scanned candidates.
///
/// Every present field must match: model equal (case-insensitive, so both
/// the wire and directory spellings work), firmware by prefix, application
/// name equal ignoring case and spaces, version by prefix.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSearch {
    /// Model to match, wire or directory spelling.
    #[serde(default)]
    pub model: Option<String>,

    /// Firmware prefix to match.
    #[serde(default)]
    pub firmware: Option<String>,

    /// Application name to match, ignoring case and spaces.
    #[serde(default)]
    pub app_name: Option<String>,

    /// Version prefix to match.
    #[serde(default)]
    pub app_version: Option<String>,
}

impl AppSearch {
    /// Returns `true` when the candidate satisfies every present field.
    #[must_use]
    pub fn matches(&self, candidate: &AppCandidate) -> bool {
        self.model
            .as_deref()
            .is_none_or(|model| model.eq_ignore_ascii_case(candidate.model.wire_name()))
            && self
                .firmware
                .as_deref()
                .is_none_or(|firmware| candidate.firmware.starts_with(firmware))
            && self
                .app_name
                .as_deref()
                .is_none_or(|name| normalized(name) == normalized(&candidate.app_name))
            && self
                .app_version
                .as_deref()
                .is_none_or(|version| candidate.app_version.starts_with(version))
    }
}

/// Application names compare without case or spaces.
fn normalized(name: &str) -> String {
    name.replace(' ', "").to_lowercase()
}

// ============================================================================
// Scanning
// ============================================================================

/// Scans the binaries root into candidates, sorted by path.
///
/// Directories that do not name a known model are skipped, as are files that
/// do not look like application binaries. The sort keeps the result, and
/// therefore [`find_app_candidate`]'s pick, deterministic across platforms.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] when a directory under the root cannot be
/// read.
pub async fn list_app_candidates(root: &Path) -> Result<Vec<AppCandidate>> {
    let mut candidates = Vec::new();

    let mut models = tokio::fs::read_dir(root).await?;
    while let Some(model_entry) = models.next_entry().await? {
        let Some(model) = model_entry
            .file_name()
            .to_str()
            .and_then(DeviceModel::from_dir_name)
        else {
            continue;
        };
        if !model_entry.file_type().await?.is_dir() {
            continue;
        }

        let mut firmwares = tokio::fs::read_dir(model_entry.path()).await?;
        while let Some(firmware_entry) = firmwares.next_entry().await? {
            if !firmware_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(firmware) = firmware_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };

            let mut apps = tokio::fs::read_dir(firmware_entry.path()).await?;
            while let Some(app_entry) = apps.next_entry().await? {
                if !app_entry.file_type().await?.is_dir() {
                    continue;
                }
                let Some(app_name) = app_entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };

                let mut binaries = tokio::fs::read_dir(app_entry.path()).await?;
                while let Some(binary_entry) = binaries.next_entry().await? {
                    let file_name = binary_entry.file_name();
                    let Some(file_name) = file_name.to_str() else {
                        continue;
                    };
                    let Some(captures) = ELF_PATTERN.captures(file_name) else {
                        continue;
                    };

                    candidates.push(AppCandidate {
                        path: binary_entry.path(),
                        model,
                        firmware: firmware.clone(),
                        app_name: app_name.clone(),
                        app_version: captures[1].to_owned(),
                    });
                }
            }
        }
    }

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(candidates)
}

/// Resolves the first candidate matching the search, scanning the root.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] when the scan fails; a search that matches
/// nothing is `Ok(None)`.
pub async fn find_app_candidate(root: &Path, search: &AppSearch) -> Result<Option<AppCandidate>> {
    let candidates = list_app_candidates(root).await?;
    Ok(candidates.into_iter().find(|c| search.matches(c)))
}

// ============================================================================
// Tests
// ============================================================================
