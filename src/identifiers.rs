//! Identifier types for devices and realtime clients.
//!
//! All identifiers are newtypes so they cannot be mixed up at call sites.
//!
//! | Type | Backing | Created by |
//! |------|---------|------------|
//! | [`DeviceId`] | `speculos-<n>` string | the port allocator's counter draw |
//! | [`ClientId`] | UUID v4 | each accepted realtime connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// DeviceId
// ============================================================================

/// Process-unique identifier for one emulator instance.
///
/// Ids are minted from the same monotonic counter that derives the
/// instance's port block, so they are strictly increasing and never reused
/// within a process lifetime. The string form doubles as the container name,
/// which is how a later teardown addresses the instance.
///
/// Client-supplied strings (URL path segments, query parameters) convert via
/// [`From`]; an id that was never issued simply fails registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Prefix shared by every issued id.
    const PREFIX: &'static str = "speculos-";

    /// Creates the id for the given counter draw.
    #[inline]
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        Self(format!("{}{index}", Self::PREFIX))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the counter draw this id was minted from.
    ///
    /// `None` for strings that did not come out of [`DeviceId::from_index`].
    #[must_use]
    pub fn index(&self) -> Option<u64> {
        self.0.strip_prefix(Self::PREFIX)?.parse().ok()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ============================================================================
// ClientId
// ============================================================================

/// Identifier for one attached realtime connection.
///
/// Only used to correlate log lines of a connection's lifecycle; never sent
/// over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh random id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
