//! Process configuration.
//!
//! All settings come from the environment and are validated once at startup,
//! before any listener binds. A bad configuration is fatal: the service
//! refuses to start rather than serve requests it cannot honor.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `SEED` | wallet seed passed to every emulator instance | required |
//! | `COINAPPS` | directory holding the application binaries | required |
//! | `PORT` | HTTP listen port | 4343 |
//! | `WS_PORT` | realtime (WebSocket) listen port | 4242 |

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 4343;

/// Default realtime (WebSocket) port.
pub const DEFAULT_WS_PORT: u16 = 4242;

// ============================================================================
// Config
// ============================================================================

/// Validated service configuration.
///
/// Construct with [`Config::from_env`] at startup. The seed is a shared
/// secret and is redacted from `Debug` output.
#[derive(Clone)]
pub struct Config {
    /// Wallet seed handed to every launched instance.
    pub seed: String,

    /// Root directory containing per-model/firmware application binaries.
    pub coinapps: PathBuf,

    /// HTTP API listen port.
    pub http_port: u16,

    /// Realtime (WebSocket) listen port.
    pub ws_port: u16,
}

impl Config {
    /// Reads and validates the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `SEED` or `COINAPPS` is missing, when
    /// `COINAPPS` is not an existing directory, or when a port variable does
    /// not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an injected variable lookup.
    ///
    /// Same validation as [`Config::from_env`]; exists so tests can supply
    /// environments without mutating the real one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let seed = lookup("SEED")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                Error::config(
                    "SEED is not set.\n\
                     Export SEED with the wallet seed phrase to hand to every \
                     emulator instance.",
                )
            })?;

        let coinapps = lookup("COINAPPS")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                Error::config(
                    "COINAPPS is not set.\n\
                     Export COINAPPS with the directory that holds the \
                     application binaries (<model>/<firmware>/<app>/app_<version>.elf).",
                )
            })?;
        validate_coinapps(&coinapps)?;

        let http_port = parse_port("PORT", lookup("PORT"), DEFAULT_HTTP_PORT)?;
        let ws_port = parse_port("WS_PORT", lookup("WS_PORT"), DEFAULT_WS_PORT)?;

        Ok(Self {
            seed,
            coinapps,
            http_port,
            ws_port,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("seed", &"<redacted>")
            .field("coinapps", &self.coinapps)
            .field("http_port", &self.http_port)
            .field("ws_port", &self.ws_port)
            .finish()
    }
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Checks that the binaries root exists and is a directory.
fn validate_coinapps(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::config(format!(
            "COINAPPS directory not found at: {}\n\
             Point COINAPPS at a checkout of the application binaries.",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(Error::config(format!(
            "COINAPPS is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Parses an optional port variable, falling back to the default.
fn parse_port(name: &str, value: Option<String>, default: u16) -> Result<u16> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::config(format!("{name} must be a port number, got: {raw}"))
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[test]
    fn test_missing_seed_is_fatal() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [("COINAPPS", root.as_str())];

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("SEED"));
    }

    #[test]
    fn test_empty_seed_is_fatal() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [("SEED", "  "), ("COINAPPS", root.as_str())];

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("SEED"));
    }

    #[test]
    fn test_missing_coinapps_is_fatal() {
        let pairs = [("SEED", "secret words")];

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("COINAPPS"));
    }

    #[test]
    fn test_nonexistent_coinapps_is_fatal() {
        let pairs = [("SEED", "secret words"), ("COINAPPS", "/no/such/dir")];

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_defaults_applied() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [("SEED", "secret words"), ("COINAPPS", root.as_str())];

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);
        assert_eq!(config.seed, "secret words");
    }

    #[test]
    fn test_port_override() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [
            ("SEED", "secret words"),
            ("COINAPPS", root.as_str()),
            ("PORT", "8080"),
            ("WS_PORT", "9090"),
        ];

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.ws_port, 9090);
    }

    #[test]
    fn test_bad_port_is_fatal() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [
            ("SEED", "secret words"),
            ("COINAPPS", root.as_str()),
            ("PORT", "not-a-port"),
        ];

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_debug_redacts_seed() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_owned();
        let pairs = [("SEED", "secret words"), ("COINAPPS", root.as_str())];

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret words"));
        assert!(rendered.contains("<redacted>"));
    }
}
