//! Button endpoint.
//!
//! Speculos drives the device's physical buttons over a TCP socket taking
//! ASCII characters: uppercase presses, lowercase releases. A tap is a
//! press/release pair, so `left` is `Ll`, `right` is `Rr` and `both` is
//! `LRlr` (press both, release both).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// ButtonCommand
// ============================================================================

/// A button tap requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonCommand {
    /// Tap the left button.
    Left,

    /// Tap the right button.
    Right,

    /// Tap both buttons together.
    Both,
}

impl ButtonCommand {
    /// Returns the press/release byte sequence for this tap.
    #[inline]
    #[must_use]
    pub fn wire_bytes(&self) -> &'static [u8] {
        match self {
            Self::Left => b"Ll",
            Self::Right => b"Rr",
            Self::Both => b"LRlr",
        }
    }
}

impl FromStr for ButtonCommand {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "both" => Ok(Self::Both),
            other => Err(Error::protocol(format!("unknown button specifier: {other}"))),
        }
    }
}

impl fmt::Display for ButtonCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ButtonLink
// ============================================================================

/// Lazily connected button endpoint of one emulator instance.
///
/// The socket is opened on the first press and kept for the device's
/// lifetime. A failed write drops the cached socket so the next press
/// reconnects.
pub struct ButtonLink {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
}

impl ButtonLink {
    /// Creates an unconnected link to an instance's button port.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: Mutex::new(None),
        }
    }

    /// Sends one tap to the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when connecting or writing fails.
    pub async fn press(&self, command: ButtonCommand) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(TcpStream::connect(self.addr).await?);
        }

        // Checked above; taking it back lets a failed write clear the slot.
        let Some(stream) = guard.as_mut() else {
            return Err(Error::protocol("button link lost its stream"));
        };
        let written = async {
            stream.write_all(command.wire_bytes()).await?;
            stream.flush().await
        }
        .await;

        if let Err(err) = written {
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }
}

impl fmt::Debug for ButtonLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonLink")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
