//! APDU control channel.
//!
//! Speculos exposes the device's APDU interface as a TCP socket with a
//! 4-byte big-endian length prefix in both directions. A response is the
//! length of its data part followed by the data and two status bytes; the
//! proxied payload is data plus status.
//!
//! The channel is half-duplex. [`ApduLink`] serializes exchanges with an
//! async mutex, which is the process-wide ordering rule for a device:
//! whoever holds the lock owns the one outstanding request.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Trailing status bytes on every response.
const STATUS_LEN: usize = 2;

// ============================================================================
// ApduLink
// ============================================================================

/// Connected control channel of one emulator instance.
pub struct ApduLink {
    peer: SocketAddr,
    stream: Mutex<TcpStream>,
}

impl ApduLink {
    /// Connects to an instance's APDU port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the connection fails.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            peer: addr,
            stream: Mutex::new(stream),
        })
    }

    /// Performs one APDU exchange and returns data plus status bytes.
    ///
    /// Concurrent callers are admitted one at a time; no timeout is applied
    /// beyond what the socket itself enforces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an oversized request and
    /// [`Error::Io`] when the socket fails mid-exchange.
    pub async fn exchange(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let len = u32::try_from(apdu.len())
            .map_err(|_| Error::protocol("APDU request exceeds the frame size limit"))?;

        let mut stream = self.stream.lock().await;
        stream.write_u32(len).await?;
        stream.write_all(apdu).await?;
        stream.flush().await?;

        let data_len = stream.read_u32().await? as usize;
        let mut payload = vec![0u8; data_len + STATUS_LEN];
        stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Address of the connected instance.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl fmt::Debug for ApduLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduLink")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
