//! WebSocket server for realtime device sessions.
//!
//! Accepts connections on a single port; each client names its device with
//! a `?device=<id>` query parameter and gets a dedicated session task. A
//! connection that fails to address a live device is answered with error
//! frames rather than a close, so clients can observe the failure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            RealtimeServer                │
//! │            (single port)                 │
//! │  ┌──────────────────────────────────┐    │
//! │  │ ?device=speculos-1 → Session 1   │    │
//! │  │ ?device=speculos-1 → Session 2   │    │
//! │  │ ?device=speculos-4 → Session 3   │    │
//! │  └──────────────────────────────────┘    │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{
    Request as HandshakeRequest, Response as HandshakeResponse,
};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::farm::Farm;
use crate::identifiers::{ClientId, DeviceId};

use super::session;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for the WebSocket server (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ============================================================================
// RealtimeServer
// ============================================================================

/// Accepts realtime connections and routes each one to a device session.
///
/// # Example
///
/// ```ignore
/// let server = RealtimeServer::bind(4242, farm).await?;
/// println!("WebSocket URL: {}", server.ws_url());
/// ```
pub struct RealtimeServer {
    /// Bound WebSocket port.
    port: u16,

    /// Devices addressable by connecting clients.
    farm: Farm,

    /// Shutdown flag checked by the accept loop.
    shutdown: AtomicBool,
}

// ============================================================================
// RealtimeServer - Constructor
// ============================================================================

impl RealtimeServer {
    /// Binds on localhost and starts the accept loop.
    ///
    /// Pass port `0` to bind a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(port: u16, farm: Farm) -> Result<Arc<Self>> {
        Self::bind_to(DEFAULT_BIND_IP, port, farm).await
    }

    /// Binds on a specific IP and port and starts the accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_to(ip: IpAddr, port: u16, farm: Farm) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        let server = Arc::new(Self {
            port: actual_port,
            farm,
            shutdown: AtomicBool::new(false),
        });

        let server_clone = Arc::clone(&server);
        tokio::spawn(async move {
            server_clone.accept_loop(listener).await;
        });

        info!(port = actual_port, "Realtime server started");

        Ok(server)
    }
}

// ============================================================================
// RealtimeServer - Public API
// ============================================================================

impl RealtimeServer {
    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting new connections.
    ///
    /// Sessions already attached keep running until their transports close;
    /// tearing down their devices is what ends the conversation.
    pub fn shutdown(&self) {
        info!("Realtime server shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// RealtimeServer - Accept Loop
// ============================================================================

impl RealtimeServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag
            match timeout(Duration::from_millis(100), listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => {
                    // Timeout, check the shutdown flag again
                    continue;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one connection and hands it to a session.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let client = ClientId::generate();
        debug!(client = %client, ?addr, "New realtime connection");

        // Capture the request URI during the handshake; the device id rides
        // in its query string.
        let mut request_uri = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &HandshakeRequest, response: HandshakeResponse| {
                request_uri = Some(request.uri().clone());
                Ok(response)
            },
        )
        .await
        .map_err(|e| Error::protocol(format!("WebSocket upgrade failed: {e}")))?;

        let device_id = request_uri
            .as_ref()
            .and_then(|uri| uri.query())
            .and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "device")
                    .map(|(_, value)| DeviceId::from(value.into_owned()))
            });

        let Some(id) = device_id else {
            session::run_inert(
                ws_stream,
                client,
                "Missing device parameter (connect with ?device=<id>)",
            )
            .await;
            return Ok(());
        };

        match self.farm.device(&id) {
            Some(device) => session::run(ws_stream, client, device).await,
            None => {
                let reason = Error::unknown_device(id).to_string();
                session::run_inert(ws_stream, client, &reason).await;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::FakeRuntime;

    fn empty_farm(first_index: u64) -> Farm {
        Farm::for_tests(Arc::new(FakeRuntime::scripted(Vec::new())), first_index)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_binds_ephemeral_port() {
        let server = RealtimeServer::bind(0, empty_farm(250)).await.expect("bind");
        assert!(server.port() > 0);
        assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ws_url_format() {
        let server = RealtimeServer::bind(0, empty_farm(252)).await.expect("bind");
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_stops_accepting() {
        let server = RealtimeServer::bind(0, empty_farm(254)).await.expect("bind");
        let port = server.port();

        server.shutdown();

        // Give the accept loop a moment to notice and drop the listener.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let result = TcpStream::connect(("127.0.0.1", port)).await;
        assert!(result.is_err(), "connect should be refused after shutdown");
    }
}
