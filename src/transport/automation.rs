//! Automation event stream.
//!
//! Speculos reports UI state transitions as newline-delimited JSON records
//! on a dedicated TCP port. [`AutomationHub`] owns one relay per device: a
//! background task reading that socket and broadcasting each parsed record
//! to every subscriber. The relay starts lazily with the first subscriber
//! and stops once a broadcast finds no subscribers left; the next subscriber
//! starts a fresh one.
//!
//! Per-device ordering is the broadcast channel's delivery order, so all
//! subscribers observe the same sequence.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::identifiers::DeviceId;

// ============================================================================
// Constants
// ============================================================================

/// Broadcast buffer per device; slow subscribers past this lag lose events.
const EVENT_BUFFER: usize = 256;

// ============================================================================
// AutomationHub
// ============================================================================

/// Fan-out point for one device's automation events.
pub struct AutomationHub {
    id: DeviceId,
    addr: SocketAddr,
    events: broadcast::Sender<Value>,
    relay_running: Arc<Mutex<bool>>,
}

impl AutomationHub {
    /// Creates a hub for an instance's automation port. No connection is
    /// made until the first subscriber arrives.
    #[must_use]
    pub fn new(id: DeviceId, addr: SocketAddr) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            id,
            addr,
            events,
            relay_running: Arc::new(Mutex::new(false)),
        }
    }

    /// Subscribes to the device's event stream, starting the relay if this
    /// is the first subscriber.
    ///
    /// Delivery begins at subscription time; earlier events are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        // Receiver first: the relay's stop path counts receivers under the
        // running lock, so the new subscription must exist before that
        // check can run.
        let receiver = self.events.subscribe();
        self.ensure_relay();
        receiver
    }

    /// Number of currently attached subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Spawns the relay task unless one is already running.
    fn ensure_relay(&self) {
        let mut running = self.relay_running.lock();
        if *running {
            return;
        }
        *running = true;

        let id = self.id.clone();
        let addr = self.addr;
        let events = self.events.clone();
        let flag = Arc::clone(&self.relay_running);
        tokio::spawn(relay(id, addr, events, flag));
    }
}

impl fmt::Debug for AutomationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationHub")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Relay Task
// ============================================================================

/// Reads the automation socket line by line and broadcasts parsed records.
async fn relay(
    id: DeviceId,
    addr: SocketAddr,
    events: broadcast::Sender<Value>,
    running: Arc<Mutex<bool>>,
) {
    debug!(device = %id, %addr, "automation relay starting");

    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(device = %id, error = %err, "automation connect failed");
            *running.lock() = false;
            return;
        }
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let record: Value = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(device = %id, error = %err, "skipping unparseable automation line");
                        continue;
                    }
                };

                if events.send(record).is_err() {
                    // Nobody is listening. Re-check under the running lock:
                    // a subscriber racing us has already created its
                    // receiver before reading the flag, so either we see it
                    // here and keep going, or it sees the flag cleared and
                    // starts a fresh relay.
                    let mut running = running.lock();
                    if events.receiver_count() == 0 {
                        *running = false;
                        debug!(device = %id, "automation relay stopping, no subscribers");
                        return;
                    }
                }
            }
            Ok(None) => {
                debug!(device = %id, "automation stream ended");
                break;
            }
            Err(err) => {
                warn!(device = %id, error = %err, "automation stream failed");
                break;
            }
        }
    }
    *running.lock() = false;
}

// ============================================================================
// Tests
// ============================================================================
