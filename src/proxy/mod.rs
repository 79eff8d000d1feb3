//! Realtime protocol proxy.
//!
//! Bridges WebSocket clients to emulator devices. Clients speak small JSON
//! frames; the proxy translates them onto the device's binary transports
//! and streams automation events back out.
//!
//! ```text
//!  client ──frames──▶ RealtimeServer ──session──▶ Device ──▶ emulator
//!     ◀──opened/response/screen/error──┘
//! ```
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`RealtimeServer`] | Accepts connections, routes each to a session |
//! | [`ClientFrame`] | Frames a client may send |
//! | [`ServerFrame`] | Frames the proxy sends back |

pub mod frames;
pub mod server;

pub(crate) mod session;

pub use frames::{ClientFrame, ServerFrame};
pub use server::RealtimeServer;
