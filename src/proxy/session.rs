//! Realtime session loop.
//!
//! One session serves one client connection attached to one device. The
//! loop multiplexes two directions: client frames coming in (open,
//! exchange, button) and automation events going out as screen frames.
//!
//! An exchange is awaited inline in the loop, so its response frame is
//! always written before any automation event that arrives while the
//! device is busy. Bad frames never end the session; they are answered
//! with an error frame and the loop keeps going. Only a transport-level
//! close or failure detaches the client.

// ============================================================================
// Imports
// ============================================================================

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::Result;
use crate::identifiers::ClientId;
use crate::transport::ButtonCommand;

use super::frames::{ClientFrame, ServerFrame};

// ============================================================================
// Types
// ============================================================================

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// Session Loops
// ============================================================================

/// Serves one client attached to a live device until the transport ends.
pub(crate) async fn run(ws_stream: WebSocketStream<TcpStream>, client: ClientId, device: Device) {
    let events = match device.subscribe_events() {
        Ok(events) => events,
        Err(error) => {
            // Destroyed between lookup and attach.
            run_inert(ws_stream, client, &error.to_string()).await;
            return;
        }
    };

    debug!(
        client = %client,
        device = %device.id(),
        subscribers = device.subscriber_count(),
        "Realtime session attached"
    );

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut events = Some(events);

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&device, &text).await
                            && let Err(error) = send_frame(&mut ws_write, &reply).await
                        {
                            debug!(client = %client, error = %error, "Failed to send reply frame");
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(client = %client, "Client closed session");
                        break;
                    }

                    Some(Err(error)) => {
                        debug!(client = %client, error = %error, "Session transport error");
                        break;
                    }

                    None => break,

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            event = next_event(&mut events), if events.is_some() => {
                match event {
                    Ok(data) => {
                        let frame = ServerFrame::Screen { data };
                        if let Err(error) = send_frame(&mut ws_write, &frame).await {
                            debug!(client = %client, error = %error, "Failed to send screen frame");
                            break;
                        }
                    }

                    Err(RecvError::Lagged(missed)) => {
                        warn!(client = %client, missed, "Session fell behind the automation stream");
                    }

                    Err(RecvError::Closed) => {
                        events = None;
                    }
                }
            }
        }
    }

    debug!(client = %client, device = %device.id(), "Realtime session detached");
}

/// Serves a client whose addressing never resolved to a live device.
///
/// The session answers every frame with the same error and stays open;
/// only the transport ends it.
pub(crate) async fn run_inert(
    ws_stream: WebSocketStream<TcpStream>,
    client: ClientId,
    reason: &str,
) {
    debug!(client = %client, reason, "Realtime session running inert");

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let frame = ServerFrame::Error {
        error: reason.to_owned(),
    };

    if send_frame(&mut ws_write, &frame).await.is_err() {
        return;
    }

    while let Some(message) = ws_read.next().await {
        match message {
            Ok(Message::Text(_)) => {
                if send_frame(&mut ws_write, &frame).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(_)) | Err(_) => return,
            _ => {}
        }
    }
}

// ============================================================================
// Frame Handling
// ============================================================================

/// Dispatches one client frame, returning the reply frame if any.
async fn handle_frame(device: &Device, text: &str) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(device = %device.id(), error = %error, "Discarding malformed frame");
            return Some(ServerFrame::Error {
                error: format!("Malformed frame: {error}"),
            });
        }
    };

    match frame {
        ClientFrame::Open => Some(ServerFrame::Opened),
        ClientFrame::Exchange { data } => Some(run_exchange(device, &data).await),
        ClientFrame::Button { data } => run_button(device, &data).await,
        ClientFrame::Unknown => None,
    }
}

/// Runs one exchange and wraps the outcome in a frame.
async fn run_exchange(device: &Device, data: &str) -> ServerFrame {
    let apdu = match hex::decode(data.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            return ServerFrame::Error {
                error: format!("Exchange data is not valid hex: {data}"),
            };
        }
    };

    match device.exchange(&apdu).await {
        Ok(reply) => ServerFrame::Response {
            data: hex::encode(reply),
        },
        Err(error) => ServerFrame::Error {
            error: error.to_string(),
        },
    }
}

/// Forwards one button press. Success produces no reply frame.
async fn run_button(device: &Device, data: &str) -> Option<ServerFrame> {
    let command = match data.parse::<ButtonCommand>() {
        Ok(command) => command,
        Err(error) => {
            return Some(ServerFrame::Error {
                error: error.to_string(),
            });
        }
    };

    match device.press_button(command).await {
        Ok(()) => None,
        Err(error) => Some(ServerFrame::Error {
            error: error.to_string(),
        }),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Serializes and sends one frame.
async fn send_frame(sink: &mut WsSink, frame: &ServerFrame) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Next automation event, or never when the stream is gone.
async fn next_event(
    events: &mut Option<broadcast::Receiver<Value>>,
) -> std::result::Result<Value, RecvError> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use crate::farm::Farm;
    use crate::launcher::{DeviceModel, DeviceSpec};
    use crate::proxy::RealtimeServer;
    use crate::test_support::{FakeRuntime, LaunchScript};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn sample_spec() -> DeviceSpec {
        DeviceSpec {
            model: DeviceModel::NanoS,
            firmware: "2.1.0".to_owned(),
            app_name: "Bitcoin".to_owned(),
            app_version: "2.4.1".to_owned(),
            dependency: None,
        }
    }

    /// Farm with one ready device, plus a realtime server in front of it.
    async fn farm_device_server(
        first_index: u64,
    ) -> (Arc<FakeRuntime>, Farm, String, Arc<RealtimeServer>) {
        let runtime = Arc::new(FakeRuntime::scripted(vec![LaunchScript::Ready]));
        let farm = Farm::for_tests(Arc::clone(&runtime) as _, first_index);
        let device = farm.create_device(&sample_spec()).await.unwrap();
        let id = device.id().to_string();

        let server = RealtimeServer::bind(0, farm.clone()).await.unwrap();
        (runtime, farm, id, server)
    }

    async fn attach(server: &RealtimeServer, device: &str) -> WsClient {
        let url = format!("{}/?device={device}", server.ws_url());
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn send_json(ws: &mut WsClient, value: Value) {
        ws.send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    async fn send_raw(ws: &mut WsClient, raw: &str) {
        ws.send(Message::Text(raw.to_owned().into())).await.unwrap();
    }

    /// Next text frame, parsed; panics after five seconds of silence.
    async fn next_frame(ws: &mut WsClient) -> Value {
        loop {
            let message = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .expect("transport error");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_answers_opened() {
        let (_runtime, _farm, id, server) = farm_device_server(260).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exchange_round_trips_hex() {
        let (_runtime, _farm, id, server) = farm_device_server(265).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "exchange", "data": "00a40400" })).await;

        // The fake emulator echoes the body and appends 0x9000.
        assert_eq!(
            next_frame(&mut ws).await,
            json!({ "type": "response", "data": "00a404009000" })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_frame_keeps_connection() {
        let (_runtime, _farm, id, server) = farm_device_server(270).await;
        let mut ws = attach(&server, &id).await;

        send_raw(&mut ws, "this is not json {{{").await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");

        // The session survived the bad frame.
        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unrecognized_frame_type_is_ignored() {
        let (_runtime, _farm, id, server) = farm_device_server(275).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "ping", "data": 42 })).await;
        send_json(&mut ws, json!({ "type": "open" })).await;

        // No reply for the unknown frame; the next frame answers the open.
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_button_press_forwards_without_reply() {
        let (runtime, _farm, id, server) = farm_device_server(280).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "button", "data": "right" })).await;

        // Press then release, as raw bytes on the button endpoint.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while runtime.button_bytes() != b"Rr" {
            assert!(tokio::time::Instant::now() < deadline, "button bytes never arrived");
            sleep(Duration::from_millis(20)).await;
        }

        // And no frame came back for it.
        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_button_reports_error() {
        let (_runtime, _farm, id, server) = farm_device_server(285).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "button", "data": "middle" })).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_device_gets_error_frame_not_close() {
        let runtime = Arc::new(FakeRuntime::scripted(Vec::new()));
        let farm = Farm::for_tests(runtime, 290);
        let server = RealtimeServer::bind(0, farm).await.unwrap();

        let mut ws = attach(&server, "speculos-999").await;

        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");
        assert!(frame["error"].as_str().unwrap().contains("speculos-999"));

        // Still open: frames keep drawing the same structured error.
        send_json(&mut ws, json!({ "type": "open" })).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_device_parameter_gets_error_frame() {
        let runtime = Arc::new(FakeRuntime::scripted(Vec::new()));
        let farm = Farm::for_tests(runtime, 295);
        let server = RealtimeServer::bind(0, farm).await.unwrap();

        let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();

        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");
        assert!(frame["error"].as_str().unwrap().contains("device"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_screen_events_fan_out_in_order() {
        let (runtime, _farm, id, server) = farm_device_server(300).await;

        let mut first = attach(&server, &id).await;
        let mut second = attach(&server, &id).await;

        // Both sessions are live once their opens are answered.
        send_json(&mut first, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut first).await, json!({ "type": "opened" }));
        send_json(&mut second, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut second).await, json!({ "type": "opened" }));

        for step in 1..=3 {
            runtime
                .feed_automation(&format!(r#"{{"text":"Step {step}","x":10,"y":{step}}}"#))
                .await;
        }

        for ws in [&mut first, &mut second] {
            for step in 1..=3 {
                let frame = next_frame(ws).await;
                assert_eq!(frame["type"], "screen");
                assert_eq!(frame["data"]["text"], format!("Step {step}"));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exchange_response_comes_before_later_screens() {
        let (runtime, _farm, id, server) = farm_device_server(305).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));

        runtime.feed_automation(r#"{"text":"before"}"#).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "screen");

        send_json(&mut ws, json!({ "type": "exchange", "data": "e001000000" })).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "response");

        runtime.feed_automation(r#"{"text":"after"}"#).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "screen");
        assert_eq!(frame["data"]["text"], "after");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_destroyed_device_reports_unknown_on_exchange() {
        let (_runtime, farm, id, server) = farm_device_server(310).await;
        let mut ws = attach(&server, &id).await;

        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));

        farm.release_device(&crate::identifiers::DeviceId::from(id.as_str()))
            .await
            .unwrap();

        send_json(&mut ws, json!({ "type": "exchange", "data": "e001000000" })).await;
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "error");
        assert!(frame["error"].as_str().unwrap().contains("Unknown device"));

        // The transport itself is still up.
        send_json(&mut ws, json!({ "type": "open" })).await;
        assert_eq!(next_frame(&mut ws).await, json!({ "type": "opened" }));
    }
}
