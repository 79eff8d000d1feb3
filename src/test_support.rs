//! Shared test fixtures.
//!
//! [`FakeRuntime`] stands in for the docker client: each scripted launch
//! writes a realistic diagnostic transcript into the handle and, when the
//! script reaches readiness, serves the emulator's endpoints on the port
//! block the launcher advertised. The APDU endpoint echoes request bodies,
//! the button endpoint records raw bytes, and the automation endpoint
//! replays lines pushed through [`FakeRuntime::feed_automation`]. Launch
//! and removal calls are recorded so tests can assert on the exact
//! container traffic.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};

use crate::error::{Error, Result};
use crate::launcher::{
    ContainerRuntime, EmulatorHandle, OutputStream, APDU_PORT_BASE, AUTOMATION_PORT_BASE,
    BUTTON_PORT_BASE,
};

// ============================================================================
// LaunchScript
// ============================================================================

/// One scripted launch outcome.
pub(crate) enum LaunchScript {
    /// Report readiness and serve the emulator endpoints.
    Ready,

    /// Like [`LaunchScript::Ready`], but hold the readiness line back until
    /// the gate fires.
    ReadyWhen(oneshot::Receiver<()>),

    /// Report the advertised ports as already bound, then end the stream.
    PortConflict,

    /// Report the container name as taken, then end the stream.
    NameConflict,

    /// Print one diagnostic line and exit before readiness.
    ExitEarly(&'static str),
}

// ============================================================================
// FakeRuntime
// ============================================================================

/// In-process [`ContainerRuntime`] driven by a queue of [`LaunchScript`]s.
pub(crate) struct FakeRuntime {
    scripts: Mutex<VecDeque<LaunchScript>>,
    runs: Mutex<Vec<Vec<String>>>,
    removed: Mutex<Vec<String>>,
    button_bytes: Arc<Mutex<Vec<u8>>>,
    automation_tx: broadcast::Sender<String>,
    automation_pending: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl FakeRuntime {
    /// Creates a runtime that plays `scripts` in order and fails any
    /// launch past the end of the queue.
    pub(crate) fn scripted(scripts: Vec<LaunchScript>) -> Self {
        let (automation_tx, _) = broadcast::channel(64);
        Self {
            scripts: Mutex::new(scripts.into()),
            runs: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            button_bytes: Arc::new(Mutex::new(Vec::new())),
            automation_tx,
            automation_pending: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    /// Argument vectors of every launch, in order.
    pub(crate) fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().clone()
    }

    /// Container names removed, in order.
    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    /// Raw bytes the button endpoints received, in arrival order.
    pub(crate) fn button_bytes(&self) -> Vec<u8> {
        self.button_bytes.lock().clone()
    }

    /// Emits one line on the automation stream of every ready instance.
    ///
    /// Lines fed before any relay has connected are buffered and replayed
    /// on the first connection, in order.
    pub(crate) async fn feed_automation(&self, line: &str) {
        if self.automation_tx.receiver_count() == 0 {
            self.automation_pending.lock().await.push(line.to_owned());
        } else {
            let _ = self.automation_tx.send(line.to_owned());
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, args: &[String]) -> Result<EmulatorHandle> {
        self.runs.lock().push(args.to_vec());

        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::launch_failure("launch script exhausted"))?;

        let name = arg_value(args, "--name").unwrap_or("speculos-0").to_owned();
        let ports = ScriptPorts::parse(args)?;

        let (reader, mut writer) = tokio::io::duplex(4096);

        match script {
            LaunchScript::Ready => self.serve_ready(ports, writer, None).await?,
            LaunchScript::ReadyWhen(gate) => self.serve_ready(ports, writer, Some(gate)).await?,
            LaunchScript::PortConflict => {
                let apdu_port = ports.apdu;
                tokio::spawn(async move {
                    let line = format!(
                        "docker: Error response from daemon: Ports are not available: \
                         listen tcp 0.0.0.0:{apdu_port}: bind: address already in use.\n"
                    );
                    let _ = writer.write_all(line.as_bytes()).await;
                });
            }
            LaunchScript::NameConflict => {
                tokio::spawn(async move {
                    let line = format!(
                        "docker: Error response from daemon: Conflict. The container name \
                         \"/{name}\" is already in use by container \"3f6bab4a90ec\". You have \
                         to remove (or rename) that container to be able to reuse that name.\n"
                    );
                    let _ = writer.write_all(line.as_bytes()).await;
                });
            }
            LaunchScript::ExitEarly(line) => {
                tokio::spawn(async move {
                    let _ = writer.write_all(line.as_bytes()).await;
                    let _ = writer.write_all(b"\n").await;
                });
            }
        }

        Ok(EmulatorHandle {
            child: None,
            diagnostics: Box::new(reader) as OutputStream,
            output: None,
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.removed.lock().push(name.to_owned());
        Ok(())
    }
}

// ============================================================================
// FakeRuntime - Endpoint Serving
// ============================================================================

impl FakeRuntime {
    /// Binds the advertised endpoints, then reports readiness once `gate`
    /// (when present) fires. The diagnostic stream stays open afterwards,
    /// like a running container's would.
    async fn serve_ready(
        &self,
        ports: ScriptPorts,
        mut writer: DuplexStream,
        gate: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        tokio::spawn(echo_apdu(bind_fake(ports.apdu).await?));
        tokio::spawn(record_buttons(
            bind_fake(ports.button).await?,
            Arc::clone(&self.button_bytes),
        ));
        tokio::spawn(replay_automation(
            bind_fake(ports.automation).await?,
            self.automation_tx.clone(),
            Arc::clone(&self.automation_pending),
        ));

        tokio::spawn(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            let _ = writer
                .write_all(b"speculos.seproxyhal: using SDK version 2.1 on nanos\n")
                .await;
            std::future::pending::<()>().await;
        });

        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// The fake endpoints derived from a `docker run`-shaped argument list.
#[derive(Clone, Copy)]
struct ScriptPorts {
    apdu: u16,
    button: u16,
    automation: u16,
}

impl ScriptPorts {
    fn parse(args: &[String]) -> Result<Self> {
        Ok(Self {
            apdu: parse_mapped_port(args, APDU_PORT_BASE)?,
            button: parse_mapped_port(args, BUTTON_PORT_BASE)?,
            automation: parse_mapped_port(args, AUTOMATION_PORT_BASE)?,
        })
    }
}

/// Value following `flag` in a `docker run`-shaped argument list.
fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

/// Host side of the `-p host:container` mapping onto `container_port`.
fn parse_mapped_port(args: &[String], container_port: u16) -> Result<u16> {
    let suffix = format!(":{container_port}");
    args.windows(2)
        .filter(|pair| pair[0] == "-p")
        .find_map(|pair| pair[1].strip_suffix(suffix.as_str()))
        .and_then(|host| host.parse().ok())
        .ok_or_else(|| {
            Error::launch_failure(format!("no -p mapping onto {container_port} in args"))
        })
}

async fn bind_fake(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|err| Error::launch_failure(format!("fake bind on {port} failed: {err}")))
}

/// Serves the APDU wire protocol, echoing each request body back with a
/// success status word.
async fn echo_apdu(listener: TcpListener) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            loop {
                let Ok(len) = stream.read_u32().await else {
                    return;
                };
                let mut payload = vec![0u8; len as usize];
                if stream.read_exact(&mut payload).await.is_err() {
                    return;
                }
                if write_apdu_reply(&mut stream, &payload).await.is_err() {
                    return;
                }
            }
        });
    }
}

async fn write_apdu_reply(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_u32(data.len() as u32).await?;
    stream.write_all(data).await?;
    stream.write_all(&[0x90, 0x00]).await?;
    stream.flush().await
}

/// Accumulates every byte arriving on the button endpoint.
async fn record_buttons(listener: TcpListener, sink: Arc<Mutex<Vec<u8>>>) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
                }
            }
        });
    }
}

/// Forwards fed automation lines to every connected relay, replaying the
/// backlog accumulated before the first connection.
async fn replay_automation(
    listener: TcpListener,
    tx: broadcast::Sender<String>,
    pending: Arc<tokio::sync::Mutex<Vec<String>>>,
) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut rx = tx.subscribe();
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let backlog: Vec<String> = pending.lock().await.drain(..).collect();
            for line in backlog {
                if write_line(&mut stream, &line).await.is_err() {
                    return;
                }
            }
            while let Ok(line) = rx.recv().await {
                if write_line(&mut stream, &line).await.is_err() {
                    return;
                }
            }
        });
    }
}

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}
