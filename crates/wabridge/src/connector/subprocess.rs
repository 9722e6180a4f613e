//! Session client backed by a sidecar subprocess.
//!
//! The sidecar embeds the WhatsApp library and speaks the wabridge session protocol
//! (JSON Lines over stdio). This module spawns it, bridges its stdio, and
//! correlates command results with pending requests.
//!
//! Restarting is not handled here. When the process dies the current connection
//! attempt is reported as closed and the lifecycle controller decides what to do.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use wabridge_protocol::{ClientCommand, ClientEvent, CloseReason};

use super::{ConnectorError, EventSink, LifecycleEvent, SessionClient};

/// Environment variable carrying the credential directory to the sidecar.
pub const AUTH_DIR_ENV: &str = "WABRIDGE_AUTH_DIR";

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type PendingReply = oneshot::Sender<Result<Option<String>, ConnectorError>>;
type PendingRequests = Arc<DashMap<String, PendingReply>>;

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub auth_dir: PathBuf,
    pub send_timeout: Duration,
}

/// A running sidecar process.
struct Running {
    command_tx: mpsc::Sender<ClientCommand>,
    sink_tx: watch::Sender<EventSink>,
    task: JoinHandle<()>,
}

impl Running {
    fn is_alive(&self) -> bool {
        !self.command_tx.is_closed() && !self.task.is_finished()
    }
}

/// [`SessionClient`] that drives a sidecar subprocess.
pub struct SubprocessClient {
    config: SubprocessConfig,
    running: Mutex<Option<Running>>,
    pending: PendingRequests,
}

impl SubprocessClient {
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the child process with proper configuration.
    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env(AUTH_DIR_ENV, &self.config.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // On Linux, make sure the sidecar dies with us
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                // PR_SET_PDEATHSIG = 1, SIGTERM = 15
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }

    /// Start the sidecar and its I/O task, returning the command sender.
    fn start(&self, sink: EventSink) -> Result<Running, ConnectorError> {
        info!(
            command = %self.config.command,
            auth_dir = %self.config.auth_dir.display(),
            "Spawning session sidecar"
        );

        let mut child = self.spawn_child().map_err(ConnectorError::Spawn)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ConnectorError::Spawn(std::io::Error::other(
                "sidecar stdio was not piped",
            )));
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (sink_tx, sink_rx) = watch::channel(sink);

        let io = SidecarIo {
            child,
            stdin,
            stdout,
            command_rx,
            sink_rx,
            pending: self.pending.clone(),
        };
        let task = tokio::spawn(io.run());

        Ok(Running {
            command_tx,
            sink_tx,
            task,
        })
    }

    async fn command_sender(&self) -> Option<mpsc::Sender<ClientCommand>> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .filter(|r| r.is_alive())
            .map(|r| r.command_tx.clone())
    }
}

#[async_trait]
impl SessionClient for SubprocessClient {
    async fn connect(&self, sink: EventSink) -> Result<(), ConnectorError> {
        let epoch = sink.epoch();
        let command_tx = {
            let mut running = self.running.lock().await;
            match running.as_ref().filter(|r| r.is_alive()) {
                Some(r) => {
                    // Reuse the process; route its events to the new attempt.
                    r.sink_tx.send_replace(sink);
                    r.command_tx.clone()
                }
                None => {
                    let started = self.start(sink)?;
                    let tx = started.command_tx.clone();
                    *running = Some(started);
                    tx
                }
            }
        };

        debug!(epoch, "Sending connect to session sidecar");
        command_tx
            .send(ClientCommand::Connect)
            .await
            .map_err(|_| ConnectorError::ChannelClosed)
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ConnectorError> {
        let Some(command_tx) = self.command_sender().await else {
            return Err(ConnectorError::NotRunning);
        };

        let request_id = ulid::Ulid::new().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), reply_tx);

        let command = ClientCommand::SendText {
            request_id: request_id.clone(),
            to: recipient.to_string(),
            text: text.to_string(),
        };
        if command_tx.send(command).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ConnectorError::ChannelClosed);
        }

        match tokio::time::timeout(self.config.send_timeout, reply_rx).await {
            Ok(Ok(result)) => result.map(|message_id| message_id.unwrap_or(request_id)),
            Ok(Err(_)) => Err(ConnectorError::NotRunning),
            Err(_elapsed) => {
                self.pending.remove(&request_id);
                warn!(request_id = %request_id, "Send timed out");
                Err(ConnectorError::Timeout(self.config.send_timeout))
            }
        }
    }

    async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        debug!("Sending shutdown to session sidecar");
        let _ = running.command_tx.send(ClientCommand::Shutdown).await;
        let mut task = running.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Session sidecar did not stop in time, killing it");
            task.abort();
        }
    }
}

// ============================================================================
// Sidecar I/O
// ============================================================================

/// Bridges one sidecar process's stdio.
struct SidecarIo {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    command_rx: mpsc::Receiver<ClientCommand>,
    sink_rx: watch::Receiver<EventSink>,
    pending: PendingRequests,
}

impl SidecarIo {
    async fn run(self) {
        let SidecarIo {
            mut child,
            mut stdin,
            stdout,
            mut command_rx,
            sink_rx,
            pending,
        } = self;
        let mut stdout_reader = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<ClientEvent>(&line) {
                                Ok(event) => dispatch(event, &sink_rx, &pending).await,
                                Err(e) => {
                                    warn!(line = %line, error = %e, "Failed to parse sidecar event");
                                }
                            }
                        }
                        Ok(None) => {
                            debug!("Sidecar stdout closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Error reading sidecar stdout");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("Command channel closed");
                        break;
                    };
                    let is_shutdown = matches!(command, ClientCommand::Shutdown);
                    if let Err(e) = write_command(&mut stdin, &command).await {
                        error!(error = %e, "Failed to write to sidecar stdin");
                        break;
                    }
                    if is_shutdown {
                        // Give the sidecar a moment to close its session cleanly
                        let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
                        break;
                    }
                }

                status = child.wait() => {
                    match status {
                        Ok(status) => info!(status = %status, "Session sidecar exited"),
                        Err(e) => error!(error = %e, "Error waiting for session sidecar"),
                    }
                    // Events written just before exit may still be buffered
                    while let Ok(Ok(Some(line))) =
                        tokio::time::timeout(Duration::from_millis(200), stdout_reader.next_line()).await
                    {
                        if let Ok(event) = serde_json::from_str::<ClientEvent>(&line) {
                            dispatch(event, &sink_rx, &pending).await;
                        }
                    }
                    break;
                }
            }
        }

        // Close the command channel first so the client sees this process as dead
        command_rx.close();
        let _ = child.kill().await;

        fail_pending(&pending);
        let sink = sink_rx.borrow().clone();
        sink.emit(LifecycleEvent::Closed {
            reason: CloseReason::ConnectionLost,
        })
        .await;
    }
}

async fn write_command(stdin: &mut ChildStdin, command: &ClientCommand) -> std::io::Result<()> {
    let mut line = serde_json::to_string(command).map_err(std::io::Error::other)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Route one sidecar event to the lifecycle sink or a pending request.
async fn dispatch(event: ClientEvent, sink_rx: &watch::Receiver<EventSink>, pending: &PendingRequests) {
    let lifecycle = match event {
        ClientEvent::Ready { version, library } => {
            info!(version = %version, library = ?library, "Session sidecar ready");
            return;
        }
        ClientEvent::PairingCode { code, expires_in } => {
            debug!(expires_in = ?expires_in, "Pairing code issued");
            LifecycleEvent::PairingIssued { code }
        }
        ClientEvent::ConnectionOpen { account } => LifecycleEvent::Opened { account },
        ClientEvent::ConnectionClosed { reason, message } => {
            debug!(reason = %reason, message = ?message, "Sidecar reported connection closed");
            LifecycleEvent::Closed { reason }
        }
        ClientEvent::Message(data) => LifecycleEvent::MessageReceived(data),
        ClientEvent::CommandOk {
            request_id,
            message_id,
        } => {
            match pending.remove(&request_id) {
                Some((_, reply)) => {
                    let _ = reply.send(Ok(message_id));
                }
                None => debug!(request_id = %request_id, "Result for unknown request"),
            }
            return;
        }
        ClientEvent::CommandError {
            request_id,
            code,
            message,
        } => {
            warn!(request_id = %request_id, code = %code, message = %message, "Sidecar command failed");
            if let Some((_, reply)) = pending.remove(&request_id) {
                let _ = reply.send(Err(ConnectorError::Remote { code, message }));
            }
            return;
        }
        ClientEvent::Pong {
            request_id,
            uptime_seconds,
        } => {
            debug!(request_id = %request_id, uptime_seconds, "Sidecar pong");
            return;
        }
        ClientEvent::Error { code, message } => {
            warn!(code = %code, message = %message, "Sidecar error");
            return;
        }
    };

    let sink = sink_rx.borrow().clone();
    if !sink.emit(lifecycle).await {
        debug!("Lifecycle controller gone, dropping event");
    }
}

/// Fail every in-flight request; the process that would answer them is gone.
fn fail_pending(pending: &PendingRequests) {
    let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
    for id in ids {
        if let Some((_, reply)) = pending.remove(&id) {
            let _ = reply.send(Err(ConnectorError::NotRunning));
        }
    }
}
