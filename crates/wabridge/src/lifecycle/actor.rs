//! Controller actor that owns the connection state.
//!
//! Lifecycle events and connect requests are processed one at a time, in arrival
//! order. Every connection attempt gets a new epoch, and events tagged with an
//! older epoch are dropped so a late "closed" from a dead attempt can never
//! override a newer "opened".

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{
    ConnectorError, EventEnvelope, EventSink, InboundMessage, LifecycleEvent, SessionClient,
};
use crate::qr;
use crate::webhook::MessageNotifier;

use super::actor_types::{
    CHANNEL_CAPACITY, ConnectOutcome, ControllerCommand, ControllerOptions, EVENT_CAPACITY,
};
use super::handle::LifecycleHandle;
use super::reconnect::{ReconnectPolicy, RetryCause};
use super::state::{ConnectionSnapshot, PairingArtifact, transition};

/// A scheduled reconnect that has not fired yet.
struct PendingReconnect {
    generation: u64,
    cancel: CancellationToken,
}

// ============================================================================
// Lifecycle Controller
// ============================================================================

/// Spawns the controller actor.
pub struct LifecycleController;

impl LifecycleController {
    /// Spawn the controller for `client`.
    ///
    /// The actor stops when `shutdown_rx` flips to `true`, shutting the client down
    /// on its way out. Await the returned handle to wait for that.
    pub fn spawn(
        client: Arc<dyn SessionClient>,
        notifier: Arc<dyn MessageNotifier>,
        options: ControllerOptions,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (LifecycleHandle, tokio::task::JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionSnapshot::default());

        let actor = ControllerActor {
            snapshot: ConnectionSnapshot::default(),
            epoch: 0,
            attempt_in_flight: false,
            reconnect: None,
            reconnect_generation: 0,
            policy: ReconnectPolicy::new(&options.reconnect),
            print_qr: options.print_qr,
            client: client.clone(),
            notifier,
            state_tx,
            self_tx: command_tx.downgrade(),
            events_tx,
            events_rx,
            command_rx,
            shutdown_rx,
        };

        let task = tokio::spawn(actor.run());
        (LifecycleHandle::new(command_tx, state_rx, client), task)
    }
}

struct ControllerActor {
    // State
    snapshot: ConnectionSnapshot,
    epoch: u64,
    attempt_in_flight: bool,

    // Reconnect
    reconnect: Option<PendingReconnect>,
    reconnect_generation: u64,
    policy: ReconnectPolicy,
    print_qr: bool,

    // Collaborators
    client: Arc<dyn SessionClient>,
    notifier: Arc<dyn MessageNotifier>,

    // Communication
    state_tx: watch::Sender<ConnectionSnapshot>,
    self_tx: mpsc::WeakSender<ControllerCommand>,
    events_tx: mpsc::Sender<EventEnvelope>,
    events_rx: mpsc::Receiver<EventEnvelope>,
    command_rx: mpsc::Receiver<ControllerCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ControllerActor {
    async fn run(mut self) {
        debug!("Lifecycle controller started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!("Lifecycle controller received shutdown signal");
                        break;
                    }
                }

                Some(envelope) = self.events_rx.recv() => {
                    self.handle_event(envelope);
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All handles dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.cancel_reconnect();
        self.client.shutdown().await;
        debug!("Lifecycle controller stopped");
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Connect { reply } => {
                let outcome = self.request_connect();
                let _ = reply.send(outcome);
            }
            ControllerCommand::ConnectFinished { epoch, result } => {
                self.connect_finished(epoch, result);
            }
            ControllerCommand::ReconnectDue { generation } => {
                self.reconnect_due(generation);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Connection attempts
    // ------------------------------------------------------------------------

    fn request_connect(&mut self) -> ConnectOutcome {
        if self.snapshot.state.is_connected() {
            debug!("Connect requested while connected");
            return ConnectOutcome::AlreadyConnected;
        }
        if self.attempt_in_flight {
            debug!(epoch = self.epoch, "Connect requested while attempt in flight");
            return ConnectOutcome::InProgress;
        }

        self.start_attempt();
        ConnectOutcome::Started
    }

    fn start_attempt(&mut self) {
        self.cancel_reconnect();
        self.epoch += 1;
        self.attempt_in_flight = true;

        let epoch = self.epoch;
        info!(epoch, "Starting connection attempt");

        let sink = EventSink::new(epoch, self.events_tx.clone());
        let client = self.client.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = client.connect(sink).await;
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx
                    .send(ControllerCommand::ConnectFinished { epoch, result })
                    .await;
            }
        });
    }

    fn connect_finished(&mut self, epoch: u64, result: Result<(), ConnectorError>) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Ignoring result of superseded attempt");
            return;
        }

        match result {
            Ok(()) => debug!(epoch, "Connection attempt started"),
            Err(e) => {
                warn!(epoch, error = %e, "Connection attempt failed");
                self.attempt_in_flight = false;
                self.schedule_reconnect(RetryCause::ConnectError);
            }
        }
    }

    fn reconnect_due(&mut self, generation: u64) {
        match &self.reconnect {
            Some(pending) if pending.generation == generation => {
                self.reconnect = None;
            }
            _ => {
                debug!(generation, "Ignoring superseded reconnect timer");
                return;
            }
        }

        if self.snapshot.state.is_connected() || self.attempt_in_flight {
            debug!(generation, "Reconnect no longer needed");
            return;
        }

        info!(generation, "Reconnecting");
        self.start_attempt();
    }

    fn schedule_reconnect(&mut self, cause: RetryCause) {
        self.cancel_reconnect();

        self.reconnect_generation += 1;
        let generation = self.reconnect_generation;
        let delay = self.policy.next_delay(cause);
        let cancel = CancellationToken::new();

        info!(
            delay_ms = delay.as_millis() as u64,
            cause = ?cause,
            "Scheduling reconnect"
        );

        let token = cancel.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = self_tx.upgrade() {
                        let _ = tx.send(ControllerCommand::ReconnectDue { generation }).await;
                    }
                }
            }
        });

        self.reconnect = Some(PendingReconnect { generation, cancel });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            debug!(generation = pending.generation, "Cancelling pending reconnect");
            pending.cancel.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle events
    // ------------------------------------------------------------------------

    fn handle_event(&mut self, envelope: EventEnvelope) {
        let EventEnvelope { epoch, event } = envelope;
        if epoch != self.epoch {
            debug!(
                epoch,
                current = self.epoch,
                kind = event.kind(),
                "Dropping event from stale attempt"
            );
            return;
        }

        let from = self.snapshot.state;
        let to = transition(from, &event);

        match event {
            LifecycleEvent::MessageReceived(message) => {
                self.forward_message(*message);
                return;
            }
            LifecycleEvent::PairingIssued { code } => {
                if from.is_connected() {
                    debug!(epoch, "Ignoring pairing code while connected");
                    return;
                }
                self.show_pairing_code(&code);
                self.snapshot.pairing = Some(PairingArtifact {
                    code,
                    issued_at: Utc::now(),
                });
            }
            LifecycleEvent::Opened { account } => {
                self.attempt_in_flight = false;
                self.policy.reset();
                self.cancel_reconnect();
                self.snapshot.pairing = None;
                if account.is_some() {
                    self.snapshot.account = account;
                }
            }
            LifecycleEvent::Closed { reason } => {
                self.attempt_in_flight = false;
                self.snapshot.pairing = None;
                if reason.is_terminal() {
                    info!(epoch, reason = %reason, "Session logged out, not reconnecting");
                    self.cancel_reconnect();
                    self.snapshot.account = None;
                    // Retire the attempt so a trailing close from the same sink
                    // (e.g. the sidecar exiting) cannot schedule a reconnect.
                    self.epoch += 1;
                } else {
                    info!(epoch, reason = %reason, "Connection closed");
                    self.schedule_reconnect(RetryCause::Closed);
                }
            }
        }

        if from != to {
            info!(from = %from, to = %to, epoch, "Connection state changed");
        }
        self.snapshot.state = to;
        self.snapshot.updated_at = Utc::now();
        self.state_tx.send_replace(self.snapshot.clone());
    }

    fn forward_message(&self, message: InboundMessage) {
        if message.from_me {
            debug!(message_id = %message.message_id, "Dropping self-sent message");
            return;
        }
        debug!(
            message_id = %message.message_id,
            sender = %message.sender.id,
            "Inbound message"
        );
        self.notifier.notify(message);
    }

    fn show_pairing_code(&self, code: &str) {
        info!(epoch = self.epoch, "Pairing code issued, scan it with WhatsApp");
        if !self.print_qr {
            return;
        }
        match qr::render_terminal(code) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => warn!(error = %e, "Failed to render pairing QR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{ReconnectConfig, ReconnectStrategy};
    use crate::connector::{CloseReason, MessageContent, Sender};
    use crate::lifecycle::ConnectionState;

    /// Session client that records connects and hands out their sinks.
    #[derive(Default)]
    struct MockClient {
        connects: AtomicUsize,
        sinks: Mutex<Vec<EventSink>>,
        fail_connect: AtomicBool,
    }

    impl MockClient {
        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn sink(&self, index: usize) -> EventSink {
            self.sinks.lock().unwrap()[index].clone()
        }

        fn latest_sink(&self) -> EventSink {
            self.sinks.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionClient for MockClient {
        async fn connect(&self, sink: EventSink) -> Result<(), ConnectorError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().push(sink);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(ConnectorError::NotRunning);
            }
            Ok(())
        }

        async fn send_text(&self, _recipient: &str, _text: &str) -> Result<String, ConnectorError> {
            Ok("MSG1".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<InboundMessage>>,
    }

    impl MessageNotifier for RecordingNotifier {
        fn notify(&self, message: InboundMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    struct Harness {
        client: Arc<MockClient>,
        notifier: Arc<RecordingNotifier>,
        handle: LifecycleHandle,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn spawn_with(config: ReconnectConfig) -> Harness {
        let client = Arc::new(MockClient::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let options = ControllerOptions {
            print_qr: false,
            reconnect: config,
        };
        let (handle, _task) =
            LifecycleController::spawn(client.clone(), notifier.clone(), options, shutdown_rx);
        Harness {
            client,
            notifier,
            handle,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn spawn() -> Harness {
        spawn_with(ReconnectConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn message(from_me: bool) -> InboundMessage {
        InboundMessage {
            message_id: "3EB0".to_string(),
            chat_id: "5511999999999@s.whatsapp.net".to_string(),
            sender: Sender {
                id: "5511999999999@s.whatsapp.net".to_string(),
                display_name: None,
            },
            from_me,
            content: MessageContent::Text {
                text: "oi".to_string(),
            },
            timestamp: None,
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_then_open() {
        let h = spawn();
        assert_eq!(h.handle.current_state(), ConnectionState::Disconnected);

        assert_eq!(h.handle.request_connect().await.unwrap(), ConnectOutcome::Started);
        settle().await;

        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::PairingIssued {
            code: "ABC123".to_string(),
        })
        .await;
        settle().await;

        assert_eq!(h.handle.current_state(), ConnectionState::AwaitingPairing);
        let artifact = h.handle.current_pairing_artifact().unwrap();
        assert_eq!(artifact.code, "ABC123");

        sink.emit(LifecycleEvent::Opened {
            account: Some("5511000000000@s.whatsapp.net".to_string()),
        })
        .await;
        settle().await;

        assert_eq!(h.handle.current_state(), ConnectionState::Connected);
        assert!(h.handle.current_pairing_artifact().is_none());
        assert_eq!(
            h.handle.snapshot().account.as_deref(),
            Some("5511000000000@s.whatsapp.net")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_attempting_or_connected() {
        let h = spawn();

        assert_eq!(h.handle.request_connect().await.unwrap(), ConnectOutcome::Started);
        assert_eq!(h.handle.request_connect().await.unwrap(), ConnectOutcome::InProgress);
        settle().await;
        assert_eq!(h.client.connects(), 1);

        h.client
            .latest_sink()
            .emit(LifecycleEvent::Opened { account: None })
            .await;
        settle().await;

        assert_eq!(
            h.handle.request_connect().await.unwrap(),
            ConnectOutcome::AlreadyConnected
        );
        settle().await;
        assert_eq!(h.client.connects(), 1);
        assert_eq!(h.handle.current_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_never_reconnects() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::Opened { account: None }).await;
        sink.emit(LifecycleEvent::Closed {
            reason: CloseReason::LoggedOut,
        })
        .await;
        settle().await;
        assert_eq!(h.handle.current_state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.client.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_after_logout_does_not_reconnect() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        // Sidecar reports the logout, then its process exits
        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::Opened { account: None }).await;
        sink.emit(LifecycleEvent::Closed {
            reason: CloseReason::LoggedOut,
        })
        .await;
        sink.emit(LifecycleEvent::Closed {
            reason: CloseReason::ConnectionLost,
        })
        .await;
        settle().await;
        assert_eq!(h.handle.current_state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.client.connects(), 1);

        // A manual connect still works afterwards
        assert_eq!(
            h.handle.request_connect().await.unwrap(),
            ConnectOutcome::Started
        );
        settle().await;
        assert_eq!(h.client.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_schedules_exactly_one_reconnect() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::Opened { account: None }).await;
        sink.emit(LifecycleEvent::Closed {
            reason: CloseReason::ConnectionLost,
        })
        .await;
        settle().await;
        assert_eq!(h.client.connects(), 1);

        // Fixed policy waits 3s after a closure
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.client.connects(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.client.connects(), 2);

        // The new attempt is in flight; no further timers fire
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.client.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_cancels_pending_reconnect() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        h.client
            .latest_sink()
            .emit(LifecycleEvent::Closed {
                reason: CloseReason::TimedOut,
            })
            .await;
        settle().await;

        assert_eq!(h.handle.request_connect().await.unwrap(), ConnectOutcome::Started);
        settle().await;
        assert_eq!(h.client.connects(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.client.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_retries_after_longer_delay() {
        let h = spawn();
        h.client.fail_connect.store(true, Ordering::SeqCst);

        h.handle.request_connect().await.unwrap();
        settle().await;
        assert_eq!(h.client.connects(), 1);
        assert_eq!(h.handle.current_state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.client.connects(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.client.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_policy_grows_between_failures() {
        let h = spawn_with(ReconnectConfig {
            strategy: ReconnectStrategy::Exponential,
            delay_seconds: 3,
            connect_error_delay_seconds: 3,
            max_delay_seconds: 60,
        });
        h.client.fail_connect.store(true, Ordering::SeqCst);

        h.handle.request_connect().await.unwrap();
        settle().await;

        // 3s, then 6s
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.client.connects(), 2);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.client.connects(), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.client.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_epoch_events_are_dropped() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;
        let old_sink = h.client.sink(0);

        old_sink
            .emit(LifecycleEvent::Closed {
                reason: CloseReason::ConnectionClosed,
            })
            .await;
        settle().await;
        h.handle.request_connect().await.unwrap();
        settle().await;

        let new_sink = h.client.sink(1);
        new_sink.emit(LifecycleEvent::Opened { account: None }).await;
        settle().await;
        assert_eq!(h.handle.current_state(), ConnectionState::Connected);

        // A late close from the first attempt must not disconnect us
        old_sink
            .emit(LifecycleEvent::Closed {
                reason: CloseReason::ConnectionLost,
            })
            .await;
        settle().await;
        assert_eq!(h.handle.current_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_code_ignored_while_connected() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::Opened { account: None }).await;
        sink.emit(LifecycleEvent::PairingIssued {
            code: "LATE".to_string(),
        })
        .await;
        settle().await;

        assert_eq!(h.handle.current_state(), ConnectionState::Connected);
        assert!(h.handle.snapshot().pairing.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_sent_messages_are_not_forwarded() {
        let h = spawn();
        h.handle.request_connect().await.unwrap();
        settle().await;

        let sink = h.client.latest_sink();
        sink.emit(LifecycleEvent::MessageReceived(Box::new(message(true))))
            .await;
        sink.emit(LifecycleEvent::MessageReceived(Box::new(message(false))))
            .await;
        settle().await;

        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].from_me);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_actor() {
        let client = Arc::new(MockClient::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = LifecycleController::spawn(
            client,
            notifier,
            ControllerOptions::default(),
            shutdown_rx,
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.request_connect().await,
            Err(crate::lifecycle::LifecycleError::ActorShutdown)
        ));
    }
}
