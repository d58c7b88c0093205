//! Drives a [`PeerSession`] against a real connection and relay
//!
//! The runner is a single task. Relay messages, connection events, user
//! commands and a one-second tick are multiplexed with `tokio::select!` and
//! handled one at a time; effects are executed in order, and the results of
//! asynchronous effects are fed straight back into the session before the
//! next queued effect runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use beam_core::{Config, ReceivedFile, RoomId, TransferError, CHUNK_SIZE};
use beam_signal::{ServerMessage, SharedFile};

use crate::connection::{ConnectionEvent, EventReceiver, PeerConnection};
use crate::session::{Effect, PeerSession, SessionState, SessionStatus};
use crate::signal_client::{SignalReceiver, SignalSender};
use crate::transport::{FileTransport, PeerToPeerTransport, TransferSummary};

/// How often the negotiation deadline is checked
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Session errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("session ended")]
    Ended,
    #[error("session failed: {0}")]
    Failed(SessionStatus),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Requests from the handle to the runner
#[derive(Debug)]
pub enum SessionCommand {
    SendFile {
        name: String,
        data: Bytes,
        reply: oneshot::Sender<Result<TransferSummary, TransferError>>,
    },
    Close,
}

/// What the runner reports back
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    TransferStarted { name: String, size: u64 },
    TransferProgress { received: u64, total: u64 },
    FileReceived(ReceivedFile),
    TransferFailed(TransferError),
    /// A file is waiting on the relay; see [`crate::transport::download_shared`]
    FileShared(SharedFile),
}

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Label of the data channel the initiator creates
    pub channel_label: String,
    /// Outgoing data frame size
    pub chunk_size: usize,
}

impl RunnerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_label: config.peer.channel_label.clone(),
            chunk_size: config.transfer.chunk_size,
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            channel_label: "file".into(),
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Application side of a running session
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionHandle {
    /// Next event from the runner, `None` once it has stopped
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait until the data channel is open
    ///
    /// Other events seen while waiting are dropped.
    pub async fn wait_connected(&mut self) -> Result<(), SessionError> {
        while let Some(event) = self.next_event().await {
            match event {
                SessionEvent::Status(SessionStatus::Connected) => return Ok(()),
                SessionEvent::Status(status) if status.is_terminal() => {
                    return Err(SessionError::Failed(status))
                }
                other => debug!("Waiting for connection, skipped {:?}", other),
            }
        }
        Err(SessionError::Ended)
    }

    /// Send a file over the open channel
    ///
    /// Resolves once every frame has been handed to the channel.
    pub async fn send_file(&self, name: impl Into<String>, data: Bytes) -> Result<TransferSummary, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::SendFile {
                name: name.into(),
                data,
                reply,
            })
            .await
            .map_err(|_| SessionError::Ended)?;

        Ok(response.await.map_err(|_| SessionError::Ended)??)
    }

    /// Ask the runner to close the session
    pub async fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close).await;
    }
}

enum Step {
    Signal(ServerMessage),
    SignalClosed,
    Connection(ConnectionEvent),
    ConnectionGone,
    Command(SessionCommand),
    HandleDropped,
    Tick,
}

/// Owns the session and executes its effects
pub struct SessionRunner {
    session: PeerSession,
    connection: Arc<dyn PeerConnection>,
    connection_events: EventReceiver,
    signal_tx: SignalSender,
    signal_rx: SignalReceiver,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: RunnerOptions,
    signal_open: bool,
    commands_open: bool,
}

impl SessionRunner {
    pub fn new(
        session: PeerSession,
        connection: Arc<dyn PeerConnection>,
        connection_events: EventReceiver,
        signal: (SignalSender, SignalReceiver),
        options: RunnerOptions,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = signal;

        let runner = Self {
            session,
            connection,
            connection_events,
            signal_tx,
            signal_rx,
            commands: command_rx,
            events: event_tx,
            options,
            signal_open: true,
            commands_open: true,
        };
        let handle = SessionHandle {
            commands: command_tx,
            events: event_rx,
        };
        (runner, handle)
    }

    /// Join `room` and run until the session closes or fails
    pub async fn run(mut self, room: RoomId) -> SessionState {
        let effects = self.session.join(room);
        self.apply(effects).await;

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !matches!(self.session.state(), SessionState::Closed | SessionState::Failed) {
            let step = tokio::select! {
                msg = self.signal_rx.recv(), if self.signal_open => match msg {
                    Some(msg) => Step::Signal(msg),
                    None => Step::SignalClosed,
                },
                event = self.connection_events.recv() => match event {
                    Some(event) => Step::Connection(event),
                    None => Step::ConnectionGone,
                },
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => Step::Command(cmd),
                    None => Step::HandleDropped,
                },
                _ = tick.tick() => Step::Tick,
            };

            let effects = self.step(step).await;
            self.apply(effects).await;

            // Without the relay a lost channel can never be renegotiated
            if !self.signal_open
                && matches!(
                    self.session.state(),
                    SessionState::AwaitingRoom | SessionState::Negotiating
                )
            {
                info!("Relay gone and no open channel, closing");
                let effects = self.session.close();
                self.apply(effects).await;
            }
        }

        info!("Session finished in state {:?}", self.session.state());
        self.session.state()
    }

    async fn step(&mut self, step: Step) -> Vec<Effect> {
        match step {
            Step::Signal(msg) => self.session.on_signal(msg),
            Step::SignalClosed => {
                warn!("Relay connection lost");
                self.signal_open = false;
                if self.session.is_connected() {
                    // The open channel does not need the relay
                    Vec::new()
                } else {
                    self.session.close()
                }
            }
            Step::Connection(event) => match event {
                ConnectionEvent::LocalCandidate(candidate) => self.session.on_local_candidate(candidate),
                ConnectionEvent::ChannelOpen => self.session.on_channel_open(),
                ConnectionEvent::Message(frame) => self.session.on_channel_message(frame),
                ConnectionEvent::ChannelClosed => self.session.on_channel_close(),
                ConnectionEvent::Failed(reason) => self.session.on_connection_failed(&reason),
            },
            Step::ConnectionGone => {
                error!("Peer connection event queue closed");
                self.session.close()
            }
            Step::Command(SessionCommand::SendFile { name, data, reply }) => {
                let result = self.send_file(&name, data).await;
                if let Err(e) = &result {
                    warn!("Send of '{}' failed: {}", name, e);
                }
                let _ = reply.send(result);
                Vec::new()
            }
            Step::Command(SessionCommand::Close) => self.session.close(),
            Step::HandleDropped => {
                self.commands_open = false;
                self.session.close()
            }
            Step::Tick => self.session.poll_timeout(Instant::now()),
        }
    }

    async fn send_file(&self, name: &str, data: Bytes) -> Result<TransferSummary, TransferError> {
        if !self.session.is_connected() {
            return Err(TransferError::NotConnected);
        }
        let channel = self.connection.data_channel().ok_or(TransferError::NotConnected)?;
        PeerToPeerTransport::new(channel, self.options.chunk_size)
            .send_file(name, data)
            .await
    }

    /// Execute effects in order, feeding results back into the session
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            let follow_up = self.execute(effect).await;
            for effect in follow_up.into_iter().rev() {
                queue.push_front(effect);
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Vec<Effect> {
        match effect {
            Effect::Signal(message) => {
                if let Err(e) = self.signal_tx.send(message) {
                    warn!("Dropping relay message: {}", e);
                }
                Vec::new()
            }
            Effect::CreateDataChannel => {
                match self.connection.create_data_channel(&self.options.channel_label).await {
                    Ok(()) => Vec::new(),
                    Err(e) => self.session.on_negotiation_failed(&e.to_string()),
                }
            }
            Effect::CreateOffer => match self.connection.create_offer().await {
                Ok(offer) => self.session.on_local_description(offer),
                Err(e) => self.session.on_negotiation_failed(&e.to_string()),
            },
            Effect::CreateAnswer => match self.connection.create_answer().await {
                Ok(answer) => self.session.on_local_description(answer),
                Err(e) => self.session.on_negotiation_failed(&e.to_string()),
            },
            Effect::ApplyRemoteDescription(desc) => {
                match self.connection.set_remote_description(&desc).await {
                    Ok(()) => self.session.on_remote_description_applied(),
                    Err(e) => self.session.on_negotiation_failed(&e.to_string()),
                }
            }
            Effect::AddIceCandidate(candidate) => {
                match self.connection.add_ice_candidate(&candidate).await {
                    Ok(()) => Vec::new(),
                    Err(e) => self.session.on_candidate_rejected(&e.to_string()),
                }
            }
            Effect::ResetConnection => {
                if let Err(e) = self.connection.reset().await {
                    error!("Failed to reset peer connection: {}", e);
                }
                Vec::new()
            }
            Effect::CloseConnection => {
                self.connection.close().await;
                Vec::new()
            }
            Effect::Status(status) => {
                info!("Status: {}", status);
                self.emit(SessionEvent::Status(status));
                Vec::new()
            }
            Effect::TransferStarted { name, size } => {
                self.emit(SessionEvent::TransferStarted { name, size });
                Vec::new()
            }
            Effect::TransferProgress { received, total } => {
                self.emit(SessionEvent::TransferProgress { received, total });
                Vec::new()
            }
            Effect::FileReceived(file) => {
                info!("Received '{}' ({} bytes)", file.name, file.data.len());
                self.emit(SessionEvent::FileReceived(file));
                Vec::new()
            }
            Effect::TransferFailed(e) => {
                warn!("Transfer failed: {}", e);
                self.emit(SessionEvent::TransferFailed(e));
                Vec::new()
            }
            Effect::FileShared(file) => {
                self.emit(SessionEvent::FileShared(file));
                Vec::new()
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use beam_core::{ControlFrame, Frame, IceCandidate, MemberId, SessionDescription};
    use beam_signal::ClientMessage;
    use serde_json::json;

    use crate::connection::{event_channel, ConnectionError, DataChannel, EventSender};
    use crate::session::SessionConfig;

    /// Records calls; completes every operation successfully unless told not to
    struct ScriptedConnection {
        calls: Mutex<Vec<String>>,
        fail_offer: bool,
        channel: Mutex<Option<Arc<dyn DataChannel>>>,
    }

    impl ScriptedConnection {
        fn new(fail_offer: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_offer,
                channel: Mutex::new(None),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    #[async_trait]
    impl PeerConnection for ScriptedConnection {
        async fn create_data_channel(&self, label: &str) -> Result<(), ConnectionError> {
            self.record(&format!("create_data_channel:{}", label));
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
            self.record("create_offer");
            if self.fail_offer {
                return Err(ConnectionError::Negotiation("no codecs".into()));
            }
            Ok(SessionDescription::new("offer", "v=0\r\n"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
            self.record("create_answer");
            Ok(SessionDescription::new("answer", "v=0\r\n"))
        }

        async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), ConnectionError> {
            self.record(&format!("set_remote_description:{}", desc.kind().unwrap_or("?")));
            Ok(())
        }

        async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<(), ConnectionError> {
            self.record("add_ice_candidate");
            Ok(())
        }

        async fn reset(&self) -> Result<(), ConnectionError> {
            self.record("reset");
            Ok(())
        }

        async fn close(&self) {
            self.record("close");
        }

        fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
            self.channel.lock().unwrap().clone()
        }
    }

    struct Harness {
        connection: Arc<ScriptedConnection>,
        connection_events: EventSender,
        relay_in: mpsc::UnboundedSender<ServerMessage>,
        relay_out: mpsc::UnboundedReceiver<ClientMessage>,
        handle: SessionHandle,
        task: tokio::task::JoinHandle<SessionState>,
    }

    fn start(fail_offer: bool, negotiation_timeout: Duration) -> Harness {
        let connection = ScriptedConnection::new(fail_offer);
        let (connection_events, events_rx) = event_channel();
        let (out_tx, relay_out) = mpsc::unbounded_channel();
        let (relay_in, in_rx) = mpsc::unbounded_channel();

        let session = PeerSession::new(SessionConfig {
            negotiation_timeout,
            ..SessionConfig::default()
        });
        let (runner, handle) = SessionRunner::new(
            session,
            connection.clone(),
            events_rx,
            (SignalSender::new(out_tx), SignalReceiver::new(in_rx)),
            RunnerOptions::default(),
        );
        let task = tokio::spawn(runner.run(RoomId::new("abc").unwrap()));

        Harness {
            connection,
            connection_events,
            relay_in,
            relay_out,
            handle,
            task,
        }
    }

    /// Wait until the connection has seen `call`
    async fn wait_for_call(connection: &ScriptedConnection, call: &str) {
        for _ in 0..200 {
            if connection.calls().iter().any(|c| c == call) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never saw {}", call);
    }

    async fn next_status(handle: &mut SessionHandle) -> SessionStatus {
        loop {
            match handle.next_event().await {
                Some(SessionEvent::Status(status)) => return status,
                Some(_) => continue,
                None => panic!("runner stopped"),
            }
        }
    }

    #[tokio::test]
    async fn test_initiator_sends_offer_and_connects() {
        let mut h = start(false, Duration::from_secs(30));

        assert_eq!(
            h.relay_out.recv().await,
            Some(ClientMessage::JoinRoom {
                room_id: RoomId::new("abc").unwrap()
            })
        );
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::WaitingForPeer);

        h.relay_in
            .send(ServerMessage::UserJoined {
                member_id: MemberId::from("y"),
            })
            .unwrap();
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Negotiating);

        match h.relay_out.recv().await {
            Some(ClientMessage::Offer { offer, .. }) => assert_eq!(offer.kind(), Some("offer")),
            other => panic!("expected offer, got {:?}", other),
        }

        h.connection_events
            .send(ConnectionEvent::LocalCandidate(IceCandidate(json!({"candidate": "c"}))))
            .unwrap();
        assert!(matches!(
            h.relay_out.recv().await,
            Some(ClientMessage::IceCandidate { .. })
        ));

        h.relay_in
            .send(ServerMessage::Answer {
                answer: SessionDescription::new("answer", "v=0\r\n"),
            })
            .unwrap();
        wait_for_call(&h.connection, "set_remote_description:answer").await;
        h.connection_events.send(ConnectionEvent::ChannelOpen).unwrap();
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Connected);

        assert_eq!(
            &h.connection.calls()[..3],
            &[
                "create_data_channel:file".to_string(),
                "create_offer".to_string(),
                "set_remote_description:answer".to_string(),
            ]
        );

        h.handle.close().await;
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Closed);
        assert_eq!(h.task.await.unwrap(), SessionState::Closed);
        assert_eq!(h.relay_out.recv().await, Some(ClientMessage::LeaveRoom));
    }

    #[tokio::test]
    async fn test_responder_answers_after_applying_offer() {
        let mut h = start(false, Duration::from_secs(30));
        h.relay_out.recv().await;

        h.relay_in
            .send(ServerMessage::IceCandidate {
                candidate: IceCandidate(json!({"candidate": "early"})),
            })
            .unwrap();
        h.relay_in
            .send(ServerMessage::Offer {
                offer: SessionDescription::new("offer", "v=0\r\n"),
            })
            .unwrap();

        match h.relay_out.recv().await {
            Some(ClientMessage::Answer { answer, .. }) => assert_eq!(answer.kind(), Some("answer")),
            other => panic!("expected answer, got {:?}", other),
        }
        assert_eq!(
            h.connection.calls(),
            vec![
                "set_remote_description:offer".to_string(),
                "add_ice_candidate".to_string(),
                "create_answer".to_string(),
            ]
        );
        h.handle.close().await;
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_failure_fails_session() {
        let mut h = start(true, Duration::from_secs(30));
        h.relay_in
            .send(ServerMessage::UserJoined {
                member_id: MemberId::from("y"),
            })
            .unwrap();

        assert_eq!(next_status(&mut h.handle).await, SessionStatus::WaitingForPeer);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Negotiating);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::PeerUnreachable);
        assert_eq!(h.task.await.unwrap(), SessionState::Failed);
        assert!(h.connection.calls().contains(&"close".to_string()));
    }

    #[tokio::test]
    async fn test_negotiation_times_out() {
        let mut h = start(false, Duration::from_secs(1));
        h.relay_in
            .send(ServerMessage::Offer {
                offer: SessionDescription::new("offer", "v=0\r\n"),
            })
            .unwrap();

        assert_eq!(next_status(&mut h.handle).await, SessionStatus::WaitingForPeer);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Negotiating);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::TimedOut);
        assert_eq!(h.task.await.unwrap(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_send_file_requires_connection() {
        let h = start(false, Duration::from_secs(30));

        let result = h.handle.send_file("a.txt", Bytes::from_static(b"abc")).await;
        assert_eq!(result, Err(SessionError::Transfer(TransferError::NotConnected)));
    }

    /// Drive the harness as initiator up to an open channel
    async fn connect_initiator(h: &mut Harness) {
        h.relay_in
            .send(ServerMessage::UserJoined {
                member_id: MemberId::from("y"),
            })
            .unwrap();
        h.relay_in
            .send(ServerMessage::Answer {
                answer: SessionDescription::new("answer", "v=0\r\n"),
            })
            .unwrap();
        wait_for_call(&h.connection, "set_remote_description:answer").await;
        h.connection_events.send(ConnectionEvent::ChannelOpen).unwrap();
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::WaitingForPeer);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Negotiating);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_channel_close_renegotiates() {
        let mut h = start(false, Duration::from_secs(30));
        connect_initiator(&mut h).await;

        h.connection_events.send(ConnectionEvent::ChannelClosed).unwrap();
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::PeerDisconnected);
        assert_eq!(next_status(&mut h.handle).await, SessionStatus::Negotiating);

        // A second offer goes out on a fresh connection
        let mut offers = 0;
        while offers < 2 {
            match tokio::time::timeout(Duration::from_secs(5), h.relay_out.recv()).await {
                Ok(Some(ClientMessage::Offer { .. })) => offers += 1,
                Ok(Some(_)) => continue,
                other => panic!("expected a second offer, got {:?}", other),
            }
        }
        let calls = h.connection.calls();
        let reset = calls.iter().position(|c| c == "reset").unwrap();
        assert_eq!(
            &calls[reset..],
            &[
                "reset".to_string(),
                "create_data_channel:file".to_string(),
                "create_offer".to_string(),
            ]
        );

        h.handle.close().await;
        assert_eq!(h.task.await.unwrap(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_channel_close_without_relay_ends_session() {
        let mut h = start(false, Duration::from_secs(30));
        connect_initiator(&mut h).await;

        let Harness {
            connection_events,
            relay_in,
            mut handle,
            task,
            ..
        } = h;
        drop(relay_in);
        connection_events.send(ConnectionEvent::ChannelClosed).unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner kept waiting without a relay")
            .unwrap();
        assert_eq!(state, SessionState::Closed);

        let mut statuses = Vec::new();
        while let Some(event) = handle.next_event().await {
            if let SessionEvent::Status(status) = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses.last(), Some(&SessionStatus::Closed));
    }

    #[tokio::test]
    async fn test_file_shared_becomes_event() {
        let mut h = start(false, Duration::from_secs(30));
        let shared = SharedFile {
            filename: "1-2-a.txt".into(),
            originalname: "a.txt".into(),
            path: "/uploads/1-2-a.txt".into(),
        };
        h.relay_in.send(ServerMessage::FileShared(shared.clone())).unwrap();

        let event = loop {
            match h.handle.next_event().await {
                Some(SessionEvent::Status(_)) => continue,
                other => break other,
            }
        };
        assert_eq!(event, Some(SessionEvent::FileShared(shared)));
    }

    #[tokio::test]
    async fn test_incoming_frames_become_events() {
        let mut h = start(false, Duration::from_secs(30));
        h.relay_in
            .send(ServerMessage::Offer {
                offer: SessionDescription::new("offer", "v=0\r\n"),
            })
            .unwrap();
        wait_for_call(&h.connection, "create_answer").await;
        h.connection_events.send(ConnectionEvent::ChannelOpen).unwrap();
        h.connection_events
            .send(ConnectionEvent::Message(
                Frame::control(&ControlFrame::Metadata {
                    name: "hi.txt".into(),
                    size: 2,
                })
                .unwrap(),
            ))
            .unwrap();
        h.connection_events
            .send(ConnectionEvent::Message(Frame::Binary(Bytes::from_static(b"hi"))))
            .unwrap();

        let file = loop {
            match h.handle.next_event().await {
                Some(SessionEvent::FileReceived(file)) => break file,
                Some(_) => continue,
                None => panic!("runner stopped"),
            }
        };
        assert_eq!(file.name, "hi.txt");
        assert_eq!(&file.data[..], b"hi");
    }
}
