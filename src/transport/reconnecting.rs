// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Reconnecting transport actor.
//!
//! One task owns the live connection, the outbound buffer, the retry
//! counter and the idle timer. Callers talk to it through
//! [`ReconnectingTransport`] and observe it through [`TransportEvent`]s.

use bytes::BytesMut;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::connector::{Connection, Connector};
use crate::lsp::protocol;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a connection that went away without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code for a framing violation.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code for a caller-requested reconnect.
pub const CLOSE_RESTART: u16 = 1012;

/// Reason reported for an explicit `close()`.
pub const DISCONNECTED_REASON: &str = "Server disconnected.";

/// Retry and idle policy for a [`ReconnectingTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay between connection attempts.
    pub retry_delay: Duration,
    /// Attempts made before giving up.
    pub max_attempts: u32,
    /// Close the connection after this long without sends. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Whether a lost connection is retried automatically.
    pub auto_reconnect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            max_attempts: 20,
            idle_timeout: Some(Duration::from_secs(300)),
            auto_reconnect: true,
        }
    }
}

/// Why a connection (or connection attempt) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Closed by `close()` or `shutdown()`.
    Graceful,
    /// Closed by the idle timer.
    Idle,
    /// Dropped by the peer or by a write failure.
    Lost,
    /// Every connection attempt failed.
    Failed,
    /// The peer violated the framing protocol.
    Faulted,
    /// Dropped by `reconnect()`.
    Reconnecting,
}

/// Details of a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// What ended the connection.
    pub kind: CloseKind,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the transport will try to connect again on its own.
    pub will_retry: bool,
    /// WebSocket-style close code.
    pub code: u16,
}

impl CloseEvent {
    /// Returns true for closes the caller asked for.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self.kind, CloseKind::Graceful | CloseKind::Idle)
    }
}

/// Events emitted by the transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection with the given generation is open.
    Open {
        /// Strictly increasing connection number.
        generation: u64,
    },
    /// One framed message body from the server.
    Message(String),
    /// A connection attempt failed.
    Error(String),
    /// The server broke the framing protocol.
    Fault(String),
    /// The connection, or the attempt to establish one, ended.
    Close(CloseEvent),
}

enum Command {
    Connect,
    Send { body: String, pin: Option<u64> },
    Close,
    Reconnect,
    Shutdown,
}

enum Internal {
    Connected {
        token: u64,
        result: io::Result<Connection>,
    },
    RetryDue {
        token: u64,
    },
    ReaderEnded {
        generation: u64,
        reason: String,
        fatal: bool,
    },
}

/// Handle to a reconnecting transport actor.
///
/// Cloning the handle is cheap; every clone drives the same connection.
#[derive(Debug, Clone)]
pub struct ReconnectingTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("Connect"),
            Self::Send { pin, .. } => write!(f, "Send(pin={pin:?})"),
            Self::Close => f.write_str("Close"),
            Self::Reconnect => f.write_str("Reconnect"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl ReconnectingTransport {
    /// Starts the actor. No connection is attempted until the first
    /// `connect()` or `send()`.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (internal, internal_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            connector,
            policy,
            auto_reconnect: policy.auto_reconnect,
            events,
            internal,
            buffer: VecDeque::new(),
            live: None,
            connecting: false,
            retry_pending: false,
            token: 0,
            retries: 0,
            generation: 0,
            idle_deadline: None,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        (Self { commands }, event_rx)
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!("Transport actor has stopped; command ignored");
        }
    }

    /// Opens a connection if none is open or being attempted, and
    /// re-enables automatic reconnection.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Sends a message body, buffering it and connecting if necessary.
    pub fn send(&self, body: String) {
        self.command(Command::Send { body, pin: None });
    }

    /// Sends a message body only on the connection with `generation`.
    ///
    /// Dropped if that connection is no longer open.
    pub fn send_on(&self, generation: u64, body: String) {
        self.command(Command::Send {
            body,
            pin: Some(generation),
        });
    }

    /// Closes the connection and stops reconnecting.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Drops the current connection and connects again with a fresh retry
    /// budget.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Closes the connection and stops the actor.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    /// Returns true while the actor is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

struct Live {
    generation: u64,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    reader: Option<JoinHandle<()>>,
    _child: Option<Child>,
}

struct Actor {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    auto_reconnect: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    buffer: VecDeque<String>,
    live: Option<Live>,
    connecting: bool,
    retry_pending: bool,
    /// Bumped to invalidate in-flight attempts and scheduled retries.
    token: u64,
    retries: u32,
    generation: u64,
    idle_deadline: Option<Instant>,
}

async fn idle_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All transport handles dropped");
                        self.stop().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(message) = internal.recv() => self.handle_internal(message).await,
                () = idle_expiry(self.idle_deadline) => self.idle_close().await,
            }
        }
        debug!("Transport actor stopped");
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            trace!("Transport event receiver dropped");
        }
    }

    fn emit_close(&self, kind: CloseKind, reason: impl Into<String>, will_retry: bool, code: u16) {
        self.emit(TransportEvent::Close(CloseEvent {
            kind,
            reason: reason.into(),
            will_retry,
            code,
        }));
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        trace!("Transport command: {:?}", command);
        match command {
            Command::Connect => {
                self.auto_reconnect = true;
                self.start_connect();
            }
            Command::Send { body, pin } => self.send(body, pin).await,
            Command::Close => self.close().await,
            Command::Reconnect => {
                if self.drop_live().await.is_some() {
                    self.emit_close(
                        CloseKind::Reconnecting,
                        "Reconnecting.",
                        true,
                        CLOSE_RESTART,
                    );
                }
                self.cancel_attempts();
                self.retries = 0;
                self.auto_reconnect = true;
                self.attempt();
            }
            Command::Shutdown => {
                self.stop().await;
                return false;
            }
        }
        true
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Connected { token, result } => {
                if token != self.token {
                    trace!("Discarding result of a cancelled connection attempt");
                    return;
                }
                self.connecting = false;
                match result {
                    Ok(connection) => self.open(connection).await,
                    Err(e) => self.attempt_failed(&e.to_string()),
                }
            }
            Internal::RetryDue { token } => {
                if token == self.token && self.retry_pending && self.live.is_none() {
                    self.retry_pending = false;
                    self.attempt();
                }
            }
            Internal::ReaderEnded {
                generation,
                reason,
                fatal,
            } => {
                if !self.is_live(generation) {
                    return;
                }
                self.drop_live().await;
                if fatal {
                    error!("Framing error from server: {}", reason);
                    self.auto_reconnect = false;
                    self.emit(TransportEvent::Fault(reason.clone()));
                    self.emit_close(CloseKind::Faulted, reason, false, CLOSE_PROTOCOL_ERROR);
                } else {
                    self.connection_lost(reason);
                }
            }
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.generation == generation)
    }

    fn start_connect(&mut self) {
        if self.live.is_some() || self.connecting || self.retry_pending {
            return;
        }
        self.attempt();
    }

    fn attempt(&mut self) {
        self.connecting = true;
        self.retries += 1;
        debug!(
            "Connecting to {} (attempt {}/{})",
            self.connector.describe(),
            self.retries,
            self.policy.max_attempts
        );

        let connector = Arc::clone(&self.connector);
        let internal = self.internal.clone();
        let token = self.token;
        tokio::spawn(async move {
            let result = connector.connect().await;
            let _ = internal.send(Internal::Connected { token, result });
        });
    }

    fn attempt_failed(&mut self, reason: &str) {
        warn!(
            "Connection attempt {} to {} failed: {}",
            self.retries,
            self.connector.describe(),
            reason
        );
        self.emit(TransportEvent::Error(reason.to_string()));

        if self.auto_reconnect && self.retries < self.policy.max_attempts {
            self.schedule_retry();
        } else {
            let attempts = self.retries;
            self.retries = 0;
            self.emit_close(
                CloseKind::Failed,
                format!("{reason} (gave up after {attempts} attempts)"),
                false,
                CLOSE_ABNORMAL,
            );
        }
    }

    fn schedule_retry(&mut self) {
        self.retry_pending = true;
        let internal = self.internal.clone();
        let token = self.token;
        let delay = self.policy.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::RetryDue { token });
        });
    }

    fn cancel_attempts(&mut self) {
        self.token += 1;
        self.connecting = false;
        self.retry_pending = false;
    }

    fn touch_idle(&mut self) {
        self.idle_deadline = match (&self.live, self.policy.idle_timeout) {
            (Some(_), Some(timeout)) => Some(Instant::now() + timeout),
            _ => None,
        };
    }

    async fn open(&mut self, connection: Connection) {
        self.generation += 1;
        let generation = self.generation;
        let Connection {
            reader,
            writer,
            child,
        } = connection;

        self.live = Some(Live {
            generation,
            writer,
            reader: None,
            _child: child,
        });

        while let Some(body) = self.buffer.front().cloned() {
            if !self.write(&body).await {
                return;
            }
            self.buffer.pop_front();
        }

        self.retries = 0;
        self.touch_idle();
        info!(
            "Connected to {} (generation {})",
            self.connector.describe(),
            generation
        );
        self.emit(TransportEvent::Open { generation });

        let handle = tokio::spawn(read_loop(
            reader,
            generation,
            self.events.clone(),
            self.internal.clone(),
        ));
        if let Some(live) = self.live.as_mut() {
            live.reader = Some(handle);
        }
    }

    async fn send(&mut self, body: String, pin: Option<u64>) {
        match (pin, self.live.as_ref().map(|live| live.generation)) {
            (Some(wanted), Some(current)) if wanted == current => {
                self.write(&body).await;
            }
            (Some(wanted), _) => {
                trace!("Dropping message pinned to closed generation {}", wanted);
            }
            (None, Some(_)) => {
                self.write(&body).await;
            }
            (None, None) => {
                self.buffer.push_back(body);
                self.auto_reconnect = true;
                self.start_connect();
            }
        }
        self.touch_idle();
    }

    /// Writes one framed message. Returns false if the connection was lost.
    async fn write(&mut self, body: &str) -> bool {
        let Some(live) = self.live.as_mut() else {
            return false;
        };
        trace!("Sending message: {}", body);

        let frame = protocol::encode_message(body);
        let result = async {
            live.writer.write_all(&frame).await?;
            live.writer.flush().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.drop_live().await;
                self.connection_lost(format!("write failed: {e}"));
                false
            }
        }
    }

    fn connection_lost(&mut self, reason: String) {
        let will_retry = self.auto_reconnect;
        warn!(
            "Connection to {} lost: {}{}",
            self.connector.describe(),
            reason,
            if will_retry { "; retrying" } else { "" }
        );
        self.emit_close(CloseKind::Lost, reason, will_retry, CLOSE_ABNORMAL);
        if will_retry {
            self.schedule_retry();
        }
    }

    /// Tears down the live connection, returning its generation.
    async fn drop_live(&mut self) -> Option<u64> {
        let mut live = self.live.take()?;
        if let Some(reader) = live.reader.take() {
            reader.abort();
        }
        if let Err(e) = live.writer.shutdown().await {
            trace!("Error shutting down writer: {}", e);
        }
        self.idle_deadline = None;
        Some(live.generation)
    }

    async fn close(&mut self) {
        let was_connecting = self.connecting || self.retry_pending;
        self.auto_reconnect = false;
        self.cancel_attempts();
        self.retries = 0;

        if self.drop_live().await.is_some() || was_connecting {
            info!("Disconnected from {}", self.connector.describe());
            self.emit_close(CloseKind::Graceful, DISCONNECTED_REASON, false, CLOSE_NORMAL);
        }
    }

    async fn stop(&mut self) {
        self.close().await;
        self.buffer.clear();
    }

    async fn idle_close(&mut self) {
        self.idle_deadline = None;
        if self.drop_live().await.is_some() {
            info!("Closing idle connection to {}", self.connector.describe());
            self.emit_close(CloseKind::Idle, "Idle timeout.", false, CLOSE_NORMAL);
        }
    }
}

async fn read_loop(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    internal: mpsc::UnboundedSender<Internal>,
) {
    let mut buffer = BytesMut::with_capacity(8192);

    let (reason, fatal) = 'read: loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => break ("connection closed by server".to_string(), false),
            Ok(_) => {}
            Err(e) => break (format!("read failed: {e}"), false),
        }

        loop {
            match protocol::try_parse_message(&mut buffer) {
                Ok(Some(body)) => {
                    trace!("Received message: {}", body);
                    if events.send(TransportEvent::Message(body)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read (format!("{e:#}"), true),
            }
        }
    };

    let _ = internal.send(Internal::ReaderEnded {
        generation,
        reason,
        fatal,
    });
}
