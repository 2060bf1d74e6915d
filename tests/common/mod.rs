// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! In-process fake language server shared by the integration tests.
//!
//! [`FakeServer`] is a [`Connector`]: every successful `connect()` hands the
//! client one end of a `tokio::io::duplex` pipe and serves the other end
//! from a spawned task. Everything the client sends is recorded.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use lsp_tether::lsp::protocol::{encode_message, try_parse_message};
use lsp_tether::lsp::{SessionOptions, SessionState};
use lsp_tether::transport::{Connection, Connector, ReconnectPolicy};

/// Default bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    capabilities: Mutex<Value>,
    responses: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, (i64, String)>>,
    received: Mutex<Vec<Value>>,
    connections: Mutex<Vec<Live>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    connects: AtomicUsize,
    hold_initialize: AtomicBool,
}

struct Live {
    push: mpsc::UnboundedSender<String>,
    kill: Option<oneshot::Sender<()>>,
}

/// A scripted language server.
#[derive(Clone, Default)]
pub struct FakeServer {
    shared: Arc<Shared>,
}

impl FakeServer {
    /// A server advertising `capabilities` on `initialize`.
    pub fn new(capabilities: Value) -> Self {
        let server = Self::default();
        *lock(&server.shared.capabilities) = capabilities;
        server
    }

    /// Full-sync server with hover and completion.
    pub fn basic() -> Self {
        Self::new(json!({
            "textDocumentSync": 1,
            "hoverProvider": true,
            "completionProvider": {}
        }))
    }

    /// The next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.failures_left.store(n, Ordering::SeqCst);
    }

    /// Never answer `initialize` while set.
    pub fn hold_initialize(&self, hold: bool) {
        self.shared.hold_initialize.store(hold, Ordering::SeqCst);
    }

    /// Answers `method` with `result`.
    pub fn respond(&self, method: &str, result: Value) {
        lock(&self.shared.responses).insert(method.to_string(), result);
    }

    /// Answers `method` with an error.
    pub fn fail(&self, method: &str, code: i64, message: &str) {
        lock(&self.shared.errors).insert(method.to_string(), (code, message.to_string()));
    }

    /// Connection attempts made, successful or not.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Successful connections.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Drops every open connection, as if the server crashed.
    pub fn drop_connections(&self) {
        for mut live in lock(&self.shared.connections).drain(..) {
            if let Some(kill) = live.kill.take() {
                let _ = kill.send(());
            }
        }
    }

    /// Sends a message to the client on the newest connection.
    pub fn push(&self, message: &Value) -> Result<()> {
        self.push_raw(&message.to_string())
    }

    /// Sends a framed body verbatim, JSON or not.
    pub fn push_raw(&self, body: &str) -> Result<()> {
        lock(&self.shared.connections)
            .last()
            .ok_or_else(|| anyhow!("no open connection"))?
            .push
            .send(body.to_string())
            .map_err(|_| anyhow!("connection closed"))
    }

    /// Every message received so far.
    pub fn received(&self) -> Vec<Value> {
        lock(&self.shared.received).clone()
    }

    /// Methods of every message received so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Params of every received message with `method`.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["method"] == method)
            .map(|m| m["params"].clone())
            .collect()
    }

    /// Count of received messages with `method`.
    pub fn count(&self, method: &str) -> usize {
        self.params_of(method).len()
    }

    /// Forgets everything received so far.
    pub fn clear_received(&self) {
        lock(&self.shared.received).clear();
    }

    /// Waits until `count(method) >= n`.
    pub async fn wait_for_count(&self, method: &str, n: usize) -> Result<()> {
        wait_until(|| async { self.count(method) >= n }).await
    }
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until<F, Fut>(mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("condition not met within {WAIT:?}"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(&self) -> io::Result<Connection> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .shared
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(1 << 16);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        lock(&self.shared.connections).push(Live {
            push: push_tx,
            kill: Some(kill_tx),
        });

        tokio::spawn(serve(Arc::clone(&self.shared), server, push_rx, kill_rx));

        let (reader, writer) = tokio::io::split(client);
        Ok(Connection::new(reader, writer))
    }

    fn describe(&self) -> String {
        "fake-server".to_string()
    }
}

async fn serve(
    shared: Arc<Shared>,
    stream: tokio::io::DuplexStream,
    mut push: mpsc::UnboundedReceiver<String>,
    mut kill: oneshot::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buffer = BytesMut::new();

    loop {
        tokio::select! {
            _ = &mut kill => return,
            Some(body) = push.recv() => {
                if writer.write_all(&encode_message(&body)).await.is_err() {
                    return;
                }
            }
            read = reader.read_buf(&mut buffer) => {
                if !matches!(read, Ok(n) if n > 0) {
                    return;
                }
                while let Ok(Some(body)) = try_parse_message(&mut buffer) {
                    let Ok(message) = serde_json::from_str::<Value>(&body) else {
                        continue;
                    };
                    lock(&shared.received).push(message.clone());
                    if let Some(reply) = answer(&shared, &message)
                        && writer.write_all(&encode_message(&reply.to_string())).await.is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}

/// Builds the response to a client request, if one is due.
fn answer(shared: &Shared, message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message.get("method")?.as_str()?;

    if let Some((code, text)) = lock(&shared.errors).get(method) {
        return Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": text }
        }));
    }

    let result = match method {
        "initialize" => {
            if shared.hold_initialize.load(Ordering::SeqCst) {
                return None;
            }
            json!({
                "capabilities": *lock(&shared.capabilities),
                "serverInfo": { "name": "fake", "version": "1.0" }
            })
        }
        _ => lock(&shared.responses)
            .get(method)
            .cloned()
            .unwrap_or(Value::Null),
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

/// Session options with test-friendly timings.
pub fn options(name: &str, modes: &str) -> SessionOptions {
    let mut options = SessionOptions::new(name, modes);
    options.handshake_timeout = Duration::from_secs(2);
    options.shutdown_timeout = Duration::from_millis(500);
    options.policy = ReconnectPolicy {
        retry_delay: Duration::from_millis(20),
        max_attempts: 5,
        idle_timeout: None,
        auto_reconnect: true,
    };
    options
}

/// A `file:///tmp/<name>` uri.
pub fn uri(name: &str) -> Result<lsp_types::Uri> {
    format!("file:///tmp/{name}")
        .parse()
        .map_err(|e| anyhow!("bad uri {name}: {e:?}"))
}

/// Waits for `state` with the default bound.
pub async fn wait_state(client: &lsp_tether::lsp::LanguageClient, state: SessionState) -> Result<()> {
    tokio::time::timeout(WAIT, client.wait_for_state(state))
        .await
        .map_err(|_| anyhow!("timed out waiting for {state}, still {}", client.state()))??;
    Ok(())
}
