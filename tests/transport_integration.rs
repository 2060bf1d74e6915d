// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Reconnection, idle close and retry exhaustion, seen from both the
//! transport and the session above it.

mod common;

use anyhow::{Context, Result, bail};
use lsp_types::Position;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{FakeServer, WAIT, options, uri, wait_state, wait_until};
use lsp_tether::lsp::{LanguageClient, SessionState};
use lsp_tether::transport::{CloseKind, ReconnectPolicy, ReconnectingTransport, TransportEvent};

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Result<TransportEvent> {
    timeout(WAIT, rx.recv())
        .await
        .context("timed out waiting for transport event")?
        .context("event channel closed")
}

/// Skips events until one matches.
async fn expect_event(
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    matches: impl Fn(&TransportEvent) -> bool,
) -> Result<TransportEvent> {
    loop {
        let event = next_event(rx).await?;
        if matches(&event) {
            return Ok(event);
        }
    }
}

fn policy(idle: Option<Duration>, max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        retry_delay: Duration::from_millis(5),
        max_attempts,
        idle_timeout: idle,
        auto_reconnect: true,
    }
}

#[tokio::test]
async fn test_idle_close_then_send_reopens() -> Result<()> {
    let server = FakeServer::basic();
    let (transport, mut events) = ReconnectingTransport::spawn(
        Arc::new(server.clone()),
        policy(Some(Duration::from_millis(100)), 3),
    );

    transport.connect();
    let TransportEvent::Open { generation: first } = next_event(&mut events).await? else {
        bail!("expected the first connection to open");
    };

    let close = expect_event(&mut events, |e| matches!(e, TransportEvent::Close(_))).await?;
    let TransportEvent::Close(close) = close else {
        bail!("expected a close event");
    };
    assert_eq!(close.kind, CloseKind::Idle);
    assert!(!close.will_retry);

    // Nothing reconnects on its own after an idle close
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connects(), 1);

    transport.send(json!({ "jsonrpc": "2.0", "method": "ping" }).to_string());
    let TransportEvent::Open { generation: second } = next_event(&mut events).await? else {
        bail!("expected the connection to reopen");
    };
    assert!(second > first);
    server.wait_for_count("ping", 1).await?;

    transport.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_traffic_keeps_connection_open() -> Result<()> {
    let server = FakeServer::basic();
    let (transport, mut events) = ReconnectingTransport::spawn(
        Arc::new(server.clone()),
        policy(Some(Duration::from_millis(150)), 3),
    );

    transport.connect();
    let TransportEvent::Open { generation } = next_event(&mut events).await? else {
        bail!("expected the connection to open");
    };
    for n in 0..5 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        transport.send_on(
            generation,
            json!({ "jsonrpc": "2.0", "method": "tick", "params": { "n": n } }).to_string(),
        );
    }
    server.wait_for_count("tick", 5).await?;

    assert!(events.try_recv().is_err(), "connection should still be open");
    transport.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_max_attempts_until_reconnect() -> Result<()> {
    let server = FakeServer::basic();
    server.fail_next_connects(usize::MAX);
    let (transport, mut events) = ReconnectingTransport::spawn(Arc::new(server.clone()), policy(None, 20));

    transport.connect();
    let mut errors = 0;
    let close = loop {
        match next_event(&mut events).await? {
            TransportEvent::Error(_) => errors += 1,
            TransportEvent::Close(close) => break close,
            other => bail!("unexpected event {other:?}"),
        }
    };
    assert_eq!(errors, 20);
    assert_eq!(close.kind, CloseKind::Failed);
    assert!(!close.will_retry);
    assert!(close.reason.contains("gave up after 20 attempts"), "{}", close.reason);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.attempts(), 20);

    server.fail_next_connects(0);
    transport.reconnect();
    expect_event(&mut events, |e| matches!(e, TransportEvent::Open { .. })).await?;
    assert_eq!(server.attempts(), 21);

    transport.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_session_reports_exhausted_retries() -> Result<()> {
    let server = FakeServer::basic();
    server.fail_next_connects(usize::MAX);
    let mut opts = options("plain", "plaintext");
    opts.policy.retry_delay = Duration::from_millis(5);
    opts.policy.max_attempts = 20;
    let client = LanguageClient::start(opts, Arc::new(server.clone()));

    wait_until(|| async {
        client
            .last_connection_error()
            .await
            .is_some_and(|e| e.contains("gave up"))
    })
    .await?;
    wait_state(&client, SessionState::Disconnected).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.attempts(), 20);
    assert_eq!(client.state(), SessionState::Disconnected);

    // Queuing work does not restart a session that gave up
    let a = uri("a.txt")?;
    client.open_document(a.clone(), "plaintext", "text").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.attempts(), 20);
    assert_eq!(client.pending_actions().await.len(), 1);

    server.fail_next_connects(0);
    client.reconnect().await?;
    wait_state(&client, SessionState::Ready).await?;
    server.wait_for_count("textDocument/didOpen", 1).await?;
    assert!(client.last_connection_error().await.is_none());

    client.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_idle_session_reconnects_on_demand() -> Result<()> {
    let server = FakeServer::basic();
    let mut opts = options("plain", "plaintext");
    opts.policy.idle_timeout = Some(Duration::from_millis(200));
    let client = LanguageClient::start(opts, Arc::new(server.clone()));
    let a = uri("a.txt")?;

    wait_state(&client, SessionState::Ready).await?;
    client.open_document(a.clone(), "plaintext", "one").await?;
    server.wait_for_count("textDocument/didOpen", 1).await?;

    wait_state(&client, SessionState::Disconnected).await?;
    assert_eq!(server.connects(), 1);
    assert!(client.last_connection_error().await.is_none());

    server.clear_received();
    client.set_document_text(&a, "two").await?;
    wait_state(&client, SessionState::Ready).await?;
    server.wait_for_count("textDocument/didChange", 1).await?;

    assert_eq!(server.connects(), 2);
    let methods: Vec<String> = server
        .methods()
        .into_iter()
        .filter(|m| m.starts_with("textDocument/"))
        .collect();
    assert_eq!(methods, ["textDocument/didOpen", "textDocument/didChange"]);
    let open = &server.params_of("textDocument/didOpen")[0];
    assert_eq!(open["textDocument"]["text"], "one");
    let change = &server.params_of("textDocument/didChange")[0];
    assert_eq!(change["textDocument"]["version"], 2);

    client.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_idle_session_reconnects_on_query() -> Result<()> {
    let server = FakeServer::basic();
    server.respond("textDocument/hover", json!({ "contents": "word" }));
    let mut opts = options("plain", "plaintext");
    opts.policy.idle_timeout = Some(Duration::from_millis(200));
    let client = LanguageClient::start(opts, Arc::new(server.clone()));
    let a = uri("a.txt")?;

    wait_state(&client, SessionState::Ready).await?;
    client.open_document(a.clone(), "plaintext", "word").await?;
    server.wait_for_count("textDocument/didOpen", 1).await?;
    wait_state(&client, SessionState::Disconnected).await?;
    assert_eq!(server.connects(), 1);

    // The first query finds nothing but wakes the session
    assert!(client.hover(&a, Position::new(0, 1)).await?.is_none());
    assert_eq!(server.count("textDocument/hover"), 0);
    wait_state(&client, SessionState::Ready).await?;
    assert_eq!(server.connects(), 2);

    let hover = client.hover(&a, Position::new(0, 1)).await?;
    assert!(hover.is_some());
    assert_eq!(server.count("textDocument/hover"), 1);

    client.dispose().await;
    Ok(())
}
