// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC request/response correlation over a reconnecting transport.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{trace, warn};

use super::protocol::{NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use crate::error::{SessionError, SessionResult};
use crate::transport::ReconnectingTransport;

type PendingMap = HashMap<RequestId, oneshot::Sender<ResponseMessage>>;

/// Outbound half of a session's JSON-RPC traffic.
///
/// Every send is pinned to a transport generation, so nothing composed for
/// one connection leaks into the next.
#[derive(Debug)]
pub struct RpcConnection {
    transport: ReconnectingTransport,
    next_id: AtomicI64,
    pending: Mutex<PendingMap>,
}

impl RpcConnection {
    /// Wraps a transport handle.
    #[must_use]
    pub fn new(transport: ReconnectingTransport) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &ReconnectingTransport {
        &self.transport
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends a request on `generation` and registers it as pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn request_on(
        &self,
        generation: u64,
        method: &str,
        params: Value,
    ) -> SessionResult<oneshot::Receiver<ResponseMessage>> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let body = serde_json::to_string(&RequestMessage::new(id.clone(), method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        self.transport.send_on(generation, body);
        Ok(rx)
    }

    /// Sends a notification on `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be serialized.
    pub fn notify_on(&self, generation: u64, method: &str, params: Value) -> SessionResult<()> {
        let body = serde_json::to_string(&NotificationMessage::new(method, params))?;
        self.transport.send_on(generation, body);
        Ok(())
    }

    /// Answers a server-to-client request on `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be serialized.
    pub fn respond_on(&self, generation: u64, response: &ResponseMessage) -> SessionResult<()> {
        let body = serde_json::to_string(response)?;
        self.transport.send_on(generation, body);
        Ok(())
    }

    /// Hands a response to the request waiting for it.
    ///
    /// Returns false if no request with that id is pending.
    pub fn route_response(&self, response: ResponseMessage) -> bool {
        let Some(id) = response.id.clone() else {
            warn!("Received response without an id: {:?}", response.error);
            return false;
        };

        let sender = self.pending().remove(&id);
        if let Some(sender) = sender {
            if sender.send(response).is_err() {
                trace!("Caller stopped waiting for request {:?}", id);
            }
            true
        } else {
            warn!("Received response for unknown request id: {:?}", id);
            false
        }
    }

    /// Drops every pending request; their callers see
    /// [`SessionError::ConnectionLost`]. Returns how many were dropped.
    pub fn fail_pending(&self) -> usize {
        let dropped: Vec<_> = self.pending().drain().collect();
        if !dropped.is_empty() {
            trace!("Failing {} pending request(s)", dropped.len());
        }
        dropped.len()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// Waits for a response and decodes its result.
///
/// A `null` or missing result decodes as JSON `null`.
///
/// # Errors
///
/// Returns [`SessionError::ConnectionLost`] if the request was dropped,
/// [`SessionError::Rpc`] for an error response, and
/// [`SessionError::Json`] if the result does not match `R`.
pub async fn await_response<R: DeserializeOwned>(
    rx: oneshot::Receiver<ResponseMessage>,
) -> SessionResult<R> {
    let response = rx.await.map_err(|_| SessionError::ConnectionLost)?;

    if let Some(error) = response.error {
        return Err(SessionError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    let result = response.result.unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connection, Connector, ReconnectPolicy};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Arc;

    struct NoServer;

    #[async_trait]
    impl Connector for NoServer {
        async fn connect(&self) -> io::Result<Connection> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no server"))
        }

        fn describe(&self) -> String {
            "nowhere".to_string()
        }
    }

    fn connection() -> RpcConnection {
        let policy = ReconnectPolicy {
            auto_reconnect: false,
            max_attempts: 1,
            ..ReconnectPolicy::default()
        };
        let (transport, _events) = ReconnectingTransport::spawn(Arc::new(NoServer), policy);
        RpcConnection::new(transport)
    }

    fn reply(id: i64, result: Value) -> ResponseMessage {
        ResponseMessage::success(RequestId::Number(id), result)
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_route() -> Result<()> {
        let rpc = connection();
        let first = rpc.request_on(1, "textDocument/hover", Value::Null)?;
        let second = rpc.request_on(1, "textDocument/hover", Value::Null)?;
        assert_eq!(rpc.pending_count(), 2);

        assert!(rpc.route_response(reply(2, serde_json::json!("two"))));
        assert!(rpc.route_response(reply(1, serde_json::json!("one"))));

        assert_eq!(await_response::<String>(first).await?, "one");
        assert_eq!(await_response::<String>(second).await?, "two");
        assert_eq!(rpc.pending_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_response_is_discarded() {
        let rpc = connection();
        assert!(!rpc.route_response(reply(99, Value::Null)));
    }

    #[tokio::test]
    async fn test_fail_pending_reports_connection_lost() -> Result<()> {
        let rpc = connection();
        let rx = rpc.request_on(1, "textDocument/definition", Value::Null)?;
        assert_eq!(rpc.fail_pending(), 1);

        let result = await_response::<Value>(rx).await;
        assert!(matches!(result, Err(SessionError::ConnectionLost)));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_response_maps_to_rpc_error() -> Result<()> {
        let rpc = connection();
        let rx = rpc.request_on(1, "textDocument/rename", Value::Null)?;
        rpc.route_response(ResponseMessage::failure(
            RequestId::Number(1),
            -32803,
            "request failed",
        ));

        match await_response::<Value>(rx).await {
            Err(SessionError::Rpc { code, message }) => {
                assert_eq!(code, -32803);
                assert_eq!(message, "request failed");
            }
            other => anyhow::bail!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_null_result_decodes_as_none() -> Result<()> {
        let rpc = connection();
        let rx = rpc.request_on(1, "textDocument/hover", Value::Null)?;
        rpc.route_response(reply(1, Value::Null));

        let hover: Option<lsp_types::Hover> = await_response(rx).await?;
        assert!(hover.is_none());
        Ok(())
    }
}
