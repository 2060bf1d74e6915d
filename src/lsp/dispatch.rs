// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Method-name routing for inbound notifications and server requests.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use super::protocol::{
    METHOD_NOT_FOUND, NotificationMessage, RequestMessage, ResponseError, ResponseMessage,
};
use crate::error::SessionError;

/// Handles a notification against session state `S`.
pub type NotificationHandler<S> = fn(&mut S, Value) -> Result<(), SessionError>;

/// Handles a server-to-client request against session state `S`.
pub type RequestHandler<S> = fn(&mut S, Value) -> Result<Value, ResponseError>;

/// Routes inbound messages to handlers by method name.
pub struct Dispatcher<S> {
    notifications: HashMap<&'static str, NotificationHandler<S>>,
    requests: HashMap<&'static str, RequestHandler<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            notifications: HashMap::new(),
            requests: HashMap::new(),
        }
    }
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        let mut requests: Vec<_> = self.requests.keys().collect();
        notifications.sort();
        requests.sort();
        f.debug_struct("Dispatcher")
            .field("notifications", &notifications)
            .field("requests", &requests)
            .finish()
    }
}

impl<S> Dispatcher<S> {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a notification handler, replacing any previous one.
    #[must_use]
    pub fn on_notification(mut self, method: &'static str, handler: NotificationHandler<S>) -> Self {
        self.notifications.insert(method, handler);
        self
    }

    /// Registers a request handler, replacing any previous one.
    #[must_use]
    pub fn on_request(mut self, method: &'static str, handler: RequestHandler<S>) -> Self {
        self.requests.insert(method, handler);
        self
    }

    /// Runs the handler for a notification. Unknown methods are ignored.
    ///
    /// Handler failures are logged; they never end the session.
    pub fn dispatch_notification(&self, state: &mut S, notification: NotificationMessage) {
        let Some(handler) = self.notifications.get(notification.method.as_str()) else {
            trace!(
                "Ignoring notification: {} params={}",
                notification.method, notification.params
            );
            return;
        };

        if let Err(e) = handler(state, notification.params) {
            warn!("Handler for {} failed: {}", notification.method, e);
        }
    }

    /// Runs the handler for a server request and builds the response.
    ///
    /// Unknown methods are answered with `MethodNotFound`.
    pub fn dispatch_request(&self, state: &mut S, request: RequestMessage) -> ResponseMessage {
        debug!("Received server request: {} (id: {:?})", request.method, request.id);

        let Some(handler) = self.requests.get(request.method.as_str()) else {
            return ResponseMessage::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method '{}' not supported by client", request.method),
            );
        };

        match handler(state, request.params) {
            Ok(result) => ResponseMessage::success(request.id, result),
            Err(error) => {
                warn!(
                    "Request handler for {} failed: {}",
                    request.method, error.message
                );
                ResponseMessage {
                    jsonrpc: "2.0".to_string(),
                    id: Some(request.id),
                    result: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Returns true if a handler exists for `method`.
    #[must_use]
    pub fn handles(&self, method: &str) -> bool {
        self.notifications.contains_key(method) || self.requests.contains_key(method)
    }
}
