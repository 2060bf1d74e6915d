// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error types for sessions and document state.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the document store.
///
/// These indicate that editor state and session state disagree, so they are
/// always reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The document is already open.
    #[error("document already open: {0}")]
    AlreadyOpen(String),

    /// A mutation targeted a document that is not open.
    #[error("document not open: {0}")]
    NotOpen(String),

    /// A lookup targeted a document that is not open.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A delta carried a version that does not advance the document.
    #[error("stale version {supplied} for {uri} (current version is {current})")]
    StaleVersion {
        /// Document uri.
        uri: String,
        /// Version held by the store.
        current: i32,
        /// Version supplied by the caller.
        supplied: i32,
    },

    /// The document is at `i32::MAX` and cannot take another version.
    #[error("version of {0} is already at the maximum")]
    VersionOverflow(String),
}

/// Errors raised by a language client session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server could not be reached, or the handshake failed.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The connection carrying a request went away before it was answered.
    #[error("connection lost before the response arrived")]
    ConnectionLost,

    /// Local document state is inconsistent with the requested operation.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The wire protocol broke; the session has been torn down.
    #[error("protocol fault: {0}")]
    ProtocolFault(String),

    /// The server answered a request with an error.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// The session was disposed.
    #[error("session disposed")]
    Disposed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Create a protocol fault.
    pub fn protocol_fault(message: impl Into<String>) -> Self {
        Self::ProtocolFault(message.into())
    }

    /// Create a connection-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(message.into())
    }

    /// Returns true for errors that end the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolFault(_) | Self::Disposed)
    }
}
