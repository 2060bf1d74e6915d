// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Tether is a resilient Language Server Protocol client.
//!
//! It keeps editor documents synchronized with language servers across
//! disconnects, queues work until the handshake completes, and only sends
//! requests the server has declared support for.

/// Command-line output helpers.
pub mod cli;
/// Configuration handling for services and transport policy.
pub mod config;
/// Open documents and text edits.
pub mod document;
/// Error types.
pub mod error;
/// LSP sessions and service management.
pub mod lsp;
/// Reconnecting message transport.
pub mod transport;

pub use error::{DocumentError, SessionError, SessionResult};
