// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Capability names and the per-session capability registry.
pub mod capabilities;
/// Session engine: one language client per server.
pub mod client;
/// Method-name routing for inbound messages.
pub mod dispatch;
mod handlers;
/// Service registry mapping modes to sessions.
pub mod manager;
/// Session options and the `initialize` advertisement.
pub mod options;
/// LSP message protocol definitions.
pub mod protocol;
/// Deferred mutations awaiting the handshake.
pub mod queue;
/// Request/response correlation over the transport.
pub mod rpc;
/// Destination for server-originated messages.
pub mod sink;
/// Session state and progress tracking.
pub mod state;

pub use capabilities::{Capability, CapabilityRegistry};
pub use client::LanguageClient;
pub use manager::ServiceRegistry;
pub use options::{Features, SessionOptions};
pub use queue::PendingAction;
pub use sink::{MessageSink, TracingSink};
pub use state::{ProgressTracker, SessionState};
