// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Endpoint factories (process and TCP).
pub mod connector;
/// Reconnecting transport actor.
pub mod reconnecting;

pub use connector::{Connection, Connector, ProcessConnector, TcpConnector};
pub use reconnecting::{
    CloseEvent, CloseKind, ReconnectPolicy, ReconnectingTransport, TransportEvent,
};
