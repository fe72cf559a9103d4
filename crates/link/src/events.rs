// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session event types.
//!
//! Most failures are absorbed by this layer (renewals, reconnects, redirects).
//! These events make those transitions observable without changing the
//! request/channel contracts.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channel::ConnectionState;

/// Capacity of the session event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Events emitted by a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Explicit login stored a credential.
    SignedIn,
    /// A renewal stored a fresh credential.
    Renewed { generation: u64 },
    /// A renewal failed; the session has been signed out.
    RenewalFailed { error: String },
    /// Explicit logout invalidated the credential.
    SignedOut,
    /// The navigator moved to a new location.
    Navigated { to: String },
    /// A channel changed connection state.
    ChannelState { room: String, state: ConnectionState },
    /// A channel has failed to connect this many times in a row.
    ChannelDegraded { room: String, attempts: u32 },
}

impl SessionEvent {
    /// Return the room for channel events.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::ChannelState { room, .. } | Self::ChannelDegraded { room, .. } => Some(room),
            _ => None,
        }
    }
}

/// Create the broadcast sender shared by all session components.
pub fn event_channel() -> broadcast::Sender<SessionEvent> {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}
