//! Connection states and the events a transport delivers

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::identity::PeerIdentity;
use crate::resource::{TransferId, TransferOutcome};

/// Per-peer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
}

impl SessionState {
    /// Whether moving from `self` to `next` follows the session lifecycle
    ///
    /// Peers establish through `Connecting` and may drop to `NotConnected`
    /// from any state.
    pub fn is_valid_transition(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::NotConnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (_, Self::NotConnected)
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not Connected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Notifications delivered by a transport
///
/// Progress and finish events are keyed by transfer id and cover both
/// directions: inbound transfers announced by `ResourceStarted` and
/// outbound transfers created by `Transport::send_resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// A peer's connection state changed
    PeerStateChanged {
        peer: PeerIdentity,
        state: SessionState,
    },

    /// A framed message arrived
    MessageReceived { peer: PeerIdentity, data: Vec<u8> },

    /// A peer started sending us a resource
    ResourceStarted {
        peer: PeerIdentity,
        transfer_id: TransferId,
        name: String,
        total_bytes: u64,
    },

    /// Bytes moved on a transfer
    ResourceProgress {
        transfer_id: TransferId,
        completed_bytes: u64,
        total_bytes: u64,
    },

    /// A transfer reached a terminal outcome
    ResourceFinished {
        transfer_id: TransferId,
        outcome: TransferOutcome,
    },
}

impl TransportEvent {
    /// Create a peer state change event
    pub fn peer_state(peer: PeerIdentity, state: SessionState) -> Self {
        Self::PeerStateChanged { peer, state }
    }

    /// Create a message event
    pub fn message(peer: PeerIdentity, data: impl Into<Vec<u8>>) -> Self {
        Self::MessageReceived {
            peer,
            data: data.into(),
        }
    }

    /// Create a progress event
    pub fn progress(transfer_id: TransferId, completed_bytes: u64, total_bytes: u64) -> Self {
        Self::ResourceProgress {
            transfer_id,
            completed_bytes,
            total_bytes,
        }
    }

    /// Create a finish event
    pub fn finished(transfer_id: TransferId, outcome: TransferOutcome) -> Self {
        Self::ResourceFinished {
            transfer_id,
            outcome,
        }
    }

    /// Short event name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerStateChanged { .. } => "peer_state_changed",
            Self::MessageReceived { .. } => "message_received",
            Self::ResourceStarted { .. } => "resource_started",
            Self::ResourceProgress { .. } => "resource_progress",
            Self::ResourceFinished { .. } => "resource_finished",
        }
    }
}
