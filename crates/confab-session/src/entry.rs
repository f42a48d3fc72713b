//! Transcript entry types

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use confab_core::{PeerIdentity, TransferId};
use serde::{Deserialize, Serialize};

/// Who originated an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Sent by the local user
    Sent,
    /// Received from a remote peer
    Received,
    /// Synthesized by the session itself (admin notices)
    Local,
}

/// Lifecycle of a transfer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Bytes are still moving
    Active,
    /// All bytes arrived, waiting for the resource to be stored
    Complete,
    /// Terminal failure; the entry is never resolved
    Failed(String),
    /// Terminal cancellation
    Cancelled,
}

impl TransferStatus {
    /// Check if no further progress is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}

/// An in-flight resource transfer as shown in the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTransfer {
    pub transfer_id: TransferId,
    /// Resource name
    pub name: String,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub status: TransferStatus,
}

impl ResourceTransfer {
    /// Fraction complete in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.is_complete() { 1.0 } else { 0.0 };
        }
        self.completed_bytes as f64 / self.total_bytes as f64
    }

    /// Check if every byte has arrived
    pub fn is_complete(&self) -> bool {
        self.status == TransferStatus::Complete
    }
}

/// A finished resource available on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub name: String,
    pub location: PathBuf,
}

/// Entry content; exactly one kind per entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptPayload {
    Text(String),
    Transfer(ResourceTransfer),
    Resource(ResourceResult),
}

/// A single line of the chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub direction: Direction,
    /// Originator; the local identity for sent entries
    pub peer: PeerIdentity,
    pub payload: TranscriptPayload,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(direction: Direction, peer: PeerIdentity, payload: TranscriptPayload) -> Self {
        Self {
            direction,
            peer,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a text entry
    pub fn text(direction: Direction, peer: PeerIdentity, text: impl Into<String>) -> Self {
        Self::new(direction, peer, TranscriptPayload::Text(text.into()))
    }

    /// Create an admin notice about `peer`
    pub fn notice(peer: PeerIdentity, text: impl Into<String>) -> Self {
        Self::text(Direction::Local, peer, text)
    }

    /// Create a progress entry for a transfer that just started
    pub fn transfer(
        direction: Direction,
        peer: PeerIdentity,
        transfer_id: TransferId,
        name: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        Self::new(
            direction,
            peer,
            TranscriptPayload::Transfer(ResourceTransfer {
                transfer_id,
                name: name.into(),
                total_bytes,
                completed_bytes: 0,
                status: TransferStatus::Active,
            }),
        )
    }

    /// Create an entry for a stored resource
    pub fn resource(
        direction: Direction,
        peer: PeerIdentity,
        name: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self::new(
            direction,
            peer,
            TranscriptPayload::Resource(ResourceResult {
                name: name.into(),
                location: location.into(),
            }),
        )
    }

    /// Transfer id carried by a progress entry
    pub fn transfer_id(&self) -> Option<TransferId> {
        match &self.payload {
            TranscriptPayload::Transfer(transfer) => Some(transfer.transfer_id),
            _ => None,
        }
    }

    /// Get the text content if this is a text entry
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            TranscriptPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Get the transfer if this is a progress entry
    pub fn as_transfer(&self) -> Option<&ResourceTransfer> {
        match &self.payload {
            TranscriptPayload::Transfer(transfer) => Some(transfer),
            _ => None,
        }
    }

    pub(crate) fn as_transfer_mut(&mut self) -> Option<&mut ResourceTransfer> {
        match &mut self.payload {
            TranscriptPayload::Transfer(transfer) => Some(transfer),
            _ => None,
        }
    }

    /// Get the stored resource if this is a result entry
    pub fn as_resource(&self) -> Option<&ResourceResult> {
        match &self.payload {
            TranscriptPayload::Resource(result) => Some(result),
            _ => None,
        }
    }
}
