//! Error types for confab-session

use confab_core::{PeerId, TransferId, TransportError};
use thiserror::Error;

/// Errors returned by outbound send operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Nothing to send
    #[error("message is empty")]
    EmptyMessage,

    /// No peer is connected
    #[error("no connected peers")]
    NoPeers,

    /// At least one targeted peer failed
    ///
    /// Sends to the peers in `delivered` went through and are not rolled back.
    #[error("transport failure for {} of {} peers", failed.len(), failed.len() + delivered.len())]
    TransportFailure {
        delivered: Vec<PeerId>,
        failed: Vec<(PeerId, TransportError)>,
    },
}

/// Inbound bytes that could not be decoded as a text message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid UTF-8 message from {peer}: {reason}")]
pub struct DecodeError {
    /// Display name of the sender
    pub peer: String,
    /// Decoder message
    pub reason: String,
}

/// A transfer id with no matching transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no transcript entry for transfer {0}")]
pub struct NotFoundError(pub TransferId);

/// Errors from the transfer tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The transfer is not (or no longer) tracked
    #[error("transfer not tracked: {0}")]
    UnknownTransfer(TransferId),

    /// A transfer with this id is already tracked
    #[error("transfer already tracked: {0}")]
    AlreadyTracked(TransferId),
}

/// Errors persisting received resources
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Source content is missing
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors loading, saving, or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Display name rejected
    #[error("invalid display name: {0}")]
    InvalidDisplayName(String),

    /// Service type (room name) rejected
    #[error("invalid service type: {0}")]
    InvalidServiceType(String),

    /// Settings file could not be read or written
    #[error("settings I/O error: {0}")]
    Io(String),

    /// Settings file is malformed
    #[error("settings format error: {0}")]
    Format(String),
}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        SettingsError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Format(err.to_string())
    }
}

/// Top-level error for the session layer
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("send error: {0}")]
    Send(#[from] SendError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("lookup error: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("identity error: {0}")]
    Identity(#[from] confab_core::IdentityError),

    /// The session actor is gone
    #[error("session closed")]
    Closed,
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
