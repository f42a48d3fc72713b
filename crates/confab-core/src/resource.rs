//! Resource transfer primitives

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token naming a single resource transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generate a fresh transfer id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A local file offered to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Name advertised to receivers
    pub name: String,
    /// Location of the content on the local filesystem
    pub path: PathBuf,
    /// Content size in bytes
    pub size: u64,
}

impl ResourceHandle {
    /// Create a handle, naming the resource after the last path component
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resource".to_string());
        Self { name, path, size }
    }

    /// Override the advertised name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The local path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Terminal outcome of a transfer as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Content arrived; for inbound transfers this is a temporary location
    Success(PathBuf),
    /// The transfer failed
    Failure(String),
    /// The transfer was cancelled by either side
    Cancelled,
}

impl TransferOutcome {
    /// Check if this is a successful outcome
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Direction of a transfer relative to the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    Outbound,
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_handle_name_from_path() {
        let handle = ResourceHandle::new("/tmp/pictures/photo.jpg", 1000);
        assert_eq!(handle.name, "photo.jpg");
        assert_eq!(handle.size, 1000);

        let handle = handle.with_name("holiday.jpg");
        assert_eq!(handle.name, "holiday.jpg");
        assert_eq!(handle.path(), Path::new("/tmp/pictures/photo.jpg"));
    }

    #[test]
    fn test_transfer_id_parse() {
        let id = TransferId::generate();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("unknown-id".parse::<TransferId>().is_err());
    }

    #[test]
    fn test_outcome_is_success() {
        assert!(TransferOutcome::Success(PathBuf::from("/tmp/x")).is_success());
        assert!(!TransferOutcome::Failure("reset".into()).is_success());
        assert!(!TransferOutcome::Cancelled.is_success());
    }
}
