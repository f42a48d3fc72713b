//! Peer identity types
//!
//! A [`PeerIdentity`] pairs an opaque, stable [`PeerId`] with the
//! human readable display name the peer advertised. Identities are
//! immutable once created and cheap to clone, so transcript entries can keep
//! their own copy long after the peer has disconnected.

use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// Maximum display name length in UTF-8 bytes
pub const MAX_DISPLAY_NAME_BYTES: usize = 63;

/// Opaque stable token identifying a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let uuid = Uuid::from_slice(bytes).map_err(|_| IdentityError::InvalidKeyLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self(uuid))
    }

    /// Get the id as bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IdentityError::InvalidFormat(e.to_string()))
    }
}

/// A local or remote chat participant
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    id: PeerId,
    display_name: Arc<str>,
}

impl PeerIdentity {
    /// Create an identity with a freshly generated id
    ///
    /// Fails if the display name is empty or longer than
    /// [`MAX_DISPLAY_NAME_BYTES`].
    pub fn new(display_name: impl Into<String>) -> Result<Self, IdentityError> {
        Self::with_id(PeerId::generate(), display_name)
    }

    /// Create an identity for a known id
    pub fn with_id(id: PeerId, display_name: impl Into<String>) -> Result<Self, IdentityError> {
        let display_name = display_name.into();
        validate_display_name(&display_name)?;
        Ok(Self {
            id,
            display_name: display_name.into(),
        })
    }

    /// The stable id
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The advertised display name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerIdentity({}, {})", self.display_name, self.id.short_id())
    }
}

impl Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Check a display name against the advertised-name limits
pub fn validate_display_name(name: &str) -> Result<(), IdentityError> {
    if name.is_empty() {
        return Err(IdentityError::InvalidFormat(
            "display name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_DISPLAY_NAME_BYTES {
        return Err(IdentityError::InvalidFormat(format!(
            "display name is {} bytes, limit is {}",
            name.len(),
            MAX_DISPLAY_NAME_BYTES
        )));
    }
    Ok(())
}
