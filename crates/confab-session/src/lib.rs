//! # Confab Session
//!
//! Peer session and transcript engine for Confab group chat.
//!
//! Tracks which peers are connected, sends text and resources to all of
//! them, and keeps an ordered transcript of messages, transfers and
//! connection notices that the UI renders.
//!
//! ## Features
//!
//! - Ordered, append-only transcript with stable indices
//! - Resource transfers shown as progress entries, replaced in place by
//!   the stored result
//! - Transfer progress subscriptions with at-most-once completion
//! - Single-owner actor driving all mutations
//! - Persisted display name and room name
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use confab_core::{MockTransportBuilder, PeerIdentity};
//! use confab_session::{SessionActor, SessionConfig};
//!
//! let alice = PeerIdentity::new("Alice")?;
//! let bob = PeerIdentity::new("Bob")?;
//! let (transport, _remote) = MockTransportBuilder::new().create_linked_pair(alice, bob.clone());
//!
//! let config = SessionConfig::with_data_dir("./alice-data");
//! let (session, _task) = SessionActor::start(Arc::new(transport), &config).await?;
//!
//! let mut updates = session.subscribe();
//! session.connect(bob).await?;
//! session.send_text("hi").await?;
//!
//! while let Ok(update) = updates.recv().await {
//!     println!("{}: {:?}", update.index(), update.entry().payload);
//! }
//! ```

pub mod actor;
pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod settings;
pub mod store;
pub mod tracker;
pub mod transcript;

// Re-exports
pub use actor::{SessionActor, SessionHandle};
pub use config::SessionConfig;
pub use entry::{
    Direction, ResourceResult, ResourceTransfer, TranscriptEntry, TranscriptPayload,
    TransferStatus,
};
pub use error::{
    DecodeError, NotFoundError, SendError, SessionError, SessionResult, SettingsError,
    StorageError, TrackerError,
};
pub use manager::{SessionManager, TranscriptUpdate};
pub use settings::{
    JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore, validate_service_type,
};
pub use store::{FsResourceStore, MemoryResourceStore, ResourceStore};
pub use tracker::{TransferEvent, TransferRecord, TransferSubscription, TransferTracker};
pub use transcript::Transcript;
