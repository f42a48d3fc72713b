//! # Confab Core
//!
//! Core types, traits, and errors for the Confab peer chat stack.
//!
//! This crate provides the foundations shared by the session layer and
//! every transport implementation, so the same session logic runs against
//! the in-memory mock in tests and a real network in production.
//!
//! ## Key Types
//!
//! - [`PeerIdentity`]: Stable peer id plus advertised display name
//! - [`SessionState`]: Per-peer connection lifecycle
//! - [`TransportEvent`]: Notifications a transport delivers
//! - [`TransferId`] / [`ResourceHandle`]: Resource transfer primitives
//!
//! ## Key Traits
//!
//! - [`Transport`]: Message and resource delivery between peers
//! - [`BroadcastTransport`]: Multi-peer sends with per-peer outcomes

pub mod error;
pub mod event;
pub mod identity;
pub mod mock_transport;
pub mod resource;
pub mod transport;

// Re-export main types
pub use error::*;
pub use event::*;
pub use identity::*;
pub use mock_transport::*;
pub use resource::*;
pub use transport::*;
