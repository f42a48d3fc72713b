//! Peer context for multi-instance logging
//!
//! Several sessions can run in one process (tests, simulations, a device
//! hosting more than one room). A [`PeerContextGuard`] marks the current
//! thread as acting for one local peer so spans opened in that scope are
//! tagged with it.

use std::cell::RefCell;

use confab_core::PeerIdentity;
use uuid::Uuid;

/// Peer context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerContextData {
    /// Short form of the peer id
    pub peer_id: String,
    /// Advertised display name
    pub display_name: String,
    /// Unique id of this session instance
    pub session_id: Uuid,
}

impl PeerContextData {
    fn for_identity(identity: &PeerIdentity, session_id: Uuid) -> Self {
        Self {
            peer_id: identity.id().short_id(),
            display_name: identity.display_name().to_string(),
            session_id,
        }
    }
}

thread_local! {
    static PEER_CONTEXT: RefCell<Option<PeerContextData>> = const { RefCell::new(None) };
}

/// RAII guard for peer context
///
/// Sets the peer context for the current thread and restores the previous
/// one on drop, so guards nest.
///
/// ```ignore
/// use confab_logging::PeerContextGuard;
///
/// let _guard = PeerContextGuard::new(&alice);
/// tracing::info_span!("send").in_scope(|| tracing::info!("Sending"));
/// ```
pub struct PeerContextGuard {
    previous: Option<PeerContextData>,
}

impl PeerContextGuard {
    /// Set `identity` as the current peer with a fresh session id
    pub fn new(identity: &PeerIdentity) -> Self {
        Self::with_session_id(identity, Uuid::new_v4())
    }

    /// Set `identity` as the current peer with a known session id
    pub fn with_session_id(identity: &PeerIdentity, session_id: Uuid) -> Self {
        let data = PeerContextData::for_identity(identity, session_id);
        let previous = PEER_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// The current peer context, if any
    pub fn current() -> Option<PeerContextData> {
        PEER_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// The current peer id, if set
    pub fn current_peer_id() -> Option<String> {
        Self::current().map(|ctx| ctx.peer_id)
    }

    /// The current session id, if set
    pub fn current_session_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.session_id)
    }
}

impl Drop for PeerContextGuard {
    fn drop(&mut self) {
        PEER_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
