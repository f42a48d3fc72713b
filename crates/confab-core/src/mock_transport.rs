//! Mock transport implementation for testing
//!
//! Provides an in-memory transport so session logic can be exercised
//! without a real network. Each [`MockTransport`] owns an inbox of
//! [`TransportEvent`]s; linked transports push events into each other's
//! inboxes the way a real transport would surface callbacks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use confab_core::{MockTransportBuilder, PeerIdentity, Transport};
//!
//! let alice = PeerIdentity::new("Alice")?;
//! let bob = PeerIdentity::new("Bob")?;
//! let (transport_a, transport_b) =
//!     MockTransportBuilder::new().create_linked_pair(alice, bob.clone());
//!
//! transport_a.connect(&bob).await?;
//! transport_a.send_message(&bob.id(), b"hello".to_vec()).await?;
//! let event = transport_b.recv().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::event::{SessionState, TransportEvent};
use crate::identity::{PeerId, PeerIdentity};
use crate::resource::{ResourceHandle, TransferId, TransferOutcome};
use crate::transport::Transport;

/// Peers with an established session, shared between linked transports
type SessionTable = Arc<DashMap<PeerId, PeerIdentity>>;

/// Outbound transfers of one transport, visible to its receivers
type TransferTable = Arc<DashMap<TransferId, MockTransfer>>;

/// A reachable remote transport
#[derive(Clone)]
struct MockLink {
    identity: PeerIdentity,
    inbox: mpsc::Sender<TransportEvent>,
    sessions: SessionTable,
    transfers: TransferTable,
}

/// An outbound transfer waiting to be driven by the test
#[derive(Debug, Clone)]
pub struct MockTransfer {
    /// Receiving peer
    pub peer: PeerId,
    /// What is being sent
    pub resource: ResourceHandle,
    /// Bytes reported so far
    pub completed_bytes: u64,
}

/// A mock transport for testing
///
/// Outbound transfers do not move on their own: call
/// [`advance_transfer`](Self::advance_transfer) and
/// [`finish_transfer`](Self::finish_transfer) to report progress on both
/// ends.
pub struct MockTransport {
    local: PeerIdentity,
    links: DashMap<PeerId, MockLink>,
    sessions: SessionTable,
    failing: DashMap<PeerId, String>,
    transfers: TransferTable,
    inbox_rx: Arc<RwLock<mpsc::Receiver<TransportEvent>>>,
    inbox_tx: mpsc::Sender<TransportEvent>,
}

impl MockTransport {
    /// Create a new mock transport with the given identity
    pub fn new(local: PeerIdentity) -> Self {
        Self::with_buffer_size(local, 1024)
    }

    /// Create a new mock transport with a specific buffer size
    pub fn with_buffer_size(local: PeerIdentity, buffer_size: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(buffer_size);
        Self {
            local,
            links: DashMap::new(),
            sessions: Arc::new(DashMap::new()),
            failing: DashMap::new(),
            transfers: Arc::new(DashMap::new()),
            inbox_rx: Arc::new(RwLock::new(inbox_rx)),
            inbox_tx,
        }
    }

    /// Make another transport reachable from this one
    ///
    /// This is one-way; [`MockTransportBuilder`] links both directions.
    pub fn link_to(&self, other: &MockTransport) {
        self.links.insert(
            other.local.id(),
            MockLink {
                identity: other.local.clone(),
                inbox: other.inbox_tx.clone(),
                sessions: other.sessions.clone(),
                transfers: other.transfers.clone(),
            },
        );
    }

    /// Remove a peer from reach, dropping any session with it
    pub fn unlink(&self, peer: &PeerId) {
        self.links.remove(peer);
        self.sessions.remove(peer);
    }

    /// Push an event into our own inbox, as if the transport raised it
    pub async fn inject(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.inbox_tx
            .send(event)
            .await
            .map_err(|_| TransportError::SendFailed("inbox closed".into()))
    }

    /// Make every subsequent send to `peer` fail with `reason`
    pub fn fail_sends_to(&self, peer: PeerId, reason: impl Into<String>) {
        self.failing.insert(peer, reason.into());
    }

    /// Clear a scripted failure
    pub fn heal(&self, peer: &PeerId) {
        self.failing.remove(peer);
    }

    /// Check if a session with the peer is established
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Snapshot of in-flight outbound transfers
    pub fn pending_transfers(&self) -> HashMap<TransferId, MockTransfer> {
        self.transfers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Report progress on an outbound transfer to both ends
    pub async fn advance_transfer(
        &self,
        transfer_id: TransferId,
        completed_bytes: u64,
    ) -> Result<(), TransportError> {
        let (link, total) = {
            let mut transfer = self
                .transfers
                .get_mut(&transfer_id)
                .ok_or_else(|| TransportError::UnknownTransfer(transfer_id.short_id()))?;
            transfer.completed_bytes = completed_bytes.min(transfer.resource.size);
            (self.link(&transfer.peer)?, transfer.resource.size)
        };

        let event = TransportEvent::progress(transfer_id, completed_bytes.min(total), total);
        self.inject(event.clone()).await?;
        send_to(&link, event).await
    }

    /// Finish an outbound transfer on both ends
    ///
    /// On success the sender sees its own file location and the receiver
    /// sees the same path as the temporary download location.
    pub async fn finish_transfer(
        &self,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    ) -> Result<(), TransportError> {
        let (_, transfer) = self
            .transfers
            .remove(&transfer_id)
            .ok_or_else(|| TransportError::UnknownTransfer(transfer_id.short_id()))?;
        let link = self.link(&transfer.peer)?;

        let outcome = match outcome {
            TransferOutcome::Success(_) => TransferOutcome::Success(transfer.resource.path.clone()),
            other => other,
        };

        debug!(
            transfer = %transfer_id.short_id(),
            peer = %link.identity,
            success = outcome.is_success(),
            "Mock transfer finished"
        );

        let event = TransportEvent::finished(transfer_id, outcome);
        self.inject(event.clone()).await?;
        send_to(&link, event).await
    }

    /// Try to receive an event without blocking
    pub async fn try_recv(&self) -> Result<Option<TransportEvent>, TransportError> {
        let mut inbox = self.inbox_rx.write().await;
        match inbox.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(TransportError::ReceiveFailed("channel disconnected".into()))
            }
        }
    }

    fn link(&self, peer: &PeerId) -> Result<MockLink, TransportError> {
        self.links
            .get(peer)
            .map(|link| link.value().clone())
            .ok_or_else(|| TransportError::PeerNotConnected(peer.short_id()))
    }

    fn session_link(&self, peer: &PeerId) -> Result<MockLink, TransportError> {
        if !self.sessions.contains_key(peer) {
            return Err(TransportError::PeerNotConnected(peer.short_id()));
        }
        if let Some(reason) = self.failing.get(peer) {
            return Err(TransportError::SendFailed(reason.value().clone()));
        }
        self.link(peer)
    }
}

async fn send_to(link: &MockLink, event: TransportEvent) -> Result<(), TransportError> {
    link.inbox
        .send(event)
        .await
        .map_err(|_| TransportError::SendFailed("channel closed".into()))
}

#[async_trait]
impl Transport for MockTransport {
    fn local_identity(&self) -> &PeerIdentity {
        &self.local
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<(), TransportError> {
        let link = self
            .link(&peer.id())
            .map_err(|_| TransportError::ConnectionFailed(format!("{} is unreachable", peer)))?;

        for state in [SessionState::Connecting, SessionState::Connected] {
            self.inject(TransportEvent::peer_state(link.identity.clone(), state))
                .await?;
            send_to(&link, TransportEvent::peer_state(self.local.clone(), state)).await?;
        }

        self.sessions.insert(peer.id(), link.identity.clone());
        link.sessions.insert(self.local.id(), self.local.clone());
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<(), TransportError> {
        let Some((_, identity)) = self.sessions.remove(peer) else {
            return Ok(());
        };

        self.inject(TransportEvent::peer_state(identity, SessionState::NotConnected))
            .await?;

        if let Ok(link) = self.link(peer) {
            link.sessions.remove(&self.local.id());
            send_to(
                &link,
                TransportEvent::peer_state(self.local.clone(), SessionState::NotConnected),
            )
            .await?;
        }
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), TransportError> {
        let link = self.session_link(peer)?;
        trace!(peer = %link.identity, bytes = data.len(), "Mock message sent");
        send_to(&link, TransportEvent::message(self.local.clone(), data)).await
    }

    async fn send_resource(
        &self,
        peer: &PeerId,
        resource: &ResourceHandle,
    ) -> Result<TransferId, TransportError> {
        let link = self.session_link(peer)?;
        let transfer_id = TransferId::generate();

        send_to(
            &link,
            TransportEvent::ResourceStarted {
                peer: self.local.clone(),
                transfer_id,
                name: resource.name.clone(),
                total_bytes: resource.size,
            },
        )
        .await?;

        self.transfers.insert(
            transfer_id,
            MockTransfer {
                peer: *peer,
                resource: resource.clone(),
                completed_bytes: 0,
            },
        );
        Ok(transfer_id)
    }

    /// Cancel an outbound transfer on both ends, or an inbound one
    ///
    /// An inbound cancel is reported to the sender only; the receiver
    /// already knows.
    async fn cancel_resource(&self, transfer_id: &TransferId) -> Result<(), TransportError> {
        if self.transfers.contains_key(transfer_id) {
            return self
                .finish_transfer(*transfer_id, TransferOutcome::Cancelled)
                .await;
        }

        let sender = self.links.iter().find_map(|link| {
            let inbound = link
                .transfers
                .get(transfer_id)
                .is_some_and(|t| t.peer == self.local.id());
            inbound.then(|| link.value().clone())
        });
        if let Some(link) = sender {
            link.transfers.remove(transfer_id);
            debug!(
                transfer = %transfer_id.short_id(),
                peer = %link.identity,
                "Mock inbound transfer cancelled by receiver"
            );
            send_to(
                &link,
                TransportEvent::finished(*transfer_id, TransferOutcome::Cancelled),
            )
            .await?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<TransportEvent, TransportError> {
        let mut inbox = self.inbox_rx.write().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::ReceiveFailed("channel closed".into()))
    }
}

/// Builder for creating interconnected mock transports
pub struct MockTransportBuilder {
    buffer_size: usize,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransportBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self { buffer_size: 1024 }
    }

    /// Set the buffer size for channels
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Create two transports that can reach each other
    ///
    /// No session exists until one side calls `connect`.
    pub fn create_linked_pair(
        &self,
        id_a: PeerIdentity,
        id_b: PeerIdentity,
    ) -> (MockTransport, MockTransport) {
        let transport_a = MockTransport::with_buffer_size(id_a, self.buffer_size);
        let transport_b = MockTransport::with_buffer_size(id_b, self.buffer_size);

        transport_a.link_to(&transport_b);
        transport_b.link_to(&transport_a);

        (transport_a, transport_b)
    }

    /// Create transports that can all reach each other
    pub fn create_full_mesh(&self, ids: Vec<PeerIdentity>) -> HashMap<PeerId, MockTransport> {
        let transports: HashMap<PeerId, MockTransport> = ids
            .into_iter()
            .map(|id| (id.id(), MockTransport::with_buffer_size(id, self.buffer_size)))
            .collect();

        for (id_a, transport_a) in &transports {
            for (id_b, transport_b) in &transports {
                if id_a != id_b {
                    transport_a.link_to(transport_b);
                }
            }
        }

        transports
    }
}

/// A set of interconnected mock transports
pub struct MockNetwork {
    transports: HashMap<PeerId, Arc<MockTransport>>,
}

impl MockNetwork {
    /// Create a network where every peer can reach every other
    pub fn full_mesh(ids: Vec<PeerIdentity>) -> Self {
        let transports = MockTransportBuilder::new()
            .create_full_mesh(ids)
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        Self { transports }
    }

    /// Get a transport by peer id
    pub fn get(&self, id: &PeerId) -> Option<Arc<MockTransport>> {
        self.transports.get(id).cloned()
    }

    /// Get all peer ids
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.transports.keys().copied().collect()
    }

    /// Make two peers unreachable from each other
    pub fn partition(&self, a: &PeerId, b: &PeerId) {
        if let Some(transport) = self.transports.get(a) {
            transport.unlink(b);
        }
        if let Some(transport) = self.transports.get(b) {
            transport.unlink(a);
        }
    }
}
