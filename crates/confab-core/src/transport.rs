//! Transport abstraction for peer sessions
//!
//! The [`Transport`] trait is the seam between the session layer and
//! whatever actually moves bytes: a QUIC mesh, WebRTC data channels or the
//! in-memory [`MockTransport`](crate::mock_transport::MockTransport) used in
//! tests. Outbound operations are async calls; inbound notifications are
//! pulled with [`Transport::recv`] by the single task that owns session
//! state, which keeps every mutation on one sequential context.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::event::TransportEvent;
use crate::identity::{PeerId, PeerIdentity};
use crate::resource::{ResourceHandle, TransferId};

/// Transport trait for message and resource delivery between peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this transport advertises
    fn local_identity(&self) -> &PeerIdentity;

    /// Start establishing a session with a discovered peer
    ///
    /// State changes are reported through [`TransportEvent::PeerStateChanged`].
    async fn connect(&self, peer: &PeerIdentity) -> Result<(), TransportError>;

    /// Tear down the session with a peer
    async fn disconnect(&self, peer: &PeerId) -> Result<(), TransportError>;

    /// Send a framed message to a single peer
    ///
    /// Delivery is best-effort per peer; failures are independent.
    async fn send_message(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), TransportError>;

    /// Begin streaming a resource to a single peer
    ///
    /// Returns the id under which progress and the terminal outcome will be
    /// reported.
    async fn send_resource(
        &self,
        peer: &PeerId,
        resource: &ResourceHandle,
    ) -> Result<TransferId, TransportError>;

    /// Cancel an in-flight transfer
    ///
    /// Default implementation does nothing; the transport is expected to
    /// report `TransferOutcome::Cancelled` if it honours the request.
    async fn cancel_resource(&self, _transfer_id: &TransferId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Wait for the next transport notification
    async fn recv(&self) -> Result<TransportEvent, TransportError>;
}

/// Per-peer result of a multi-peer send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Peers that accepted the message
    pub delivered: Vec<PeerId>,
    /// Peers whose send failed
    pub failed: Vec<(PeerId, TransportError)>,
}

impl BroadcastOutcome {
    /// True when every targeted peer accepted the message
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when some but not all peers accepted the message
    pub fn is_partial(&self) -> bool {
        !self.delivered.is_empty() && !self.failed.is_empty()
    }
}

/// Extension trait for sending to several peers at once
#[async_trait]
pub trait BroadcastTransport: Transport {
    /// Send the same message to each peer, collecting per-peer outcomes
    ///
    /// A failure for one peer never prevents the attempt on the others.
    async fn broadcast_message(&self, peers: &[PeerId], data: Vec<u8>) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for peer in peers {
            match self.send_message(peer, data.clone()).await {
                Ok(()) => outcome.delivered.push(*peer),
                Err(e) => outcome.failed.push((*peer, e)),
            }
        }

        outcome
    }
}

/// Blanket implementation of BroadcastTransport for all Transport implementations
impl<T: Transport + ?Sized> BroadcastTransport for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Transport that accepts sends to a fixed set of peers
    struct SelectiveTransport {
        local: PeerIdentity,
        reachable: HashSet<PeerId>,
        sent: Mutex<Vec<PeerId>>,
    }

    #[async_trait]
    impl Transport for SelectiveTransport {
        fn local_identity(&self) -> &PeerIdentity {
            &self.local
        }

        async fn connect(&self, _peer: &PeerIdentity) -> Result<(), TransportError> {
            Ok(())
        }

        async fn disconnect(&self, _peer: &PeerId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_message(&self, peer: &PeerId, _data: Vec<u8>) -> Result<(), TransportError> {
            if self.reachable.contains(peer) {
                self.sent.lock().await.push(*peer);
                Ok(())
            } else {
                Err(TransportError::PeerNotConnected(peer.short_id()))
            }
        }

        async fn send_resource(
            &self,
            _peer: &PeerId,
            _resource: &ResourceHandle,
        ) -> Result<TransferId, TransportError> {
            Ok(TransferId::generate())
        }

        async fn recv(&self) -> Result<TransportEvent, TransportError> {
            Err(TransportError::ConnectionClosed)
        }
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        let c = PeerId::generate();

        let transport = SelectiveTransport {
            local: PeerIdentity::new("me").unwrap(),
            reachable: [a, c].into_iter().collect(),
            sent: Mutex::new(Vec::new()),
        };

        let outcome = transport.broadcast_message(&[a, b, c], b"hi".to_vec()).await;
        assert_eq!(outcome.delivered, vec![a, c]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, b);
        assert!(outcome.is_partial());
        assert!(!outcome.is_complete());

        // The failing peer in the middle did not stop delivery to c
        assert_eq!(*transport.sent.lock().await, vec![a, c]);
    }

    #[tokio::test]
    async fn test_broadcast_to_nobody_is_complete() {
        let transport = SelectiveTransport {
            local: PeerIdentity::new("me").unwrap(),
            reachable: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        };

        let outcome = transport.broadcast_message(&[], b"hi".to_vec()).await;
        assert!(outcome.is_complete());
        assert!(!outcome.is_partial());
    }

    #[test]
    fn test_transport_is_object_safe() {
        fn assert_dyn(_: &dyn Transport) {}
        fn assert_broadcast<T: BroadcastTransport + ?Sized>(_: &T) {}
        let _ = assert_dyn;
        let _ = assert_broadcast::<dyn Transport>;
    }
}
