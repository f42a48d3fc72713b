//! Session manager
//!
//! The [`SessionManager`] mediates every send and receive for one chat
//! room. It owns the peer state map, the [`Transcript`] and the
//! [`TransferTracker`], and turns transport events into transcript
//! mutations. It is not synchronized: a single owner (normally the
//! [`SessionActor`](crate::actor::SessionActor)) drives it, so mutations
//! happen in the order operations run.
//!
//! Outbound resources fan out into one transport transfer ("leg") per
//! connected peer. The legs are tracked under a single aggregate transfer
//! id and shown as one progress entry whose completed bytes are the
//! minimum over legs that have not failed.

use std::collections::HashMap;
use std::sync::Arc;

use confab_core::{
    BroadcastTransport, PeerId, PeerIdentity, ResourceHandle, SessionState, TransferDirection,
    TransferId, TransferOutcome, Transport, TransportError, TransportEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use crate::entry::{Direction, TranscriptEntry, TransferStatus};
use crate::error::{DecodeError, SendError, SessionResult, TrackerError};
use crate::store::ResourceStore;
use crate::tracker::{TransferSubscription, TransferTracker};
use crate::transcript::Transcript;

/// Change notifications for transcript readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptUpdate {
    /// A new entry was appended
    Inserted { index: usize, entry: TranscriptEntry },
    /// An entry changed in place (progress or status)
    Updated { index: usize, entry: TranscriptEntry },
    /// A progress entry was swapped for its result
    Replaced { index: usize, entry: TranscriptEntry },
}

impl TranscriptUpdate {
    /// Index of the affected entry
    pub fn index(&self) -> usize {
        match self {
            Self::Inserted { index, .. } | Self::Updated { index, .. } | Self::Replaced { index, .. } => {
                *index
            }
        }
    }

    /// The entry after the change
    pub fn entry(&self) -> &TranscriptEntry {
        match self {
            Self::Inserted { entry, .. } | Self::Updated { entry, .. } | Self::Replaced { entry, .. } => {
                entry
            }
        }
    }
}

/// A peer known to the session
#[derive(Debug, Clone)]
struct PeerSession {
    identity: PeerIdentity,
    state: SessionState,
}

/// An inbound transfer awaiting its outcome
#[derive(Debug)]
struct InboundTransfer {
    peer: PeerIdentity,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LegState {
    Active,
    Succeeded,
    Failed(String),
    Cancelled,
}

/// One per-peer transport transfer of an outbound resource
#[derive(Debug)]
struct Leg {
    peer: PeerId,
    completed_bytes: u64,
    state: LegState,
}

impl Leg {
    fn is_live(&self) -> bool {
        matches!(self.state, LegState::Active | LegState::Succeeded)
    }
}

/// An outbound resource sent to every connected peer
#[derive(Debug)]
struct OutboundTransfer {
    resource: ResourceHandle,
    legs: HashMap<TransferId, Leg>,
}

impl OutboundTransfer {
    /// Minimum completed bytes across legs that have not failed
    fn aggregate_progress(&self) -> Option<u64> {
        self.legs
            .values()
            .filter(|leg| leg.is_live())
            .map(|leg| match leg.state {
                LegState::Succeeded => self.resource.size,
                _ => leg.completed_bytes,
            })
            .min()
    }

    fn is_settled(&self) -> bool {
        self.legs.values().all(|leg| leg.state != LegState::Active)
    }
}

/// Chat session state for the local peer
pub struct SessionManager {
    local: PeerIdentity,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResourceStore>,
    peers: HashMap<PeerId, PeerSession>,
    tracker: TransferTracker,
    transcript: Transcript,
    inbound: HashMap<TransferId, InboundTransfer>,
    outbound: HashMap<TransferId, OutboundTransfer>,
    /// Leg transfer id to aggregate id
    legs: HashMap<TransferId, TransferId>,
    updates: broadcast::Sender<TranscriptUpdate>,
}

impl SessionManager {
    /// Create a manager over `transport`
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ResourceStore>) -> Self {
        Self::with_update_capacity(transport, store, 1024)
    }

    /// Create a manager with a specific update channel capacity
    pub fn with_update_capacity(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResourceStore>,
        capacity: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            local: transport.local_identity().clone(),
            transport,
            store,
            peers: HashMap::new(),
            tracker: TransferTracker::new(),
            transcript: Transcript::new(),
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            legs: HashMap::new(),
            updates,
        }
    }

    /// Our identity
    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local
    }

    /// Subscribe to transcript changes
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.updates.subscribe()
    }

    pub(crate) fn update_sender(&self) -> broadcast::Sender<TranscriptUpdate> {
        self.updates.clone()
    }

    /// The transcript
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Peers whose session is established
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .filter(|p| p.state == SessionState::Connected)
            .map(|p| p.identity.clone())
            .collect();
        peers.sort_by(|a, b| a.display_name().cmp(b.display_name()));
        peers
    }

    /// Current state of a peer; unknown peers are not connected
    pub fn peer_state(&self, peer: &PeerId) -> SessionState {
        self.peers
            .get(peer)
            .map(|p| p.state)
            .unwrap_or_default()
    }

    /// Observe progress of a tracked transfer
    pub fn watch_transfer(
        &mut self,
        transfer_id: TransferId,
    ) -> Result<TransferSubscription, TrackerError> {
        self.tracker.subscribe(transfer_id)
    }

    /// The transfer tracker
    pub fn tracker(&self) -> &TransferTracker {
        &self.tracker
    }

    /// Send a text message to every connected peer
    ///
    /// Sends that already went through stand when another peer fails: the
    /// `Sent` entry is still appended, followed by a `Local` failure notice,
    /// and the error carries the per-peer outcome.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn send_text(&mut self, text: &str) -> Result<TranscriptEntry, SendError> {
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let peers = self.connected_peer_ids();
        if peers.is_empty() {
            debug!("Dropping message, no connected peers");
            return Err(SendError::NoPeers);
        }

        let outcome = self
            .transport
            .broadcast_message(&peers, text.as_bytes().to_vec())
            .await;

        let entry = TranscriptEntry::text(Direction::Sent, self.local.clone(), text);
        if !outcome.delivered.is_empty() {
            self.append(entry.clone());
        }

        if outcome.is_complete() {
            trace!(peers = outcome.delivered.len(), "Message sent");
            return Ok(entry);
        }

        self.report_send_failure("message", &outcome.failed);
        Err(SendError::TransportFailure {
            delivered: outcome.delivered,
            failed: outcome.failed,
        })
    }

    /// Send a resource to every connected peer
    ///
    /// Returns the progress entry immediately; it is replaced by a result
    /// entry once every leg has finished and at least one succeeded. Peers
    /// the transfer could not start for get a `Local` notice, and the call
    /// only fails when no leg started at all.
    #[instrument(skip(self, resource), fields(name = %resource.name, size = resource.size))]
    pub async fn send_resource(
        &mut self,
        resource: ResourceHandle,
    ) -> Result<TranscriptEntry, SendError> {
        let peers = self.connected_peer_ids();
        if peers.is_empty() {
            debug!("Dropping resource, no connected peers");
            return Err(SendError::NoPeers);
        }

        let mut legs = HashMap::new();
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for peer in peers {
            match self.transport.send_resource(&peer, &resource).await {
                Ok(leg_id) => {
                    legs.insert(
                        leg_id,
                        Leg {
                            peer,
                            completed_bytes: 0,
                            state: LegState::Active,
                        },
                    );
                    delivered.push(peer);
                }
                Err(e) => failed.push((peer, e)),
            }
        }

        if legs.is_empty() {
            self.report_send_failure(&resource.name, &failed);
            return Err(SendError::TransportFailure { delivered, failed });
        }

        let transfer_id = TransferId::generate();
        if let Err(e) = self
            .tracker
            .track(transfer_id, TransferDirection::Outbound, resource.size)
        {
            warn!(error = %e, "Fresh transfer id already tracked");
        }
        for leg_id in legs.keys() {
            self.legs.insert(*leg_id, transfer_id);
        }

        let entry = TranscriptEntry::transfer(
            Direction::Sent,
            self.local.clone(),
            transfer_id,
            resource.name.clone(),
            resource.size,
        );
        self.append(entry.clone());

        info!(
            transfer = %transfer_id.short_id(),
            legs = legs.len(),
            "Resource transfer started"
        );
        self.outbound
            .insert(transfer_id, OutboundTransfer { resource, legs });

        if !failed.is_empty() {
            let name = self.outbound[&transfer_id].resource.name.clone();
            self.report_send_failure(&name, &failed);
        }
        Ok(entry)
    }

    /// Ask the transport to connect to a discovered peer
    ///
    /// Does nothing if the peer is already connecting or connected.
    pub async fn connect(&mut self, peer: PeerIdentity) -> SessionResult<()> {
        let state = self.peer_state(&peer.id());
        if state != SessionState::NotConnected {
            debug!(peer = %peer, %state, "Connect ignored");
            return Ok(());
        }

        self.transport.connect(&peer).await?;
        self.peers.entry(peer.id()).or_insert(PeerSession {
            identity: peer,
            state: SessionState::NotConnected,
        });
        Ok(())
    }

    /// Ask the transport to drop a peer
    pub async fn disconnect(&mut self, peer: &PeerId) -> SessionResult<()> {
        self.transport.disconnect(peer).await?;
        Ok(())
    }

    /// Cancel a transfer on behalf of the user
    ///
    /// Accepts an outbound aggregate id or an inbound transfer id. Tracking
    /// ends immediately even if the transport refuses the cancel; finish
    /// events the transport reports afterwards are ignored.
    pub async fn cancel_transfer(&mut self, transfer_id: TransferId) -> SessionResult<()> {
        if let Some(outbound) = self.outbound.remove(&transfer_id) {
            for (leg_id, leg) in &outbound.legs {
                self.legs.remove(leg_id);
                if leg.state == LegState::Active
                    && let Err(e) = self.transport.cancel_resource(leg_id).await
                {
                    warn!(leg = %leg_id.short_id(), error = %e, "Failed to cancel leg");
                }
            }
        } else if self.inbound.remove(&transfer_id).is_some() {
            if let Err(e) = self.transport.cancel_resource(&transfer_id).await {
                warn!(
                    transfer = %transfer_id.short_id(),
                    error = %e,
                    "Transport did not cancel transfer"
                );
            }
        } else {
            return Err(TrackerError::UnknownTransfer(transfer_id).into());
        }

        if self.tracker.is_tracking(transfer_id) {
            self.tracker.cancel(transfer_id)?;
        }
        self.set_status(transfer_id, TransferStatus::Cancelled);
        info!(transfer = %transfer_id.short_id(), "Transfer cancelled");
        Ok(())
    }

    /// Dispatch a transport event to its handler
    pub async fn handle_event(&mut self, event: TransportEvent) -> SessionResult<()> {
        trace!(kind = event.kind(), "Transport event");
        match event {
            TransportEvent::PeerStateChanged { peer, state } => {
                self.on_peer_state_changed(peer, state);
                Ok(())
            }
            TransportEvent::MessageReceived { peer, data } => {
                self.on_message_received(peer, data)?;
                Ok(())
            }
            TransportEvent::ResourceStarted {
                peer,
                transfer_id,
                name,
                total_bytes,
            } => {
                self.on_resource_transfer_started(peer, transfer_id, name, total_bytes)?;
                Ok(())
            }
            TransportEvent::ResourceProgress {
                transfer_id,
                completed_bytes,
                ..
            } => {
                self.on_resource_transfer_progress(transfer_id, completed_bytes)?;
                Ok(())
            }
            TransportEvent::ResourceFinished {
                transfer_id,
                outcome,
            } => {
                self.on_resource_transfer_finished(transfer_id, outcome)
                    .await
            }
        }
    }

    /// Record a peer state change reported by the transport
    ///
    /// Every callback produces a `Local` entry, duplicates included.
    pub fn on_peer_state_changed(&mut self, peer: PeerIdentity, state: SessionState) -> usize {
        let session = self.peers.entry(peer.id()).or_insert(PeerSession {
            identity: peer.clone(),
            state: SessionState::NotConnected,
        });

        let previous = session.state;
        if previous == state {
            debug!(peer = %peer, %state, "Duplicate state change");
        } else if !previous.is_valid_transition(state) {
            warn!(peer = %peer, from = %previous, to = %state, "Unexpected state transition");
        }
        session.state = state;
        session.identity = peer.clone();

        info!(peer = %peer, %state, "Peer state changed");
        let notice = format!("{} is {}", peer.display_name(), state);
        self.append(TranscriptEntry::notice(peer, notice))
    }

    /// Record an inbound text message
    ///
    /// Bytes that are not UTF-8 are dropped without an entry.
    pub fn on_message_received(
        &mut self,
        peer: PeerIdentity,
        data: Vec<u8>,
    ) -> Result<usize, DecodeError> {
        let text = String::from_utf8(data).map_err(|e| {
            let err = DecodeError {
                peer: peer.display_name().to_string(),
                reason: e.utf8_error().to_string(),
            };
            warn!(error = %err, "Dropping undecodable message");
            err
        })?;

        Ok(self.append(TranscriptEntry::text(Direction::Received, peer, text)))
    }

    /// Start tracking a resource a peer is sending us
    pub fn on_resource_transfer_started(
        &mut self,
        peer: PeerIdentity,
        transfer_id: TransferId,
        name: String,
        total_bytes: u64,
    ) -> Result<usize, TrackerError> {
        self.tracker
            .track(transfer_id, TransferDirection::Inbound, total_bytes)?;

        info!(
            peer = %peer,
            transfer = %transfer_id.short_id(),
            name = %name,
            total_bytes,
            "Receiving resource"
        );

        let entry = TranscriptEntry::transfer(
            Direction::Received,
            peer.clone(),
            transfer_id,
            name.clone(),
            total_bytes,
        );
        self.inbound
            .insert(transfer_id, InboundTransfer { peer, name });
        Ok(self.append(entry))
    }

    /// Record progress on a transfer
    ///
    /// The entry is mutated in place; reaching the total raises completion
    /// on the tracker but the entry swap waits for the finish event.
    pub fn on_resource_transfer_progress(
        &mut self,
        transfer_id: TransferId,
        completed_bytes: u64,
    ) -> Result<(), TrackerError> {
        if let Some(aggregate) = self.legs.get(&transfer_id).copied() {
            if let Some(outbound) = self.outbound.get_mut(&aggregate)
                && let Some(leg) = outbound.legs.get_mut(&transfer_id)
            {
                leg.completed_bytes = completed_bytes.min(outbound.resource.size);
            }
            self.refresh_outbound_progress(aggregate);
            return Ok(());
        }

        if !self.inbound.contains_key(&transfer_id) {
            debug!(transfer = %transfer_id.short_id(), "Progress for unknown transfer");
            return Err(TrackerError::UnknownTransfer(transfer_id));
        }
        self.apply_progress(transfer_id, completed_bytes);
        Ok(())
    }

    /// Resolve a transfer
    ///
    /// Inbound success persists the resource and replaces the progress
    /// entry with a result entry. Failures, including storage failures,
    /// leave a terminal `Failed` entry.
    pub async fn on_resource_transfer_finished(
        &mut self,
        transfer_id: TransferId,
        outcome: TransferOutcome,
    ) -> SessionResult<()> {
        if let Some(aggregate) = self.legs.remove(&transfer_id) {
            self.finish_leg(aggregate, transfer_id, outcome);
            return Ok(());
        }

        let Some(inbound) = self.inbound.remove(&transfer_id) else {
            debug!(transfer = %transfer_id.short_id(), "Finish for unknown transfer");
            return Err(TrackerError::UnknownTransfer(transfer_id).into());
        };

        match outcome {
            TransferOutcome::Success(temp) => {
                let persisted = self.store.persist(&inbound.name, &temp).await;
                match persisted {
                    Ok(location) => {
                        if self.tracker.is_tracking(transfer_id) {
                            self.tracker.complete(transfer_id)?;
                        }
                        info!(
                            transfer = %transfer_id.short_id(),
                            location = %location.display(),
                            "Resource received"
                        );
                        let entry = TranscriptEntry::resource(
                            Direction::Received,
                            inbound.peer,
                            inbound.name,
                            location,
                        );
                        self.replace(transfer_id, entry)?;
                        Ok(())
                    }
                    Err(e) => {
                        warn!(transfer = %transfer_id.short_id(), error = %e, "Failed to store resource");
                        self.tracker.detach(transfer_id);
                        self.set_status(transfer_id, TransferStatus::Failed(e.to_string()));
                        Err(e.into())
                    }
                }
            }
            TransferOutcome::Failure(reason) => {
                warn!(
                    transfer = %transfer_id.short_id(),
                    peer = %inbound.peer,
                    reason = %reason,
                    "Resource transfer failed"
                );
                self.tracker.detach(transfer_id);
                self.set_status(transfer_id, TransferStatus::Failed(reason));
                Ok(())
            }
            TransferOutcome::Cancelled => {
                debug!(transfer = %transfer_id.short_id(), "Resource transfer cancelled");
                if self.tracker.is_tracking(transfer_id) {
                    self.tracker.cancel(transfer_id)?;
                }
                self.set_status(transfer_id, TransferStatus::Cancelled);
                Ok(())
            }
        }
    }

    fn connected_peer_ids(&self) -> Vec<PeerId> {
        self.connected_peers().iter().map(PeerIdentity::id).collect()
    }

    fn append(&mut self, entry: TranscriptEntry) -> usize {
        let index = self.transcript.append(entry.clone());
        let _ = self.updates.send(TranscriptUpdate::Inserted { index, entry });
        index
    }

    fn replace(
        &mut self,
        transfer_id: TransferId,
        entry: TranscriptEntry,
    ) -> Result<usize, crate::error::NotFoundError> {
        let index = self.transcript.replace(transfer_id, entry.clone())?;
        let _ = self.updates.send(TranscriptUpdate::Replaced { index, entry });
        Ok(index)
    }

    fn publish_updated(&self, index: usize) {
        if let Some(entry) = self.transcript.entry_at(index) {
            let _ = self.updates.send(TranscriptUpdate::Updated {
                index,
                entry: entry.clone(),
            });
        }
    }

    fn set_status(&mut self, transfer_id: TransferId, status: TransferStatus) {
        match self.transcript.set_transfer_status(transfer_id, status) {
            Ok(index) => self.publish_updated(index),
            Err(e) => warn!(error = %e, "Status change for missing entry"),
        }
    }

    fn apply_progress(&mut self, transfer_id: TransferId, completed_bytes: u64) {
        if self.tracker.is_tracking(transfer_id)
            && let Err(e) = self.tracker.update(transfer_id, completed_bytes)
        {
            debug!(error = %e, "Tracker rejected progress");
        }

        match self.transcript.update_progress(transfer_id, completed_bytes) {
            Ok(index) => self.publish_updated(index),
            Err(e) => warn!(error = %e, "Progress for missing entry"),
        }
    }

    fn refresh_outbound_progress(&mut self, aggregate: TransferId) {
        let progress = self
            .outbound
            .get(&aggregate)
            .and_then(OutboundTransfer::aggregate_progress);
        if let Some(completed) = progress {
            self.apply_progress(aggregate, completed);
        }
    }

    fn finish_leg(&mut self, aggregate: TransferId, leg_id: TransferId, outcome: TransferOutcome) {
        let Some(outbound) = self.outbound.get_mut(&aggregate) else {
            return;
        };
        if let Some(leg) = outbound.legs.get_mut(&leg_id) {
            leg.state = match outcome {
                TransferOutcome::Success(_) => LegState::Succeeded,
                TransferOutcome::Failure(reason) => {
                    warn!(
                        transfer = %aggregate.short_id(),
                        peer = %leg.peer.short_id(),
                        reason = %reason,
                        "Outbound leg failed"
                    );
                    LegState::Failed(reason)
                }
                TransferOutcome::Cancelled => LegState::Cancelled,
            };
        }

        if !outbound.is_settled() {
            self.refresh_outbound_progress(aggregate);
            return;
        }

        let Some(outbound) = self.outbound.remove(&aggregate) else {
            return;
        };
        let any_succeeded = outbound
            .legs
            .values()
            .any(|leg| leg.state == LegState::Succeeded);

        if any_succeeded {
            if self.tracker.is_tracking(aggregate)
                && let Err(e) = self.tracker.complete(aggregate)
            {
                debug!(error = %e, "Tracker rejected completion");
            }
            info!(transfer = %aggregate.short_id(), "Resource sent");
            let entry = TranscriptEntry::resource(
                Direction::Sent,
                self.local.clone(),
                outbound.resource.name,
                outbound.resource.path,
            );
            if let Err(e) = self.replace(aggregate, entry) {
                warn!(error = %e, "Sent resource has no entry");
            }
            return;
        }

        let reason = outbound.legs.values().find_map(|leg| match &leg.state {
            LegState::Failed(reason) => Some(reason.clone()),
            _ => None,
        });
        match reason {
            Some(reason) => {
                self.tracker.detach(aggregate);
                self.set_status(aggregate, TransferStatus::Failed(reason));
            }
            None => {
                if self.tracker.is_tracking(aggregate)
                    && let Err(e) = self.tracker.cancel(aggregate)
                {
                    debug!(error = %e, "Tracker rejected cancel");
                }
                self.set_status(aggregate, TransferStatus::Cancelled);
            }
        }
    }

    fn report_send_failure(&mut self, what: &str, failed: &[(PeerId, TransportError)]) {
        let names: Vec<String> = failed
            .iter()
            .map(|(id, _)| {
                self.peers
                    .get(id)
                    .map(|p| p.identity.display_name().to_string())
                    .unwrap_or_else(|| id.short_id())
            })
            .collect();

        for (peer, error) in failed {
            warn!(peer = %peer.short_id(), error = %error, what, "Send failed");
        }

        let notice = format!("Failed to send {} to {}", what, names.join(", "));
        self.append(TranscriptEntry::notice(self.local.clone(), notice));
    }
}
