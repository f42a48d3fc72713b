//! Transfer progress tracking
//!
//! The [`TransferTracker`] keeps one [`TransferRecord`] per in-flight
//! transfer and raises three kinds of [`TransferEvent`]:
//!
//! - `Changed` on every progress delta (possibly never)
//! - `Completed` once completed units reach the total (at most once)
//! - `Cancelled` when the transfer is cancelled
//!
//! `Completed` and `Cancelled` are terminal and mutually exclusive: the
//! first one detaches the record, and anything reported for that id
//! afterwards fails with [`TrackerError::UnknownTransfer`].
//!
//! Observers register with [`TransferTracker::subscribe`] and get a
//! [`TransferSubscription`]. Subscriptions are released exactly once, when
//! the record is detached for any reason or the tracker itself is dropped;
//! the subscriber sees this as the end of its event stream.

use std::collections::HashMap;

use confab_core::{TransferDirection, TransferId};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::TrackerError;

/// Progress state of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub direction: TransferDirection,
    pub total_units: u64,
    pub completed_units: u64,
    pub cancelled: bool,
}

impl TransferRecord {
    /// Fraction complete in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_units == 0 {
            return 0.0;
        }
        self.completed_units as f64 / self.total_units as f64
    }

    /// Check if every unit has been reported
    pub fn is_complete(&self) -> bool {
        self.completed_units >= self.total_units
    }
}

/// Notifications raised by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Changed {
        transfer_id: TransferId,
        completed_units: u64,
        total_units: u64,
    },
    Completed {
        transfer_id: TransferId,
    },
    Cancelled {
        transfer_id: TransferId,
    },
}

impl TransferEvent {
    /// Transfer the event refers to
    pub fn transfer_id(&self) -> TransferId {
        match self {
            Self::Changed { transfer_id, .. }
            | Self::Completed { transfer_id }
            | Self::Cancelled { transfer_id } => *transfer_id,
        }
    }

    /// Check if this event ends tracking
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Changed { .. })
    }
}

/// Event stream for one observed transfer
///
/// Dropping the subscription unsubscribes. The stream ends (`recv` returns
/// `None`) once tracking of the transfer is released.
#[derive(Debug)]
pub struct TransferSubscription {
    transfer_id: TransferId,
    rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl TransferSubscription {
    /// Transfer being observed
    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.rx.recv().await
    }

    /// Take the next event without waiting
    pub fn try_recv(&mut self) -> Option<TransferEvent> {
        self.rx.try_recv().ok()
    }

    /// Check if tracking was released and every event has been read
    pub fn is_released(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}

struct Tracked {
    record: TransferRecord,
    observers: Vec<mpsc::UnboundedSender<TransferEvent>>,
}

impl Tracked {
    fn notify(&mut self, event: TransferEvent) {
        self.observers.retain(|tx| tx.send(event).is_ok());
    }
}

/// Tracks in-flight transfers and notifies observers
#[derive(Default)]
pub struct TransferTracker {
    transfers: HashMap<TransferId, Tracked>,
    releases: u64,
}

impl TransferTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a transfer
    pub fn track(
        &mut self,
        transfer_id: TransferId,
        direction: TransferDirection,
        total_units: u64,
    ) -> Result<(), TrackerError> {
        if self.transfers.contains_key(&transfer_id) {
            return Err(TrackerError::AlreadyTracked(transfer_id));
        }

        trace!(transfer = %transfer_id.short_id(), total_units, "Tracking transfer");
        self.transfers.insert(
            transfer_id,
            Tracked {
                record: TransferRecord {
                    transfer_id,
                    direction,
                    total_units,
                    completed_units: 0,
                    cancelled: false,
                },
                observers: Vec::new(),
            },
        );
        Ok(())
    }

    /// Register an observer for a tracked transfer
    pub fn subscribe(
        &mut self,
        transfer_id: TransferId,
    ) -> Result<TransferSubscription, TrackerError> {
        let tracked = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or(TrackerError::UnknownTransfer(transfer_id))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tracked.observers.push(tx);
        Ok(TransferSubscription { transfer_id, rx })
    }

    /// Report progress
    ///
    /// Returns the events raised, in order. Reaching the total raises
    /// `Completed` and detaches the record.
    pub fn update(
        &mut self,
        transfer_id: TransferId,
        completed_units: u64,
    ) -> Result<Vec<TransferEvent>, TrackerError> {
        let tracked = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or(TrackerError::UnknownTransfer(transfer_id))?;

        let completed_units = completed_units.min(tracked.record.total_units);
        let mut events = Vec::with_capacity(2);

        if completed_units != tracked.record.completed_units {
            tracked.record.completed_units = completed_units;
            let event = TransferEvent::Changed {
                transfer_id,
                completed_units,
                total_units: tracked.record.total_units,
            };
            tracked.notify(event);
            events.push(event);
        }

        if tracked.record.is_complete() {
            events.push(self.finish(transfer_id, TransferEvent::Completed { transfer_id }));
        }

        Ok(events)
    }

    /// Mark a transfer complete regardless of reported progress
    ///
    /// Used when the transport reports success before the final progress
    /// callback.
    pub fn complete(&mut self, transfer_id: TransferId) -> Result<Vec<TransferEvent>, TrackerError> {
        let total = self
            .transfers
            .get(&transfer_id)
            .map(|tracked| tracked.record.total_units)
            .ok_or(TrackerError::UnknownTransfer(transfer_id))?;
        self.update(transfer_id, total)
    }

    /// Cancel a transfer
    pub fn cancel(&mut self, transfer_id: TransferId) -> Result<TransferEvent, TrackerError> {
        let tracked = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or(TrackerError::UnknownTransfer(transfer_id))?;
        tracked.record.cancelled = true;
        Ok(self.finish(transfer_id, TransferEvent::Cancelled { transfer_id }))
    }

    /// Stop tracking without raising an event
    ///
    /// Used for transfers that failed outright. Returns the final record.
    pub fn detach(&mut self, transfer_id: TransferId) -> Option<TransferRecord> {
        let tracked = self.transfers.remove(&transfer_id)?;
        self.releases += 1;
        debug!(transfer = %transfer_id.short_id(), "Transfer detached");
        Some(tracked.record)
    }

    /// Current record of a tracked transfer
    pub fn record(&self, transfer_id: TransferId) -> Option<&TransferRecord> {
        self.transfers.get(&transfer_id).map(|tracked| &tracked.record)
    }

    /// Check if a transfer is still tracked
    pub fn is_tracking(&self, transfer_id: TransferId) -> bool {
        self.transfers.contains_key(&transfer_id)
    }

    /// Number of tracked transfers
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Number of live observers on a transfer
    pub fn observer_count(&mut self, transfer_id: TransferId) -> usize {
        self.transfers
            .get_mut(&transfer_id)
            .map(|tracked| {
                tracked.observers.retain(|tx| !tx.is_closed());
                tracked.observers.len()
            })
            .unwrap_or(0)
    }

    /// How many times tracking resources were released
    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Deliver a terminal event and release the record
    fn finish(&mut self, transfer_id: TransferId, event: TransferEvent) -> TransferEvent {
        if let Some(mut tracked) = self.transfers.remove(&transfer_id) {
            tracked.notify(event);
            self.releases += 1;
            debug!(
                transfer = %transfer_id.short_id(),
                completed = matches!(event, TransferEvent::Completed { .. }),
                "Transfer tracking finished"
            );
        }
        event
    }
}

impl Drop for TransferTracker {
    fn drop(&mut self) {
        if !self.transfers.is_empty() {
            debug!(
                outstanding = self.transfers.len(),
                "Tracker dropped with transfers in flight"
            );
        }
    }
}
