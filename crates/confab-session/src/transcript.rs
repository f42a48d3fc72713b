//! Ordered, append-only transcript log
//!
//! Entries are indexed by insertion order and never removed or reordered,
//! so an index handed out by [`Transcript::append`] stays valid for the
//! lifetime of the log. Progress entries are additionally indexed by
//! transfer id, which lets transfer callbacks mutate or replace their entry
//! in place.

use std::collections::HashMap;

use confab_core::TransferId;

use crate::entry::{TranscriptEntry, TransferStatus};
use crate::error::NotFoundError;

/// The chat transcript
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    /// Transfer id to entry index; survives replacement
    by_transfer: HashMap<TransferId, usize>,
}

impl Transcript {
    /// Create an empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index
    pub fn append(&mut self, entry: TranscriptEntry) -> usize {
        let index = self.entries.len();
        if let Some(transfer_id) = entry.transfer_id() {
            self.by_transfer.insert(transfer_id, index);
        }
        self.entries.push(entry);
        index
    }

    /// Replace the entry tracked under `transfer_id`, keeping its position
    ///
    /// Fails without touching the log if the id was never appended.
    pub fn replace(
        &mut self,
        transfer_id: TransferId,
        entry: TranscriptEntry,
    ) -> Result<usize, NotFoundError> {
        let index = self.index_of(transfer_id)?;
        self.entries[index] = entry;
        Ok(index)
    }

    /// Record progress on a transfer entry
    ///
    /// Returns the entry index. Entries already replaced by a result, or in
    /// a terminal state, are left untouched.
    pub fn update_progress(
        &mut self,
        transfer_id: TransferId,
        completed_bytes: u64,
    ) -> Result<usize, NotFoundError> {
        let index = self.index_of(transfer_id)?;
        if let Some(transfer) = self.entries[index].as_transfer_mut()
            && !transfer.status.is_terminal()
        {
            transfer.completed_bytes = completed_bytes.min(transfer.total_bytes);
            if transfer.completed_bytes == transfer.total_bytes {
                transfer.status = TransferStatus::Complete;
            }
        }
        Ok(index)
    }

    /// Set the status of a transfer entry
    pub fn set_transfer_status(
        &mut self,
        transfer_id: TransferId,
        status: TransferStatus,
    ) -> Result<usize, NotFoundError> {
        let index = self.index_of(transfer_id)?;
        if let Some(transfer) = self.entries[index].as_transfer_mut() {
            transfer.status = status;
        }
        Ok(index)
    }

    /// Index of the entry tracked under `transfer_id`
    pub fn index_of(&self, transfer_id: TransferId) -> Result<usize, NotFoundError> {
        self.by_transfer
            .get(&transfer_id)
            .copied()
            .ok_or(NotFoundError(transfer_id))
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Check if the transcript has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`
    pub fn entry_at(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    /// Iterate entries in order
    pub fn iter(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    /// Owned copy of every entry, for readers outside the owning task
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }
}
