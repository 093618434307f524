//! Contiguous completion watermark.
//!
//! Batches are taken in cursor order but their bulk writes may finish in any
//! order. The tracker only reports a cursor as safe to checkpoint once every
//! batch at or below it has completed, so resuming from a checkpoint never
//! skips an unwritten batch.

use std::collections::BTreeMap;

use reindex_types::Cursor;

/// Tracks outstanding batches by their high-water cursor.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    /// high-water cursor -> completed
    pending: BTreeMap<Cursor, bool>,
    watermark: Option<Cursor>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a batch ending at `high_water` has been taken.
    ///
    /// Registering the same batch again (after a requeue) is a no-op.
    pub fn register(&mut self, high_water: Cursor) {
        self.pending.entry(high_water).or_insert(false);
    }

    /// Mark a batch complete. Returns the new watermark if it advanced.
    pub fn complete(&mut self, high_water: Cursor) -> Option<Cursor> {
        if let Some(done) = self.pending.get_mut(&high_water) {
            *done = true;
        }

        let mut advanced = None;
        while let Some(entry) = self.pending.first_entry() {
            if !*entry.get() {
                break;
            }
            advanced = Some(*entry.key());
            entry.remove();
        }

        if advanced.is_some() {
            self.watermark = advanced;
        }
        advanced
    }

    /// Highest cursor below which every taken batch has completed.
    pub fn watermark(&self) -> Option<Cursor> {
        self.watermark
    }

    /// Batches taken but not yet complete.
    pub fn outstanding(&self) -> usize {
        self.pending.values().filter(|done| !**done).count()
    }
}
