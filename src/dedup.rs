// src/dedup.rs
use std::collections::HashSet;

use crate::error::StoreError;
use crate::history::HistoryStore;
use crate::ingest::types::RawItem;

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Survivors, in batch order.
    pub new_items: Vec<RawItem>,
    /// Dropped because the history already holds the identifier.
    pub seen_before: usize,
    /// Dropped as a later repeat inside the same batch.
    pub in_batch: usize,
}

/// Keep items whose identifier is neither in the history nor earlier in `batch`.
///
/// Read-only: nothing is recorded here. Recording happens per item after a
/// successful delivery, so anything that fails to deliver stays eligible.
pub fn filter_new(batch: Vec<RawItem>, history: &HistoryStore) -> Result<DedupOutcome, StoreError> {
    let mut out = DedupOutcome::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());

    for item in batch {
        if !seen.insert(item.id.clone()) {
            out.in_batch += 1;
            continue;
        }
        if history.contains(&item.id)? {
            out.seen_before += 1;
            continue;
        }
        out.new_items.push(item);
    }

    tracing::debug!(
        new = out.new_items.len(),
        seen_before = out.seen_before,
        in_batch = out.in_batch,
        "dedup finished"
    );
    Ok(out)
}
