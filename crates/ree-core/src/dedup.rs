//! Multi-snapshot merge with last-write-wins deduplication.
//!
//! Ordering contract: batches must be supplied oldest-to-newest. For each
//! entity id the record with the greatest observation timestamp wins; on an
//! equal timestamp the record seen later in iteration order wins (`>=`).
//! The output lists entities in the order each id was first seen.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::domain::RawRecord;

/// Counters from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records across all input batches.
    pub total: usize,
    /// Records excluded because their observation date could not be parsed.
    pub unparseable_date: usize,
    /// Records in the merged output.
    pub deduped: usize,
}

/// Merge `batches` keeping one record per entity id.
pub fn merge<B>(batches: &[B]) -> Vec<RawRecord>
where
    B: AsRef<[RawRecord]>,
{
    merge_with_stats(batches).0
}

/// [`merge`] plus the counters the rolling manifest reports.
pub fn merge_with_stats<B>(batches: &[B]) -> (Vec<RawRecord>, MergeStats)
where
    B: AsRef<[RawRecord]>,
{
    let mut stats = MergeStats::default();
    let mut slots: Vec<(NaiveDateTime, &RawRecord)> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for record in batches.iter().flat_map(|b| b.as_ref().iter()) {
        stats.total += 1;
        let Some(observed) = record.observed_at() else {
            stats.unparseable_date += 1;
            continue;
        };
        match index.get(&record.id) {
            Some(&slot) => {
                if observed >= slots[slot].0 {
                    slots[slot] = (observed, record);
                }
            }
            None => {
                index.insert(record.id, slots.len());
                slots.push((observed, record));
            }
        }
    }

    let merged: Vec<RawRecord> = slots.into_iter().map(|(_, r)| r.clone()).collect();
    stats.deduped = merged.len();
    (merged, stats)
}
