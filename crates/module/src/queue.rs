//! Price-sorted queue of accepted bids.

use std::cmp::Ordering;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use empa_types::QueueEntry;

use crate::math::cmp_ratio;

/// Accepted bids in descending exact price `amount_in / min_amount_out`.
///
/// Entries with equal prices keep their insertion order, and the pipeline
/// inserts in submission order, so earlier bids rank higher on ties.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BidQueue {
    entries: Vec<QueueEntry>,
}

impl BidQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry after every entry priced at or above it.
    pub fn insert(&mut self, entry: QueueEntry) {
        let position = self
            .entries
            .partition_point(|existing| compare_price(existing, &entry) != Ordering::Less);
        self.entries.insert(position, entry);
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compare two entries by exact price.
pub fn compare_price(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    cmp_ratio(a.amount_in, a.min_amount_out, b.amount_in, b.min_amount_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bid_id: u64, amount_in: u128, min_amount_out: u128) -> QueueEntry {
        QueueEntry {
            bid_id,
            amount_in,
            min_amount_out,
            price: amount_in.div_ceil(min_amount_out),
        }
    }

    #[test]
    fn test_descending_order() {
        let mut queue = BidQueue::new();
        queue.insert(entry(1, 2, 1));
        queue.insert(entry(2, 9, 3));
        queue.insert(entry(3, 5, 5));

        let ids: Vec<u64> = queue.entries().iter().map(|e| e.bid_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_ties_keep_submission_order() {
        let mut queue = BidQueue::new();
        queue.insert(entry(1, 4, 2));
        queue.insert(entry(2, 6, 3));
        queue.insert(entry(3, 2, 1));
        queue.insert(entry(4, 10, 2));

        let ids: Vec<u64> = queue.entries().iter().map(|e| e.bid_id).collect();
        assert_eq!(ids, vec![4, 1, 2, 3]);
    }

    #[test]
    fn test_exact_price_breaks_rounding_ties() {
        // Both round up to 3, but 5/2 < 8/3
        let mut queue = BidQueue::new();
        queue.insert(entry(1, 5, 2));
        queue.insert(entry(2, 8, 3));

        let ids: Vec<u64> = queue.entries().iter().map(|e| e.bid_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(queue.len(), 2);
    }
}
