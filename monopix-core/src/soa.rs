//! Structure of Arrays (`SoA`) types for hit and event processing.
//!
//! Hits and event hits are stored in parallel vectors rather than an array of
//! structs. The interpreter appends to and truncates these columns when a chunk
//! tail is rolled back, and the clusterizer walks them sequentially.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hit::{tot, TRIGGER_COLUMN};

/// A batch of decoded hits stored in Structure of Arrays (`SoA`) format.
///
/// Trigger words appear in the same stream as pseudo-hits with
/// `col == TRIGGER_COLUMN`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitBatch {
    /// Scan parameter that was active when the leading edge arrived.
    pub scan_param_id: Vec<u32>,
    /// Column (0..512, or 1023 for trigger pseudo-hits).
    pub col: Vec<u16>,
    /// Row (0..512).
    pub row: Vec<u16>,
    /// 7-bit leading edge.
    pub le: Vec<u8>,
    /// 7-bit trailing edge.
    pub te: Vec<u8>,
    /// Extended detector timestamp.
    pub timestamp: Vec<i64>,
    /// Running trigger counter at decode time.
    pub trigger_number: Vec<u32>,
}

impl HitBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scan_param_id: Vec::with_capacity(capacity),
            col: Vec::with_capacity(capacity),
            row: Vec::with_capacity(capacity),
            le: Vec::with_capacity(capacity),
            te: Vec::with_capacity(capacity),
            timestamp: Vec::with_capacity(capacity),
            trigger_number: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of hits in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.col.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.col.is_empty()
    }

    /// Clears all vectors in the batch, keeping their allocation.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Shortens the batch to `len` hits.
    pub fn truncate(&mut self, len: usize) {
        self.scan_param_id.truncate(len);
        self.col.truncate(len);
        self.row.truncate(len);
        self.le.truncate(len);
        self.te.truncate(len);
        self.timestamp.truncate(len);
        self.trigger_number.truncate(len);
    }

    /// Appends all hits from another batch to this one.
    pub fn append(&mut self, other: &HitBatch) {
        self.scan_param_id.extend_from_slice(&other.scan_param_id);
        self.col.extend_from_slice(&other.col);
        self.row.extend_from_slice(&other.row);
        self.le.extend_from_slice(&other.le);
        self.te.extend_from_slice(&other.te);
        self.timestamp.extend_from_slice(&other.timestamp);
        self.trigger_number.extend_from_slice(&other.trigger_number);
    }

    /// Pushes a single hit into the batch.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        scan_param_id: u32,
        col: u16,
        row: u16,
        le: u8,
        te: u8,
        timestamp: i64,
        trigger_number: u32,
    ) {
        self.scan_param_id.push(scan_param_id);
        self.col.push(col);
        self.row.push(row);
        self.le.push(le);
        self.te.push(te);
        self.timestamp.push(timestamp);
        self.trigger_number.push(trigger_number);
    }

    /// True if hit `i` is a trigger pseudo-hit.
    #[inline]
    #[must_use]
    pub fn is_trigger(&self, i: usize) -> bool {
        self.col[i] == TRIGGER_COLUMN
    }

    /// Time over threshold of hit `i`.
    #[inline]
    #[must_use]
    pub fn tot(&self, i: usize) -> u8 {
        tot(self.le[i], self.te[i])
    }

    /// Number of trigger pseudo-hits in the batch.
    #[must_use]
    pub fn trigger_count(&self) -> usize {
        self.col.iter().filter(|&&c| c == TRIGGER_COLUMN).count()
    }
}

/// Hits assigned to trigger events, in `SoA` layout.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBatch {
    pub event_number: Vec<u64>,
    pub trigger_number: Vec<u32>,
    /// Time slice inside the event, relative to its first hit.
    pub frame: Vec<u8>,
    pub col: Vec<u16>,
    pub row: Vec<u16>,
    /// ToT or calibrated charge.
    pub charge: Vec<u16>,
    pub timestamp: Vec<i64>,
    pub scan_param_id: Vec<u32>,
    /// Cluster assignments (output of clustering, -1 = not assigned).
    pub cluster_id: Vec<i32>,
}

impl EventBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            event_number: Vec::with_capacity(capacity),
            trigger_number: Vec::with_capacity(capacity),
            frame: Vec::with_capacity(capacity),
            col: Vec::with_capacity(capacity),
            row: Vec::with_capacity(capacity),
            charge: Vec::with_capacity(capacity),
            timestamp: Vec::with_capacity(capacity),
            scan_param_id: Vec::with_capacity(capacity),
            cluster_id: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.col.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.col.is_empty()
    }

    pub fn clear(&mut self) {
        self.event_number.clear();
        self.trigger_number.clear();
        self.frame.clear();
        self.col.clear();
        self.row.clear();
        self.charge.clear();
        self.timestamp.clear();
        self.scan_param_id.clear();
        self.cluster_id.clear();
    }

    /// Appends all hits from another batch to this one.
    pub fn append(&mut self, other: &EventBatch) {
        self.event_number.extend_from_slice(&other.event_number);
        self.trigger_number.extend_from_slice(&other.trigger_number);
        self.frame.extend_from_slice(&other.frame);
        self.col.extend_from_slice(&other.col);
        self.row.extend_from_slice(&other.row);
        self.charge.extend_from_slice(&other.charge);
        self.timestamp.extend_from_slice(&other.timestamp);
        self.scan_param_id.extend_from_slice(&other.scan_param_id);
        self.cluster_id.extend_from_slice(&other.cluster_id);
    }

    /// Splits the batch at `at`, returning the hits `[at, len)`.
    ///
    /// # Panics
    /// Panics if `at > len`.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> EventBatch {
        EventBatch {
            event_number: self.event_number.split_off(at),
            trigger_number: self.trigger_number.split_off(at),
            frame: self.frame.split_off(at),
            col: self.col.split_off(at),
            row: self.row.split_off(at),
            charge: self.charge.split_off(at),
            timestamp: self.timestamp.split_off(at),
            scan_param_id: self.scan_param_id.split_off(at),
            cluster_id: self.cluster_id.split_off(at),
        }
    }

    /// Pushes a single event hit; `cluster_id` starts unassigned.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        event_number: u64,
        trigger_number: u32,
        frame: u8,
        col: u16,
        row: u16,
        charge: u16,
        timestamp: i64,
        scan_param_id: u32,
    ) {
        self.event_number.push(event_number);
        self.trigger_number.push(trigger_number);
        self.frame.push(frame);
        self.col.push(col);
        self.row.push(row);
        self.charge.push(charge);
        self.timestamp.push(timestamp);
        self.scan_param_id.push(scan_param_id);
        self.cluster_id.push(-1);
    }

    /// Half-open index ranges of runs of equal `event_number`.
    #[must_use]
    pub fn event_ranges(&self) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..=self.len() {
            if i == self.len() || self.event_number[i] != self.event_number[start] {
                ranges.push(start..i);
                start = i;
            }
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_batch_operations() {
        let mut batch = HitBatch::with_capacity(10);
        assert!(batch.is_empty());

        batch.push(0, 10, 20, 3, 8, 123_456, 0);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.col[0], 10);
        assert_eq!(batch.tot(0), 5);
        assert!(!batch.is_trigger(0));

        batch.push(0, TRIGGER_COLUMN, 0, 0, 0, 123_457, 1);
        assert_eq!(batch.len(), 2);
        assert!(batch.is_trigger(1));
        assert_eq!(batch.trigger_count(), 1);

        batch.truncate(1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.timestamp.len(), 1);

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_event_batch_ranges() {
        let mut batch = EventBatch::with_capacity(4);
        assert!(batch.event_ranges().is_empty());

        batch.push(0, 0, 0, 1, 1, 3, 10, 0);
        batch.push(0, 0, 0, 2, 1, 3, 11, 0);
        batch.push(1, 1, 0, 9, 9, 3, 20, 0);
        batch.push(3, 3, 0, 9, 9, 3, 40, 0);

        assert_eq!(batch.event_ranges(), vec![0..2, 2..3, 3..4]);
        assert!(batch.cluster_id.iter().all(|&id| id == -1));

        let tail = batch.split_off(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(tail.event_number, vec![3]);
        batch.append(&tail);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.timestamp, vec![10, 11, 20, 40]);
    }
}
