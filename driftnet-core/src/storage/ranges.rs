//! Merged set of byte ranges

use std::ops::Range;

/// Disjoint, non-adjacent half-open ranges kept in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a range, merging it with any it overlaps or touches.
    pub fn insert(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for existing in self.ranges.drain(..) {
            if existing.end < merged.start || existing.start > merged.end {
                kept.push(existing);
            } else {
                merged = merged.start.min(existing.start)..merged.end.max(existing.end);
            }
        }
        let position = kept.partition_point(|r| r.start < merged.start);
        kept.insert(position, merged);
        self.ranges = kept;
    }

    /// Whether every byte of `range` has been inserted.
    pub fn covers(&self, range: &Range<u64>) -> bool {
        range.is_empty()
            || self
                .ranges
                .iter()
                .any(|r| r.start <= range.start && range.end <= r.end)
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_inserts_merge() {
        let mut set = RangeSet::new();
        set.insert(32..48);
        set.insert(0..16);
        assert_eq!(set.ranges(), &[0..16, 32..48]);

        set.insert(16..32);
        assert_eq!(set.ranges(), &[0..48]);
    }

    #[test]
    fn test_overlapping_insert_spans_several() {
        let mut set = RangeSet::new();
        set.insert(0..4);
        set.insert(10..12);
        set.insert(20..25);
        set.insert(2..21);
        assert_eq!(set.ranges(), &[0..25]);
    }

    #[test]
    fn test_covers() {
        let mut set = RangeSet::new();
        set.insert(4..8);
        set.insert(8..12);
        assert!(set.covers(&(5..12)));
        assert!(!set.covers(&(0..6)));
        assert!(set.covers(&(3..3)));
        set.insert(0..0);
        assert_eq!(set.ranges(), &[4..12]);
    }
}
