//! # Root Coverage Tracker
//!
//! Sorted set of disjoint site ranges over a fixed universe `[0, N)`. The
//! likelihood orchestrator walks coalescing ranges from the top of the graph
//! downward and adds them here until every site has a root.
//!
//! Ranges are keyed by their first site in a `BTreeMap`, so insertion and the
//! overlap check are `O(log k)`. Abutting ranges stay separate entries; the
//! tracker only counts how many sites are covered. Because stored ranges are
//! disjoint and inside the universe, the covered count equals `N` exactly
//! when the ranges tile `[0, N)`.

use std::collections::BTreeMap;

use crate::data::site_range::SiteRange;
use crate::error::{McmcError, Result};

#[derive(Clone, Debug)]
pub struct IntervalCoverage {
    universe: usize,
    ranges: BTreeMap<usize, SiteRange>,
    covered: usize,
    redundant: u64,
}

impl IntervalCoverage {
    pub fn new(universe: usize) -> Self {
        Self {
            universe,
            ranges: BTreeMap::new(),
            covered: 0,
            redundant: 0,
        }
    }

    pub fn universe(&self) -> usize {
        self.universe
    }

    /// Insert `[begin, end)` owned by `owner`.
    ///
    /// Returns true iff the tracker is complete after the call. A range lying
    /// entirely inside an already stored range is skipped. A partial overlap
    /// is an incoherence in the caller's range set.
    pub fn add(&mut self, begin: usize, end: usize, owner: usize) -> Result<bool> {
        if begin >= end || end > self.universe {
            return Err(McmcError::incoherent(format!(
                "range [{}, {}) of node {} is invalid for {} sites",
                begin, end, owner, self.universe
            )));
        }

        if let Some((_, prev)) = self.ranges.range(..=begin).next_back() {
            if prev.end > begin {
                if end <= prev.end {
                    self.redundant += 1;
                    return Ok(self.is_complete());
                }
                return Err(McmcError::incoherent(format!(
                    "range [{}, {}) of node {} overlaps [{}, {}) of node {}",
                    begin, end, owner, prev.begin, prev.end, prev.owner
                )));
            }
        }
        if let Some((_, next)) = self.ranges.range(begin + 1..end).next() {
            return Err(McmcError::incoherent(format!(
                "range [{}, {}) of node {} overlaps [{}, {}) of node {}",
                begin, end, owner, next.begin, next.end, next.owner
            )));
        }

        self.ranges.insert(begin, SiteRange { begin, end, owner });
        self.covered += end - begin;
        Ok(self.is_complete())
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.covered == self.universe
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    /// Number of stored ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Ranges skipped as already covered since construction
    pub fn redundant_count(&self) -> u64 {
        self.redundant
    }

    /// Stored ranges in site order
    pub fn ranges(&self) -> impl Iterator<Item = &SiteRange> {
        self.ranges.values()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.covered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_on_last_tile() {
        let mut cov = IntervalCoverage::new(40);
        assert!(!cov.add(0, 10, 1).unwrap());
        assert!(!cov.add(10, 25, 2).unwrap());
        assert!(cov.add(25, 40, 3).unwrap());
        let owners: Vec<usize> = cov.ranges().map(|r| r.owner).collect();
        assert_eq!(owners, vec![1, 2, 3]);
    }

    #[test]
    fn test_adjacency_is_not_overlap() {
        let mut cov = IntervalCoverage::new(40);
        assert!(!cov.add(5, 15, 1).unwrap());
        assert!(!cov.add(0, 5, 2).unwrap());
        assert!(cov.add(15, 40, 3).unwrap());
        assert_eq!(cov.len(), 3);
    }

    #[test]
    fn test_out_of_order_insertion() {
        let mut cov = IntervalCoverage::new(30);
        assert!(!cov.add(20, 30, 0).unwrap());
        assert!(!cov.add(0, 10, 1).unwrap());
        assert!(cov.add(10, 20, 2).unwrap());
        let begins: Vec<usize> = cov.ranges().map(|r| r.begin).collect();
        assert_eq!(begins, vec![0, 10, 20]);
    }

    #[test]
    fn test_overlap_is_incoherent() {
        let mut cov = IntervalCoverage::new(40);
        cov.add(5, 15, 1).unwrap();
        let err = cov.add(10, 20, 2).unwrap_err();
        assert!(err.is_fatal());
        let err = cov.add(0, 6, 3).unwrap_err();
        assert!(err.is_fatal());
        // Superset of a stored range
        let err = cov.add(0, 40, 4).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_redundant_ranges_skipped() {
        let mut cov = IntervalCoverage::new(20);
        cov.add(0, 10, 1).unwrap();
        assert!(!cov.add(0, 10, 2).unwrap());
        assert!(!cov.add(2, 8, 3).unwrap());
        assert_eq!(cov.len(), 1);
        assert_eq!(cov.redundant_count(), 2);
        assert!(cov.add(10, 20, 4).unwrap());
        // Already complete; duplicates still report completeness
        assert!(cov.add(10, 20, 5).unwrap());
    }

    #[test]
    fn test_invalid_ranges() {
        let mut cov = IntervalCoverage::new(10);
        assert!(cov.add(3, 3, 0).is_err());
        assert!(cov.add(5, 11, 0).is_err());
    }

    #[test]
    fn test_clear_resets() {
        let mut cov = IntervalCoverage::new(10);
        assert!(cov.add(0, 10, 0).unwrap());
        cov.clear();
        assert!(cov.is_empty());
        assert!(!cov.is_complete());
        assert!(cov.add(0, 10, 1).unwrap());
    }
}
