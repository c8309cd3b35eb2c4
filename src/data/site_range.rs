//! # Site Ranges
//!
//! Half-open site intervals and the coalescing ranges the topology hands to
//! the compute core.

use crate::error::{McmcError, Result};

/// Half-open interval `[begin, end)` of alignment sites owned by one compute node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SiteRange {
    pub begin: usize,
    pub end: usize,
    pub owner: usize,
}

impl SiteRange {
    pub fn new(begin: usize, end: usize, owner: usize) -> Result<Self> {
        if begin >= end {
            return Err(McmcError::incoherent(format!(
                "empty site range [{}, {}) for node {}",
                begin, end, owner
            )));
        }
        Ok(Self { begin, end, owner })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    #[inline]
    pub fn contains(&self, site: usize) -> bool {
        site >= self.begin && site < self.end
    }

    /// True if `other` lies entirely inside this range
    #[inline]
    pub fn covers(&self, other: &SiteRange) -> bool {
        other.begin >= self.begin && other.end <= self.end
    }

    #[inline]
    pub fn overlaps(&self, other: &SiteRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Child of a compute node: either an observed tip or another compute node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildRef {
    Tip(usize),
    Node(usize),
}

/// One coalescence event restricted to a site range.
///
/// `range.owner` is the compute id; children refer to compute ids whose
/// ranges contain this range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoalescingRange {
    pub height: f64,
    pub range: SiteRange,
    pub left: ChildRef,
    pub right: ChildRef,
}

impl CoalescingRange {
    #[inline]
    pub fn id(&self) -> usize {
        self.range.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_range_rejects_empty() {
        assert!(SiteRange::new(5, 5, 0).is_err());
        assert!(SiteRange::new(6, 5, 0).is_err());
        let r = SiteRange::new(2, 7, 1).unwrap();
        assert_eq!(r.len(), 5);
        assert!(r.contains(2) && r.contains(6) && !r.contains(7));
    }

    #[test]
    fn test_site_range_relations() {
        let a = SiteRange::new(0, 10, 0).unwrap();
        let b = SiteRange::new(10, 20, 1).unwrap();
        let c = SiteRange::new(3, 8, 2).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(a.covers(&c));
        assert!(!c.covers(&a));
    }
}
