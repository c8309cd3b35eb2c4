//! # ARG Topology
//!
//! ## Role
//! The likelihood orchestrator only needs a few things from the graph: the
//! coalescing ranges ordered by height, whether anything likelihood-relevant
//! changed in the open cycle, and the site and tip counts. [`ArgTopology`] is
//! that seam.
//!
//! ## SegmentedArg
//! A small provider where each internal node owns one or more site segments,
//! each joining two lineages. Recombination appears as different segments of
//! the same node (or different nodes) joining different children. Node
//! heights live in one vector value so that height moves go through the
//! transactional protocol like every other parameter; the structure itself
//! is immutable after [`ArgBuilder::build`].

use crate::data::site_range::{ChildRef, CoalescingRange, SiteRange};
use crate::error::{McmcError, Result};
use crate::model::value::{ValueId, ValueStore};

/// Graph collaborator consumed by the likelihood orchestrator
pub trait ArgTopology: Send + Sync + std::fmt::Debug {
    fn site_count(&self) -> usize;

    fn tip_count(&self) -> usize;

    /// Values whose changes may alter the coalescing ranges or heights
    fn dependencies(&self) -> Vec<ValueId>;

    /// True if the open cycle changed anything the likelihood depends on
    fn requires_recalculation(&self, values: &ValueStore) -> bool;

    /// All coalescing ranges, ascending by height
    fn coalescing_ranges(&self, values: &ValueStore) -> Result<Vec<CoalescingRange>>;
}

/// Lineage joined at a node: a tip or an earlier internal node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lineage {
    Tip(usize),
    Node(usize),
}

#[derive(Clone, Debug)]
struct Segment {
    begin: usize,
    end: usize,
    left: ChildRef,
    right: ChildRef,
    compute_id: usize,
}

#[derive(Clone, Debug)]
struct ArgNode {
    segments: Vec<Segment>,
    children: Vec<usize>,
    parents: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct SegmentedArg {
    tip_count: usize,
    site_count: usize,
    nodes: Vec<ArgNode>,
    compute_ids: usize,
    heights: ValueId,
}

impl SegmentedArg {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of compute ids handed out (one per segment)
    pub fn compute_id_count(&self) -> usize {
        self.compute_ids
    }

    /// Vector value holding one height per internal node
    pub fn heights(&self) -> ValueId {
        self.heights
    }

    /// Open interval a node's height may move in without crossing a child or
    /// a parent. Top nodes have no upper limit.
    pub fn height_bounds(&self, node: usize, values: &ValueStore) -> Result<(f64, f64)> {
        let heights = values.vector(self.heights)?;
        let n = self
            .nodes
            .get(node)
            .ok_or_else(|| McmcError::invalid_parameter(format!("unknown ARG node {}", node)))?;
        let lower = n
            .children
            .iter()
            .map(|&c| heights[c])
            .fold(0.0, f64::max);
        let upper = n
            .parents
            .iter()
            .map(|&p| heights[p])
            .fold(f64::INFINITY, f64::min);
        Ok((lower, upper))
    }
}

impl ArgTopology for SegmentedArg {
    fn site_count(&self) -> usize {
        self.site_count
    }

    fn tip_count(&self) -> usize {
        self.tip_count
    }

    fn dependencies(&self) -> Vec<ValueId> {
        vec![self.heights]
    }

    fn requires_recalculation(&self, values: &ValueStore) -> bool {
        values.is_proposed(self.heights)
    }

    fn coalescing_ranges(&self, values: &ValueStore) -> Result<Vec<CoalescingRange>> {
        let heights = values.vector(self.heights)?;
        if heights.len() != self.nodes.len() {
            return Err(McmcError::invalid_parameter(format!(
                "{} node heights for {} nodes",
                heights.len(),
                self.nodes.len()
            )));
        }
        let mut ranges = Vec::with_capacity(self.compute_ids);
        for (node, height) in self.nodes.iter().zip(heights) {
            for seg in &node.segments {
                ranges.push(CoalescingRange {
                    height: *height,
                    range: SiteRange {
                        begin: seg.begin,
                        end: seg.end,
                        owner: seg.compute_id,
                    },
                    left: seg.left,
                    right: seg.right,
                });
            }
        }
        ranges.sort_by(|a, b| a.height.total_cmp(&b.height).then(a.id().cmp(&b.id())));
        Ok(ranges)
    }
}

/// Incremental construction of a [`SegmentedArg`]
#[derive(Clone, Debug)]
pub struct ArgBuilder {
    tip_count: usize,
    site_count: usize,
    nodes: Vec<(f64, Vec<(usize, usize, Lineage, Lineage)>)>,
}

impl ArgBuilder {
    pub fn new(tip_count: usize, site_count: usize) -> Self {
        Self {
            tip_count,
            site_count,
            nodes: Vec::new(),
        }
    }

    /// Add an internal node with its segments `(begin, end, left, right)`.
    /// Children must be tips or nodes added earlier. Returns the node index.
    pub fn add_node(&mut self, height: f64, segments: &[(usize, usize, Lineage, Lineage)]) -> usize {
        self.nodes.push((height, segments.to_vec()));
        self.nodes.len() - 1
    }

    /// Validate the structure and register the height vector in `values`
    pub fn build(self, values: &mut ValueStore) -> Result<SegmentedArg> {
        if self.tip_count < 2 || self.site_count == 0 {
            return Err(McmcError::invalid_parameter(format!(
                "ARG needs at least two tips and one site, got {} and {}",
                self.tip_count, self.site_count
            )));
        }

        let mut nodes: Vec<ArgNode> = Vec::with_capacity(self.nodes.len());
        let mut heights = Vec::with_capacity(self.nodes.len());
        let mut next_id = 0;

        for (index, (height, segments)) in self.nodes.iter().enumerate() {
            if segments.is_empty() {
                return Err(McmcError::invalid_parameter(format!("node {} has no segments", index)));
            }
            if !(*height >= 0.0) {
                return Err(McmcError::invalid_parameter(format!(
                    "node {} has invalid height {}",
                    index, height
                )));
            }
            let mut node = ArgNode {
                segments: Vec::with_capacity(segments.len()),
                children: Vec::new(),
                parents: Vec::new(),
            };
            for &(begin, end, left, right) in segments {
                if begin >= end || end > self.site_count {
                    return Err(McmcError::invalid_parameter(format!(
                        "node {} segment [{}, {}) is outside {} sites",
                        index, begin, end, self.site_count
                    )));
                }
                if node.segments.iter().any(|s| s.begin < end && begin < s.end) {
                    return Err(McmcError::invalid_parameter(format!(
                        "node {} has overlapping segments",
                        index
                    )));
                }
                let left = self.resolve(&nodes, &heights, index, *height, begin, end, left)?;
                let right = self.resolve(&nodes, &heights, index, *height, begin, end, right)?;
                if left == right {
                    return Err(McmcError::invalid_parameter(format!(
                        "node {} joins a lineage with itself",
                        index
                    )));
                }
                for lineage in [segments_child(left, &nodes), segments_child(right, &nodes)]
                    .into_iter()
                    .flatten()
                {
                    if !node.children.contains(&lineage) {
                        node.children.push(lineage);
                    }
                }
                node.segments.push(Segment {
                    begin,
                    end,
                    left,
                    right,
                    compute_id: next_id,
                });
                next_id += 1;
            }
            heights.push(*height);
            nodes.push(node);
        }

        for index in 0..nodes.len() {
            let children = nodes[index].children.clone();
            for child in children {
                nodes[child].parents.push(index);
            }
        }

        self.check_single_root(&nodes, next_id)?;

        let heights = values.add_vector("arg.heights", heights);
        Ok(SegmentedArg {
            tip_count: self.tip_count,
            site_count: self.site_count,
            nodes,
            compute_ids: next_id,
            heights,
        })
    }

    /// Every site must see all tips merge into exactly one root, with each
    /// lineage joined at most once. Checked once per run of sites between
    /// segment boundaries.
    fn check_single_root(&self, nodes: &[ArgNode], compute_ids: usize) -> Result<()> {
        let segments: Vec<&Segment> = nodes.iter().flat_map(|n| n.segments.iter()).collect();
        debug_assert_eq!(segments.len(), compute_ids);

        let mut cuts: Vec<usize> = segments
            .iter()
            .flat_map(|s| [s.begin, s.end])
            .chain([0, self.site_count])
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut tip_joined = vec![false; self.tip_count];
        let mut segment_joined = vec![false; compute_ids];
        for window in cuts.windows(2) {
            let site = window[0];
            tip_joined.fill(false);
            segment_joined.fill(false);
            let mut covering = 0;

            for seg in segments.iter().filter(|s| s.begin <= site && site < s.end) {
                covering += 1;
                for child in [seg.left, seg.right] {
                    let seen = match child {
                        ChildRef::Tip(t) => std::mem::replace(&mut tip_joined[t], true),
                        ChildRef::Node(id) => std::mem::replace(&mut segment_joined[id], true),
                    };
                    if seen {
                        return Err(McmcError::incoherent(format!(
                            "lineage {:?} is joined twice at sites [{}, {})",
                            child, window[0], window[1]
                        )));
                    }
                }
            }

            if let Some(tip) = tip_joined.iter().position(|joined| !joined) {
                return Err(McmcError::incoherent(format!(
                    "tip {} never coalesces at sites [{}, {})",
                    tip, window[0], window[1]
                )));
            }
            let joined_segments = segment_joined.iter().filter(|j| **j).count();
            let roots = covering - joined_segments;
            if roots != 1 {
                return Err(McmcError::incoherent(format!(
                    "sites [{}, {}) have {} roots",
                    window[0], window[1], roots
                )));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve(
        &self,
        nodes: &[ArgNode],
        heights: &[f64],
        index: usize,
        height: f64,
        begin: usize,
        end: usize,
        lineage: Lineage,
    ) -> Result<ChildRef> {
        match lineage {
            Lineage::Tip(t) if t < self.tip_count => Ok(ChildRef::Tip(t)),
            Lineage::Tip(t) => Err(McmcError::invalid_parameter(format!(
                "node {} references unknown tip {}",
                index, t
            ))),
            Lineage::Node(k) if k < index => {
                if heights[k] > height {
                    return Err(McmcError::invalid_parameter(format!(
                        "node {} at {} is below its child {} at {}",
                        index, height, k, heights[k]
                    )));
                }
                nodes[k]
                    .segments
                    .iter()
                    .find(|s| s.begin <= begin && s.end >= end)
                    .map(|s| ChildRef::Node(s.compute_id))
                    .ok_or_else(|| {
                        McmcError::invalid_parameter(format!(
                            "node {} segment [{}, {}) is not carried by child {}",
                            index, begin, end, k
                        ))
                    })
            }
            Lineage::Node(k) => Err(McmcError::invalid_parameter(format!(
                "node {} references node {} which is not earlier",
                index, k
            ))),
        }
    }
}

/// Node index owning a resolved child compute id
fn segments_child(child: ChildRef, nodes: &[ArgNode]) -> Option<usize> {
    match child {
        ChildRef::Tip(_) => None,
        ChildRef::Node(id) => nodes
            .iter()
            .position(|n| n.segments.iter().any(|s| s.compute_id == id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::ParamValue;

    /// Three tips; node 0 joins tips 0 and 1 everywhere, the top join
    /// switches between node 1 and node 2 at site 5.
    fn recombinant(values: &mut ValueStore) -> SegmentedArg {
        let mut b = ArgBuilder::new(3, 10);
        let n0 = b.add_node(1.0, &[(0, 10, Lineage::Tip(0), Lineage::Tip(1))]);
        b.add_node(2.0, &[(0, 5, Lineage::Node(n0), Lineage::Tip(2))]);
        b.add_node(3.0, &[(5, 10, Lineage::Node(n0), Lineage::Tip(2))]);
        b.build(values).unwrap()
    }

    #[test]
    fn test_ranges_sorted_by_height() {
        let mut values = ValueStore::new();
        let arg = recombinant(&mut values);
        let ranges = arg.coalescing_ranges(&values).unwrap();
        let heights: Vec<f64> = ranges.iter().map(|r| r.height).collect();
        assert_eq!(heights, vec![1.0, 2.0, 3.0]);
        assert_eq!(ranges[1].left, ChildRef::Node(0));
        assert_eq!(arg.compute_id_count(), 3);
    }

    #[test]
    fn test_height_bounds() {
        let mut values = ValueStore::new();
        let arg = recombinant(&mut values);
        assert_eq!(arg.height_bounds(0, &values).unwrap(), (0.0, 2.0));
        assert_eq!(arg.height_bounds(2, &values).unwrap(), (1.0, f64::INFINITY));
    }

    #[test]
    fn test_requires_recalculation_tracks_heights() {
        let mut values = ValueStore::new();
        let arg = recombinant(&mut values);
        assert!(!arg.requires_recalculation(&values));
        values
            .propose(arg.heights(), ParamValue::Vector(vec![1.5, 2.0, 3.0]))
            .unwrap();
        assert!(arg.requires_recalculation(&values));
        values.reject_open();
        assert!(!arg.requires_recalculation(&values));
    }

    #[test]
    fn test_builder_validation() {
        let mut values = ValueStore::new();
        let mut b = ArgBuilder::new(2, 10);
        b.add_node(1.0, &[(0, 10, Lineage::Tip(0), Lineage::Tip(5))]);
        assert!(b.build(&mut values).is_err());

        let mut b = ArgBuilder::new(3, 10);
        let n0 = b.add_node(2.0, &[(0, 5, Lineage::Tip(0), Lineage::Tip(1))]);
        b.add_node(3.0, &[(0, 10, Lineage::Node(n0), Lineage::Tip(2))]);
        // Child only carries [0, 5)
        assert!(b.build(&mut values).is_err());

        let mut b = ArgBuilder::new(3, 10);
        let n0 = b.add_node(2.0, &[(0, 10, Lineage::Tip(0), Lineage::Tip(1))]);
        b.add_node(1.0, &[(0, 10, Lineage::Node(n0), Lineage::Tip(2))]);
        // Parent below child
        assert!(b.build(&mut values).is_err());
    }

    #[test]
    fn test_unjoined_tip_is_rejected() {
        let mut values = ValueStore::new();
        let mut b = ArgBuilder::new(3, 8);
        b.add_node(0.1, &[(0, 8, Lineage::Tip(0), Lineage::Tip(1))]);
        let err = b.build(&mut values).unwrap_err();
        assert!(matches!(err, McmcError::IncoherentRanges { .. }));
        assert!(values.is_empty());
    }

    #[test]
    fn test_partial_ancestry_is_rejected() {
        // Node 0 has no parent over [4, 8), so tip 2 is left alone there
        let mut values = ValueStore::new();
        let mut b = ArgBuilder::new(3, 8);
        let n0 = b.add_node(0.1, &[(0, 8, Lineage::Tip(0), Lineage::Tip(1))]);
        b.add_node(0.2, &[(0, 4, Lineage::Node(n0), Lineage::Tip(2))]);
        let err = b.build(&mut values).unwrap_err();
        assert!(matches!(err, McmcError::IncoherentRanges { .. }));
    }

    #[test]
    fn test_lineage_joined_twice_is_rejected() {
        let mut values = ValueStore::new();
        let mut b = ArgBuilder::new(3, 6);
        let n0 = b.add_node(0.1, &[(0, 6, Lineage::Tip(0), Lineage::Tip(1))]);
        let n1 = b.add_node(0.2, &[(0, 6, Lineage::Node(n0), Lineage::Tip(2))]);
        b.add_node(0.3, &[(0, 6, Lineage::Node(n1), Lineage::Tip(2))]);
        let err = b.build(&mut values).unwrap_err();
        assert!(matches!(err, McmcError::IncoherentRanges { .. }));
    }

    #[test]
    fn test_recombinant_roots_cover_every_site() {
        let mut values = ValueStore::new();
        let arg = recombinant(&mut values);
        let ranges = arg.coalescing_ranges(&values).unwrap();
        let roots: Vec<(usize, usize)> = ranges
            .iter()
            .filter(|r| r.height > 1.0)
            .map(|r| (r.range.begin, r.range.end))
            .collect();
        assert_eq!(roots, vec![(0, 5), (5, 10)]);
    }
}
