//! # Compute Core
//!
//! ## Role
//! Owns the cached partial likelihoods of every compute node (one node per
//! coalescing range) and decides which of them are stale after a move.
//!
//! ## Epochs
//! Each node has an accepted (current) epoch and a proposed epoch: structure
//! (range and children), partial buffer, per-branch transition matrices and
//! the cached root contribution. A node is recomputed when
//! - its structure differs from the accepted epoch,
//! - one of its branch matrices changed (length or model),
//! - one of its children was recomputed in this cycle,
//! - it has never been computed.
//!
//! `accept()` promotes proposed buffers and returns the replaced ones to the
//! [`ArrayPool`]; `reject()` returns the proposed buffers instead. Nodes that
//! never reached an accepted epoch are released on reject, and nodes that
//! were not listed in an accepted evaluation are released on accept.
//!
//! ## Buffer layout
//! Category-major, then site, then state; see [`BufferShape::offset`].

use tracing::trace;

use crate::data::alignment::Alignment;
use crate::data::site_range::{ChildRef, CoalescingRange};
use crate::error::{McmcError, Result};
use crate::model::site_rates::SiteRates;
use crate::model::substitution::TransitionModel;
use crate::utils::workspace::{ArrayPool, BufferShape, PoolStats, PooledBuffer};

use std::sync::Arc;

/// Structural state of one node epoch
#[derive(Clone, Copy, Debug, PartialEq)]
struct Layout {
    height: f64,
    begin: usize,
    end: usize,
    left: ChildRef,
    right: ChildRef,
}

impl Layout {
    fn from_range(range: &CoalescingRange) -> Self {
        Self {
            height: range.height,
            begin: range.range.begin,
            end: range.range.end,
            left: range.left,
            right: range.right,
        }
    }

    /// Same sites and children; height alone only affects branch matrices
    fn same_structure(&self, other: &Layout) -> bool {
        self.begin == other.begin
            && self.end == other.end
            && self.left == other.left
            && self.right == other.right
    }
}

/// Dirty flags for the two epochs
#[derive(Clone, Copy, Debug, Default)]
struct DirtyFlags {
    current: bool,
    proposed: bool,
}

/// Transition matrices of one branch, one block per rate category
#[derive(Debug)]
struct BranchMatrices {
    current_length: f64,
    proposed_length: f64,
    current: Vec<f64>,
    proposed: Vec<f64>,
    proposed_active: bool,
}

impl BranchMatrices {
    fn new(len: usize) -> Self {
        Self {
            current_length: f64::NAN,
            proposed_length: f64::NAN,
            current: vec![0.0; len],
            proposed: vec![0.0; len],
            proposed_active: false,
        }
    }

    #[inline]
    fn active(&self) -> &[f64] {
        if self.proposed_active {
            &self.proposed
        } else {
            &self.current
        }
    }

    #[inline]
    fn active_length(&self) -> f64 {
        if self.proposed_active {
            self.proposed_length
        } else {
            self.current_length
        }
    }

    /// Refill the proposed matrices if the length changed or `force` is set.
    /// Returns true if the active matrices changed.
    fn update(&mut self, length: f64, force: bool, model: &TransitionModel, rates: &SiteRates) -> bool {
        if !force && length == self.active_length() {
            return false;
        }
        let block = model.state_count() * model.state_count();
        for (c, out) in self.proposed.chunks_mut(block).enumerate() {
            model.fill_matrix(length * rates.rate(c), out);
        }
        self.proposed_length = length;
        self.proposed_active = true;
        true
    }

    fn accept(&mut self) {
        if self.proposed_active {
            std::mem::swap(&mut self.current, &mut self.proposed);
            self.current_length = self.proposed_length;
            self.proposed_active = false;
        }
    }

    fn reject(&mut self) {
        self.proposed_active = false;
    }
}

#[derive(Debug)]
struct ComputeNode {
    current: Option<Layout>,
    proposed: Layout,
    dirty: DirtyFlags,
    partials: Option<PooledBuffer>,
    proposed_partials: Option<PooledBuffer>,
    left: BranchMatrices,
    right: BranchMatrices,
    root_log_dl: f64,
    proposed_root_log_dl: Option<f64>,
    recomputed: bool,
    touched: bool,
    seen_cycle: u64,
}

impl ComputeNode {
    /// Partials of the active epoch
    fn active_partials(&self) -> Option<&PooledBuffer> {
        self.proposed_partials.as_ref().or(self.partials.as_ref())
    }
}

/// Cached partial-likelihood engine for one alignment
#[derive(Debug)]
pub struct ComputeCore {
    alignment: Arc<Alignment>,
    states: usize,
    categories: usize,
    nodes: Vec<Option<ComputeNode>>,
    touched: Vec<usize>,
    roots: Vec<usize>,
    accepted_roots: Vec<usize>,
    pool: ArrayPool,
    update_all_matrices: bool,
    cycle: u64,
    evaluated: bool,
    nodes_computed: u64,
}

impl ComputeCore {
    pub fn new(alignment: Arc<Alignment>, states: usize, categories: usize) -> Result<Self> {
        if states == 0 || categories == 0 {
            return Err(McmcError::invalid_parameter(
                "compute core needs at least one state and one category",
            ));
        }
        Ok(Self {
            alignment,
            states,
            categories,
            nodes: Vec::new(),
            touched: Vec::new(),
            roots: Vec::new(),
            accepted_roots: Vec::new(),
            pool: ArrayPool::default(),
            update_all_matrices: false,
            cycle: 0,
            evaluated: false,
            nodes_computed: 0,
        })
    }

    pub fn category_count(&self) -> usize {
        self.categories
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Total node recomputations since construction
    pub fn nodes_computed(&self) -> u64 {
        self.nodes_computed
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Ids designated as roots in the active epoch
    pub fn root_nodes(&self) -> &[usize] {
        &self.roots
    }

    fn node(&self, id: usize) -> Result<&ComputeNode> {
        self.nodes
            .get(id)
            .and_then(|n| n.as_ref())
            .ok_or_else(|| McmcError::incoherent(format!("compute node {} does not exist", id)))
    }

    fn node_mut(&mut self, id: usize) -> Result<&mut ComputeNode> {
        self.nodes
            .get_mut(id)
            .and_then(|n| n.as_mut())
            .ok_or_else(|| McmcError::incoherent(format!("compute node {} does not exist", id)))
    }

    fn touch(&mut self, id: usize) {
        if let Some(Some(node)) = self.nodes.get_mut(id) {
            if !node.touched {
                node.touched = true;
                self.touched.push(id);
            }
        }
    }

    fn shape_of(&self, layout: &Layout) -> BufferShape {
        BufferShape {
            sites: layout.end - layout.begin,
            categories: self.categories,
            states: self.states,
        }
    }

    /// Stage the proposed epoch of the node owning `range`, creating it if
    /// needed. Structural changes mark the node dirty.
    pub fn propose_range(&mut self, range: &CoalescingRange) {
        let id = range.id();
        let layout = Layout::from_range(range);
        if id >= self.nodes.len() {
            self.nodes.resize_with(id + 1, || None);
        }
        if let Some(node) = self.nodes[id].as_mut() {
            let mut changed = false;
            if !node.proposed.same_structure(&layout) {
                node.dirty.proposed = true;
                changed = true;
            }
            if node.proposed != layout {
                node.proposed = layout;
                changed = true;
            }
            if changed {
                self.touch(id);
            }
            return;
        }

        let matrix_len = self.categories * self.states * self.states;
        self.nodes[id] = Some(ComputeNode {
            current: None,
            proposed: layout,
            dirty: DirtyFlags {
                current: true,
                proposed: true,
            },
            partials: None,
            proposed_partials: None,
            left: BranchMatrices::new(matrix_len),
            right: BranchMatrices::new(matrix_len),
            root_log_dl: f64::NAN,
            proposed_root_log_dl: None,
            recomputed: false,
            touched: false,
            seen_cycle: self.cycle,
        });
        self.touch(id);
    }

    /// Mark every live node dirty and force matrix recomputation
    pub fn propose_all(&mut self) {
        for id in 0..self.nodes.len() {
            if let Some(node) = self.nodes[id].as_mut() {
                node.dirty.proposed = true;
                self.touch(id);
            }
        }
        self.update_all_matrices = true;
    }

    /// Recompute every branch matrix in the next evaluation
    pub fn set_update_all_matrices(&mut self) {
        self.update_all_matrices = true;
    }

    pub fn clear_root_nodes(&mut self) {
        self.roots.clear();
    }

    pub fn set_root_node(&mut self, id: usize) -> Result<()> {
        self.node(id)?;
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        Ok(())
    }

    fn child_height(&self, child: ChildRef) -> Result<f64> {
        match child {
            ChildRef::Tip(_) => Ok(0.0),
            ChildRef::Node(id) => Ok(self.node(id)?.proposed.height),
        }
    }

    fn child_recomputed(&self, child: ChildRef) -> bool {
        match child {
            ChildRef::Tip(_) => false,
            ChildRef::Node(id) => self
                .nodes
                .get(id)
                .and_then(|n| n.as_ref())
                .map(|n| n.recomputed)
                .unwrap_or(false),
        }
    }

    /// Bring the partials of `ids` up to date, bottom to top by height.
    /// Returns the number of nodes recomputed.
    pub fn compute_partials_list(
        &mut self,
        ids: &[usize],
        model: &TransitionModel,
        rates: &SiteRates,
    ) -> Result<usize> {
        if rates.category_count() != self.categories || model.state_count() != self.states {
            return Err(McmcError::invalid_parameter(format!(
                "core built for {} categories x {} states, got {} x {}",
                self.categories,
                self.states,
                rates.category_count(),
                model.state_count()
            )));
        }

        let mut order = Vec::with_capacity(ids.len());
        for &id in ids {
            order.push((self.node(id)?.proposed.height, id));
        }
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let force = self.update_all_matrices;
        let cycle = self.cycle;
        let mut computed = 0;
        for (_, id) in order {
            let layout = self.node(id)?.proposed;
            let left_length = layout.height - self.child_height(layout.left)?;
            let right_length = layout.height - self.child_height(layout.right)?;
            if left_length < 0.0 || right_length < 0.0 {
                return Err(McmcError::incoherent(format!(
                    "node {} at height {} lies below a child",
                    id, layout.height
                )));
            }
            let children_changed =
                self.child_recomputed(layout.left) || self.child_recomputed(layout.right);

            let node = self.node_mut(id)?;
            node.seen_cycle = cycle;
            let left_changed = node.left.update(left_length, force, model, rates);
            let right_changed = node.right.update(right_length, force, model, rates);
            let needs = node.dirty.proposed
                || (node.dirty.current && node.proposed_partials.is_none())
                || left_changed
                || right_changed
                || children_changed;
            if left_changed || right_changed {
                self.touch(id);
            }
            if !needs {
                continue;
            }

            let shape = self.shape_of(&layout);
            let previous = self.node_mut(id)?.proposed_partials.take();
            let mut buffer = match previous {
                Some(b) if b.shape() == shape => b,
                Some(b) => {
                    self.pool.give_back(b);
                    self.pool.borrow(shape)
                }
                None => self.pool.borrow(shape),
            };
            let filled = self.fill_partials(id, &layout, &mut buffer);
            let node = self.node_mut(id)?;
            node.proposed_partials = Some(buffer);
            filled?;
            node.recomputed = true;
            node.dirty.proposed = false;
            node.proposed_root_log_dl = None;
            self.touch(id);
            computed += 1;
        }

        self.nodes_computed += computed as u64;
        self.evaluated = true;
        trace!(listed = ids.len(), computed, "partials updated");
        Ok(computed)
    }

    fn fill_partials(&self, id: usize, layout: &Layout, out: &mut PooledBuffer) -> Result<()> {
        let node = self.node(id)?;
        let states = self.states;
        let block = states * states;
        let shape = out.shape();
        let left = self.child_source(layout.left, layout)?;
        let right = self.child_source(layout.right, layout)?;
        let left_matrices = node.left.active();
        let right_matrices = node.right.active();
        let data = out.as_mut_slice();

        for c in 0..self.categories {
            let pl = &left_matrices[c * block..(c + 1) * block];
            let pr = &right_matrices[c * block..(c + 1) * block];
            for site in layout.begin..layout.end {
                let offset = shape.offset(c, site - layout.begin);
                for i in 0..states {
                    let row_l = &pl[i * states..(i + 1) * states];
                    let row_r = &pr[i * states..(i + 1) * states];
                    let l = left.conditional(row_l, c, site, &self.alignment);
                    let r = right.conditional(row_r, c, site, &self.alignment);
                    data[offset + i] = l * r;
                }
            }
        }
        Ok(())
    }

    fn child_source<'a>(&'a self, child: ChildRef, parent: &Layout) -> Result<ChildSource<'a>> {
        match child {
            ChildRef::Tip(t) => {
                if t >= self.alignment.tip_count() {
                    return Err(McmcError::incoherent(format!("tip {} is not in the alignment", t)));
                }
                Ok(ChildSource::Tip(t))
            }
            ChildRef::Node(id) => {
                let node = self.node(id)?;
                let range = node.proposed;
                if range.begin > parent.begin || range.end < parent.end {
                    return Err(McmcError::incoherent(format!(
                        "child {} [{}, {}) does not carry parent range [{}, {})",
                        id, range.begin, range.end, parent.begin, parent.end
                    )));
                }
                let buffer = node.active_partials().ok_or_else(|| {
                    McmcError::incoherent(format!("child {} has no partials", id))
                })?;
                Ok(ChildSource::Node {
                    data: buffer.as_slice(),
                    shape: buffer.shape(),
                    begin: range.begin,
                })
            }
        }
    }

    /// Log likelihood of the data under the designated root nodes
    pub fn compute_root_log_dl(&mut self, frequencies: &[f64], rates: &SiteRates) -> Result<f64> {
        let roots = self.roots.clone();
        let mut total = 0.0;
        for id in roots {
            let node = self.node(id)?;
            let cached = if node.recomputed {
                node.proposed_root_log_dl
            } else {
                node.proposed_root_log_dl
                    .or_else(|| (!node.root_log_dl.is_nan()).then_some(node.root_log_dl))
            };
            let value = match cached {
                Some(v) => v,
                None => {
                    let layout = node.proposed;
                    let v = self.root_log_dl_range(id, layout.begin, layout.end, frequencies, rates)?;
                    self.node_mut(id)?.proposed_root_log_dl = Some(v);
                    self.touch(id);
                    v
                }
            };
            total += value;
        }
        Ok(total)
    }

    /// Root log likelihood restricted to sites `[begin, end)`
    pub fn compute_root_log_dl_for_range(
        &self,
        begin: usize,
        end: usize,
        frequencies: &[f64],
        rates: &SiteRates,
    ) -> Result<f64> {
        let mut total = 0.0;
        for &id in &self.roots {
            let layout = self.node(id)?.proposed;
            let a = begin.max(layout.begin);
            let b = end.min(layout.end);
            if a < b {
                total += self.root_log_dl_range(id, a, b, frequencies, rates)?;
            }
        }
        Ok(total)
    }

    fn root_log_dl_range(
        &self,
        id: usize,
        begin: usize,
        end: usize,
        frequencies: &[f64],
        rates: &SiteRates,
    ) -> Result<f64> {
        let node = self.node(id)?;
        let buffer = node
            .active_partials()
            .ok_or_else(|| McmcError::incoherent(format!("root {} has no partials", id)))?;
        let shape = buffer.shape();
        let data = buffer.as_slice();
        let first = node.proposed.begin;

        let mut log_l = 0.0;
        for site in begin..end {
            let mut site_l = 0.0;
            for c in 0..self.categories {
                let offset = shape.offset(c, site - first);
                let partial = &data[offset..offset + self.states];
                let dot: f64 = partial.iter().zip(frequencies).map(|(p, f)| p * f).sum();
                site_l += rates.probability(c) * dot;
            }
            log_l += site_l.ln();
        }
        Ok(log_l)
    }

    /// Promote the proposed epoch of every touched node
    pub fn accept(&mut self) {
        let cycle = self.cycle;
        for id in std::mem::take(&mut self.touched) {
            let Some(node) = self.nodes[id].as_mut() else {
                continue;
            };
            if let Some(fresh) = node.proposed_partials.take() {
                if let Some(old) = node.partials.replace(fresh) {
                    self.pool.give_back(old);
                }
            }
            node.left.accept();
            node.right.accept();
            if node.recomputed {
                node.root_log_dl = node.proposed_root_log_dl.take().unwrap_or(f64::NAN);
            } else if let Some(v) = node.proposed_root_log_dl.take() {
                node.root_log_dl = v;
            }
            node.current = Some(node.proposed);
            node.dirty = DirtyFlags::default();
            node.recomputed = false;
            node.touched = false;
        }

        if self.evaluated {
            for id in 0..self.nodes.len() {
                let stale = matches!(&self.nodes[id], Some(n) if n.seen_cycle != cycle);
                if stale {
                    self.release_node(id);
                }
            }
        }
        self.accepted_roots.clone_from(&self.roots);
        self.update_all_matrices = false;
        self.evaluated = false;
        self.cycle += 1;
    }

    /// Restore the accepted epoch of every touched node
    pub fn reject(&mut self) {
        for id in std::mem::take(&mut self.touched) {
            let Some(node) = self.nodes[id].as_mut() else {
                continue;
            };
            let Some(current) = node.current else {
                self.release_node(id);
                continue;
            };
            if let Some(fresh) = node.proposed_partials.take() {
                self.pool.give_back(fresh);
            }
            node.left.reject();
            node.right.reject();
            node.proposed = current;
            node.proposed_root_log_dl = None;
            node.dirty.proposed = false;
            node.recomputed = false;
            node.touched = false;
        }
        self.roots.clone_from(&self.accepted_roots);
        self.update_all_matrices = false;
        self.evaluated = false;
        self.cycle += 1;
    }

    /// Drop a node and return its buffers to the pool
    pub fn release_node(&mut self, id: usize) {
        if let Some(node) = self.nodes.get_mut(id).and_then(|n| n.take()) {
            for buffer in [node.partials, node.proposed_partials].into_iter().flatten() {
                self.pool.give_back(buffer);
            }
            self.roots.retain(|&r| r != id);
            self.accepted_roots.retain(|&r| r != id);
        }
    }
}

/// Where a node reads one child's conditional likelihoods from
enum ChildSource<'a> {
    Tip(usize),
    Node {
        data: &'a [f64],
        shape: BufferShape,
        begin: usize,
    },
}

impl ChildSource<'_> {
    /// `sum_j P[i][j] * L_child(j)` for one matrix row
    #[inline]
    fn conditional(&self, row: &[f64], category: usize, site: usize, alignment: &Alignment) -> f64 {
        match self {
            ChildSource::Tip(t) => {
                let state = alignment.state(*t, site) as usize;
                if state < row.len() {
                    row[state]
                } else {
                    row.iter().sum()
                }
            }
            ChildSource::Node { data, shape, begin } => {
                let offset = shape.offset(category, site - begin);
                row.iter()
                    .zip(&data[offset..offset + shape.states])
                    .map(|(p, l)| p * l)
                    .sum()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::site_range::SiteRange;

    fn cherry(height: f64, sites: usize) -> CoalescingRange {
        CoalescingRange {
            height,
            range: SiteRange::new(0, sites, 0).unwrap(),
            left: ChildRef::Tip(0),
            right: ChildRef::Tip(1),
        }
    }

    /// Two-tip likelihood under JC69: sum over sites of
    /// ln(1/4 * P(x->y; 2t))
    fn jc_pair(same: bool, t: f64) -> f64 {
        let ex = (-4.0 * 2.0 * t).exp();
        let p = if same { 0.25 + 0.75 * ex } else { 0.25 - 0.25 * ex };
        (0.25 * p).ln()
    }

    fn core_for(seqs: &[&str]) -> ComputeCore {
        let aln = Arc::new(Alignment::from_sequences(seqs).unwrap());
        ComputeCore::new(aln, 4, 1).unwrap()
    }

    #[test]
    fn test_cherry_matches_closed_form() {
        let mut core = core_for(&["AC", "AG"]);
        let rates = SiteRates::constant();
        let model = TransitionModel::Jc69;
        core.propose_range(&cherry(0.1, 2));
        core.clear_root_nodes();
        core.set_root_node(0).unwrap();
        assert_eq!(core.compute_partials_list(&[0], &model, &rates).unwrap(), 1);
        let log_l = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        let expected = jc_pair(true, 0.1) + jc_pair(false, 0.1);
        assert!((log_l - expected).abs() < 1e-12);

        let first = core
            .compute_root_log_dl_for_range(0, 1, model.stationaries(), &rates)
            .unwrap();
        assert!((first - jc_pair(true, 0.1)).abs() < 1e-12);
        core.accept();
    }

    #[test]
    fn test_unchanged_node_is_not_recomputed() {
        let mut core = core_for(&["ACGT", "ACGA"]);
        let rates = SiteRates::constant();
        let model = TransitionModel::Jc69;
        core.propose_range(&cherry(0.2, 4));
        core.set_root_node(0).unwrap();
        core.compute_partials_list(&[0], &model, &rates).unwrap();
        let before = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        core.accept();

        core.propose_range(&cherry(0.2, 4));
        assert_eq!(core.compute_partials_list(&[0], &model, &rates).unwrap(), 0);
        let again = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        assert_eq!(before, again);
        core.accept();
        assert_eq!(core.nodes_computed(), 1);
    }

    #[test]
    fn test_reject_restores_accepted_value() {
        let mut core = core_for(&["ACGT", "ACGA"]);
        let rates = SiteRates::constant();
        let model = TransitionModel::Jc69;
        core.propose_range(&cherry(0.2, 4));
        core.set_root_node(0).unwrap();
        core.compute_partials_list(&[0], &model, &rates).unwrap();
        let accepted = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        core.accept();

        core.propose_range(&cherry(0.5, 4));
        assert_eq!(core.compute_partials_list(&[0], &model, &rates).unwrap(), 1);
        let proposed = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        assert_ne!(proposed, accepted);
        core.reject();

        core.propose_range(&cherry(0.2, 4));
        assert_eq!(core.compute_partials_list(&[0], &model, &rates).unwrap(), 0);
        let restored = core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
        assert_eq!(restored, accepted);
    }

    #[test]
    fn test_buffers_recycled_through_pool() {
        let mut core = core_for(&["ACGT", "ACGA"]);
        let rates = SiteRates::constant();
        let model = TransitionModel::Jc69;
        core.set_root_node(0).unwrap_err();
        for step in 0..20 {
            core.propose_range(&cherry(0.1 + step as f64 * 0.01, 4));
            core.clear_root_nodes();
            core.set_root_node(0).unwrap();
            core.compute_partials_list(&[0], &model, &rates).unwrap();
            core.compute_root_log_dl(model.stationaries(), &rates).unwrap();
            if step % 2 == 0 {
                core.accept();
            } else {
                core.reject();
            }
        }
        let stats = core.pool_stats();
        assert!(stats.allocated <= 2, "allocated {}", stats.allocated);
        assert!(stats.reused >= 18);
    }

    #[test]
    fn test_update_all_matrices_forces_recompute() {
        let mut core = core_for(&["ACGT", "ACGA"]);
        let rates = SiteRates::constant();
        core.propose_range(&cherry(0.2, 4));
        core.set_root_node(0).unwrap();
        let jc = TransitionModel::Jc69;
        core.compute_partials_list(&[0], &jc, &rates).unwrap();
        let jc_l = core.compute_root_log_dl(jc.stationaries(), &rates).unwrap();
        core.accept();

        let f84 = TransitionModel::f84(4.0, &[0.4, 0.1, 0.1, 0.4]).unwrap();
        core.set_update_all_matrices();
        core.propose_range(&cherry(0.2, 4));
        assert_eq!(core.compute_partials_list(&[0], &f84, &rates).unwrap(), 1);
        let f84_l = core.compute_root_log_dl(f84.stationaries(), &rates).unwrap();
        assert_ne!(jc_l, f84_l);
        core.accept();
    }

    #[test]
    fn test_missing_child_is_incoherent() {
        let mut core = core_for(&["ACGT", "ACGA"]);
        let parent = CoalescingRange {
            height: 1.0,
            range: SiteRange::new(0, 4, 1).unwrap(),
            left: ChildRef::Node(0),
            right: ChildRef::Tip(1),
        };
        core.propose_range(&parent);
        let err = core
            .compute_partials_list(&[1], &TransitionModel::Jc69, &SiteRates::constant())
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
