//! # Tip Alignment
//!
//! Observed nucleotide states at the tips, stored tip-major as `u8`. Codes
//! `0..4` are A, C, G, T; [`MISSING`] marks gaps and ambiguity codes, which
//! contribute a flat partial likelihood.

use rand::Rng;

use crate::data::site_range::{ChildRef, CoalescingRange};
use crate::error::{McmcError, Result};
use crate::model::site_rates::SiteRates;
use crate::model::substitution::{TransitionModel, NUM_STATES};

/// State code for unobserved sites
pub const MISSING: u8 = u8::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alignment {
    tip_count: usize,
    site_count: usize,
    states: Vec<u8>,
}

impl Alignment {
    /// Build from equal-length nucleotide strings, one per tip
    pub fn from_sequences<S: AsRef<str>>(sequences: &[S]) -> Result<Self> {
        let site_count = sequences
            .first()
            .map(|s| s.as_ref().len())
            .ok_or_else(|| McmcError::invalid_parameter("alignment has no sequences"))?;
        if site_count == 0 {
            return Err(McmcError::invalid_parameter("alignment has no sites"));
        }
        let mut states = Vec::with_capacity(sequences.len() * site_count);
        for (tip, seq) in sequences.iter().enumerate() {
            let seq = seq.as_ref();
            if seq.len() != site_count {
                return Err(McmcError::invalid_parameter(format!(
                    "sequence {} has {} sites, expected {}",
                    tip,
                    seq.len(),
                    site_count
                )));
            }
            states.extend(seq.bytes().map(encode_base));
        }
        Ok(Self {
            tip_count: sequences.len(),
            site_count,
            states,
        })
    }

    /// Simulate tip states down a set of coalescing ranges.
    ///
    /// For every site the highest range containing it is the root; the root
    /// state is drawn from the stationary frequencies and each child state
    /// from the transition row of its parent.
    pub fn simulate<R: Rng>(
        ranges: &[CoalescingRange],
        tip_count: usize,
        site_count: usize,
        model: &TransitionModel,
        rates: &SiteRates,
        rng: &mut R,
    ) -> Result<Self> {
        let max_id = ranges.iter().map(|r| r.id()).max().unwrap_or(0);
        let mut by_id: Vec<Option<&CoalescingRange>> = vec![None; max_id + 1];
        for r in ranges {
            by_id[r.id()] = Some(r);
        }

        let mut states = vec![MISSING; tip_count * site_count];
        let mut matrix = vec![0.0; NUM_STATES * NUM_STATES];
        let mut stack: Vec<(ChildRef, usize, f64)> = Vec::new();

        for site in 0..site_count {
            let root = ranges
                .iter()
                .rev()
                .find(|r| r.range.contains(site))
                .ok_or_else(|| McmcError::incoherent(format!("site {} has no root", site)))?;
            let rate = rates.rate(sample_index(rates.probabilities(), rng));
            let root_state = sample_index(model.stationaries(), rng);
            stack.clear();
            stack.push((root.left, root_state, root.height));
            stack.push((root.right, root_state, root.height));

            while let Some((child, parent_state, parent_height)) = stack.pop() {
                let child_height = match child {
                    ChildRef::Tip(_) => 0.0,
                    ChildRef::Node(id) => lookup(&by_id, id)?.height,
                };
                model.fill_matrix((parent_height - child_height) * rate, &mut matrix);
                let row = &matrix[parent_state * NUM_STATES..(parent_state + 1) * NUM_STATES];
                let state = sample_index(row, rng);
                match child {
                    ChildRef::Tip(t) => {
                        if t >= tip_count {
                            return Err(McmcError::incoherent(format!("tip {} out of range", t)));
                        }
                        states[t * site_count + site] = state as u8;
                    }
                    ChildRef::Node(id) => {
                        let node = lookup(&by_id, id)?;
                        stack.push((node.left, state, node.height));
                        stack.push((node.right, state, node.height));
                    }
                }
            }
        }

        if states.contains(&MISSING) {
            return Err(McmcError::incoherent("some tips were not reached by simulation"));
        }
        Ok(Self {
            tip_count,
            site_count,
            states,
        })
    }

    #[inline]
    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    #[inline]
    pub fn site_count(&self) -> usize {
        self.site_count
    }

    #[inline]
    pub fn state(&self, tip: usize, site: usize) -> u8 {
        self.states[tip * self.site_count + site]
    }

    /// Tip sequence as a nucleotide string
    pub fn sequence(&self, tip: usize) -> String {
        self.states[tip * self.site_count..(tip + 1) * self.site_count]
            .iter()
            .map(|&s| decode_base(s))
            .collect()
    }
}

fn lookup<'a>(by_id: &[Option<&'a CoalescingRange>], id: usize) -> Result<&'a CoalescingRange> {
    by_id
        .get(id)
        .copied()
        .flatten()
        .ok_or_else(|| McmcError::incoherent(format!("compute node {} is not in the range set", id)))
}

fn sample_index<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let mut u: f64 = rng.random::<f64>() * weights.iter().sum::<f64>();
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

fn encode_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' | b'U' | b'u' => 3,
        _ => MISSING,
    }
}

fn decode_base(s: u8) -> char {
    match s {
        0 => 'A',
        1 => 'C',
        2 => 'G',
        3 => 'T',
        _ => '-',
    }
}
