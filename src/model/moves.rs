//! # Proposal Moves
//!
//! Each move proposes new values through the [`ValueStore`] and returns the
//! log Hastings ratio together with the component notifications raised by
//! the proposal. A move that cannot be made (bounds, invalid derived model)
//! returns `ModificationImpossible` and leaves the store unchanged.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;

use crate::data::arg::SegmentedArg;
use crate::error::{McmcError, Result};
use crate::model::value::{Notification, ParamValue, ValueId, ValueStore};

/// Result of applying a move
#[derive(Clone, Debug)]
pub struct Proposal {
    pub log_hastings: f64,
    pub notifications: Vec<Notification>,
}

#[derive(Clone, Debug)]
pub enum Move {
    /// Multiply a scalar by `exp(factor * (u - 0.5))`
    Scale { target: ValueId, factor: f64 },
    /// Add a uniform offset of width `window`, reflected at the bounds
    Slide { target: ValueId, window: f64 },
    /// Slide one ARG node height between its children and parents
    NodeHeight { topology: Arc<SegmentedArg>, window: f64 },
    /// Shift up to `delta` mass between two entries of a frequency vector
    FrequencyShift { target: ValueId, delta: f64 },
}

impl Move {
    pub fn name(&self) -> &'static str {
        match self {
            Move::Scale { .. } => "scale",
            Move::Slide { .. } => "slide",
            Move::NodeHeight { .. } => "node-height",
            Move::FrequencyShift { .. } => "frequency-shift",
        }
    }

    pub fn propose<R: Rng>(&self, values: &mut ValueStore, rng: &mut R) -> Result<Proposal> {
        match self {
            Move::Scale { target, factor } => {
                let x = values.scalar(*target)?;
                let log_m = factor * (rng.random::<f64>() - 0.5);
                let notifications = values.propose(*target, ParamValue::Scalar(x * log_m.exp()))?;
                Ok(Proposal {
                    log_hastings: log_m,
                    notifications,
                })
            }
            Move::Slide { target, window } => {
                let x = values.scalar(*target)?;
                let (lower, upper) = values
                    .bounds(*target)?
                    .map(|b| (b.lower, b.upper))
                    .unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
                let next = reflect(x + window * (rng.random::<f64>() - 0.5), lower, upper)?;
                let notifications = values.propose(*target, ParamValue::Scalar(next))?;
                Ok(Proposal {
                    log_hastings: 0.0,
                    notifications,
                })
            }
            Move::NodeHeight { topology, window } => {
                let count = topology.node_count();
                if count == 0 {
                    return Err(McmcError::impossible("ARG has no internal nodes"));
                }
                let node = rng.random_range(0..count);
                let (lower, upper) = topology.height_bounds(node, values)?;
                let mut heights = values.vector(topology.heights())?.to_vec();
                heights[node] = reflect(heights[node] + window * (rng.random::<f64>() - 0.5), lower, upper)?;
                let notifications = values.propose(topology.heights(), ParamValue::Vector(heights))?;
                Ok(Proposal {
                    log_hastings: 0.0,
                    notifications,
                })
            }
            Move::FrequencyShift { target, delta } => {
                let mut freqs = values.vector(*target)?.to_vec();
                if freqs.len() < 2 {
                    return Err(McmcError::impossible("frequency vector has fewer than two entries"));
                }
                let from = rng.random_range(0..freqs.len());
                let mut to = rng.random_range(0..freqs.len() - 1);
                if to >= from {
                    to += 1;
                }
                let d = delta * rng.random::<f64>();
                if freqs[from] - d <= 0.0 {
                    return Err(McmcError::impossible(format!(
                        "frequency {} would drop to {}",
                        from,
                        freqs[from] - d
                    )));
                }
                freqs[from] -= d;
                freqs[to] += d;
                let notifications = values.propose(*target, ParamValue::Vector(freqs))?;
                Ok(Proposal {
                    log_hastings: 0.0,
                    notifications,
                })
            }
        }
    }
}

/// Fold `x` back into `[lower, upper]` by mirror reflection
fn reflect(x: f64, lower: f64, upper: f64) -> Result<f64> {
    if !x.is_finite() {
        return Err(McmcError::impossible(format!("proposed value {} is not finite", x)));
    }
    let width = upper - lower;
    if !(width > 0.0) {
        return Err(McmcError::impossible(format!(
            "empty interval [{}, {}]",
            lower, upper
        )));
    }
    if x >= lower && x <= upper {
        return Ok(x);
    }
    if width.is_infinite() {
        // One open side
        return Ok(if x < lower { 2.0 * lower - x } else { 2.0 * upper - x });
    }
    let y = (x - lower).rem_euclid(2.0 * width);
    Ok(if y > width { lower + 2.0 * width - y } else { lower + y })
}

/// Per-move counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MoveStats {
    pub proposed: u64,
    pub accepted: u64,
    pub impossible: u64,
}

impl MoveStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

#[derive(Clone, Debug)]
pub struct WeightedMove {
    pub mv: Move,
    pub weight: f64,
    pub stats: MoveStats,
}

impl WeightedMove {
    pub fn new(mv: Move, weight: f64) -> Self {
        Self {
            mv,
            weight,
            stats: MoveStats::default(),
        }
    }
}

/// Index of a move drawn proportionally to its weight
pub fn select_move<R: Rng>(moves: &[WeightedMove], rng: &mut R) -> usize {
    let total: f64 = moves.iter().map(|m| m.weight).sum();
    let mut threshold = rng.random::<f64>() * total;
    for (i, m) in moves.iter().enumerate() {
        threshold -= m.weight;
        if threshold <= 0.0 {
            return i;
        }
    }
    moves.len().saturating_sub(1)
}
