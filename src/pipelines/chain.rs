//! # Chain
//!
//! ## Role
//! One Metropolis-Hastings chain: a value store, its likelihood components,
//! a weighted move set and a private random stream. [`Chain::advance`] runs
//! a number of counted steps; the MC3 scheduler runs many chains side by side
//! and only touches them between calls.
//!
//! ## Step
//! 1. Draw a move by weight and apply it. `ModificationImpossible` reverts
//!    silently and the step is not counted.
//! 2. Forward notifications to the listening components.
//! 3. `test = heat * (L' - L) + ln HR`; accept iff `ln(u) <= test`.
//! 4. Close the cycle on the store and every component.
//! 5. Report the new state to the chain listeners.

use std::sync::{Arc, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{McmcError, Result};
use crate::model::likelihood::LikelihoodComponent;
use crate::model::moves::{select_move, MoveStats, WeightedMove};
use crate::model::value::{ComponentId, ValueId, ValueStore};

/// States after which rejected proposals are no longer re-verified
pub const DEFAULT_CAREFUL_PERIOD: u64 = 5000;

/// Consecutive impossible proposals tolerated before giving up
const MAX_IMPOSSIBLE_RUN: u64 = 100_000;

/// Read-only view handed to listeners after every counted step
pub struct ChainView<'a> {
    pub chain: usize,
    pub state: u64,
    pub heat: f64,
    pub log_likelihood: f64,
    pub values: &'a ValueStore,
}

/// Observer of the cold chain. The scheduler moves listeners to whichever
/// chain currently holds heat 1.
pub trait ChainListener: Send {
    fn new_state(&mut self, view: &ChainView<'_>);

    fn chain_finished(&mut self, _view: &ChainView<'_>) {}
}

#[derive(Clone, Debug, Serialize)]
pub struct Sample {
    pub state: u64,
    pub chain: usize,
    pub log_likelihood: f64,
    pub values: Vec<f64>,
}

/// Records every `frequency`-th state together with selected scalars
pub struct SampleCollector {
    frequency: u64,
    tracked: Vec<ValueId>,
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl SampleCollector {
    pub fn new(frequency: u64, tracked: Vec<ValueId>) -> Self {
        Self {
            frequency: frequency.max(1),
            tracked,
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded samples
    pub fn samples(&self) -> Arc<Mutex<Vec<Sample>>> {
        self.samples.clone()
    }
}

impl ChainListener for SampleCollector {
    fn new_state(&mut self, view: &ChainView<'_>) {
        if view.state % self.frequency != 0 {
            return;
        }
        let values = self
            .tracked
            .iter()
            .map(|id| view.values.scalar(*id).unwrap_or(f64::NAN))
            .collect();
        let sample = Sample {
            state: view.state,
            chain: view.chain,
            log_likelihood: view.log_likelihood,
            values,
        };
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sample);
    }
}

pub struct Chain {
    index: usize,
    values: ValueStore,
    components: Vec<LikelihoodComponent>,
    moves: Vec<WeightedMove>,
    rng: SmallRng,
    heat: f64,
    state: u64,
    accepted: u64,
    impossible: u64,
    log_likelihood: f64,
    careful_period: u64,
    listeners: Vec<Box<dyn ChainListener>>,
}

impl Chain {
    /// Register the components on the store and accept the initial state
    pub fn new(
        index: usize,
        mut values: ValueStore,
        mut components: Vec<LikelihoodComponent>,
        moves: Vec<WeightedMove>,
        seed: u64,
    ) -> Result<Self> {
        if moves.is_empty() || !moves.iter().any(|m| m.weight > 0.0) {
            return Err(McmcError::invalid_parameter(format!(
                "chain {} has no move with positive weight",
                index
            )));
        }
        if moves.iter().any(|m| !(m.weight >= 0.0) || !m.weight.is_finite()) {
            return Err(McmcError::invalid_parameter("move weights must be finite and non-negative"));
        }
        for (i, component) in components.iter().enumerate() {
            component.register(ComponentId(i), &mut values)?;
        }
        values.accept_open();

        let mut log_likelihood = 0.0;
        for component in components.iter_mut() {
            log_likelihood += component.proposed_log_likelihood(&values)?;
        }
        for component in components.iter_mut() {
            component.state_accepted(&values)?;
        }
        debug!(chain = index, log_likelihood, "chain initialized");

        Ok(Self {
            index,
            values,
            components,
            moves,
            rng: SmallRng::seed_from_u64(seed),
            heat: 1.0,
            state: 0,
            accepted: 0,
            impossible: 0,
            log_likelihood,
            careful_period: DEFAULT_CAREFUL_PERIOD,
            listeners: Vec::new(),
        })
    }

    pub fn with_careful_period(mut self, states: u64) -> Self {
        self.careful_period = states;
        self
    }

    /// Run `steps` counted steps
    pub fn advance(&mut self, steps: u64) -> Result<()> {
        let mut done = 0;
        let mut impossible_run = 0;
        while done < steps {
            let k = select_move(&self.moves, &mut self.rng);
            let proposal = match self.moves[k].mv.propose(&mut self.values, &mut self.rng) {
                Ok(p) => p,
                Err(e) if e.is_modification_impossible() => {
                    trace!(chain = self.index, error = %e, "move skipped");
                    self.values.reject_open();
                    self.moves[k].stats.impossible += 1;
                    self.impossible += 1;
                    impossible_run += 1;
                    if impossible_run >= MAX_IMPOSSIBLE_RUN {
                        return Err(McmcError::invalid_parameter(format!(
                            "chain {}: {} consecutive proposals were impossible",
                            self.index, impossible_run
                        )));
                    }
                    continue;
                }
                Err(e) => {
                    self.values.reject_open();
                    return Err(e);
                }
            };
            impossible_run = 0;
            self.moves[k].stats.proposed += 1;

            for note in &proposal.notifications {
                if let Some(component) = self.components.get_mut(note.component.0) {
                    component.parameter_changed(note.source);
                }
            }

            let proposed = self.proposed_log_likelihood()?;
            let test = self.heat * (proposed - self.log_likelihood) + proposal.log_hastings;
            let accept = if test.is_nan() {
                false
            } else if test >= 0.0 {
                true
            } else {
                self.rng.random::<f64>().ln() <= test
            };

            if accept {
                self.values.accept_open();
                for component in self.components.iter_mut() {
                    component.state_accepted(&self.values)?;
                }
                self.log_likelihood = proposed;
                self.moves[k].stats.accepted += 1;
                self.accepted += 1;
            } else {
                self.values.reject_open();
                for component in self.components.iter_mut() {
                    component.state_rejected();
                }
                if self.state < self.careful_period {
                    self.verify_restored()?;
                }
            }

            self.state += 1;
            done += 1;
            let view = ChainView {
                chain: self.index,
                state: self.state,
                heat: self.heat,
                log_likelihood: self.log_likelihood,
                values: &self.values,
            };
            for listener in self.listeners.iter_mut() {
                listener.new_state(&view);
            }
        }
        Ok(())
    }

    fn proposed_log_likelihood(&mut self) -> Result<f64> {
        let mut total = 0.0;
        for component in self.components.iter_mut() {
            total += component.proposed_log_likelihood(&self.values)?;
        }
        Ok(total)
    }

    /// Re-evaluate the restored state and compare with the accepted total
    fn verify_restored(&mut self) -> Result<()> {
        for component in self.components.iter_mut() {
            component.force_recompute();
        }
        let recomputed = self.proposed_log_likelihood()?;
        for component in self.components.iter_mut() {
            component.state_rejected();
        }
        let tolerance = 1e-6 * self.log_likelihood.abs().max(1.0);
        if recomputed == self.log_likelihood || (recomputed - self.log_likelihood).abs() <= tolerance {
            Ok(())
        } else {
            Err(McmcError::CacheDivergence {
                accepted: self.log_likelihood,
                recomputed,
            })
        }
    }

    /// Notify listeners that the run ended
    pub fn finish(&mut self) {
        let view = ChainView {
            chain: self.index,
            state: self.state,
            heat: self.heat,
            log_likelihood: self.log_likelihood,
            values: &self.values,
        };
        for listener in self.listeners.iter_mut() {
            listener.chain_finished(&view);
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn heat(&self) -> f64 {
        self.heat
    }

    pub fn set_heat(&mut self, heat: f64) {
        self.heat = heat;
    }

    /// Counted steps so far
    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn impossible(&self) -> u64 {
        self.impossible
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.state == 0 {
            0.0
        } else {
            self.accepted as f64 / self.state as f64
        }
    }

    /// Accepted total log likelihood (unheated)
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn components(&self) -> &[LikelihoodComponent] {
        &self.components
    }

    pub fn move_stats(&self) -> Vec<(&'static str, MoveStats)> {
        self.moves.iter().map(|m| (m.mv.name(), m.stats)).collect()
    }

    pub fn add_listener(&mut self, listener: Box<dyn ChainListener>) {
        self.listeners.push(listener);
    }

    pub fn take_listeners(&mut self) -> Vec<Box<dyn ChainListener>> {
        std::mem::take(&mut self.listeners)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::likelihood::{PriorDistribution, PriorLikelihood};
    use crate::model::moves::Move;

    fn normal_chain(seed: u64) -> (Chain, ValueId) {
        let mut values = ValueStore::new();
        let x = values.add_scalar("x", 0.0, -50.0, 50.0).unwrap();
        let prior = PriorLikelihood::new(x, PriorDistribution::normal(1.0, 0.5).unwrap());
        let components = vec![LikelihoodComponent::prior("x.prior", prior)];
        let moves = vec![WeightedMove::new(Move::Slide { target: x, window: 1.0 }, 1.0)];
        (Chain::new(0, values, components, moves, seed).unwrap(), x)
    }

    #[test]
    fn test_initial_state_accepted() {
        let (chain, _) = normal_chain(1);
        assert_eq!(chain.state(), 0);
        assert!(chain.log_likelihood().is_finite());
        assert_eq!(chain.components()[0].current_log_likelihood(), chain.log_likelihood());
    }

    #[test]
    fn test_advance_counts_states() {
        let (mut chain, _) = normal_chain(2);
        chain.advance(250).unwrap();
        assert_eq!(chain.state(), 250);
        assert!(chain.accepted() > 0 && chain.accepted() < 250);
        let stats = chain.move_stats();
        assert_eq!(stats[0].0, "slide");
        assert_eq!(stats[0].1.proposed, 250);
    }

    #[test]
    fn test_sampler_targets_the_prior() {
        let (mut chain, x) = normal_chain(3);
        let collector = SampleCollector::new(10, vec![x]);
        let samples = collector.samples();
        chain.add_listener(Box::new(collector));
        chain.advance(20_000).unwrap();

        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 2000);
        let burned = &samples[200..];
        let mean = burned.iter().map(|s| s.values[0]).sum::<f64>() / burned.len() as f64;
        assert!((mean - 1.0).abs() < 0.15, "mean {}", mean);
    }

    #[test]
    fn test_impossible_moves_are_not_counted() {
        let mut values = ValueStore::new();
        let x = values.add_scalar("x", 0.5, 0.0, 1.0).unwrap();
        let prior = PriorLikelihood::new(x, PriorDistribution::uniform(0.0, 1.0).unwrap());
        let components = vec![LikelihoodComponent::prior("x.prior", prior)];
        let moves = vec![WeightedMove::new(Move::Scale { target: x, factor: 20.0 }, 1.0)];
        let mut chain = Chain::new(0, values, components, moves, 4).unwrap();
        chain.advance(100).unwrap();
        assert_eq!(chain.state(), 100);
        assert!(chain.impossible() > 0);
        let v = chain.values().scalar(x).unwrap();
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn test_no_moves_rejected() {
        let values = ValueStore::new();
        assert!(Chain::new(0, values, Vec::new(), Vec::new(), 0).is_err());
    }

    #[test]
    fn test_heated_chain_accepts_more() {
        let (mut cold, _) = normal_chain(5);
        let (mut hot, _) = normal_chain(5);
        hot.set_heat(0.05);
        cold.advance(5000).unwrap();
        hot.advance(5000).unwrap();
        assert!(hot.acceptance_rate() > cold.acceptance_rate());
    }
}
