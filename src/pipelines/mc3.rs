//! # Metropolis-Coupled Scheduler
//!
//! ## Role
//! Runs N chains at decreasing heats on a fixed rayon pool and periodically
//! proposes to exchange the states of two slots. Slot 0 holds heat 1 and its
//! chain is the one whose samples are reported.
//!
//! ## Cycle
//! 1. Advance every chain by `min(exchange_interval, remaining)` steps in
//!    parallel and join.
//! 2. Surface the first worker failure, if any.
//! 3. Block while paused; stop if aborted.
//! 4. Attempt `swaps_per_cycle` exchanges between random slot pairs and feed
//!    attempts involving slot 0 to the adaptive heating.
//!
//! Chains are only touched by the scheduler between joins, so exchanges,
//! heat reassignment and listener hand-over need no locking.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span, trace};

use crate::error::{McmcError, Result};
use crate::model::heats::{ChainHeats, DEFAULT_LAMBDA};
use crate::pipelines::chain::Chain;
use crate::utils::telemetry::TelemetryBlackboard;
use crate::utils::threading::{build_thread_pool, default_thread_count};

/// Scheduler settings
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    pub threads: usize,
    /// Steps each chain runs between exchange rounds
    pub exchange_interval: u64,
    /// Exchanges per round; defaults to `min(2, max(1, N / 4))`
    pub swaps_per_cycle: Option<usize>,
    pub seed: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: default_thread_count(),
            exchange_interval: 100,
            swaps_per_cycle: None,
            seed: 0,
        }
    }
}

/// Default number of exchange attempts per round for `chains` slots
pub fn default_swaps_per_cycle(chains: usize) -> usize {
    (chains / 4).clamp(1, 2)
}

/// Log acceptance ratio for exchanging the states at heats `hi` and `hj`
#[inline]
pub fn exchange_log_ratio(hi: f64, hj: f64, li: f64, lj: f64) -> f64 {
    hj * li + hi * lj - hi * li - hj * lj
}

pub fn exchange_acceptance_probability(hi: f64, hj: f64, li: f64, lj: f64) -> f64 {
    exchange_log_ratio(hi, hj, li, lj).exp().min(1.0)
}

/// Decide an exchange from its log ratio and a uniform draw
#[inline]
pub fn exchange_accepted(log_ratio: f64, u: f64) -> bool {
    !log_ratio.is_nan() && u.ln() <= log_ratio
}

#[derive(Debug, Default)]
struct ControlState {
    paused: bool,
    aborted: bool,
}

/// Pause/abort handle shared with other threads
#[derive(Debug, Default)]
pub struct RunControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl RunControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self, paused: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.paused = paused;
        self.changed.notify_all();
    }

    /// Stop at the next barrier; also releases a paused scheduler
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.aborted = true;
        self.changed.notify_all();
    }

    /// Clear a consumed abort so the next run starts fresh
    pub fn clear_abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.aborted = false;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).paused
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).aborted
    }

    /// Block until resumed or aborted
    pub fn wait_while_paused(&self) {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .changed
            .wait_while(guard, |s| s.paused && !s.aborted)
            .unwrap_or_else(|e| e.into_inner());
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChainSummary {
    pub index: usize,
    pub slot: usize,
    pub heat: f64,
    pub log_likelihood: f64,
    pub states: u64,
    pub accepted: u64,
    pub impossible: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    /// Counted steps per chain
    pub states: u64,
    pub exchanges_attempted: u64,
    pub exchanges_accepted: u64,
    pub exchange_acceptance: f64,
    pub lambda: f64,
    pub heats: Vec<f64>,
    pub aborted: bool,
    pub elapsed_secs: f64,
    pub cold_log_likelihood: f64,
    pub chains: Vec<ChainSummary>,
}

pub struct Mc3 {
    slots: Vec<Chain>,
    heats: ChainHeats,
    pool: rayon::ThreadPool,
    rng: StdRng,
    control: Arc<RunControl>,
    telemetry: Option<Arc<TelemetryBlackboard>>,
    swaps_per_cycle: usize,
    attempted: u64,
    accepted: u64,
}

impl Mc3 {
    pub fn new(chains: Vec<Chain>, config: &SchedulerConfig) -> Result<Self> {
        if chains.is_empty() {
            return Err(McmcError::invalid_parameter("MC3 needs at least one chain"));
        }
        let n = chains.len();
        let heats = ChainHeats::exponential(n, DEFAULT_LAMBDA)?;
        let mut mc3 = Self {
            slots: chains,
            heats,
            pool: build_thread_pool(config.threads)?,
            rng: StdRng::seed_from_u64(config.seed),
            control: RunControl::new(),
            telemetry: None,
            swaps_per_cycle: config
                .swaps_per_cycle
                .unwrap_or_else(|| default_swaps_per_cycle(n)),
            attempted: 0,
            accepted: 0,
        };
        mc3.apply_heats();
        Ok(mc3)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Handle for pausing or aborting from another thread
    pub fn control(&self) -> Arc<RunControl> {
        self.control.clone()
    }

    pub fn pause(&self, paused: bool) {
        self.control.pause(paused);
    }

    pub fn abort(&self) {
        self.control.abort();
    }

    pub fn chain_count(&self) -> usize {
        self.slots.len()
    }

    /// Chain in slot `i`
    pub fn chain(&self, slot: usize) -> Option<&Chain> {
        self.slots.get(slot)
    }

    pub fn chain_mut(&mut self, slot: usize) -> Option<&mut Chain> {
        self.slots.get_mut(slot)
    }

    pub fn cold_chain(&self) -> &Chain {
        &self.slots[0]
    }

    pub fn heats(&self) -> &ChainHeats {
        &self.heats
    }

    fn apply_heats(&mut self) {
        for (slot, chain) in self.slots.iter_mut().enumerate() {
            chain.set_heat(self.heats.heat(slot));
        }
    }

    /// Run every chain for `steps` steps with exchanges every
    /// `exchange_interval` steps under the given heating.
    pub fn run(&mut self, steps: u64, exchange_interval: u64, heats: ChainHeats) -> Result<RunSummary> {
        if heats.chain_count() != self.slots.len() {
            return Err(McmcError::invalid_parameter(format!(
                "{} heats for {} chains",
                heats.chain_count(),
                self.slots.len()
            )));
        }
        if exchange_interval == 0 {
            return Err(McmcError::invalid_parameter("exchange interval must be positive"));
        }
        let _span = info_span!("mc3_run", chains = self.slots.len(), steps).entered();
        let start = Instant::now();
        self.heats = heats;
        self.apply_heats();

        let total_cycles = steps.div_ceil(exchange_interval);
        if let Some(bb) = &self.telemetry {
            bb.set_totals(total_cycles, steps);
            bb.set_lambda(self.heats.lambda());
        }
        info!(
            chains = self.slots.len(),
            steps,
            exchange_interval,
            lambda = self.heats.lambda(),
            "starting MC3 run"
        );

        let mut done = 0;
        let mut cycles = 0;
        let mut aborted = false;
        while done < steps {
            let chunk = exchange_interval.min(steps - done);
            self.advance_all(chunk)?;
            done += chunk;
            cycles += 1;
            if let Some(bb) = &self.telemetry {
                bb.record_cycle(cycles, done, self.slots[0].log_likelihood());
            }

            self.control.wait_while_paused();
            if self.control.is_aborted() {
                info!(cycle = cycles, states = done, "run aborted");
                self.control.clear_abort();
                aborted = true;
                break;
            }
            if done < steps {
                self.exchange_round();
            }
            debug!(
                cycle = cycles,
                states = done,
                cold_log_likelihood = self.slots[0].log_likelihood(),
                "cycle complete"
            );
        }

        self.slots[0].finish();
        let summary = self.summary(cycles, done, aborted, start.elapsed().as_secs_f64());
        info!(
            cycles,
            exchanges = summary.exchanges_accepted,
            elapsed = summary.elapsed_secs,
            "MC3 run finished"
        );
        Ok(summary)
    }

    /// One parallel advance of every chain; failures surface after the join
    fn advance_all(&mut self, steps: u64) -> Result<()> {
        let slots = &mut self.slots;
        let mut failures: Vec<McmcError> = self.pool.install(|| {
            slots
                .par_iter_mut()
                .filter_map(|chain| {
                    let index = chain.index();
                    match catch_unwind(AssertUnwindSafe(|| chain.advance(steps))) {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(McmcError::worker(index, e.to_string())),
                        Err(panic) => Some(McmcError::worker(index, panic_message(panic.as_ref()))),
                    }
                })
                .collect()
        });
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.swap_remove(0))
        }
    }

    fn exchange_round(&mut self) {
        let n = self.slots.len();
        if n < 2 {
            return;
        }
        for _ in 0..self.swaps_per_cycle {
            let i = self.rng.random_range(0..n);
            let mut j = self.rng.random_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            let (hi, hj) = (self.heats.heat(i), self.heats.heat(j));
            let (li, lj) = (self.slots[i].log_likelihood(), self.slots[j].log_likelihood());
            let log_ratio = exchange_log_ratio(hi, hj, li, lj);
            let accepted = exchange_accepted(log_ratio, self.rng.random::<f64>());

            self.attempted += 1;
            if accepted {
                self.accepted += 1;
                self.slots.swap(i, j);
                self.slots[i].set_heat(hi);
                self.slots[j].set_heat(hj);
                if i == 0 || j == 0 {
                    let other = i.max(j);
                    let listeners = self.slots[other].take_listeners();
                    for listener in listeners {
                        self.slots[0].add_listener(listener);
                    }
                }
            }
            trace!(i, j, log_ratio, accepted, "exchange");
            if let Some(bb) = &self.telemetry {
                bb.record_exchange(accepted);
            }

            if (i == 0 || j == 0) && self.heats.record_cold_exchange(accepted) {
                self.apply_heats();
                if let Some(bb) = &self.telemetry {
                    bb.set_lambda(self.heats.lambda());
                }
            }
        }
    }

    fn summary(&self, cycles: u64, states: u64, aborted: bool, elapsed_secs: f64) -> RunSummary {
        RunSummary {
            cycles,
            states,
            exchanges_attempted: self.attempted,
            exchanges_accepted: self.accepted,
            exchange_acceptance: if self.attempted == 0 {
                0.0
            } else {
                self.accepted as f64 / self.attempted as f64
            },
            lambda: self.heats.lambda(),
            heats: self.heats.heats().to_vec(),
            aborted,
            elapsed_secs,
            cold_log_likelihood: self.slots[0].log_likelihood(),
            chains: self
                .slots
                .iter()
                .enumerate()
                .map(|(slot, c)| ChainSummary {
                    index: c.index(),
                    slot,
                    heat: c.heat(),
                    log_likelihood: c.log_likelihood(),
                    states: c.state(),
                    accepted: c.accepted(),
                    impossible: c.impossible(),
                })
                .collect(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::likelihood::{LikelihoodComponent, PriorDistribution, PriorLikelihood};
    use crate::model::moves::{Move, WeightedMove};
    use crate::model::value::ValueStore;

    fn prior_chain(index: usize, seed: u64) -> Chain {
        let mut values = ValueStore::new();
        let x = values.add_scalar("x", 0.0, -20.0, 20.0).unwrap();
        let prior = PriorLikelihood::new(x, PriorDistribution::normal(0.0, 1.0).unwrap());
        Chain::new(
            index,
            values,
            vec![LikelihoodComponent::prior("x.prior", prior)],
            vec![WeightedMove::new(Move::Slide { target: x, window: 1.0 }, 1.0)],
            seed,
        )
        .unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            threads: 2,
            exchange_interval: 20,
            swaps_per_cycle: None,
            seed: 17,
        }
    }

    #[test]
    fn test_exchange_acceptance_law() {
        let r = exchange_log_ratio(1.0, 0.9, -100.0, -105.0);
        assert!((r - (-0.5)).abs() < 1e-12);
        let p = exchange_acceptance_probability(1.0, 0.9, -100.0, -105.0);
        assert!((p - (-0.5f64).exp()).abs() < 1e-12);
        assert!(exchange_accepted(r, 0.6));
        assert!(!exchange_accepted(r, 0.61));
        assert!(!exchange_accepted(f64::NAN, 0.1));
    }

    #[test]
    fn test_default_swaps() {
        assert_eq!(default_swaps_per_cycle(1), 1);
        assert_eq!(default_swaps_per_cycle(4), 1);
        assert_eq!(default_swaps_per_cycle(8), 2);
        assert_eq!(default_swaps_per_cycle(64), 2);
    }

    #[test]
    fn test_run_keeps_single_cold_slot() {
        let chains = (0..4).map(|i| prior_chain(i, 100 + i as u64)).collect();
        let mut mc3 = Mc3::new(chains, &config()).unwrap();
        let summary = mc3
            .run(400, 20, ChainHeats::exponential(4, 0.3).unwrap())
            .unwrap();
        assert_eq!(summary.cycles, 20);
        assert_eq!(summary.states, 400);
        assert!(!summary.aborted);
        assert!(summary.exchanges_attempted > 0);
        let cold = summary.chains.iter().filter(|c| c.heat == 1.0).count();
        assert_eq!(cold, 1);
        assert_eq!(mc3.cold_chain().heat(), 1.0);
        for slot in 0..4 {
            assert_eq!(mc3.chain(slot).unwrap().state(), 400);
        }
    }

    #[test]
    fn test_heat_count_mismatch() {
        let chains = (0..2).map(|i| prior_chain(i, i as u64)).collect();
        let mut mc3 = Mc3::new(chains, &config()).unwrap();
        assert!(mc3.run(10, 5, ChainHeats::exponential(3, 0.1).unwrap()).is_err());
    }

    #[test]
    fn test_abort_before_run_stops_after_first_cycle() {
        let chains = (0..2).map(|i| prior_chain(i, i as u64)).collect();
        let mut mc3 = Mc3::new(chains, &config()).unwrap();
        mc3.abort();
        let summary = mc3
            .run(1000, 50, ChainHeats::exponential(2, 0.1).unwrap())
            .unwrap();
        assert!(summary.aborted);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.states, 50);
    }

    #[test]
    fn test_run_after_abort_completes() {
        let chains = (0..2).map(|i| prior_chain(i, i as u64)).collect();
        let mut mc3 = Mc3::new(chains, &config()).unwrap();
        mc3.abort();
        let first = mc3
            .run(1000, 50, ChainHeats::exponential(2, 0.1).unwrap())
            .unwrap();
        assert!(first.aborted);

        let second = mc3
            .run(200, 50, ChainHeats::exponential(2, 0.1).unwrap())
            .unwrap();
        assert!(!second.aborted);
        assert_eq!(second.cycles, 4);
        assert_eq!(mc3.cold_chain().state(), 250);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
