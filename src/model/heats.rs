//! # Chain Heating
//!
//! Slot `i` runs at heat `exp(-lambda * i)`, so slot 0 is always the cold
//! chain. Lambda is a bounded transactional value; with adaptive tuning it is
//! nudged down when exchanges with the cold slot are rarely accepted and up
//! when they almost always are.

use tracing::debug;

use crate::error::{McmcError, Result};
use crate::model::value::{Bounds, Value};

pub const MIN_LAMBDA: f64 = 1e-8;
pub const MAX_LAMBDA: f64 = 0.5;
pub const DEFAULT_LAMBDA: f64 = 0.1;

/// Adaptive heating schedule
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeatTuning {
    /// Consider retuning when the total cold attempt count is a multiple of this
    pub tune_frequency: u64,
    /// Start a fresh acceptance window every this many cold attempts
    pub reset_frequency: u64,
    /// Window must hold more than this many attempts before retuning
    pub min_attempts: u64,
    pub low_rate: f64,
    pub high_rate: f64,
    pub decrease: f64,
    pub increase: f64,
}

impl Default for HeatTuning {
    fn default() -> Self {
        Self {
            tune_frequency: 200,
            reset_frequency: 2000,
            min_attempts: 100,
            low_rate: 0.3,
            high_rate: 0.6,
            decrease: 0.9,
            increase: 1.1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainHeats {
    lambda: Value<f64>,
    bounds: Bounds,
    heats: Vec<f64>,
    tuning: Option<HeatTuning>,
    cold_attempts: u64,
    window_attempts: u64,
    window_accepted: u64,
    retunes: u64,
}

impl ChainHeats {
    /// Fixed exponential ladder for `chains` slots
    pub fn exponential(chains: usize, lambda: f64) -> Result<Self> {
        if chains == 0 {
            return Err(McmcError::invalid_parameter("at least one chain is required"));
        }
        let bounds = Bounds {
            lower: MIN_LAMBDA,
            upper: MAX_LAMBDA,
        };
        if !bounds.contains(lambda) {
            return Err(McmcError::invalid_parameter(format!(
                "lambda {} is outside [{}, {}]",
                lambda, MIN_LAMBDA, MAX_LAMBDA
            )));
        }
        Ok(Self {
            lambda: Value::new(lambda),
            bounds,
            heats: ladder(chains, lambda),
            tuning: None,
            cold_attempts: 0,
            window_attempts: 0,
            window_accepted: 0,
            retunes: 0,
        })
    }

    /// Enable the default adaptive schedule
    pub fn adaptive(self) -> Self {
        self.with_tuning(HeatTuning::default())
    }

    pub fn with_tuning(mut self, tuning: HeatTuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub fn is_adaptive(&self) -> bool {
        self.tuning.is_some()
    }

    #[inline]
    pub fn heat(&self, slot: usize) -> f64 {
        self.heats[slot]
    }

    pub fn heats(&self) -> &[f64] {
        &self.heats
    }

    pub fn lambda(&self) -> f64 {
        *self.lambda.value()
    }

    pub fn chain_count(&self) -> usize {
        self.heats.len()
    }

    pub fn cold_attempts(&self) -> u64 {
        self.cold_attempts
    }

    pub fn retunes(&self) -> u64 {
        self.retunes
    }

    /// Record an exchange attempt involving slot 0. Returns true if the
    /// heats changed.
    pub fn record_cold_exchange(&mut self, accepted: bool) -> bool {
        self.cold_attempts += 1;
        self.window_attempts += 1;
        if accepted {
            self.window_accepted += 1;
        }
        let Some(tuning) = self.tuning else {
            return false;
        };

        let mut changed = false;
        if self.window_attempts > tuning.min_attempts
            && self.cold_attempts % tuning.tune_frequency == 0
        {
            let rate = self.window_accepted as f64 / self.window_attempts as f64;
            let factor = if rate < tuning.low_rate {
                tuning.decrease
            } else if rate > tuning.high_rate {
                tuning.increase
            } else {
                1.0
            };
            if factor != 1.0 {
                changed = self.set_lambda(self.lambda() * factor);
                debug!(rate, lambda = self.lambda(), changed, "heating retuned");
            }
        }
        if self.cold_attempts % tuning.reset_frequency == 0 {
            self.window_attempts = 0;
            self.window_accepted = 0;
        }
        changed
    }

    fn set_lambda(&mut self, next: f64) -> bool {
        if !self.bounds.contains(next) {
            return false;
        }
        self.lambda.propose(next);
        self.lambda.accept();
        self.heats = ladder(self.heats.len(), next);
        self.retunes += 1;
        true
    }
}

fn ladder(chains: usize, lambda: f64) -> Vec<f64> {
    (0..chains).map(|i| (-lambda * i as f64).exp()).collect()
}
