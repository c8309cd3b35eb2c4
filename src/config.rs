//! # Configuration Logic
//!
//! ## Role
//! CLI argument parsing and validation for the demo run, plus conversion into
//! the library's [`SchedulerConfig`] and [`DemoModel`].
//!
//! ## Validation
//! - At least one chain and one step
//! - `exchange_interval > 0`, `log_frequency > 0`
//! - `lambda` within the heating bounds
//! - Gamma shape within its bounds when more than one category is used
//!
//! ## Example CLI
//! ```bash
//! arg-mc3 --chains 4 --length 100000 --exchange-interval 100 --adaptive --summary run.json
//! ```

use std::path::PathBuf;

use clap::Parser;

use crate::error::{McmcError, Result};
use crate::model::data_likelihood::SelfCheckPolicy;
use crate::model::heats::{ChainHeats, DEFAULT_LAMBDA, MAX_LAMBDA, MIN_LAMBDA};
use crate::model::site_rates::{MAX_GAMMA_SHAPE, MIN_GAMMA_SHAPE};
use crate::pipelines::chain::DEFAULT_CAREFUL_PERIOD;
use crate::pipelines::demo::DemoModel;
use crate::pipelines::mc3::SchedulerConfig;
use crate::utils::threading::default_thread_count;

#[derive(Parser, Debug, Clone)]
#[command(name = "arg-mc3")]
#[command(about = "Metropolis-coupled MCMC over ARG likelihoods on a simulated alignment")]
#[command(version)]
pub struct Config {
    /// Number of coupled chains (slot 0 is cold)
    #[arg(long, default_value_t = 4)]
    pub chains: usize,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Steps per chain
    #[arg(long, default_value_t = 10_000)]
    pub length: u64,

    /// Steps between exchange rounds
    #[arg(long, default_value_t = 100)]
    pub exchange_interval: u64,

    /// Exchange attempts per round (default: min(2, max(1, chains / 4)))
    #[arg(long)]
    pub swaps_per_cycle: Option<usize>,

    /// Heating increment; slot i runs at exp(-lambda * i)
    #[arg(long, default_value_t = DEFAULT_LAMBDA)]
    pub lambda: f64,

    /// Tune lambda from the cold-slot exchange acceptance
    #[arg(long)]
    pub adaptive: bool,

    /// Tips of the simulated ARG
    #[arg(long, default_value_t = 6)]
    pub tips: usize,

    /// Alignment length
    #[arg(long, default_value_t = 200)]
    pub sites: usize,

    /// Transition/transversion parameter used for simulation
    #[arg(long, default_value_t = 2.0)]
    pub kappa: f64,

    /// Gamma rate categories (1 = constant rates)
    #[arg(long, default_value_t = 4)]
    pub categories: usize,

    /// Gamma shape used for simulation
    #[arg(long, default_value_t = 0.5)]
    pub shape: f64,

    /// Use a single non-recombinant tree
    #[arg(long)]
    pub no_recombination: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Record every n-th cold state
    #[arg(long, default_value_t = 100)]
    pub log_frequency: u64,

    /// Write the run summary and cold-chain samples as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Seconds between heartbeat lines (0 disables)
    #[arg(long, default_value_t = 30)]
    pub heartbeat_secs: u64,

    /// Verify every rejected proposal during the first n states
    #[arg(long, default_value_t = DEFAULT_CAREFUL_PERIOD)]
    pub careful_period: u64,

    /// Enable hierarchical span timing output
    #[arg(long)]
    pub profile: bool,
}

impl Config {
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(McmcError::config("--chains must be at least 1"));
        }
        if self.length == 0 {
            return Err(McmcError::config("--length must be at least 1"));
        }
        if self.exchange_interval == 0 {
            return Err(McmcError::config("--exchange-interval must be at least 1"));
        }
        if self.log_frequency == 0 {
            return Err(McmcError::config("--log-frequency must be at least 1"));
        }
        if self.nthreads == Some(0) {
            return Err(McmcError::config("--nthreads must be at least 1"));
        }
        if self.swaps_per_cycle == Some(0) {
            return Err(McmcError::config("--swaps-per-cycle must be at least 1"));
        }
        if !(MIN_LAMBDA..=MAX_LAMBDA).contains(&self.lambda) {
            return Err(McmcError::config(format!(
                "--lambda must be in [{}, {}]",
                MIN_LAMBDA, MAX_LAMBDA
            )));
        }
        if self.tips < 2 || self.sites == 0 {
            return Err(McmcError::config("need at least two --tips and one --sites"));
        }
        if !(self.kappa > 0.0) {
            return Err(McmcError::config("--kappa must be positive"));
        }
        if self.categories == 0 {
            return Err(McmcError::config("--categories must be at least 1"));
        }
        if self.categories > 1 && !(MIN_GAMMA_SHAPE..=MAX_GAMMA_SHAPE).contains(&self.shape) {
            return Err(McmcError::config(format!(
                "--shape must be in [{}, {}]",
                MIN_GAMMA_SHAPE, MAX_GAMMA_SHAPE
            )));
        }
        Ok(())
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads.unwrap_or_else(default_thread_count)
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(0)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            threads: self.nthreads(),
            exchange_interval: self.exchange_interval,
            swaps_per_cycle: self.swaps_per_cycle,
            seed: self.seed(),
        }
    }

    pub fn demo_model(&self) -> DemoModel {
        DemoModel {
            tips: self.tips,
            sites: self.sites,
            kappa: self.kappa,
            gamma_categories: self.categories,
            gamma_shape: self.shape,
            recombination: !self.no_recombination,
            seed: self.seed(),
            careful_period: self.careful_period,
            self_check: SelfCheckPolicy::default(),
            ..DemoModel::default()
        }
    }

    pub fn heats(&self) -> Result<ChainHeats> {
        let heats = ChainHeats::exponential(self.chains, self.lambda)?;
        Ok(if self.adaptive { heats.adaptive() } else { heats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("arg-mc3").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = parse(&[]);
        config.validate().unwrap();
        assert_eq!(config.chains, 4);
        assert_eq!(config.scheduler().exchange_interval, 100);
        assert!(config.demo_model().recombination);
        assert!(!config.heats().unwrap().is_adaptive());
    }

    #[test]
    fn test_flags_flow_into_settings() {
        let config = parse(&[
            "--chains",
            "3",
            "--nthreads",
            "2",
            "--seed",
            "42",
            "--adaptive",
            "--no-recombination",
            "--categories",
            "1",
        ]);
        config.validate().unwrap();
        let scheduler = config.scheduler();
        assert_eq!(scheduler.threads, 2);
        assert_eq!(scheduler.seed, 42);
        let model = config.demo_model();
        assert!(!model.recombination);
        assert_eq!(model.gamma_categories, 1);
        let heats = config.heats().unwrap();
        assert_eq!(heats.chain_count(), 3);
        assert!(heats.is_adaptive());
    }

    #[test]
    fn test_invalid_settings() {
        assert!(parse(&["--chains", "0"]).validate().is_err());
        assert!(parse(&["--exchange-interval", "0"]).validate().is_err());
        assert!(parse(&["--lambda", "0.9"]).validate().is_err());
        assert!(parse(&["--shape", "100"]).validate().is_err());
        assert!(parse(&["--categories", "1", "--shape", "100"]).validate().is_ok());
    }
}
