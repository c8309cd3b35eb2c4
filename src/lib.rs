//! # arg-mc3 Library
//!
//! Reversible-move MCMC and Metropolis-coupled MCMC over ancestral
//! recombination graph likelihoods.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: Alignments, site ranges and the ARG topology
//! - `error`: Error types and result aliases
//! - `model`: Values, likelihood caching, substitution models, moves, heating
//! - `pipelines`: Chains, the MC3 scheduler and the demo problem
//! - `utils`: Buffer pools, threading and telemetry

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::alignment::Alignment;
pub use data::arg::{ArgBuilder, ArgTopology, Lineage, SegmentedArg};
pub use data::site_range::{ChildRef, CoalescingRange, SiteRange};
pub use error::{McmcError, Result};
pub use model::coverage::IntervalCoverage;
pub use model::data_likelihood::DataLikelihood;
pub use model::heats::ChainHeats;
pub use model::likelihood::{ComputeLikelihood, LikelihoodComponent};
pub use model::moves::{Move, WeightedMove};
pub use model::value::{ParamValue, Value, ValueId, ValueStore};

pub use pipelines::{Chain, ChainListener, DemoModel, DemoProblem, Mc3, RunSummary, SchedulerConfig};
