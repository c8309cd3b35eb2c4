//! # Model Module
//!
//! ## Role
//! The statistical machinery of a chain.
//!
//! ## Sub-modules
//! - `value`: Transactional values and the listener graph
//! - `substitution`, `site_rates`: Nucleotide models and rate categories
//! - `coverage`: Root-range coverage tracker
//! - `compute_core`: Cached per-node partial likelihoods
//! - `data_likelihood`: Incremental alignment likelihood over the ARG
//! - `likelihood`: Likelihood components, priors and composition
//! - `moves`: Proposal moves
//! - `heats`: MC3 heating ladder and adaptive tuning

pub mod compute_core;
pub mod coverage;
pub mod data_likelihood;
pub mod heats;
pub mod likelihood;
pub mod moves;
pub mod site_rates;
pub mod substitution;
pub mod value;
