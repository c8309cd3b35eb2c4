//! # Pipeline Module
//!
//! High-level orchestration: the per-chain move driver, the multi-chain
//! scheduler and the simulated demo problem.

pub mod chain;
pub mod demo;
pub mod mc3;

pub use chain::{Chain, ChainListener, ChainView, SampleCollector};
pub use demo::{DemoModel, DemoProblem};
pub use mc3::{Mc3, RunControl, RunSummary, SchedulerConfig};
