//! # Data Module
//!
//! In-memory inputs of the likelihood: tip alignments, site ranges and the
//! ARG topology seam.

pub mod alignment;
pub mod arg;
pub mod site_range;
