//! # Site Rate Categories
//!
//! Rate heterogeneity across sites as a small set of categories, each with a
//! rate multiplier and a probability. The compute core scales every branch
//! length by the category rate.
//!
//! The gamma schedule uses equal-probability categories whose rates are the
//! conditional means of a mean-one gamma distribution within each quantile
//! band, then renormalised so that the weighted mean rate is exactly 1.

use statrs::distribution::{ContinuousCDF, Gamma};
use statrs::function::gamma::gamma_lr;

use crate::error::{McmcError, Result};

/// Smallest gamma shape accepted by the rate model
pub const MIN_GAMMA_SHAPE: f64 = 0.01;
/// Largest gamma shape accepted by the rate model
pub const MAX_GAMMA_SHAPE: f64 = 50.0;

/// Tolerance on the weighted mean rate
const MEAN_RATE_TOLERANCE: f64 = 0.01;

#[derive(Clone, Debug, PartialEq)]
pub struct SiteRates {
    rates: Vec<f64>,
    probabilities: Vec<f64>,
}

impl SiteRates {
    /// Single category with rate 1
    pub fn constant() -> Self {
        Self {
            rates: vec![1.0],
            probabilities: vec![1.0],
        }
    }

    pub fn new(rates: Vec<f64>, probabilities: Vec<f64>) -> Result<Self> {
        if rates.is_empty() || rates.len() != probabilities.len() {
            return Err(McmcError::invalid_parameter(format!(
                "{} rates with {} probabilities",
                rates.len(),
                probabilities.len()
            )));
        }
        if rates.iter().chain(&probabilities).any(|x| !x.is_finite() || *x < 0.0) {
            return Err(McmcError::invalid_parameter(
                "rates and probabilities must be finite and non-negative",
            ));
        }
        let total: f64 = probabilities.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(McmcError::invalid_parameter(format!(
                "category probabilities sum to {}",
                total
            )));
        }
        let rates = Self {
            rates,
            probabilities,
        };
        let mean = rates.mean_rate();
        if (mean - 1.0).abs() > MEAN_RATE_TOLERANCE {
            return Err(McmcError::invalid_parameter(format!(
                "mean site rate is {}, expected 1",
                mean
            )));
        }
        Ok(rates)
    }

    /// Discretized gamma with `categories` equal-probability bands.
    ///
    /// A shape outside `[MIN_GAMMA_SHAPE, MAX_GAMMA_SHAPE]` is declined as an
    /// impossible modification.
    pub fn gamma(shape: f64, categories: usize) -> Result<Self> {
        if categories == 0 {
            return Err(McmcError::invalid_parameter("gamma rates need at least one category"));
        }
        if !(MIN_GAMMA_SHAPE..=MAX_GAMMA_SHAPE).contains(&shape) {
            return Err(McmcError::impossible(format!(
                "gamma shape {} outside [{}, {}]",
                shape, MIN_GAMMA_SHAPE, MAX_GAMMA_SHAPE
            )));
        }
        if categories == 1 {
            return Ok(Self::constant());
        }

        let k = categories as f64;
        let mean_one = Gamma::new(shape, shape)
            .map_err(|e| McmcError::impossible(format!("gamma shape {}: {}", shape, e)))?;
        // Band edges on the mean-one gamma, expressed as shape * quantile
        let mut edges = Vec::with_capacity(categories + 1);
        edges.push(0.0);
        for i in 1..categories {
            edges.push(shape * mean_one.inverse_cdf(i as f64 / k));
        }

        let mut rates = Vec::with_capacity(categories);
        for i in 0..categories {
            let lower = gamma_lr(shape + 1.0, edges[i]);
            let upper = if i + 1 == categories {
                1.0
            } else {
                gamma_lr(shape + 1.0, edges[i + 1])
            };
            rates.push(k * (upper - lower));
        }

        let mean = rates.iter().sum::<f64>() / k;
        if !(mean > 0.0) || !mean.is_finite() {
            return Err(McmcError::impossible(format!(
                "gamma shape {} gives degenerate rates",
                shape
            )));
        }
        for r in &mut rates {
            *r /= mean;
        }
        Ok(Self {
            rates,
            probabilities: vec![1.0 / k; categories],
        })
    }

    #[inline]
    pub fn category_count(&self) -> usize {
        self.rates.len()
    }

    #[inline]
    pub fn rate(&self, category: usize) -> f64 {
        self.rates[category]
    }

    #[inline]
    pub fn probability(&self, category: usize) -> f64 {
        self.probabilities[category]
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn mean_rate(&self) -> f64 {
        self.rates
            .iter()
            .zip(&self.probabilities)
            .map(|(r, p)| r * p)
            .sum()
    }
}
