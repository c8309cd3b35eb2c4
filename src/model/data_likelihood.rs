//! # Data Likelihood Orchestrator
//!
//! ## Role
//! Turns the ARG topology, the substitution model, the site-rate model and
//! the compute core into one incrementally maintained log likelihood.
//!
//! ## Evaluation cycle
//! 1. Fast path: nothing likelihood-relevant changed, return the accepted
//!    value.
//! 2. Stage every coalescing range in the compute core.
//! 3. Rebuild root coverage from the highest range downward until every site
//!    has a root.
//! 4. Designate the covering ranges as roots.
//! 5. Recompute stale partials bottom-up and combine the roots.
//!
//! The proposed value stays open until the owning component accepts or
//! rejects.
//!
//! ## Self-check
//! After an accepted evaluation the orchestrator periodically recomputes
//! everything from scratch. A disagreement beyond tolerance means the cache
//! invalidation is wrong and is reported as `CacheDivergence`.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::data::alignment::Alignment;
use crate::data::arg::ArgTopology;
use crate::error::{McmcError, Result};
use crate::model::compute_core::ComputeCore;
use crate::model::coverage::IntervalCoverage;
use crate::model::site_rates::SiteRates;
use crate::model::substitution::TransitionModel;
use crate::model::value::{ValueId, ValueStore};
use crate::utils::workspace::PoolStats;

/// Where the substitution model comes from
#[derive(Clone, Debug)]
pub enum SubstitutionSource {
    Fixed(TransitionModel),
    Value(ValueId),
}

/// Where the site-rate categories come from
#[derive(Clone, Debug)]
pub enum RateSource {
    Fixed(SiteRates),
    Value(ValueId),
}

fn resolve_model<'a>(source: &'a SubstitutionSource, values: &'a ValueStore) -> Result<&'a TransitionModel> {
    match source {
        SubstitutionSource::Fixed(m) => Ok(m),
        SubstitutionSource::Value(id) => values.substitution(*id),
    }
}

fn resolve_rates<'a>(source: &'a RateSource, values: &'a ValueStore) -> Result<&'a SiteRates> {
    match source {
        RateSource::Fixed(r) => Ok(r),
        RateSource::Value(id) => values.site_rates(*id),
    }
}

/// When to run the from-scratch comparison after an accepted evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelfCheckPolicy {
    /// Check every accepted evaluation while fewer than this many have passed
    pub warmup: u64,
    /// Afterwards check every `period` accepted evaluations (0 disables)
    pub period: u64,
    /// Relative tolerance, scaled by `max(1, |L|)`
    pub tolerance: f64,
}

impl SelfCheckPolicy {
    pub fn disabled() -> Self {
        Self {
            warmup: 0,
            period: 0,
            tolerance: 0.0,
        }
    }

    pub fn is_due(&self, accepted: u64) -> bool {
        accepted < self.warmup || (self.period > 0 && accepted % self.period == 0)
    }
}

impl Default for SelfCheckPolicy {
    fn default() -> Self {
        Self {
            warmup: 10_000,
            period: 10_000,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug)]
pub struct DataLikelihood {
    topology: Arc<dyn ArgTopology>,
    substitution: SubstitutionSource,
    rates: RateSource,
    core: ComputeCore,
    coverage: IntervalCoverage,
    policy: SelfCheckPolicy,
    /// Model change or first evaluation pending
    force_recalculation: bool,
    /// Evaluated in the open cycle
    modified: bool,
    current: f64,
    proposed: f64,
    evaluations: u64,
    fast_path_hits: u64,
    accepted_evaluations: u64,
    self_checks: u64,
}

impl DataLikelihood {
    pub fn new(
        topology: Arc<dyn ArgTopology>,
        alignment: Arc<Alignment>,
        substitution: SubstitutionSource,
        rates: RateSource,
        values: &ValueStore,
    ) -> Result<Self> {
        if alignment.tip_count() != topology.tip_count()
            || alignment.site_count() != topology.site_count()
        {
            return Err(McmcError::invalid_parameter(format!(
                "alignment is {} tips x {} sites, topology is {} x {}",
                alignment.tip_count(),
                alignment.site_count(),
                topology.tip_count(),
                topology.site_count()
            )));
        }
        let states = resolve_model(&substitution, values)?.state_count();
        let categories = resolve_rates(&rates, values)?.category_count();
        let site_count = topology.site_count();
        Ok(Self {
            topology,
            substitution,
            rates,
            core: ComputeCore::new(alignment, states, categories)?,
            coverage: IntervalCoverage::new(site_count),
            policy: SelfCheckPolicy::default(),
            force_recalculation: true,
            modified: false,
            current: f64::NAN,
            proposed: f64::NAN,
            evaluations: 0,
            fast_path_hits: 0,
            accepted_evaluations: 0,
            self_checks: 0,
        })
    }

    pub fn with_self_check(mut self, policy: SelfCheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Values this likelihood listens to
    pub fn dependencies(&self) -> Vec<ValueId> {
        let mut deps = self.topology.dependencies();
        if let SubstitutionSource::Value(id) = self.substitution {
            deps.push(id);
        }
        if let RateSource::Value(id) = self.rates {
            deps.push(id);
        }
        deps
    }

    /// React to a change of `source` without recomputing
    pub fn parameter_changed(&mut self, source: ValueId) {
        let model_changed = matches!(self.substitution, SubstitutionSource::Value(id) if id == source)
            || matches!(self.rates, RateSource::Value(id) if id == source);
        if model_changed {
            self.core.set_update_all_matrices();
            self.force_recalculation = true;
        }
    }

    /// Recompute every node on the next evaluation, ignoring cached partials
    pub fn force_recompute(&mut self) {
        self.core.propose_all();
        self.force_recalculation = true;
    }

    pub fn compute_proposed_likelihood(&mut self, values: &ValueStore) -> Result<f64> {
        if !self.force_recalculation && !self.topology.requires_recalculation(values) {
            self.fast_path_hits += 1;
            trace!("data likelihood unchanged");
            return Ok(self.current);
        }
        let log_l = self.evaluate(values)?;
        self.force_recalculation = false;
        self.proposed = log_l;
        Ok(log_l)
    }

    fn evaluate(&mut self, values: &ValueStore) -> Result<f64> {
        self.evaluations += 1;
        self.modified = true;
        let model = resolve_model(&self.substitution, values)?;
        let rates = resolve_rates(&self.rates, values)?;

        let ranges = self.topology.coalescing_ranges(values)?;
        for range in &ranges {
            self.core.propose_range(range);
        }

        self.coverage.clear();
        let mut complete = false;
        for range in ranges.iter().rev() {
            if self.coverage.add(range.range.begin, range.range.end, range.id())? {
                complete = true;
                break;
            }
        }
        if !complete {
            return Err(McmcError::incoherent(format!(
                "root ranges cover {} of {} sites",
                self.coverage.covered(),
                self.coverage.universe()
            )));
        }

        self.core.clear_root_nodes();
        for root in self.coverage.ranges() {
            self.core.set_root_node(root.owner)?;
        }

        let ids: Vec<usize> = ranges.iter().map(|r| r.id()).collect();
        let computed = self.core.compute_partials_list(&ids, model, rates)?;
        let log_l = self.core.compute_root_log_dl(model.stationaries(), rates)?;
        trace!(computed, roots = self.coverage.len(), log_l, "data likelihood evaluated");
        Ok(log_l)
    }

    /// Close the cycle as accepted; may run the cache self-check
    pub fn state_accepted(&mut self, values: &ValueStore) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        self.core.accept();
        self.current = self.proposed;
        self.modified = false;
        self.accepted_evaluations += 1;

        if self.policy.is_due(self.accepted_evaluations) {
            self.verify_cache(values)?;
        }
        Ok(())
    }

    fn verify_cache(&mut self, values: &ValueStore) -> Result<()> {
        self.core.propose_all();
        let recomputed = self.evaluate(values)?;
        self.core.accept();
        self.modified = false;
        self.self_checks += 1;

        let tolerance = self.policy.tolerance * self.current.abs().max(1.0);
        let agree = recomputed == self.current || (recomputed - self.current).abs() <= tolerance;
        if !agree {
            return Err(McmcError::CacheDivergence {
                accepted: self.current,
                recomputed,
            });
        }
        debug!(
            check = self.self_checks,
            log_l = self.current,
            "cached likelihood verified"
        );
        Ok(())
    }

    /// Close the cycle as rejected
    pub fn state_rejected(&mut self) {
        if !self.modified {
            return;
        }
        self.core.reject();
        self.proposed = self.current;
        self.modified = false;
    }

    /// Accepted log likelihood
    pub fn current_log_likelihood(&self) -> f64 {
        self.current
    }

    /// Log likelihood of sites `[begin, end)` under the active epoch
    pub fn log_likelihood_for_range(&self, begin: usize, end: usize, values: &ValueStore) -> Result<f64> {
        let model = resolve_model(&self.substitution, values)?;
        let rates = resolve_rates(&self.rates, values)?;
        self.core
            .compute_root_log_dl_for_range(begin, end, model.stationaries(), rates)
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn fast_path_hits(&self) -> u64 {
        self.fast_path_hits
    }

    pub fn self_checks(&self) -> u64 {
        self.self_checks
    }

    pub fn nodes_computed(&self) -> u64 {
        self.core.nodes_computed()
    }

    pub fn root_count(&self) -> usize {
        self.core.root_nodes().len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.core.pool_stats()
    }
}
