//! # Likelihood Components
//!
//! ## Role
//! A chain's target density is a small tree of [`LikelihoodComponent`]s. Each
//! component caches an accepted and a proposed log likelihood and recomputes
//! only when a value it depends on was proposed (the dirty flag).
//!
//! ## Variants
//! - `Data`: the alignment likelihood over the ARG ([`DataLikelihood`]).
//! - `Prior`: a log density over one scalar value.
//! - `Composite`: the sum of its children.
//! - `External`: any [`ComputeLikelihood`] implementation.
//!
//! Only top-level components are registered as listeners on the value store.
//! Notifications reach nested children through
//! [`LikelihoodComponent::parameter_changed`].

use statrs::distribution::{Continuous, Exp, Gamma, Normal, Uniform};
use tracing::trace;

use crate::error::{McmcError, Result};
use crate::model::data_likelihood::DataLikelihood;
use crate::model::value::{ComponentId, Listener, ValueId, ValueStore};

/// Open extension point for likelihood terms not covered by the built-in
/// variants.
pub trait ComputeLikelihood: Send + std::fmt::Debug {
    fn name(&self) -> &str;

    fn compute_proposed_likelihood(&mut self, values: &ValueStore) -> Result<f64>;

    fn dependencies(&self) -> Vec<ValueId> {
        Vec::new()
    }

    fn state_accepted(&mut self) -> Result<()> {
        Ok(())
    }

    fn state_rejected(&mut self) {}
}

/// Prior density family
#[derive(Clone, Debug)]
pub enum PriorDistribution {
    Exponential(Exp),
    Gamma(Gamma),
    Normal(Normal),
    Uniform(Uniform),
}

impl PriorDistribution {
    pub fn exponential(rate: f64) -> Result<Self> {
        Exp::new(rate)
            .map(Self::Exponential)
            .map_err(|e| McmcError::invalid_parameter(format!("exponential prior: {}", e)))
    }

    pub fn gamma(shape: f64, rate: f64) -> Result<Self> {
        Gamma::new(shape, rate)
            .map(Self::Gamma)
            .map_err(|e| McmcError::invalid_parameter(format!("gamma prior: {}", e)))
    }

    pub fn normal(mean: f64, std_dev: f64) -> Result<Self> {
        Normal::new(mean, std_dev)
            .map(Self::Normal)
            .map_err(|e| McmcError::invalid_parameter(format!("normal prior: {}", e)))
    }

    pub fn uniform(lower: f64, upper: f64) -> Result<Self> {
        Uniform::new(lower, upper)
            .map(Self::Uniform)
            .map_err(|e| McmcError::invalid_parameter(format!("uniform prior: {}", e)))
    }

    /// Log density at `x`; `-inf` outside the support
    pub fn ln_pdf(&self, x: f64) -> f64 {
        match self {
            Self::Exponential(d) if x >= 0.0 => d.ln_pdf(x),
            Self::Gamma(d) if x > 0.0 => d.ln_pdf(x),
            Self::Normal(d) => d.ln_pdf(x),
            Self::Uniform(d) => d.ln_pdf(x),
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Prior over a single scalar value
#[derive(Clone, Debug)]
pub struct PriorLikelihood {
    target: ValueId,
    distribution: PriorDistribution,
}

impl PriorLikelihood {
    pub fn new(target: ValueId, distribution: PriorDistribution) -> Self {
        Self {
            target,
            distribution,
        }
    }

    pub fn target(&self) -> ValueId {
        self.target
    }

    fn log_density(&self, values: &ValueStore) -> Result<f64> {
        Ok(self.distribution.ln_pdf(values.scalar(self.target)?))
    }
}

#[derive(Debug)]
pub enum ComponentKind {
    Data(Box<DataLikelihood>),
    Prior(PriorLikelihood),
    Composite(Vec<LikelihoodComponent>),
    External(Box<dyn ComputeLikelihood>),
}

#[derive(Debug)]
pub struct LikelihoodComponent {
    name: String,
    kind: ComponentKind,
    current: f64,
    proposed: f64,
    dirty: bool,
    dependencies: Vec<ValueId>,
    evaluations: u64,
    acceptances: u64,
}

impl LikelihoodComponent {
    fn with_kind(name: String, kind: ComponentKind) -> Self {
        let mut dependencies = match &kind {
            ComponentKind::Data(d) => d.dependencies(),
            ComponentKind::Prior(p) => vec![p.target],
            ComponentKind::Composite(children) => children
                .iter()
                .flat_map(|c| c.dependencies.iter().copied())
                .collect(),
            ComponentKind::External(e) => e.dependencies(),
        };
        dependencies.sort_unstable_by_key(|id| id.0);
        dependencies.dedup();
        Self {
            name,
            kind,
            current: f64::NAN,
            proposed: f64::NAN,
            dirty: true,
            dependencies,
            evaluations: 0,
            acceptances: 0,
        }
    }

    pub fn data(name: impl Into<String>, data: DataLikelihood) -> Self {
        Self::with_kind(name.into(), ComponentKind::Data(Box::new(data)))
    }

    pub fn prior(name: impl Into<String>, prior: PriorLikelihood) -> Self {
        Self::with_kind(name.into(), ComponentKind::Prior(prior))
    }

    pub fn composite(name: impl Into<String>, children: Vec<LikelihoodComponent>) -> Self {
        Self::with_kind(name.into(), ComponentKind::Composite(children))
    }

    pub fn external(external: Box<dyn ComputeLikelihood>) -> Self {
        let name = external.name().to_string();
        Self::with_kind(name, ComponentKind::External(external))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn dependencies(&self) -> &[ValueId] {
        &self.dependencies
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Times `compute_proposed_likelihood` ran on this component
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn acceptances(&self) -> u64 {
        self.acceptances
    }

    /// Listen to every dependency as component `id`
    pub fn register(&self, id: ComponentId, values: &mut ValueStore) -> Result<()> {
        for dep in &self.dependencies {
            values.add_listener(*dep, Listener::Component(id))?;
        }
        Ok(())
    }

    /// Borrow the data likelihood if this component is one
    pub fn as_data(&self) -> Option<&DataLikelihood> {
        match &self.kind {
            ComponentKind::Data(d) => Some(&**d),
            _ => None,
        }
    }

    pub fn children(&self) -> &[LikelihoodComponent] {
        match &self.kind {
            ComponentKind::Composite(children) => children,
            _ => &[],
        }
    }

    /// Cached proposed value, recomputed only when dirty
    pub fn proposed_log_likelihood(&mut self, values: &ValueStore) -> Result<f64> {
        if self.dirty {
            self.proposed = self.compute_proposed_likelihood(values)?;
            self.dirty = false;
        }
        Ok(self.proposed)
    }

    pub fn current_log_likelihood(&self) -> f64 {
        self.current
    }

    /// Unconditional evaluation of the proposed state
    pub fn compute_proposed_likelihood(&mut self, values: &ValueStore) -> Result<f64> {
        self.evaluations += 1;
        let log_l = match &mut self.kind {
            ComponentKind::Data(d) => d.compute_proposed_likelihood(values)?,
            ComponentKind::Prior(p) => p.log_density(values)?,
            ComponentKind::Composite(children) => {
                let mut total = 0.0;
                for child in children.iter_mut() {
                    total += child.proposed_log_likelihood(values)?;
                }
                total
            }
            ComponentKind::External(e) => e.compute_proposed_likelihood(values)?,
        };
        trace!(component = %self.name, log_l, "proposed likelihood");
        Ok(log_l)
    }

    pub fn state_accepted(&mut self, values: &ValueStore) -> Result<()> {
        match &mut self.kind {
            ComponentKind::Data(d) => d.state_accepted(values)?,
            ComponentKind::Prior(_) => {}
            ComponentKind::Composite(children) => {
                for child in children.iter_mut() {
                    child.state_accepted(values)?;
                }
            }
            ComponentKind::External(e) => e.state_accepted()?,
        }
        self.current = self.proposed;
        self.dirty = false;
        self.acceptances += 1;
        Ok(())
    }

    pub fn state_rejected(&mut self) {
        match &mut self.kind {
            ComponentKind::Data(d) => d.state_rejected(),
            ComponentKind::Prior(_) => {}
            ComponentKind::Composite(children) => {
                for child in children.iter_mut() {
                    child.state_rejected();
                }
            }
            ComponentKind::External(e) => e.state_rejected(),
        }
        self.proposed = self.current;
        self.dirty = false;
    }

    /// Mark dirty if `source` is a dependency. Returns whether it was.
    pub fn parameter_changed(&mut self, source: ValueId) -> bool {
        if !self.dependencies.contains(&source) {
            return false;
        }
        match &mut self.kind {
            ComponentKind::Data(d) => d.parameter_changed(source),
            ComponentKind::Composite(children) => {
                for child in children.iter_mut() {
                    child.parameter_changed(source);
                }
            }
            ComponentKind::Prior(_) | ComponentKind::External(_) => {}
        }
        self.dirty = true;
        true
    }

    /// Mark this component and all children dirty
    pub fn force_recompute(&mut self) {
        match &mut self.kind {
            ComponentKind::Data(d) => d.force_recompute(),
            ComponentKind::Composite(children) => {
                for child in children.iter_mut() {
                    child.force_recompute();
                }
            }
            ComponentKind::Prior(_) | ComponentKind::External(_) => {}
        }
        self.dirty = true;
    }
}
