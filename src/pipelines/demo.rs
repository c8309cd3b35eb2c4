//! # Demo Problem
//!
//! ## Role
//! A self-contained inference problem for the binary, the integration tests
//! and the benches: a caterpillar ARG over `tips` tips whose top join is
//! optionally split into two segments at different heights (a single
//! recombination), an alignment simulated down it under F84 with gamma rate
//! categories, and chains that re-infer kappa, the base frequencies, the
//! gamma shape and the node heights.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::info;

use crate::data::alignment::Alignment;
use crate::data::arg::{ArgBuilder, ArgTopology, Lineage, SegmentedArg};
use crate::error::{McmcError, Result};
use crate::model::data_likelihood::{DataLikelihood, RateSource, SelfCheckPolicy, SubstitutionSource};
use crate::model::likelihood::{LikelihoodComponent, PriorDistribution, PriorLikelihood};
use crate::model::moves::{Move, WeightedMove};
use crate::model::site_rates::{SiteRates, MAX_GAMMA_SHAPE, MIN_GAMMA_SHAPE};
use crate::model::substitution::TransitionModel;
use crate::model::value::{Derivation, ValueId, ValueStore};
use crate::pipelines::chain::{Chain, DEFAULT_CAREFUL_PERIOD};

/// Settings of the simulated problem
#[derive(Clone, Debug, PartialEq)]
pub struct DemoModel {
    pub tips: usize,
    pub sites: usize,
    pub kappa: f64,
    pub frequencies: [f64; 4],
    /// One category means constant rates
    pub gamma_categories: usize,
    pub gamma_shape: f64,
    /// Height gap between successive joins
    pub height_step: f64,
    /// Split the top join into two segments
    pub recombination: bool,
    pub seed: u64,
    pub careful_period: u64,
    pub self_check: SelfCheckPolicy,
}

impl Default for DemoModel {
    fn default() -> Self {
        Self {
            tips: 6,
            sites: 200,
            kappa: 2.0,
            frequencies: [0.3, 0.2, 0.2, 0.3],
            gamma_categories: 4,
            gamma_shape: 0.5,
            height_step: 0.05,
            recombination: true,
            seed: 1,
            careful_period: DEFAULT_CAREFUL_PERIOD,
            self_check: SelfCheckPolicy::default(),
        }
    }
}

impl DemoModel {
    fn arg_builder(&self) -> ArgBuilder {
        let mut builder = ArgBuilder::new(self.tips, self.sites);
        let joins = self.tips.saturating_sub(1);
        let step = self.height_step;
        let mut below = Lineage::Tip(0);
        for k in 0..joins {
            let height = (k + 1) as f64 * step;
            let right = Lineage::Tip(k + 1);
            if k + 1 == joins && self.recombination && self.sites >= 2 {
                let mid = self.sites / 2;
                builder.add_node(height, &[(0, mid, below, right)]);
                builder.add_node(height + step / 2.0, &[(mid, self.sites, below, right)]);
            } else {
                let id = builder.add_node(height, &[(0, self.sites, below, right)]);
                below = Lineage::Node(id);
            }
        }
        builder
    }

    fn site_rates(&self) -> Result<SiteRates> {
        if self.gamma_categories > 1 {
            SiteRates::gamma(self.gamma_shape, self.gamma_categories)
        } else {
            Ok(SiteRates::constant())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tips < 2 || self.sites == 0 {
            return Err(McmcError::invalid_parameter(format!(
                "demo needs at least two tips and one site, got {} and {}",
                self.tips, self.sites
            )));
        }
        if self.gamma_categories == 0 {
            return Err(McmcError::invalid_parameter("at least one rate category is required"));
        }
        if !(self.height_step > 0.0) {
            return Err(McmcError::invalid_parameter("height step must be positive"));
        }
        Ok(())
    }
}

/// A chain of the demo problem with the ids of its sampled parameters
pub struct DemoChain {
    pub chain: Chain,
    pub kappa: ValueId,
    pub frequencies: ValueId,
    pub gamma_shape: Option<ValueId>,
    pub topology: Arc<SegmentedArg>,
}

impl DemoChain {
    /// Scalars worth recording in samples
    pub fn tracked(&self) -> Vec<ValueId> {
        let mut ids = vec![self.kappa];
        ids.extend(self.gamma_shape);
        ids
    }
}

/// The demo model with its simulated alignment
pub struct DemoProblem {
    model: DemoModel,
    alignment: Arc<Alignment>,
}

impl DemoProblem {
    /// Simulate the alignment under the true parameters
    pub fn new(model: DemoModel) -> Result<Self> {
        model.validate()?;
        let mut scratch = ValueStore::new();
        let arg = model.arg_builder().build(&mut scratch)?;
        let ranges = arg.coalescing_ranges(&scratch)?;
        let substitution = TransitionModel::f84(model.kappa, &model.frequencies)?;
        let rates = model.site_rates()?;
        let mut rng = SmallRng::seed_from_u64(model.seed);
        let alignment = Alignment::simulate(
            &ranges,
            model.tips,
            model.sites,
            &substitution,
            &rates,
            &mut rng,
        )?;
        info!(
            tips = model.tips,
            sites = model.sites,
            nodes = arg.node_count(),
            "simulated demo alignment"
        );
        Ok(Self {
            model,
            alignment: Arc::new(alignment),
        })
    }

    pub fn model(&self) -> &DemoModel {
        &self.model
    }

    pub fn alignment(&self) -> &Arc<Alignment> {
        &self.alignment
    }

    /// Fresh chain starting from the true parameters
    pub fn build_chain(&self, index: usize, seed: u64) -> Result<DemoChain> {
        let m = &self.model;
        let mut values = ValueStore::new();
        let kappa = values.add_scalar("kappa", m.kappa, 0.0, 1000.0)?;
        let frequencies = values.add_vector("frequencies", m.frequencies.to_vec());
        let f84 = values.add_derived(
            "f84",
            Derivation::F84 {
                kappa,
                frequencies,
            },
        )?;
        let (rates, gamma_shape) = if m.gamma_categories > 1 {
            let shape = values.add_scalar("gamma.shape", m.gamma_shape, MIN_GAMMA_SHAPE, MAX_GAMMA_SHAPE)?;
            let rates = values.add_derived(
                "site.rates",
                Derivation::GammaRates {
                    shape,
                    categories: m.gamma_categories,
                },
            )?;
            (RateSource::Value(rates), Some(shape))
        } else {
            (RateSource::Fixed(SiteRates::constant()), None)
        };
        let topology = Arc::new(m.arg_builder().build(&mut values)?);

        let data = DataLikelihood::new(
            topology.clone(),
            self.alignment.clone(),
            SubstitutionSource::Value(f84),
            rates,
            &values,
        )?
        .with_self_check(m.self_check);

        let mut priors = vec![LikelihoodComponent::prior(
            "kappa.prior",
            PriorLikelihood::new(kappa, PriorDistribution::exponential(0.1)?),
        )];
        let mut moves = vec![
            WeightedMove::new(Move::Scale { target: kappa, factor: 0.5 }, 1.0),
            WeightedMove::new(
                Move::FrequencyShift {
                    target: frequencies,
                    delta: 0.05,
                },
                1.0,
            ),
            WeightedMove::new(
                Move::NodeHeight {
                    topology: topology.clone(),
                    window: m.height_step,
                },
                topology.node_count() as f64,
            ),
        ];
        if let Some(shape) = gamma_shape {
            priors.push(LikelihoodComponent::prior(
                "gamma.shape.prior",
                PriorLikelihood::new(shape, PriorDistribution::exponential(1.0)?),
            ));
            moves.push(WeightedMove::new(Move::Scale { target: shape, factor: 0.5 }, 1.0));
        }
        let components = vec![
            LikelihoodComponent::data("data", data),
            LikelihoodComponent::composite("priors", priors),
        ];

        let chain = Chain::new(index, values, components, moves, seed)?
            .with_careful_period(m.careful_period);
        Ok(DemoChain {
            chain,
            kappa,
            frequencies,
            gamma_shape,
            topology,
        })
    }
}
