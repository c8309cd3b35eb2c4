use std::sync::Arc;

use arg_mc3::data::alignment::Alignment;
use arg_mc3::data::arg::{ArgBuilder, Lineage};
use arg_mc3::model::data_likelihood::{DataLikelihood, RateSource, SelfCheckPolicy, SubstitutionSource};
use arg_mc3::model::likelihood::LikelihoodComponent;
use arg_mc3::model::moves::{Move, WeightedMove};
use arg_mc3::model::site_rates::SiteRates;
use arg_mc3::model::substitution::TransitionModel;
use arg_mc3::model::value::{Derivation, ParamValue, ValueStore};
use arg_mc3::pipelines::chain::Chain;
use arg_mc3::pipelines::demo::{DemoModel, DemoProblem};

/// Check the cache against a full recomputation after every accepted state
fn always_check() -> SelfCheckPolicy {
    SelfCheckPolicy {
        warmup: u64::MAX,
        period: 1,
        tolerance: 1e-6,
    }
}

#[test]
fn test_incremental_likelihood_matches_full_recompute() {
    let problem = DemoProblem::new(DemoModel {
        tips: 5,
        sites: 60,
        gamma_categories: 3,
        self_check: always_check(),
        careful_period: u64::MAX,
        seed: 3,
        ..DemoModel::default()
    })
    .unwrap();
    let mut demo = problem.build_chain(0, 8).unwrap();
    demo.chain.advance(1500).unwrap();

    let data = demo.chain.components()[0].as_data().unwrap();
    assert!(demo.chain.accepted() > 0);
    assert!(data.self_checks() > 1);
    let stats = data.pool_stats();
    assert!(stats.reused > 0);
}

#[test]
fn test_fresh_likelihood_agrees_with_cached_value() {
    let mut values = ValueStore::new();
    let mut b = ArgBuilder::new(4, 12);
    let n0 = b.add_node(0.05, &[(0, 12, Lineage::Tip(0), Lineage::Tip(1))]);
    let n1 = b.add_node(0.1, &[(0, 12, Lineage::Node(n0), Lineage::Tip(2))]);
    b.add_node(0.2, &[(0, 6, Lineage::Node(n1), Lineage::Tip(3))]);
    b.add_node(0.25, &[(6, 12, Lineage::Node(n1), Lineage::Tip(3))]);
    let arg = Arc::new(b.build(&mut values).unwrap());
    let aln = Arc::new(
        Alignment::from_sequences(&["ACGTACGTAACC", "ACGTACGTAACG", "ACCTACGAAACG", "TCCTACGAAGCG"])
            .unwrap(),
    );
    let model = TransitionModel::f84(3.0, &[0.3, 0.2, 0.2, 0.3]).unwrap();

    let mut cached = DataLikelihood::new(
        arg.clone(),
        aln.clone(),
        SubstitutionSource::Fixed(model.clone()),
        RateSource::Fixed(SiteRates::constant()),
        &values,
    )
    .unwrap();
    cached.compute_proposed_likelihood(&values).unwrap();
    cached.state_accepted(&values).unwrap();

    // A series of accepted and rejected height changes
    let schedule = [
        (vec![0.05, 0.15, 0.2, 0.25], true),
        (vec![0.02, 0.15, 0.2, 0.25], false),
        (vec![0.05, 0.15, 0.3, 0.25], true),
        (vec![0.05, 0.12, 0.3, 0.4], true),
    ];
    for (heights, accept) in schedule {
        values.propose(arg.heights(), ParamValue::Vector(heights)).unwrap();
        cached.compute_proposed_likelihood(&values).unwrap();
        if accept {
            values.accept_open();
            cached.state_accepted(&values).unwrap();
        } else {
            values.reject_open();
            cached.state_rejected();
        }
    }

    let mut fresh = DataLikelihood::new(
        arg,
        aln,
        SubstitutionSource::Fixed(model),
        RateSource::Fixed(SiteRates::constant()),
        &values,
    )
    .unwrap()
    .with_self_check(SelfCheckPolicy::disabled());
    let expected = fresh.compute_proposed_likelihood(&values).unwrap();
    assert!((cached.current_log_likelihood() - expected).abs() < 1e-10);
}

#[test]
fn test_chain_with_derived_models_stays_consistent() {
    let mut values = ValueStore::new();
    let kappa = values.add_scalar("kappa", 2.0, 0.0, 100.0).unwrap();
    let freqs = values.add_vector("freqs", vec![0.25; 4]);
    let f84 = values
        .add_derived("f84", Derivation::F84 { kappa, frequencies: freqs })
        .unwrap();
    let shape = values.add_scalar("shape", 1.0, 0.01, 50.0).unwrap();
    let rates = values
        .add_derived("rates", Derivation::GammaRates { shape, categories: 4 })
        .unwrap();

    let mut b = ArgBuilder::new(3, 16);
    let n0 = b.add_node(0.1, &[(0, 16, Lineage::Tip(0), Lineage::Tip(1))]);
    b.add_node(0.3, &[(0, 16, Lineage::Node(n0), Lineage::Tip(2))]);
    let arg = Arc::new(b.build(&mut values).unwrap());
    let aln = Arc::new(
        Alignment::from_sequences(&["ACGTACGTACGTACGT", "ACGTACGAACGTACGT", "ACCTTCGAACGAACGT"]).unwrap(),
    );
    let data = DataLikelihood::new(
        arg.clone(),
        aln,
        SubstitutionSource::Value(f84),
        RateSource::Value(rates),
        &values,
    )
    .unwrap()
    .with_self_check(always_check());

    let moves = vec![
        WeightedMove::new(Move::Scale { target: kappa, factor: 0.8 }, 1.0),
        WeightedMove::new(Move::Scale { target: shape, factor: 0.8 }, 1.0),
        WeightedMove::new(Move::FrequencyShift { target: freqs, delta: 0.1 }, 1.0),
        WeightedMove::new(
            Move::NodeHeight {
                topology: arg,
                window: 0.1,
            },
            2.0,
        ),
    ];
    let mut chain = Chain::new(0, values, vec![LikelihoodComponent::data("data", data)], moves, 21)
        .unwrap()
        .with_careful_period(u64::MAX);
    chain.advance(1000).unwrap();
    assert_eq!(chain.state(), 1000);
    let accepted: u64 = chain.move_stats().iter().map(|(_, s)| s.accepted).sum();
    assert_eq!(accepted, chain.accepted());
}
