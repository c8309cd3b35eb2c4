//! # arg-mc3: Metropolis-Coupled MCMC over ARG Likelihoods
//!
//! Simulates an alignment down a small recombinant ARG and re-infers the
//! substitution parameters and node heights with coupled chains.
//!
//! ## Usage
//! ```bash
//! # Four chains, fixed heating
//! arg-mc3 --chains 4 --length 20000
//!
//! # Adaptive heating, JSON summary and samples
//! arg-mc3 --chains 8 --adaptive --summary run.json
//!
//! # With profiling output
//! arg-mc3 --profile
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use arg_mc3::config::Config;
use arg_mc3::pipelines::chain::{Sample, SampleCollector};
use arg_mc3::pipelines::{DemoProblem, Mc3, RunSummary};
use arg_mc3::utils::telemetry::{HeartbeatConfig, HeartbeatHandle, Stage, TelemetryBlackboard};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber for hierarchical profiling output
fn init_profiling() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_timer(fmt::time::uptime()),
        )
        .init();
}

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a RunSummary,
    tracked: Vec<String>,
    samples: &'a [Sample],
}

fn run() -> Result<()> {
    let start = Instant::now();

    let config = Config::parse_and_validate()?;

    if config.profile {
        init_profiling();
        eprintln!("=== Profiling enabled ===\n");
    }

    eprintln!("arg-mc3 v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Threads: {}", config.nthreads());
    eprintln!("Chains: {}  Steps: {}", config.chains, config.length);

    let telemetry = TelemetryBlackboard::new();
    let heartbeat = if config.heartbeat_secs > 0 {
        Some(HeartbeatHandle::spawn(
            telemetry.clone(),
            HeartbeatConfig {
                interval_secs: config.heartbeat_secs,
                ..HeartbeatConfig::default()
            },
        )?)
    } else {
        None
    };

    telemetry.set_stage(Stage::SimulatingData);
    let problem = DemoProblem::new(config.demo_model())?;

    telemetry.set_stage(Stage::BuildingChains);
    let seed = config.seed();
    let mut chains = Vec::with_capacity(config.chains);
    let mut tracked_names = Vec::new();
    let mut samples = None;
    for index in 0..config.chains {
        let mut demo = problem.build_chain(index, seed.wrapping_add(1 + index as u64))?;
        if index == 0 {
            let tracked = demo.tracked();
            for id in &tracked {
                tracked_names.push(demo.chain.values().name(*id)?.to_string());
            }
            let collector = SampleCollector::new(config.log_frequency, tracked);
            samples = Some(collector.samples());
            demo.chain.add_listener(Box::new(collector));
        }
        chains.push(demo.chain);
    }

    let mut mc3 = Mc3::new(chains, &config.scheduler())?.with_telemetry(telemetry.clone());
    telemetry.set_stage(Stage::Sampling);
    let summary = mc3.run(config.length, config.exchange_interval, config.heats()?)?;

    eprintln!(
        "Cold lnL: {:.4}  exchanges: {}/{} ({:.3})  lambda: {:.4}",
        summary.cold_log_likelihood,
        summary.exchanges_accepted,
        summary.exchanges_attempted,
        summary.exchange_acceptance,
        summary.lambda
    );

    if let Some(path) = &config.summary {
        telemetry.set_stage(Stage::WritingOutput);
        let samples = samples
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default();
        let report = RunReport {
            summary: &summary,
            tracked: tracked_names,
            samples: &samples,
        };
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        eprintln!("Summary: {}", path.display());
    }

    telemetry.set_stage(Stage::Complete);
    if let Some(heartbeat) = heartbeat {
        heartbeat.shutdown();
    }

    eprintln!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
