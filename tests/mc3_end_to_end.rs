use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use arg_mc3::model::heats::ChainHeats;
use arg_mc3::pipelines::chain::{ChainListener, ChainView, SampleCollector};
use arg_mc3::pipelines::demo::{DemoModel, DemoProblem};
use arg_mc3::pipelines::mc3::{Mc3, RunControl, SchedulerConfig};
use arg_mc3::utils::telemetry::TelemetryBlackboard;
use tempfile::NamedTempFile;

// --- Helpers ---

fn toy_problem() -> DemoProblem {
    DemoProblem::new(DemoModel {
        tips: 2,
        sites: 30,
        gamma_categories: 1,
        recombination: false,
        seed: 11,
        ..DemoModel::default()
    })
    .unwrap()
}

fn scheduler() -> SchedulerConfig {
    SchedulerConfig {
        threads: 2,
        exchange_interval: 50,
        swaps_per_cycle: None,
        seed: 99,
    }
}

fn build_mc3(problem: &DemoProblem, chains: usize) -> (Mc3, Arc<Mutex<Vec<arg_mc3::pipelines::chain::Sample>>>) {
    let mut built = Vec::new();
    let mut samples = None;
    for index in 0..chains {
        let mut demo = problem.build_chain(index, 1000 + index as u64).unwrap();
        if index == 0 {
            let collector = SampleCollector::new(10, demo.tracked());
            samples = Some(collector.samples());
            demo.chain.add_listener(Box::new(collector));
        }
        built.push(demo.chain);
    }
    (Mc3::new(built, &scheduler()).unwrap(), samples.unwrap())
}

/// Counts states seen by a listener whose chain was not cold
struct HeatProbe {
    hot_states: Arc<AtomicU64>,
    seen: Arc<AtomicU64>,
}

impl ChainListener for HeatProbe {
    fn new_state(&mut self, view: &ChainView<'_>) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if view.heat != 1.0 {
            self.hot_states.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Aborts the run once the cold chain reaches `at`
struct AbortAt {
    at: u64,
    control: Arc<RunControl>,
}

impl ChainListener for AbortAt {
    fn new_state(&mut self, view: &ChainView<'_>) {
        if view.state == self.at {
            self.control.abort();
        }
    }
}

// --- Tests ---

#[test]
fn test_two_chain_run_reports_cold_samples() {
    let problem = toy_problem();
    let (mut mc3, samples) = build_mc3(&problem, 2);

    let hot_states = Arc::new(AtomicU64::new(0));
    let seen = Arc::new(AtomicU64::new(0));
    mc3.chain_mut(0).unwrap().add_listener(Box::new(HeatProbe {
        hot_states: hot_states.clone(),
        seen: seen.clone(),
    }));

    let heats = ChainHeats::exponential(2, 0.3).unwrap();
    let summary = mc3.run(1000, 50, heats).unwrap();

    assert!(!summary.aborted);
    assert_eq!(summary.states, 1000);
    assert_eq!(summary.cycles, 20);
    assert_eq!(samples.lock().unwrap().len(), 1000 / 10);

    // Listeners always travel with heat 1
    assert_eq!(seen.load(Ordering::SeqCst), 1000);
    assert_eq!(hot_states.load(Ordering::SeqCst), 0);
    let cold_slots = summary.chains.iter().filter(|c| c.heat == 1.0).count();
    assert_eq!(cold_slots, 1);
    assert_eq!(mc3.cold_chain().listener_count(), 2);
    assert_eq!(mc3.chain(1).unwrap().listener_count(), 0);
}

#[test]
fn test_abort_mid_run_terminates_cleanly() {
    let problem = toy_problem();
    let (mut mc3, samples) = build_mc3(&problem, 2);
    let control = mc3.control();
    mc3.chain_mut(0).unwrap().add_listener(Box::new(AbortAt { at: 500, control }));

    let summary = mc3
        .run(1000, 50, ChainHeats::exponential(2, 0.3).unwrap())
        .unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.states, 500);
    assert_eq!(summary.cycles, 10);
    assert_eq!(samples.lock().unwrap().len(), 50);
}

#[test]
fn test_pause_and_resume_from_another_thread() {
    let problem = toy_problem();
    let (mc3, _samples) = build_mc3(&problem, 2);
    let telemetry = TelemetryBlackboard::new();
    let mut mc3 = mc3.with_telemetry(telemetry.clone());
    let control = mc3.control();
    control.pause(true);

    let worker = thread::spawn(move || mc3.run(200, 50, ChainHeats::exponential(2, 0.2).unwrap()));

    let deadline = Instant::now() + Duration::from_secs(30);
    while telemetry.states() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(100));
    // Blocked at the first barrier
    assert_eq!(telemetry.states(), 50);
    assert!(control.is_paused());

    control.pause(false);
    let summary = worker.join().unwrap().unwrap();
    assert_eq!(summary.states, 200);
    assert!(!summary.aborted);
}

#[test]
fn test_adaptive_run_keeps_lambda_in_bounds() {
    let problem = toy_problem();
    let (mut mc3, _samples) = build_mc3(&problem, 4);
    let heats = ChainHeats::exponential(4, 0.1).unwrap().adaptive();
    let summary = mc3.run(2000, 10, heats).unwrap();
    assert!(summary.lambda >= 1e-8 && summary.lambda <= 0.5);
    assert_eq!(summary.heats[0], 1.0);
    assert!(summary.exchanges_attempted >= 199);
}

#[test]
fn test_summary_serializes_to_json() {
    let problem = toy_problem();
    let (mut mc3, _samples) = build_mc3(&problem, 2);
    let summary = mc3
        .run(100, 50, ChainHeats::exponential(2, 0.1).unwrap())
        .unwrap();

    let file = NamedTempFile::new().unwrap();
    serde_json::to_writer(file.as_file(), &summary).unwrap();
    let text = std::fs::read_to_string(file.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["states"], 100);
    assert_eq!(parsed["cycles"], 2);
    assert_eq!(parsed["chains"].as_array().unwrap().len(), 2);
    assert_eq!(parsed["aborted"], false);
}
