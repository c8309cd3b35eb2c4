//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for MC3 runs. The scheduler publishes
//! cycle, state and exchange counters into atomics after every barrier; a
//! background heartbeat thread reads them and prints progress.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    SimulatingData = 1,
    BuildingChains = 2,
    Sampling = 3,
    WritingOutput = 4,
    Complete = 5,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::SimulatingData => "Simulating Data",
            Stage::BuildingChains => "Building Chains",
            Stage::Sampling => "Sampling",
            Stage::WritingOutput => "Writing Output",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::SimulatingData,
            2 => Stage::BuildingChains,
            3 => Stage::Sampling,
            4 => Stage::WritingOutput,
            _ => Stage::Complete,
        }
    }
}

/// Progress counters with relaxed atomic updates.
///
/// Floats are stored as their bit patterns.
pub struct TelemetryBlackboard {
    stage: AtomicU64,

    current_cycle: AtomicU64,
    total_cycles: AtomicU64,
    states: AtomicU64,
    total_states: AtomicU64,

    exchanges_attempted: AtomicU64,
    exchanges_accepted: AtomicU64,
    cold_log_likelihood: AtomicU64,
    lambda: AtomicU64,

    start_time: Instant,
    last_progress_nanos: AtomicU64,

    shutdown: AtomicBool,
}

impl TelemetryBlackboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    /// Announce the size of the run
    pub fn set_totals(&self, cycles: u64, states: u64) {
        self.total_cycles.store(cycles, Ordering::Relaxed);
        self.total_states.store(states, Ordering::Relaxed);
    }

    /// Publish the state reached at a barrier
    pub fn record_cycle(&self, cycle: u64, states: u64, cold_log_likelihood: f64) {
        self.current_cycle.store(cycle, Ordering::Relaxed);
        self.states.store(states, Ordering::Relaxed);
        self.cold_log_likelihood
            .store(cold_log_likelihood.to_bits(), Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn record_exchange(&self, accepted: bool) {
        self.exchanges_attempted.fetch_add(1, Ordering::Relaxed);
        if accepted {
            self.exchanges_accepted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_lambda(&self, lambda: f64) {
        self.lambda.store(lambda.to_bits(), Ordering::Relaxed);
    }

    pub fn states(&self) -> u64 {
        self.states.load(Ordering::Relaxed)
    }

    pub fn exchanges(&self) -> (u64, u64) {
        (
            self.exchanges_attempted.load(Ordering::Relaxed),
            self.exchanges_accepted.load(Ordering::Relaxed),
        )
    }

    pub fn cold_log_likelihood(&self) -> f64 {
        f64::from_bits(self.cold_log_likelihood.load(Ordering::Relaxed))
    }

    #[inline]
    fn touch_progress(&self) {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        self.last_progress_nanos.store(elapsed, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        let (exchanges_attempted, exchanges_accepted) = self.exchanges();
        TelemetrySnapshot {
            stage: self.stage(),
            current_cycle: self.current_cycle.load(Ordering::Relaxed),
            total_cycles: self.total_cycles.load(Ordering::Relaxed),
            states: self.states(),
            total_states: self.total_states.load(Ordering::Relaxed),
            exchanges_attempted,
            exchanges_accepted,
            cold_log_likelihood: self.cold_log_likelihood(),
            lambda: f64::from_bits(self.lambda.load(Ordering::Relaxed)),
            elapsed_secs: self.elapsed_secs(),
            last_progress_nanos: self.last_progress_nanos.load(Ordering::Relaxed),
            current_nanos: self.start_time.elapsed().as_nanos() as u64,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Default for TelemetryBlackboard {
    fn default() -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            current_cycle: AtomicU64::new(0),
            total_cycles: AtomicU64::new(0),
            states: AtomicU64::new(0),
            total_states: AtomicU64::new(0),
            exchanges_attempted: AtomicU64::new(0),
            exchanges_accepted: AtomicU64::new(0),
            cold_log_likelihood: AtomicU64::new(f64::NAN.to_bits()),
            lambda: AtomicU64::new(f64::NAN.to_bits()),
            start_time: Instant::now(),
            last_progress_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}

struct TelemetrySnapshot {
    stage: Stage,
    current_cycle: u64,
    total_cycles: u64,
    states: u64,
    total_states: u64,
    exchanges_attempted: u64,
    exchanges_accepted: u64,
    cold_log_likelihood: f64,
    lambda: f64,
    elapsed_secs: f64,
    last_progress_nanos: u64,
    current_nanos: u64,
}

impl TelemetrySnapshot {
    fn exchange_rate(&self) -> f64 {
        if self.exchanges_attempted == 0 {
            0.0
        } else {
            self.exchanges_accepted as f64 / self.exchanges_attempted as f64
        }
    }
}

/// Heartbeat output configuration
pub struct HeartbeatConfig {
    /// Interval between heartbeats (seconds)
    pub interval_secs: u64,
    /// Stall warning threshold (seconds with no progress)
    pub stall_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stall_threshold_secs: 300,
        }
    }
}

/// Handle to the heartbeat thread
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    blackboard: Arc<TelemetryBlackboard>,
}

impl HeartbeatHandle {
    pub fn spawn(blackboard: Arc<TelemetryBlackboard>, config: HeartbeatConfig) -> Result<Self> {
        let bb = blackboard.clone();
        let is_tty = io::stderr().is_terminal();

        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                heartbeat_loop(bb, config, is_tty);
            })?;

        Ok(Self {
            handle: Some(handle),
            blackboard,
        })
    }

    /// Signal shutdown and wait for thread to finish
    pub fn shutdown(mut self) {
        self.blackboard.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.blackboard.signal_shutdown();
    }
}

/// RSS in MB (Linux only)
fn get_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| {
                let parts: Vec<&str> = s.split_whitespace().collect();
                parts.get(1)?.parse::<u64>().ok()
            })
            .map(|pages| pages * 4096 / (1024 * 1024))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

fn heartbeat_loop(bb: Arc<TelemetryBlackboard>, config: HeartbeatConfig, is_tty: bool) {
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let tick = Duration::from_millis(100);
    let mut last_states = 0u64;
    let mut last_time = Instant::now();

    loop {
        // Sleep in short ticks so shutdown is prompt
        let woke = Instant::now();
        while woke.elapsed() < interval && !bb.is_shutdown() {
            thread::sleep(tick);
        }
        if bb.is_shutdown() {
            break;
        }

        let snap = bb.snapshot();

        let now = Instant::now();
        let dt = now.duration_since(last_time).as_secs_f64();
        let velocity = if dt > 0.1 {
            snap.states.saturating_sub(last_states) as f64 / dt
        } else {
            0.0
        };
        last_states = snap.states;
        last_time = now;

        let eta_str = if velocity > 0.0 && snap.total_states > snap.states {
            format_duration((snap.total_states - snap.states) as f64 / velocity)
        } else {
            "unknown".to_string()
        };

        let stall_secs =
            (snap.current_nanos.saturating_sub(snap.last_progress_nanos)) / 1_000_000_000;
        let is_stalled = stall_secs > config.stall_threshold_secs;

        let rss_mb = get_rss_mb();

        if is_tty {
            print_tty_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        } else {
            print_log_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        }
    }

    if is_tty {
        eprint!("\r\x1b[K");
        let _ = io::stderr().flush();
    }
}

fn print_tty_progress(
    snap: &TelemetrySnapshot,
    eta: &str,
    rss_mb: Option<u64>,
    velocity: f64,
    is_stalled: bool,
) {
    let progress_pct = if snap.total_states > 0 {
        (snap.states as f64 / snap.total_states as f64 * 100.0).min(100.0)
    } else {
        0.0
    };

    let bar_width = 20;
    let filled = ((progress_pct / 100.0) * bar_width as f64) as usize;
    let bar: String = "=".repeat(filled.min(bar_width))
        + &" ".repeat(bar_width.saturating_sub(filled));

    let mem_str = rss_mb
        .map(|mb| format!(" {}MB", mb))
        .unwrap_or_default();
    let stall_str = if is_stalled { " [STALLED]" } else { "" };

    eprint!(
        "\r[{}] {:>5.1}% | {} C{}/{} | lnL {:.2} | swap {:.2} | {:.0} st/s | {} | ETA: {}{}{}    \x1b[K",
        bar,
        progress_pct,
        snap.stage.as_str(),
        snap.current_cycle,
        snap.total_cycles,
        snap.cold_log_likelihood,
        snap.exchange_rate(),
        velocity,
        format_duration(snap.elapsed_secs),
        eta,
        mem_str,
        stall_str
    );
    let _ = io::stderr().flush();
}

fn print_log_progress(
    snap: &TelemetrySnapshot,
    eta: &str,
    rss_mb: Option<u64>,
    velocity: f64,
    is_stalled: bool,
) {
    eprintln!(
        "[HEARTBEAT] stage=\"{}\" cycle={}/{} states={}/{} cold_lnl={:.4} lambda={:.4} \
         exchanges={}/{} velocity={:.0}/s elapsed={:.0}s eta={} rss_mb={} stalled={}",
        snap.stage.as_str(),
        snap.current_cycle,
        snap.total_cycles,
        snap.states,
        snap.total_states,
        snap.cold_log_likelihood,
        snap.lambda,
        snap.exchanges_accepted,
        snap.exchanges_attempted,
        velocity,
        snap.elapsed_secs,
        eta,
        rss_mb
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string()),
        is_stalled
    );
}
