//! Cycle schedulers: fixed-period standalone loop and the served loop.
//!
//! Both pace the same fixed-period cycle: measure, run one cycle, sleep the
//! non-negative remainder of the nominal interval. An overrun cycle is
//! followed immediately by the next one — there is no catch-up burst, the
//! overrun is just counted and (rate-limited) logged.
//!
//! The served loop additionally drains the inbound command channel *between*
//! cycles — command application is atomic with respect to `run_cycle`
//! because both happen on this one thread — and pushes one value-output
//! snapshot per cycle to the telemetry channel with `try_send`: a full
//! channel drops the snapshot rather than delaying the next cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{info, warn};

use crate::command::{Command, CommandError, CommandReply};
use crate::runtime::Runtime;
use crate::telemetry::OutputSnapshot;

/// Overruns 1..=N are logged individually, then every Nth.
const OVERRUN_LOG_HEAD: u64 = 10;
const OVERRUN_LOG_INTERVAL: u64 = 1000;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics, updated without allocation.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycles: u64,
    pub overruns: u64,
    pub last: Duration,
    pub max: Duration,
    pub total: Duration,
    /// Telemetry snapshots dropped under backpressure (served mode).
    pub dropped_snapshots: u64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, elapsed: Duration, interval: Duration) {
        self.cycles += 1;
        self.last = elapsed;
        self.total += elapsed;
        if elapsed > self.max {
            self.max = elapsed;
        }
        if elapsed > interval {
            self.overruns += 1;
            if self.overruns <= OVERRUN_LOG_HEAD || self.overruns % OVERRUN_LOG_INTERVAL == 0 {
                warn!(
                    "cycle overrun #{}: {:?} > {:?} budget",
                    self.overruns, elapsed, interval
                );
            }
        }
    }

    pub fn avg(&self) -> Duration {
        if self.cycles == 0 {
            Duration::ZERO
        } else {
            self.total / self.cycles as u32
        }
    }
}

// ─── Standalone Loop ────────────────────────────────────────────────

/// Blocking fixed-period loop. Returns when `running` clears.
pub fn run_standalone(rt: &mut Runtime, running: &AtomicBool) -> CycleStats {
    let interval = rt.clock().interval();
    let mut stats = CycleStats::new();
    info!("standalone loop started (interval {interval:?})");

    while running.load(Ordering::SeqCst) {
        let start = Instant::now();
        rt.single_cycle();
        let elapsed = start.elapsed();
        stats.record(elapsed, interval);
        if let Some(remaining) = interval.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }

    info!(
        "standalone loop stopped after {} cycles ({} overruns)",
        stats.cycles, stats.overruns
    );
    stats
}

// ─── Served Loop ────────────────────────────────────────────────────

/// A command plus an optional reply slot for the issuing client.
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: Option<Sender<Result<CommandReply, CommandError>>>,
}

impl CommandEnvelope {
    pub fn fire_and_forget(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }
}

/// Fixed-period loop interleaved with command handling and telemetry.
///
/// Runs until `running` clears or the command channel disconnects.
pub fn run_served(
    rt: &mut Runtime,
    commands: &Receiver<CommandEnvelope>,
    telemetry: &Sender<OutputSnapshot>,
    running: &AtomicBool,
) -> CycleStats {
    let interval = rt.clock().interval();
    let mut stats = CycleStats::new();
    info!("served loop started (interval {interval:?})");

    while running.load(Ordering::SeqCst) {
        let start = Instant::now();

        // Commands apply only between cycles, never mid-cycle.
        while let Ok(envelope) = commands.try_recv() {
            let result = rt.apply(envelope.command);
            match envelope.reply {
                Some(reply) => {
                    let _ = reply.try_send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!("dropped command rejected: {e}");
                    }
                }
            }
        }

        rt.single_cycle();

        // Best-effort telemetry: drop under backpressure, never block.
        match telemetry.try_send(rt.snapshot()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => stats.dropped_snapshots += 1,
            Err(TrySendError::Disconnected(_)) => {}
        }

        let elapsed = start.elapsed();
        stats.record(elapsed, interval);
        if let Some(remaining) = interval.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }

    info!(
        "served loop stopped after {} cycles ({} overruns, {} snapshots dropped)",
        stats.cycles, stats.overruns, stats.dropped_snapshots
    );
    stats
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("RT setup failed: {0}")]
pub struct RtSetupError(String);

/// Lock all current and future memory pages.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RtSetupError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtSetupError(format!("mlockall: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RtSetupError> {
    Ok(())
}

/// Pin the current thread to one CPU core.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RtSetupError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RtSetupError(format!("CpuSet::set({cpu}): {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RtSetupError(format!("sched_setaffinity: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RtSetupError> {
    Ok(())
}

/// Switch to SCHED_FIFO at the given priority.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RtSetupError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtSetupError(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}): {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RtSetupError> {
    Ok(())
}

/// Full real-time setup for the cycle thread: lock memory, pin the CPU, set
/// the FIFO scheduler. Call before entering a scheduler loop. All no-ops
/// without the `rt` feature.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), RtSetupError> {
    rt_mlockall()?;
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_max_and_overruns() {
        let mut stats = CycleStats::new();
        let interval = Duration::from_millis(10);
        stats.record(Duration::from_millis(4), interval);
        stats.record(Duration::from_millis(12), interval);
        stats.record(Duration::from_millis(6), interval);

        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max, Duration::from_millis(12));
        assert_eq!(stats.last, Duration::from_millis(6));
    }

    #[test]
    fn stats_avg_handles_zero_cycles() {
        let stats = CycleStats::new();
        assert_eq!(stats.avg(), Duration::ZERO);
    }

    #[test]
    fn rt_setup_without_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        assert!(rt_setup(0, 80).is_ok());
    }
}
