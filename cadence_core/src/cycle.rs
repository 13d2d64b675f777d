//! Worker-thread timing: statistics, RT setup and cycle pacing.
//!
//! ## RT setup sequence (per worker, `rt` feature)
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to the configured CPU.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`: RT priority.
//!
//! Without the `rt` feature every step is a no-op and pacing uses
//! `std::thread::sleep`.

use std::time::Duration;

use crate::error::SchedulerError;

// ─── Cycle statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
///
/// Updated every cycle with no allocation. Provides min/max/avg/stddev
/// for cycle latency monitoring and overrun detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Running sum of squares for stddev computation.
    pub sum_sq_cycle_ns: i128,
    /// Cycles that ran longer than the thread period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (time between expected and actual wake).
    pub max_latency_ns: i64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            sum_sq_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        if duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        if duration_ns > self.max_cycle_ns {
            self.max_cycle_ns = duration_ns;
        }
        self.sum_cycle_ns += duration_ns;
        self.sum_sq_cycle_ns += (duration_ns as i128) * (duration_ns as i128);
        if latency_ns > self.max_latency_ns {
            self.max_latency_ns = latency_ns;
        }
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }

    /// Population standard deviation [ns] (0 if fewer than two cycles).
    pub fn stddev_cycle_ns(&self) -> f64 {
        if self.cycle_count < 2 {
            return 0.0;
        }
        let n = self.cycle_count as f64;
        let mean = self.sum_cycle_ns as f64 / n;
        let var = self.sum_sq_cycle_ns as f64 / n - mean * mean;
        var.max(0.0).sqrt()
    }

    /// Minimum cycle time, 0 when nothing ran.
    pub fn min_or_zero(&self) -> i64 {
        if self.cycle_count == 0 { 0 } else { self.min_cycle_ns }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), SchedulerError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| SchedulerError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), SchedulerError> {
    Ok(())
}

/// Prefault stack pages so the first cycles do not page-fault.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Pin the current thread to `cpu`.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), SchedulerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| SchedulerError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| SchedulerError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), SchedulerError> {
    Ok(())
}

/// SCHED_FIFO with the given priority for the current thread.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), SchedulerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param; pid 0 targets the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(SchedulerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), SchedulerError> {
    Ok(())
}

/// RT setup for the calling worker thread. Steps whose setting is `None`
/// are skipped; memory locking and prefaulting always run.
pub fn rt_setup(cpu: Option<usize>, priority: Option<i32>) -> Result<(), SchedulerError> {
    rt_mlockall()?;
    prefault_stack();
    if let Some(cpu) = cpu {
        rt_set_affinity(cpu)?;
    }
    if let Some(priority) = priority {
        rt_set_scheduler(priority)?;
    }
    Ok(())
}

// ─── Pacing ─────────────────────────────────────────────────────────

/// Absolute-deadline pacing for a periodic worker.
///
/// With the `rt` feature this sleeps on `CLOCK_MONOTONIC` with
/// `TIMER_ABSTIME`; otherwise it sleeps for the remaining time. A deadline
/// that is already past is re-based on the current time instead of
/// bursting to catch up.
pub struct Pacer {
    period: Duration,
    next_wake: std::time::Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_wake: std::time::Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next deadline. Returns the wake-up latency [ns]
    /// (0 when the deadline had already passed).
    pub fn wait(&mut self) -> i64 {
        let now = std::time::Instant::now();
        if now >= self.next_wake {
            self.next_wake = now + self.period;
            return 0;
        }
        sleep_until(self.next_wake);
        let woke = std::time::Instant::now();
        let latency = woke.saturating_duration_since(self.next_wake).as_nanos() as i64;
        self.next_wake += self.period;
        latency
    }
}

#[cfg(feature = "rt")]
fn sleep_until(deadline: std::time::Instant) {
    use nix::sys::time::TimeSpec;
    use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

    let clock = ClockId::CLOCK_MONOTONIC;
    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
    let Ok(now) = clock_gettime(clock) else {
        std::thread::sleep(remaining);
        return;
    };
    let target = now + TimeSpec::from_duration(remaining);
    let slept = retry_interrupted(|| {
        clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &target).map(|_| ())
    });
    if let Err(e) = slept {
        tracing::debug!("clock_nanosleep failed ({e}), falling back to thread::sleep");
        std::thread::sleep(deadline.saturating_duration_since(std::time::Instant::now()));
    }
}

/// Repeat `sleep` while a signal interrupts it. An absolute deadline makes
/// the retry resume the same wait.
#[cfg(any(feature = "rt", test))]
fn retry_interrupted(mut sleep: impl FnMut() -> nix::Result<()>) -> nix::Result<()> {
    loop {
        match sleep() {
            Err(nix::errno::Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(not(feature = "rt"))]
fn sleep_until(deadline: std::time::Instant) {
    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
    if !remaining.is_zero() {
        std::thread::sleep(remaining);
    }
}
