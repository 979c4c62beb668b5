//! Tick bookkeeping: wall clock, device memory and the per-tick progress report.

use crate::error::{TrainingError, TrainingResult};
use crate::summary::{format_time, SummaryLog};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Source of peak device memory figures.
pub trait DeviceMonitor: Send {
    /// Peak memory in bytes since the last call. Backends without a device return `Unsupported`.
    fn peak_memory_bytes(&mut self) -> TrainingResult<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeviceMonitor;

impl DeviceMonitor for NoDeviceMonitor {
    fn peak_memory_bytes(&mut self) -> TrainingResult<u64> {
        Err(TrainingError::Unsupported("no device memory statistics".to_string()))
    }
}

/// Peak memory in GiB; an unsupported monitor reads as 0.
pub fn peak_memory_gb(monitor: &mut dyn DeviceMonitor) -> TrainingResult<f64> {
    match monitor.peak_memory_bytes() {
        Ok(bytes) => Ok(bytes as f64 / f64::from(1u32 << 30)),
        Err(TrainingError::Unsupported(_)) => Ok(0.0),
        Err(e) => Err(e),
    }
}

/// Wall clock for a run, tracking the interval between consecutive updates.
#[derive(Debug, Clone)]
pub struct RunClock {
    start: Instant,
    last_update: Instant,
    last_interval: f64,
    resume_secs: f64,
}

impl RunClock {
    #[must_use]
    pub fn start(resume_secs: f64) -> Self {
        let now = Instant::now();
        Self { start: now, last_update: now, last_interval: 0.0, resume_secs }
    }

    /// Seconds since start, plus the time carried over from a resumed run.
    #[must_use]
    pub fn total_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64() + self.resume_secs
    }

    #[must_use]
    pub fn since_last_update(&self) -> f64 {
        self.last_update.elapsed().as_secs_f64()
    }

    /// Mark the end of a tick. Returns the length of the interval that just closed.
    pub fn update(&mut self) -> f64 {
        let now = Instant::now();
        self.last_interval = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.last_interval
    }
}

/// Whether tick maintenance should run now.
#[must_use]
pub fn tick_due(cur_tick: i64, cur_nimg: u64, tick_start_nimg: u64, tick_kimg: f64, done: bool) -> bool {
    cur_tick < 0 || done || cur_nimg as f64 >= tick_start_nimg as f64 + tick_kimg * 1000.0
}

/// One progress line worth of figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub kimg: f64,
    pub lod: f64,
    pub minibatch: usize,
    pub total_secs: f64,
    pub sec_per_tick: f64,
    pub sec_per_kimg: f64,
    pub maintenance_secs: f64,
    pub gpu_mem_gb: f64,
}

impl TickReport {
    /// `sec_per_kimg` is 0 for a tick that processed no images.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        tick: u64,
        cur_nimg: u64,
        tick_nimg: u64,
        lod: f64,
        minibatch: usize,
        total_secs: f64,
        tick_secs: f64,
        maintenance_secs: f64,
        gpu_mem_gb: f64,
    ) -> Self {
        let tick_kimg = tick_nimg as f64 / 1000.0;
        Self {
            tick,
            kimg: cur_nimg as f64 / 1000.0,
            lod,
            minibatch,
            total_secs,
            sec_per_tick: tick_secs,
            sec_per_kimg: if tick_kimg > 0.0 { tick_secs / tick_kimg } else { 0.0 },
            maintenance_secs,
            gpu_mem_gb,
        }
    }

    pub fn record(&self, summary: &mut SummaryLog) {
        summary.record("Progress/tick", self.tick as f64);
        summary.record("Progress/kimg", self.kimg);
        summary.record("Progress/lod", self.lod);
        summary.record("Progress/minibatch", self.minibatch as f64);
        summary.record("Timing/total_sec", self.total_secs);
        summary.record("Timing/sec_per_tick", self.sec_per_tick);
        summary.record("Timing/sec_per_kimg", self.sec_per_kimg);
        summary.record("Timing/maintenance_sec", self.maintenance_secs);
        summary.record("Resources/peak_gpu_mem_gb", self.gpu_mem_gb);
        summary.record("Timing/total_hours", self.total_secs / 3600.0);
        summary.record("Timing/total_days", self.total_secs / 86_400.0);
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {:<5} kimg {:<8.1} lod {:<5.2} minibatch {:<4} time {:<12} sec/tick {:<7.1} sec/kimg {:<7.2} maintenance {:<6.1} gpumem {:.1}",
            self.tick,
            self.kimg,
            self.lod,
            self.minibatch,
            format_time(self.total_secs),
            self.sec_per_tick,
            self.sec_per_kimg,
            self.maintenance_secs,
            self.gpu_mem_gb
        )
    }
}
