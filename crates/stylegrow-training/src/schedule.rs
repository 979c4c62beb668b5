//! Time-varying training parameters.
//!
//! [`evaluate`] is a pure function of the number of images shown so far. The
//! driver calls it once per outer iteration and never mutates the result.

use crate::config::ScheduleConfig;
use serde::Serialize;

/// Snapshot of the schedule at a given point in training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainingSchedule {
    /// Thousands of images shown.
    pub kimg: f64,
    /// Continuous level-of-detail, always `>= 0`.
    pub lod: f64,
    /// Working image resolution, `2^(resolution_log2 - floor(lod))`.
    pub resolution: u32,
    /// Global minibatch size.
    pub minibatch_size: usize,
    /// Per-replica minibatch size.
    pub minibatch_gpu: usize,
    pub g_lrate: f64,
    pub d_lrate: f64,
    /// Interval, in kimg, between maintenance ticks.
    pub tick_kimg: f64,
}

impl TrainingSchedule {
    /// Integer LOD band `(floor(lod), ceil(lod))`.
    ///
    /// The optimizer state is reset whenever this changes between outer iterations.
    #[must_use]
    pub fn lod_band(&self) -> (i64, i64) {
        lod_band(self.lod)
    }
}

/// Image count for a kimg figure, rounded to the nearest image.
#[must_use]
pub fn kimg_to_nimg(kimg: f64) -> u64 {
    (kimg * 1000.0).round() as u64
}

#[must_use]
pub fn lod_band(lod: f64) -> (i64, i64) {
    (lod.floor() as i64, lod.ceil() as i64)
}

/// Evaluate the schedule at `cur_nimg` images for a dataset of `2^resolution_log2` pixels.
#[must_use]
pub fn evaluate(cur_nimg: u64, resolution_log2: u32, config: &ScheduleConfig) -> TrainingSchedule {
    let kimg = cur_nimg as f64 / 1000.0;

    // Training phase.
    let phase_dur = config.lod_training_kimg + config.lod_transition_kimg;
    let phase_idx = if phase_dur > 0.0 { (kimg / phase_dur).floor() } else { 0.0 };
    let phase_kimg = kimg - phase_idx * phase_dur;

    // Level-of-detail and resolution.
    let lod = match config.lod_initial_resolution {
        None => 0.0,
        Some(initial) => {
            let mut lod = f64::from(resolution_log2);
            lod -= f64::from(initial).log2().floor();
            lod -= phase_idx;
            if config.lod_transition_kimg > 0.0 {
                lod -= (phase_kimg - config.lod_training_kimg).max(0.0) / config.lod_transition_kimg;
            }
            lod.max(0.0)
        }
    };
    let shift = (lod.floor() as u32).min(resolution_log2);
    let resolution = 1u32 << (resolution_log2 - shift);

    let minibatch_size = config.minibatch_size_dict.lookup(resolution, config.minibatch_size_base);
    let minibatch_gpu = config.minibatch_gpu_dict.lookup(resolution, config.minibatch_gpu_base);

    let mut g_lrate = config.g_lrate_dict.lookup(resolution, config.g_lrate_base);
    let mut d_lrate = config.d_lrate_dict.lookup(resolution, config.d_lrate_base);
    if config.lrate_rampup_kimg > 0.0 {
        let rampup = (kimg / config.lrate_rampup_kimg).min(1.0);
        g_lrate *= rampup;
        d_lrate *= rampup;
    }

    let tick_kimg = config.tick_kimg_dict.lookup(resolution, config.tick_kimg_base);

    TrainingSchedule { kimg, lod, resolution, minibatch_size, minibatch_gpu, g_lrate, d_lrate, tick_kimg }
}
