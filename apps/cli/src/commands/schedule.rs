//! Schedule command implementation.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use stylegrow_training::{evaluate, kimg_to_nimg, TrainingSchedule};

const DEFAULT_RESOLUTION: u32 = 1024;
const DEFAULT_POINTS: usize = 9;

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Configuration to read the schedule from (defaults when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Dataset resolution in pixels (defaults to the configured dataset resolution)
    #[arg(long)]
    pub resolution: Option<u32>,

    /// kimg values to evaluate (defaults to evenly spaced points up to total_kimg)
    #[arg(long, num_args = 1..)]
    pub kimg: Vec<f64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &ScheduleArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let resolution = args.resolution.or(config.dataset.resolution).unwrap_or(DEFAULT_RESOLUTION);
    if !resolution.is_power_of_two() || resolution < 4 {
        bail!("resolution must be a power of two >= 4, got {resolution}");
    }
    let resolution_log2 = resolution.trailing_zeros();

    let points = if args.kimg.is_empty() {
        (0..DEFAULT_POINTS).map(|i| config.total_kimg * i as f64 / (DEFAULT_POINTS - 1) as f64).collect()
    } else {
        args.kimg.clone()
    };
    if let Some(bad) = points.iter().find(|k| !k.is_finite() || **k < 0.0) {
        bail!("kimg values must be >= 0, got {bad}");
    }

    let rows: Vec<TrainingSchedule> =
        points.iter().map(|kimg| evaluate(kimg_to_nimg(*kimg), resolution_log2, &config.schedule)).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", format!("Schedule for {resolution}x{resolution}").bold().cyan());
    println!(
        "{}",
        format!(
            "{:>10} {:>8} {:>6} {:>6} {:>6} {:>10} {:>10} {:>8}",
            "kimg", "lod", "res", "mb", "mb/gpu", "G lrate", "D lrate", "tick"
        )
        .dimmed()
    );
    for row in &rows {
        println!(
            "{:>10.1} {:>8.2} {:>6} {:>6} {:>6} {:>10.6} {:>10.6} {:>8.1}",
            row.kimg,
            row.lod,
            row.resolution,
            row.minibatch_size,
            row.minibatch_gpu,
            row.g_lrate,
            row.d_lrate,
            row.tick_kimg
        );
    }
    Ok(())
}
