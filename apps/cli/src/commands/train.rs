//! Train command implementation.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use stylegrow_training::{reference, resolve_run_checkpoint, CancellationToken, TrainingLoop, TrainingOutcome};

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Path to the training configuration (TOML)
    pub config: PathBuf,

    /// Override the results directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Override the training length in thousands of images
    #[arg(long)]
    pub total_kimg: Option<f64>,

    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Resume from a checkpoint: a file, a run directory, a run id, or "latest"
    #[arg(long)]
    pub resume: Option<String>,

    /// kimg already shown by the resumed checkpoint
    #[arg(long, requires = "resume")]
    pub resume_kimg: Option<f64>,

    /// Output the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: TrainArgs) -> Result<()> {
    let mut config = super::load_config(Some(&args.config))?;

    if let Some(results_dir) = args.results_dir {
        config.results_dir = results_dir;
    }
    if let Some(total_kimg) = args.total_kimg {
        config.total_kimg = total_kimg;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(reference) = &args.resume {
        let pkl = resolve_run_checkpoint(&config.results_dir, reference)
            .with_context(|| format!("Failed to resolve resume target {reference:?}"))?;
        config.resume.pkl = Some(pkl);
    }
    if let Some(kimg) = args.resume_kimg {
        config.resume.kimg = kimg;
    }
    config.validate().context("Invalid configuration after overrides")?;

    if !args.json {
        println!("{}", "Stylegrow Training".bold().cyan());
        println!("  Run:       {}", config.run_desc);
        println!("  Results:   {}", config.results_dir.display());
        println!("  Total:     {} kimg", config.total_kimg);
        if let Some(pkl) = &config.resume.pkl {
            println!("  Resume:    {} ({} kimg)", pkl.display(), config.resume.kimg);
        }
        println!();
    }

    let collab = reference::default_collaborators(&config).context("Failed to set up training backend")?;
    let mut job = TrainingLoop::new(config, collab);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || job.run(&token));

    let joined = tokio::select! {
        res = &mut handle => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, stopping after the current iteration");
            cancel.cancel();
            handle.await
        }
    };
    let outcome = joined.context("Training task panicked")?.context("Training failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn outcome_json(outcome: &TrainingOutcome) -> serde_json::Value {
    json!({
        "run_id": outcome.run_id,
        "run_dir": outcome.run_dir,
        "cur_nimg": outcome.state.cur_nimg,
        "cur_tick": outcome.state.cur_tick,
        "cancelled": outcome.cancelled,
        "final_checkpoint": outcome.final_checkpoint,
        "manifest": outcome.manifest_path,
    })
}

fn print_outcome(outcome: &TrainingOutcome) {
    if outcome.cancelled {
        println!("{}", "Training cancelled".yellow().bold());
    } else {
        println!("{}", "Training complete".green().bold());
    }
    println!("  Run dir:    {}", outcome.run_dir.display());
    println!("  kimg:       {:.1}", outcome.state.cur_nimg as f64 / 1000.0);
    println!("  Checkpoint: {}", outcome.final_checkpoint.display());
    println!("  Manifest:   {}", outcome.manifest_path.display().to_string().dimmed());
}
