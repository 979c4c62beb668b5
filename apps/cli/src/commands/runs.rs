//! Runs command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use stylegrow_training::discover_runs;

pub fn execute(results_dir: &Path, json_output: bool) -> Result<()> {
    let runs = discover_runs(results_dir)
        .with_context(|| format!("Failed to scan results directory {}", results_dir.display()))?;

    if json_output {
        let items: Vec<_> = runs
            .iter()
            .map(|run| {
                json!({
                    "run_id": run.layout.run_id(),
                    "run_dir": run.layout.run_dir(),
                    "finished": run.manifest.is_some(),
                    "cancelled": run.manifest.as_ref().map(|m| m.cancelled),
                    "final_kimg": run.manifest.as_ref().map(|m| m.final_kimg),
                    "latest_checkpoint": run.latest_checkpoint,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", format!("No runs found in {}", results_dir.display()).yellow());
        return Ok(());
    }

    println!("{}", format!("Runs in {}", results_dir.display()).bold().cyan());
    for run in &runs {
        let name = run.layout.run_dir().file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let status = match &run.manifest {
            Some(m) if m.cancelled => format!("cancelled at {:.1} kimg", m.final_kimg).yellow(),
            Some(m) => format!("finished at {:.1} kimg", m.final_kimg).green(),
            None => "in progress".dimmed(),
        };
        println!("  {name:<32} {status}");
        if let Some(ckpt) = &run.latest_checkpoint {
            println!("    {}", ckpt.display().to_string().dimmed());
        }
    }
    Ok(())
}
