//! Validate command implementation.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub fn execute(path: &Path) -> Result<()> {
    let config = super::load_config(Some(path))?;

    println!("{} {}", "✓".green(), format!("{} is valid", path.display()).bold());
    println!("  Run:       {}", config.run_desc);
    println!("  Dataset:   {}", config.dataset.kind);
    println!("  Loss:      {}", config.loss.func_name);
    println!("  Total:     {} kimg", config.total_kimg);
    println!("  Replicas:  {}", config.num_replicas);
    if !config.metrics.is_empty() {
        let names: Vec<&str> = config.metrics.iter().map(|m| m.name.as_str()).collect();
        println!("  Metrics:   {}", names.join(", "));
    }
    Ok(())
}
