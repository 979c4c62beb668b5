use crate::artifacts::TrainingManifest;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{parse_run_id, RunLayout};
use std::path::{Path, PathBuf};

/// A run directory found under a results directory.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub layout: RunLayout,
    /// Present once the run has finished (normally or by cancellation).
    pub manifest: Option<TrainingManifest>,
    /// Most recent network checkpoint in the directory, if any.
    pub latest_checkpoint: Option<PathBuf>,
}

/// Discover runs by scanning `results_dir/*-*`, sorted by run id.
pub fn discover_runs(results_dir: &Path) -> TrainingResult<Vec<RunEntry>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(results_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let run_dir = entry.path();
        if !run_dir.is_dir() || parse_run_id(&entry.file_name().to_string_lossy()).is_none() {
            continue;
        }
        let layout = RunLayout::open(&run_dir)?;
        let manifest_path = layout.manifest_path();
        let manifest = if manifest_path.exists() {
            match TrainingManifest::load(&manifest_path) {
                Ok(m) => Some(m),
                Err(e) => {
                    tracing::warn!("skipping unreadable manifest {}: {e}", manifest_path.display());
                    None
                }
            }
        } else {
            None
        };
        let latest_checkpoint = latest_checkpoint(&run_dir)?;
        out.push(RunEntry { layout, manifest, latest_checkpoint });
    }

    out.sort_by_key(|e| e.layout.run_id());
    Ok(out)
}

/// `network-final.pkl` if present, otherwise the snapshot with the highest kimg.
pub fn latest_checkpoint(run_dir: &Path) -> TrainingResult<Option<PathBuf>> {
    let final_path = run_dir.join("network-final.pkl");
    if final_path.exists() {
        return Ok(Some(final_path));
    }
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(run_dir)? {
        let path = entry?.path();
        let Some(kimg) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("network-snapshot-"))
            .and_then(|n| n.strip_suffix(".pkl"))
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        if best.as_ref().map_or(true, |(k, _)| kimg > *k) {
            best = Some((kimg, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

/// Resolve a run reference (`"latest"`, a run id, or a directory path) into a checkpoint path.
pub fn resolve_run_checkpoint(results_dir: &Path, reference: &str) -> TrainingResult<PathBuf> {
    let path = Path::new(reference);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        return latest_checkpoint(path)?
            .ok_or_else(|| TrainingError::MissingCheckpoint(path.join("network-final.pkl")));
    }

    let runs = discover_runs(results_dir)?;
    let entry = if reference == "latest" {
        runs.iter().rev().find(|r| r.latest_checkpoint.is_some())
    } else {
        let id: u32 = reference
            .parse()
            .map_err(|_| TrainingError::InvalidConfig(format!("invalid run reference: {reference}")))?;
        runs.iter().find(|r| r.layout.run_id() == id)
    };
    entry
        .and_then(|r| r.latest_checkpoint.clone())
        .ok_or_else(|| TrainingError::MissingCheckpoint(results_dir.join(reference)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_runs_sorted_with_checkpoints() {
        let temp = TempDir::new().unwrap();
        let a = RunLayout::create(temp.path(), "a").unwrap();
        let b = RunLayout::create(temp.path(), "b").unwrap();
        std::fs::create_dir(temp.path().join("not-a-run")).unwrap();
        std::fs::write(a.network_snapshot_path(4_000), b"{}").unwrap();
        std::fs::write(a.network_snapshot_path(12_000), b"{}").unwrap();

        let runs = discover_runs(temp.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].layout.run_id(), 0);
        assert_eq!(runs[0].latest_checkpoint.as_deref(), Some(a.network_snapshot_path(12_000).as_path()));
        assert!(runs[1].latest_checkpoint.is_none());
        assert!(runs[1].manifest.is_none());

        std::fs::write(b.network_final_path(), b"{}").unwrap();
        assert_eq!(resolve_run_checkpoint(temp.path(), "latest").unwrap(), b.network_final_path());
        assert_eq!(resolve_run_checkpoint(temp.path(), "0").unwrap(), a.network_snapshot_path(12_000));
        assert!(resolve_run_checkpoint(temp.path(), "9").is_err());
    }

    #[test]
    fn test_discover_missing_results_dir() {
        let temp = TempDir::new().unwrap();
        assert!(discover_runs(&temp.path().join("nothing")).unwrap().is_empty());
    }
}
