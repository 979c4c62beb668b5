use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

/// Filesystem layout of one training run.
///
/// Runs live under `{results_dir}/{run_id:05}-{run_desc}` with ids allocated
/// one past the highest existing id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    run_id: u32,
    run_dir: PathBuf,
}

/// Parse the numeric prefix of a run directory name (`"00012-ffhq"` -> 12).
#[must_use]
pub fn parse_run_id(dir_name: &str) -> Option<u32> {
    let digits: String = dir_name.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    match dir_name[digits.len()..].chars().next() {
        None | Some('-') => digits.parse().ok(),
        Some(_) => None,
    }
}

impl RunLayout {
    /// Allocate and create the next run directory under `results_dir`.
    pub fn create(results_dir: &Path, run_desc: &str) -> TrainingResult<Self> {
        if run_desc.contains(['/', '\\']) {
            return Err(TrainingError::InvalidConfig(format!("run_desc must not contain path separators: {run_desc:?}")));
        }
        std::fs::create_dir_all(results_dir)?;
        let mut next_id = 0;
        for entry in std::fs::read_dir(results_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = parse_run_id(&entry.file_name().to_string_lossy()) {
                next_id = next_id.max(id + 1);
            }
        }
        let run_dir = results_dir.join(format!("{next_id:05}-{run_desc}"));
        std::fs::create_dir(&run_dir)?;
        Ok(Self { run_id: next_id, run_dir })
    }

    /// Layout of an existing run directory.
    pub fn open(run_dir: &Path) -> TrainingResult<Self> {
        let run_id = run_dir
            .file_name()
            .and_then(|n| parse_run_id(&n.to_string_lossy()))
            .ok_or_else(|| TrainingError::Artifact(format!("not a run directory: {}", run_dir.display())))?;
        Ok(Self { run_id, run_dir: run_dir.to_path_buf() })
    }

    #[must_use]
    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.run_dir.join("config.toml")
    }

    #[must_use]
    pub fn reals_path(&self) -> PathBuf {
        self.run_dir.join("reals.png")
    }

    #[must_use]
    pub fn fakes_init_path(&self) -> PathBuf {
        self.run_dir.join("fakes_init.png")
    }

    #[must_use]
    pub fn fakes_path(&self, cur_nimg: u64) -> PathBuf {
        self.run_dir.join(format!("fakes{:06}.png", cur_nimg / 1000))
    }

    #[must_use]
    pub fn network_snapshot_path(&self, cur_nimg: u64) -> PathBuf {
        self.run_dir.join(format!("network-snapshot-{:06}.pkl", cur_nimg / 1000))
    }

    #[must_use]
    pub fn network_final_path(&self) -> PathBuf {
        self.run_dir.join("network-final.pkl")
    }

    #[must_use]
    pub fn summaries_path(&self) -> PathBuf {
        self.run_dir.join("summaries.jsonl")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join("training_manifest.json")
    }
}
