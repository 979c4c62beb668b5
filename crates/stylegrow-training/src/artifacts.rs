use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    NetworkSnapshot,
    NetworkFinal,
    ImageGrid,
    Summaries,
    MetricLog,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Last observed training figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    pub g_loss: Option<f64>,
    pub d_loss: Option<f64>,
    #[serde(default)]
    pub metrics: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub run_id: u32,
    pub run_desc: String,
    pub created_at: DateTime<Utc>,
    pub dataset_id: DatasetId,
    pub total_kimg: f64,
    /// Progress reached when training stopped.
    pub final_kimg: f64,
    /// Whether training stopped before `total_kimg`.
    pub cancelled: bool,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &TrainingArtifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<TrainingArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, path, sha256: hash })
}

/// Record of artifacts written during a run, in write order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLog {
    entries: Vec<(ArtifactKind, PathBuf)>,
}

impl ArtifactLog {
    pub fn push(&mut self, kind: ArtifactKind, path: PathBuf) {
        if !self.entries.iter().any(|(_, p)| *p == path) {
            self.entries.push((kind, path));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash every recorded file that still exists.
    pub fn finish(&self) -> TrainingResult<Vec<TrainingArtifact>> {
        self.entries
            .iter()
            .filter(|(_, path)| path.exists())
            .map(|(kind, path)| make_artifact(*kind, path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_make_artifact_hashes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, b"abc").unwrap();
        let artifact = make_artifact(ArtifactKind::Config, path).unwrap();
        assert_eq!(artifact.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(make_artifact(ArtifactKind::Config, temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_artifact_log_dedups_and_skips_missing() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("summaries.jsonl");
        std::fs::write(&a, b"{}\n").unwrap();
        let mut log = ArtifactLog::default();
        log.push(ArtifactKind::Summaries, a.clone());
        log.push(ArtifactKind::Summaries, a);
        log.push(ArtifactKind::ImageGrid, temp.path().join("never-written.png"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.finish().unwrap().len(), 1);
    }
}
