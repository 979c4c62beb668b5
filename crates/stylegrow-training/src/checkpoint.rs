//! Persistence of the (G, D, Gs) network triple.

use crate::error::{TrainingError, TrainingResult};
use crate::network::{Network, NetworkSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything needed to resume training or to sample from Gs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub g: NetworkSnapshot,
    pub d: NetworkSnapshot,
    pub gs: NetworkSnapshot,
    /// Images shown when the checkpoint was written.
    #[serde(default)]
    pub cur_nimg: u64,
}

impl Checkpoint {
    #[must_use]
    pub fn capture(g: &dyn Network, d: &dyn Network, gs: &dyn Network, cur_nimg: u64) -> Self {
        Self { g: g.snapshot(), d: d.snapshot(), gs: gs.snapshot(), cur_nimg }
    }
}

pub trait CheckpointStore: Send {
    fn save(&self, checkpoint: &Checkpoint, path: &Path) -> TrainingResult<()>;

    /// Load a checkpoint. A missing file is [`TrainingError::MissingCheckpoint`].
    fn load(&self, path: &Path) -> TrainingResult<Checkpoint>;
}

/// Checkpoints as plain JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCheckpointStore;

impl CheckpointStore for JsonCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write next to the target and rename so a crash never leaves a truncated snapshot.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(checkpoint)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load(&self, path: &Path) -> TrainingResult<Checkpoint> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainingError::MissingCheckpoint(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkRole, NetworkShape};
    use crate::params::ParameterSet;
    use ndarray::arr1;
    use tempfile::TempDir;

    fn snapshot(name: &str, role: NetworkRole) -> NetworkSnapshot {
        let mut parameters = ParameterSet::new();
        parameters.insert("w", arr1(&[1.0, 2.0]).into_dyn());
        NetworkSnapshot {
            name: name.to_string(),
            role,
            shape: NetworkShape { num_channels: 1, resolution: 4, label_size: 0 },
            parameters,
        }
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("network-final.pkl");
        let ckpt = Checkpoint {
            g: snapshot("G", NetworkRole::Generator),
            d: snapshot("D", NetworkRole::Discriminator),
            gs: snapshot("Gs", NetworkRole::Generator),
            cur_nimg: 1000,
        };

        JsonCheckpointStore.save(&ckpt, &path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(JsonCheckpointStore.load(&path).unwrap(), ckpt);
    }

    #[test]
    fn test_missing_checkpoint() {
        let temp = TempDir::new().unwrap();
        let err = JsonCheckpointStore.load(&temp.path().join("nope.pkl")).unwrap_err();
        assert!(matches!(err, TrainingError::MissingCheckpoint(_)));
    }
}
