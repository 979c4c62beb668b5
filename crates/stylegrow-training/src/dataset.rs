use crate::config::DatasetArgs;
use crate::error::{TrainingError, TrainingResult};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier for a dataset (hash of its loader arguments and shape).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A batch of raw images (NCHW, in the dataset's dynamic range) with labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    pub images: Array4<u8>,
    /// `[N, label_size]`; zero columns for unconditional datasets.
    pub labels: Array2<f32>,
}

impl Minibatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.dim().0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of real training images.
pub trait TrainingSet: Send {
    /// `log2` of the full image resolution.
    fn resolution_log2(&self) -> u32;

    /// `[channels, height, width]`.
    fn shape(&self) -> [usize; 3];

    fn label_size(&self) -> usize;

    /// Range of raw pixel values, e.g. `[0, 255]`.
    fn dynamic_range(&self) -> [f32; 2];

    /// Set the per-replica minibatch size and the level of detail to serve.
    ///
    /// Images are served at `2^(resolution_log2 - floor(lod))` pixels; the
    /// real-image processor upscales them back to full size.
    fn configure(&mut self, minibatch_gpu: usize, lod: f64);

    fn get_minibatch(&mut self) -> TrainingResult<Minibatch>;

    /// Fetch a batch of an explicit size at the configured level of detail.
    fn get_minibatch_np(&mut self, size: usize) -> TrainingResult<Minibatch>;

    fn close(&mut self) {}
}

pub trait DatasetLoader: Send {
    fn load(&self, args: &DatasetArgs) -> TrainingResult<Box<dyn TrainingSet>>;
}

pub fn compute_dataset_id(args: &DatasetArgs, training_set: &dyn TrainingSet) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(args)?);
    for dim in training_set.shape() {
        hasher.update(dim.to_le_bytes());
    }
    hasher.update(training_set.label_size().to_le_bytes());
    Ok(DatasetId(hex::encode(hasher.finalize())))
}

/// Check the structural assumptions the driver and the real-image processor make.
pub fn validate_training_set(training_set: &dyn TrainingSet) -> TrainingResult<()> {
    let [channels, height, width] = training_set.shape();
    if channels == 0 {
        return Err(TrainingError::Dataset("dataset must have at least one channel".to_string()));
    }
    if height != width {
        return Err(TrainingError::Dataset(format!("images must be square, got {height}x{width}")));
    }
    let log2 = training_set.resolution_log2();
    if log2 < 2 || 1usize.checked_shl(log2) != Some(height) {
        return Err(TrainingError::Dataset(format!(
            "resolution {height} does not match resolution_log2 {log2} (need a power of two >= 4)"
        )));
    }
    let [lo, hi] = training_set.dynamic_range();
    if !(lo < hi) {
        return Err(TrainingError::Dataset(format!("invalid dynamic range [{lo}, {hi}]")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        shape: [usize; 3],
        log2: u32,
    }

    impl TrainingSet for Fixed {
        fn resolution_log2(&self) -> u32 {
            self.log2
        }
        fn shape(&self) -> [usize; 3] {
            self.shape
        }
        fn label_size(&self) -> usize {
            0
        }
        fn dynamic_range(&self) -> [f32; 2] {
            [0.0, 255.0]
        }
        fn configure(&mut self, _minibatch_gpu: usize, _lod: f64) {}
        fn get_minibatch(&mut self) -> TrainingResult<Minibatch> {
            self.get_minibatch_np(1)
        }
        fn get_minibatch_np(&mut self, size: usize) -> TrainingResult<Minibatch> {
            let [c, h, w] = self.shape;
            Ok(Minibatch { images: Array4::zeros((size, c, h, w)), labels: Array2::zeros((size, 0)) })
        }
    }

    #[test]
    fn test_validate_training_set() {
        assert!(validate_training_set(&Fixed { shape: [3, 32, 32], log2: 5 }).is_ok());
        assert!(validate_training_set(&Fixed { shape: [3, 32, 16], log2: 5 }).is_err());
        assert!(validate_training_set(&Fixed { shape: [3, 32, 32], log2: 6 }).is_err());
        assert!(validate_training_set(&Fixed { shape: [0, 32, 32], log2: 5 }).is_err());
    }

    #[test]
    fn test_dataset_id_stable_and_shape_sensitive() {
        let args = DatasetArgs::default();
        let a = compute_dataset_id(&args, &Fixed { shape: [3, 32, 32], log2: 5 }).unwrap();
        let b = compute_dataset_id(&args, &Fixed { shape: [3, 32, 32], log2: 5 }).unwrap();
        let c = compute_dataset_id(&args, &Fixed { shape: [1, 32, 32], log2: 5 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
