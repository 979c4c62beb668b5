use crate::config::DatasetArgs;
use crate::dataset::{DatasetLoader, Minibatch, TrainingSet};
use crate::error::{TrainingError, TrainingResult};
use ndarray::{Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_RESOLUTION: u32 = 32;
const DEFAULT_CHANNELS: usize = 3;
const DEFAULT_POOL: usize = 256;

/// Procedural images: per-channel sinusoidal gradients over a class-dependent base colour.
///
/// A fixed pool of images is generated at load time and sampled with
/// replacement, so a seed fully determines the data stream.
#[derive(Debug)]
pub struct SyntheticDataset {
    resolution_log2: u32,
    pool: Array4<u8>,
    labels: Array2<f32>,
    minibatch_gpu: usize,
    lod: f64,
    rng: StdRng,
}

impl SyntheticDataset {
    pub fn new(args: &DatasetArgs, seed: u64) -> TrainingResult<Self> {
        let resolution = args.resolution.unwrap_or(DEFAULT_RESOLUTION);
        if !resolution.is_power_of_two() || resolution < 4 {
            return Err(TrainingError::Dataset(format!("resolution must be a power of two >= 4, got {resolution}")));
        }
        let channels = args.num_channels.unwrap_or(DEFAULT_CHANNELS);
        if channels == 0 {
            return Err(TrainingError::Dataset("num_channels must be >= 1".to_string()));
        }
        let count = args.max_images.unwrap_or(DEFAULT_POOL).max(1);
        let res = resolution as usize;
        let label_size = args.label_size;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut pool = Array4::zeros((count, channels, res, res));
        let mut labels = Array2::zeros((count, label_size));
        for (i, mut image) in pool.outer_iter_mut().enumerate() {
            let class = if label_size > 0 { i % label_size } else { 0 };
            if label_size > 0 {
                labels[[i, class]] = 1.0;
            }
            for mut plane in image.outer_iter_mut() {
                let base = rng.gen_range(48.0..208.0) + 24.0 * class as f32;
                let amplitude: f32 = rng.gen_range(8.0..48.0);
                let (fx, fy) = (rng.gen_range(1..=2) as f32, rng.gen_range(0..=2) as f32);
                let phase: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
                for ((y, x), px) in plane.indexed_iter_mut() {
                    let t = std::f32::consts::TAU * (fx * x as f32 + fy * y as f32) / res as f32 + phase;
                    *px = (base + amplitude * t.sin()).round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        Ok(Self { resolution_log2: resolution.trailing_zeros(), pool, labels, minibatch_gpu: 1, lod: 0.0, rng })
    }

    /// Box-filter the selected images down to the configured level of detail.
    fn gather(&self, indices: &[usize]) -> Minibatch {
        let factor = 1usize << (self.lod.max(0.0).floor() as u32).min(self.resolution_log2 - 2);
        let (_, c, h, w) = self.pool.dim();
        let (oh, ow) = (h / factor, w / factor);
        let area = (factor * factor) as u32;
        let mut images = Array4::zeros((indices.len(), c, oh, ow));
        for (dst, &idx) in indices.iter().enumerate() {
            let src = self.pool.index_axis(Axis(0), idx);
            for ch in 0..c {
                for y in 0..oh {
                    for x in 0..ow {
                        let mut sum = 0u32;
                        for dy in 0..factor {
                            for dx in 0..factor {
                                sum += u32::from(src[[ch, y * factor + dy, x * factor + dx]]);
                            }
                        }
                        images[[dst, ch, y, x]] = ((sum + area / 2) / area) as u8;
                    }
                }
            }
        }
        let labels = self.labels.select(Axis(0), indices);
        Minibatch { images, labels }
    }
}

impl TrainingSet for SyntheticDataset {
    fn resolution_log2(&self) -> u32 {
        self.resolution_log2
    }

    fn shape(&self) -> [usize; 3] {
        let (_, c, h, w) = self.pool.dim();
        [c, h, w]
    }

    fn label_size(&self) -> usize {
        self.labels.ncols()
    }

    fn dynamic_range(&self) -> [f32; 2] {
        [0.0, 255.0]
    }

    fn configure(&mut self, minibatch_gpu: usize, lod: f64) {
        self.minibatch_gpu = minibatch_gpu.max(1);
        self.lod = lod;
    }

    fn get_minibatch(&mut self) -> TrainingResult<Minibatch> {
        self.get_minibatch_np(self.minibatch_gpu)
    }

    fn get_minibatch_np(&mut self, size: usize) -> TrainingResult<Minibatch> {
        let count = self.pool.dim().0;
        let indices: Vec<usize> = (0..size).map(|_| self.rng.gen_range(0..count)).collect();
        Ok(self.gather(&indices))
    }
}

/// Loads datasets of kind `"synthetic"`.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticLoader {
    seed: u64,
}

impl SyntheticLoader {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl DatasetLoader for SyntheticLoader {
    fn load(&self, args: &DatasetArgs) -> TrainingResult<Box<dyn TrainingSet>> {
        if args.kind != "synthetic" {
            return Err(TrainingError::Dataset(format!("unsupported dataset kind {:?}", args.kind)));
        }
        if let Some(path) = &args.path {
            return Err(TrainingError::Dataset(format!(
                "synthetic datasets are generated in memory, got path {}",
                path.display()
            )));
        }
        tracing::debug!("generating synthetic dataset {:?}", args);
        Ok(Box::new(SyntheticDataset::new(args, self.seed)?))
    }
}
