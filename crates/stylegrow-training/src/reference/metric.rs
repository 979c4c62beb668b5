use super::{LinearNetworkFactory, SyntheticDataset};
use crate::checkpoint::{CheckpointStore, JsonCheckpointStore};
use crate::config::{DatasetArgs, NetworkArgs, TrainingConfig};
use crate::dataset::TrainingSet;
use crate::error::TrainingResult;
use crate::metrics::Metric;
use crate::network::NetworkFactory;
use crate::reals::process_reals;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::path::Path;

const NUM_SAMPLES: usize = 256;

/// Absolute difference between the mean pixel of Gs samples and of real images,
/// both in the network's dynamic range. A crude stand-in for distribution metrics.
#[derive(Debug, Clone)]
pub struct PixelMeanGap {
    dataset: DatasetArgs,
    g_args: NetworkArgs,
    drange_net: [f32; 2],
    seed: u64,
}

impl PixelMeanGap {
    #[must_use]
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            dataset: config.dataset.clone(),
            g_args: config.g_args.clone(),
            drange_net: config.drange_net,
            seed: config.seed,
        }
    }
}

impl Metric for PixelMeanGap {
    fn name(&self) -> &str {
        "pixel_mean_gap"
    }

    fn run(&mut self, checkpoint: &Path, _run_dir: &Path, _num_replicas: usize) -> TrainingResult<f64> {
        let ckpt = JsonCheckpointStore.load(checkpoint)?;
        let gs = LinearNetworkFactory::new(self.seed).restore(&ckpt.gs, &self.g_args)?;

        let mut dataset = SyntheticDataset::new(&self.dataset, self.seed)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let batch = dataset.get_minibatch_np(NUM_SAMPLES)?;
        let reals = process_reals(batch.images.view(), 0.0, false, dataset.dynamic_range(), self.drange_net, &mut rng)?;

        let latent_size = gs.input_shape().first().copied().unwrap_or_default();
        let latents = Array2::from_shape_simple_fn((NUM_SAMPLES, latent_size), || rng.sample::<f32, _>(StandardNormal));
        let fakes = gs.run(&latents, &batch.labels, true, NUM_SAMPLES)?;

        let real_mean = reals.mean().unwrap_or_default();
        let fake_mean = fakes.mean().unwrap_or_default();
        Ok(f64::from((fake_mean - real_mean).abs()))
    }
}
