//! CPU reference backend.
//!
//! A linear generator/discriminator pair with closed-form gradients, a
//! procedural dataset and a toy metric. It implements every collaborator seam
//! so the training loop can run end to end without a deep-learning framework.

mod linear;
mod loss;
mod metric;
mod synthetic;

pub use linear::{LinearNetwork, LinearNetworkFactory};
pub use loss::LogisticNsR1;
pub use metric::PixelMeanGap;
pub use synthetic::{SyntheticDataset, SyntheticLoader};

use crate::checkpoint::JsonCheckpointStore;
use crate::config::TrainingConfig;
use crate::driver::Collaborators;
use crate::error::TrainingResult;
use crate::grid::PngGridWriter;
use crate::loss::LossRegistry;
use crate::maintenance::NoDeviceMonitor;
use crate::metrics::{MetricGroup, MetricRegistry};
use crate::optimizer::Adam;
use crate::progress::{LogProgressSink, ProgressSink};
use std::sync::Arc;

/// Loss functions available to the reference backend.
#[must_use]
pub fn loss_registry() -> LossRegistry {
    let mut registry = LossRegistry::new();
    registry.register("logistic_ns_r1", |args| Ok(Box::new(LogisticNsR1::from_args(args))));
    registry.register("logistic_ns", |args| {
        let mut loss = LogisticNsR1::from_args(args);
        loss.r1_gamma = 0.0;
        Ok(Box::new(loss))
    });
    registry
}

/// Metrics available to the reference backend for a given configuration.
#[must_use]
pub fn metric_registry(config: &TrainingConfig) -> MetricRegistry {
    let mut registry = MetricRegistry::new();
    let metric = PixelMeanGap::new(config);
    registry.register("pixel_mean_gap", move || Box::new(metric.clone()));
    registry
}

/// Collaborators wired to the reference backend, reporting through `progress`.
pub fn collaborators(config: &TrainingConfig, progress: Arc<dyn ProgressSink>) -> TrainingResult<Collaborators> {
    let metrics = MetricGroup::from_names(config.metrics.iter().map(|m| m.name.as_str()), &metric_registry(config))?;
    Ok(Collaborators {
        dataset_loader: Box::new(SyntheticLoader::new(config.seed)),
        network_factory: Box::new(LinearNetworkFactory::new(config.seed)),
        losses: loss_registry(),
        metrics,
        g_opt: Box::new(Adam::new("TrainG", config.g_opt)),
        d_opt: Box::new(Adam::new("TrainD", config.d_opt)),
        checkpoints: Box::new(JsonCheckpointStore),
        grid_writer: Box::new(PngGridWriter),
        device_monitor: Box::new(NoDeviceMonitor),
        progress,
    })
}

/// [`collaborators`] with progress reported through `tracing`.
pub fn default_collaborators(config: &TrainingConfig) -> TrainingResult<Collaborators> {
    collaborators(config, Arc::new(LogProgressSink))
}
