//! Stylegrow Training
//!
//! Training loop for progressively grown GANs:
//! - Schedule evaluation (`evaluate`) and real-image processing (`process_reals`)
//! - The training driver (`TrainingLoop`) with EMA, lazy regularization and ticks
//! - Collaborator traits for networks, datasets, losses, optimizers and metrics
//! - Run directories, checkpoints, image grids, summaries and manifests
//! - A small CPU reference backend (`reference`)

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod ema;
pub mod error;
pub mod grid;
pub mod layout;
pub mod loss;
pub mod maintenance;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod params;
pub mod progress;
pub mod reals;
pub mod reference;
pub mod registry;
pub mod schedule;
pub mod summary;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use checkpoint::{Checkpoint, CheckpointStore, JsonCheckpointStore};
pub use config::{ResolutionTable, ScheduleConfig, SnapshotCadence, TrainingConfig};
pub use dataset::{DatasetId, DatasetLoader, Minibatch, TrainingSet};
pub use driver::{Collaborators, RunState, TrainingLoop, TrainingOutcome};
pub use error::{TrainingError, TrainingResult};
pub use grid::{ImageGridWriter, PngGridWriter};
pub use layout::RunLayout;
pub use loss::{GanLosses, Loss, LossFunction, LossInputs, LossRegistry};
pub use maintenance::{DeviceMonitor, NoDeviceMonitor, TickReport};
pub use metrics::{Metric, MetricGroup, MetricRegistry};
pub use network::{Network, NetworkFactory, NetworkRole, NetworkShape, NetworkSnapshot};
pub use optimizer::{Adam, Optimizer};
pub use params::ParameterSet;
pub use progress::{LogProgressSink, ProgressEvent, ProgressSink, RecordingProgressSink};
pub use reals::process_reals;
pub use registry::{discover_runs, latest_checkpoint, resolve_run_checkpoint, RunEntry};
pub use schedule::{evaluate, kimg_to_nimg, TrainingSchedule};
pub use summary::{format_time, SummaryLog};

/// Re-exported for callers wiring cancellation into [`TrainingLoop::run`].
pub use tokio_util::sync::CancellationToken;
