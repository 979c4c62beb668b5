//! The training driver: network setup, the main loop and per-tick maintenance.

use crate::artifacts::{ArtifactKind, ArtifactLog, TrainingManifest, TrainingMetrics};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::TrainingConfig;
use crate::dataset::{compute_dataset_id, validate_training_set, DatasetId, DatasetLoader, TrainingSet};
use crate::ema::{ema_beta, ema_multiplier, update_moving_average};
use crate::error::{TrainingError, TrainingResult};
use crate::grid::{grid_size_for, to_float, ImageGridWriter};
use crate::layout::RunLayout;
use crate::loss::{combine_d_loss, LossFunction, LossInputs, LossRegistry};
use crate::maintenance::{peak_memory_gb, tick_due, DeviceMonitor, RunClock, TickReport};
use crate::metrics::{metric_log_path, MetricGroup};
use crate::network::{log_layers, Network, NetworkFactory, NetworkRole, NetworkShape};
use crate::optimizer::Optimizer;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::reals::process_reals;
use crate::schedule::{evaluate, kimg_to_nimg, lod_band, TrainingSchedule};
use crate::summary::SummaryLog;
use chrono::Utc;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// External components the driver talks to.
pub struct Collaborators {
    pub dataset_loader: Box<dyn DatasetLoader>,
    pub network_factory: Box<dyn NetworkFactory>,
    pub losses: LossRegistry,
    pub metrics: MetricGroup,
    pub g_opt: Box<dyn Optimizer>,
    pub d_opt: Box<dyn Optimizer>,
    pub checkpoints: Box<dyn CheckpointStore>,
    pub grid_writer: Box<dyn ImageGridWriter>,
    pub device_monitor: Box<dyn DeviceMonitor>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Mutable loop state for one training invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunState {
    pub cur_nimg: u64,
    /// `-1` until the first tick.
    pub cur_tick: i64,
    pub tick_start_nimg: u64,
    /// LOD of the previous iteration; `-1.0` before the first one.
    pub prev_lod: f64,
    pub running_mb_counter: u64,
}

impl RunState {
    #[must_use]
    pub fn new(start_nimg: u64) -> Self {
        Self { cur_nimg: start_nimg, cur_tick: -1, tick_start_nimg: start_nimg, prev_lod: -1.0, running_mb_counter: 0 }
    }

    /// Whether `lod` lies in a different integer band than the previous iteration.
    #[must_use]
    pub fn lod_band_changed(&self, lod: f64) -> bool {
        lod_band(lod) != lod_band(self.prev_lod)
    }
}

/// Result of a finished (or cancelled) run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub run_id: u32,
    pub run_dir: PathBuf,
    pub state: RunState,
    pub cancelled: bool,
    pub final_checkpoint: PathBuf,
    pub manifest_path: PathBuf,
}

struct Networks {
    g: Box<dyn Network>,
    d: Box<dyn Network>,
    gs: Box<dyn Network>,
    g_shadow: Option<Box<dyn Network>>,
    d_shadow: Option<Box<dyn Network>>,
}

impl Networks {
    /// Networks used by `replica`. Shadows are resynchronised from the primaries first.
    fn replica(&mut self, replica: usize) -> TrainingResult<(&mut Box<dyn Network>, &mut Box<dyn Network>)> {
        if replica == 0 {
            return Ok((&mut self.g, &mut self.d));
        }
        match (&mut self.g_shadow, &mut self.d_shadow) {
            (Some(g), Some(d)) => {
                g.copy_parameters_from(self.g.as_ref());
                d.copy_parameters_from(self.d.as_ref());
                Ok((g, d))
            }
            _ => Err(TrainingError::InvalidConfig(format!("replica {replica} requested without shadow networks"))),
        }
    }
}

/// Fixed latents and labels for image snapshots.
struct SnapshotGrid {
    size: [usize; 2],
    latents: Array2<f32>,
    labels: Array2<f32>,
}

#[derive(Clone, Copy)]
enum Phase {
    Generator,
    Discriminator { run_reg: bool },
}

/// Drives one training run from configuration to final checkpoint.
pub struct TrainingLoop {
    config: TrainingConfig,
    collab: Collaborators,
}

impl TrainingLoop {
    #[must_use]
    pub fn new(config: TrainingConfig, collab: Collaborators) -> Self {
        Self { config, collab }
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train until `total_kimg` or until `cancel` fires. The final checkpoint and
    /// manifest are written in both cases.
    pub fn run(&mut self, cancel: &CancellationToken) -> TrainingResult<TrainingOutcome> {
        self.config.validate()?;
        let mut session = Session::open(&self.config, &mut self.collab)?;
        let result = session.train(cancel).and_then(|(state, cancelled)| session.finish(state, cancelled));
        session.training_set.close();
        result
    }
}

struct Session<'a> {
    config: &'a TrainingConfig,
    collab: &'a mut Collaborators,
    layout: RunLayout,
    training_set: Box<dyn TrainingSet>,
    dataset_id: DatasetId,
    nets: Networks,
    loss_fn: Box<dyn LossFunction>,
    grid: SnapshotGrid,
    summary: SummaryLog,
    artifacts: ArtifactLog,
    rng: StdRng,
    clock: RunClock,
    maintenance_secs: f64,
    last: TrainingMetrics,
}

impl<'a> Session<'a> {
    /// Resolve everything that can fail before the run directory exists, then set up the run.
    ///
    /// On failure the training set is closed and a freshly created run directory is removed.
    fn open(config: &'a TrainingConfig, collab: &'a mut Collaborators) -> TrainingResult<Self> {
        let loss_fn = collab.losses.create(&config.loss)?;
        let resume = match &config.resume.pkl {
            Some(path) => {
                tracing::info!("loading networks from {}...", path.display());
                Some(collab.checkpoints.load(path)?)
            }
            None => None,
        };
        if config.g_ema_kimg <= 0.0 {
            tracing::warn!("g_ema_kimg is {}; Gs will copy G once the EMA starts", config.g_ema_kimg);
        }

        tracing::info!("loading training set...");
        let mut training_set = collab.dataset_loader.load(&config.dataset)?;
        let prepared = prepare(config, collab, training_set.as_ref(), resume.as_ref()).and_then(|(dataset_id, nets)| {
            let layout = RunLayout::create(&config.results_dir, &config.run_desc)?;
            Ok((layout, dataset_id, nets))
        });
        let (layout, dataset_id, nets) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                training_set.close();
                return Err(e);
            }
        };
        tracing::info!("run directory: {}", layout.run_dir().display());

        let summary = SummaryLog::to_file(&layout.summaries_path());
        let mut session = Self {
            config,
            collab,
            layout,
            training_set,
            dataset_id,
            nets,
            loss_fn,
            grid: SnapshotGrid { size: [1, 1], latents: Array2::zeros((0, 0)), labels: Array2::zeros((0, 0)) },
            summary,
            artifacts: ArtifactLog::default(),
            rng: StdRng::seed_from_u64(config.seed),
            clock: RunClock::start(config.resume.time_secs),
            maintenance_secs: 0.0,
            last: TrainingMetrics::default(),
        };
        if let Err(e) = session.start_run() {
            session.training_set.close();
            if let Err(cleanup) = std::fs::remove_dir_all(session.layout.run_dir()) {
                tracing::warn!("could not remove {}: {cleanup}", session.layout.run_dir().display());
            }
            return Err(e);
        }
        Ok(session)
    }

    fn start_run(&mut self) -> TrainingResult<()> {
        let config_path = self.layout.config_path();
        self.config.save_to_file(&config_path)?;
        self.artifacts.push(ArtifactKind::Config, config_path);
        self.setup_snapshot_grid()
    }

    fn setup_snapshot_grid(&mut self) -> TrainingResult<()> {
        tracing::info!("setting up snapshot image grid...");
        let [_, height, width] = self.training_set.shape();
        let size = self.config.grid_size.unwrap_or_else(|| grid_size_for(width, height));
        let count = size[0] * size[1];

        let reals = self.training_set.get_minibatch_np(count)?;
        let reals_path = self.layout.reals_path();
        self.collab.grid_writer.save_image_grid(
            to_float(&reals.images).view(),
            &reals_path,
            self.training_set.dynamic_range(),
            size,
        )?;
        self.artifacts.push(ArtifactKind::ImageGrid, reals_path);

        let latent_size = self
            .nets
            .gs
            .input_shape()
            .first()
            .copied()
            .ok_or_else(|| TrainingError::Network("Gs has no latent input".to_string()))?;
        let rng = &mut self.rng;
        let latents = Array2::from_shape_simple_fn((count, latent_size), || rng.sample::<f32, _>(StandardNormal));
        self.grid = SnapshotGrid { size, latents, labels: reals.labels };

        let sched = evaluate(self.total_nimg(), self.training_set.resolution_log2(), &self.config.schedule);
        let path = self.layout.fakes_init_path();
        self.save_fakes(&path, sched.minibatch_gpu)?;
        Ok(())
    }

    fn save_fakes(&mut self, path: &std::path::Path, minibatch_gpu: usize) -> TrainingResult<()> {
        let fakes = self.nets.gs.run(&self.grid.latents, &self.grid.labels, true, minibatch_gpu)?;
        self.collab.grid_writer.save_image_grid(fakes.view(), path, self.config.drange_net, self.grid.size)?;
        self.artifacts.push(ArtifactKind::ImageGrid, path.to_path_buf());
        Ok(())
    }

    fn total_nimg(&self) -> u64 {
        kimg_to_nimg(self.config.total_kimg)
    }

    fn train(&mut self, cancel: &CancellationToken) -> TrainingResult<(RunState, bool)> {
        let config = self.config;
        let mut state = RunState::new(kimg_to_nimg(config.resume.kimg));
        let total_nimg = self.total_nimg();
        let resolution_log2 = self.training_set.resolution_log2();
        self.collab.progress.on_event(ProgressEvent::Started {
            run_id: self.layout.run_id(),
            run_dir: self.layout.run_dir().to_path_buf(),
            total_kimg: config.total_kimg,
        });
        tracing::info!("training for {} kimg...", config.total_kimg);

        while state.cur_nimg < total_nimg {
            if cancel.is_cancelled() {
                tracing::warn!("cancellation requested at {:.1} kimg", state.cur_nimg as f64 / 1000.0);
                return Ok((state, true));
            }

            let sched = evaluate(state.cur_nimg, resolution_log2, &config.schedule);
            let per_round = sched.minibatch_gpu * config.num_replicas;
            if sched.minibatch_size % per_round != 0 {
                return Err(TrainingError::MinibatchDivisibility {
                    minibatch_size: sched.minibatch_size,
                    minibatch_gpu: sched.minibatch_gpu,
                    num_replicas: config.num_replicas,
                });
            }
            let rounds = sched.minibatch_size / per_round;
            self.training_set.configure(sched.minibatch_gpu, sched.lod);
            if config.reset_opt_for_new_lod && state.lod_band_changed(sched.lod) {
                tracing::debug!("lod band {:?} -> {:?}: resetting optimizers", lod_band(state.prev_lod), sched.lod_band());
                self.collab.g_opt.reset_state();
                self.collab.d_opt.reset_state();
            }
            state.prev_lod = sched.lod;

            for _repeat in 0..config.minibatch_repeats {
                let run_reg = config.lazy_regularization
                    && state.running_mb_counter % config.d_reg_interval.max(1) as u64 == 0;
                for _round in 0..rounds {
                    self.optimizer_step(&sched, Phase::Generator, rounds, state.cur_nimg)?;
                    self.optimizer_step(&sched, Phase::Discriminator { run_reg }, rounds, state.cur_nimg)?;
                }
                state.cur_nimg += sched.minibatch_size as u64;
                state.running_mb_counter += 1;
                if state.cur_nimg >= total_nimg {
                    break;
                }
            }

            let done = state.cur_nimg >= total_nimg;
            if tick_due(state.cur_tick, state.cur_nimg, state.tick_start_nimg, sched.tick_kimg, done) {
                self.maintenance(&mut state, &sched, done)?;
            }
        }
        Ok((state, false))
    }

    /// One round of a single phase across all replicas, then an optimizer update.
    fn optimizer_step(&mut self, sched: &TrainingSchedule, phase: Phase, rounds: usize, cur_nimg: u64) -> TrainingResult<()> {
        for replica in 0..self.config.num_replicas {
            self.replica_step(replica, sched, phase)?;
        }
        match phase {
            Phase::Generator => {
                let applied = self.collab.g_opt.apply_updates(self.nets.g.trainables_mut(), sched.g_lrate, rounds)?;
                if applied {
                    let beta = ema_beta(sched.minibatch_size, self.config.g_ema_kimg);
                    let multiplier = ema_multiplier(cur_nimg, self.config.ema_start_kimg());
                    update_moving_average(self.nets.gs.trainables_mut(), self.nets.g.trainables(), beta, multiplier)?;
                }
            }
            Phase::Discriminator { .. } => {
                self.collab.d_opt.apply_updates(self.nets.d.trainables_mut(), sched.d_lrate, rounds)?;
            }
        }
        Ok(())
    }

    fn replica_step(&mut self, replica: usize, sched: &TrainingSchedule, phase: Phase) -> TrainingResult<()> {
        let config = self.config;
        let batch = self.training_set.get_minibatch()?;
        let reals = process_reals(
            batch.images.view(),
            sched.lod,
            config.mirror_augment,
            self.training_set.dynamic_range(),
            config.drange_net,
            &mut self.rng,
        )?;
        let label_size = self.training_set.label_size();

        let (g, d) = self.nets.replica(replica)?;
        for net in [&mut *g, &mut *d] {
            if net.lod().is_some() {
                net.set_lod(sched.lod);
            }
        }
        let losses = self.loss_fn.evaluate(LossInputs {
            g: &**g,
            d: &**d,
            minibatch_size: sched.minibatch_gpu,
            reals: &reals,
            real_labels: &batch.labels,
            label_size,
            rng: &mut self.rng,
        })?;

        match phase {
            Phase::Generator => {
                self.summary.record("Loss/G", losses.g_loss.value);
                self.last.g_loss = Some(losses.g_loss.value);
                self.collab.g_opt.register_gradients(&losses.g_loss, g.trainables())?;
            }
            Phase::Discriminator { run_reg } => {
                self.summary.record("Loss/D", losses.d_loss.value);
                self.last.d_loss = Some(losses.d_loss.value);
                if let Some(reg) = &losses.d_reg {
                    if !config.lazy_regularization || run_reg {
                        self.summary.record("Loss/D_reg", reg.value);
                    }
                }
                let total = combine_d_loss(
                    losses.d_loss,
                    losses.d_reg.as_ref(),
                    config.lazy_regularization,
                    run_reg,
                    config.d_reg_interval,
                )?;
                self.collab.d_opt.register_gradients(&total, d.trainables())?;
            }
        }
        Ok(())
    }

    fn maintenance(&mut self, state: &mut RunState, sched: &TrainingSchedule, done: bool) -> TrainingResult<()> {
        let config = self.config;
        state.cur_tick += 1;
        let tick = state.cur_tick as u64;
        let tick_nimg = state.cur_nimg - state.tick_start_nimg;
        state.tick_start_nimg = state.cur_nimg;
        let tick_secs = self.clock.since_last_update();
        let report = TickReport::new(
            tick,
            state.cur_nimg,
            tick_nimg,
            sched.lod,
            sched.minibatch_size,
            self.clock.total_secs(),
            tick_secs,
            self.maintenance_secs,
            peak_memory_gb(self.collab.device_monitor.as_mut())?,
        );
        report.record(&mut self.summary);
        self.collab.progress.on_event(ProgressEvent::Tick { run_id: self.layout.run_id(), report });

        if config.image_snapshot_ticks.is_due(tick, done) {
            let path = self.layout.fakes_path(state.cur_nimg);
            self.save_fakes(&path, sched.minibatch_gpu)?;
            self.emit_artifact(ArtifactKind::ImageGrid, path);
        }
        if config.network_snapshot_ticks.is_due(tick, done) {
            let path = self.layout.network_snapshot_path(state.cur_nimg);
            self.save_checkpoint(&path, state.cur_nimg)?;
            self.artifacts.push(ArtifactKind::NetworkSnapshot, path.clone());
            self.emit_artifact(ArtifactKind::NetworkSnapshot, path.clone());
            self.run_metrics(&path)?;
        }

        self.collab.metrics.update_summaries(&mut self.summary);
        self.summary.flush(state.cur_nimg)?;
        let interval = self.clock.update();
        self.maintenance_secs = interval - tick_secs;
        Ok(())
    }

    fn run_metrics(&mut self, checkpoint: &std::path::Path) -> TrainingResult<()> {
        if self.collab.metrics.is_empty() {
            return Ok(());
        }
        let results = self.collab.metrics.run(checkpoint, self.layout.run_dir(), self.config.num_replicas)?;
        for result in results {
            self.artifacts.push(ArtifactKind::MetricLog, metric_log_path(self.layout.run_dir(), &result.name));
            self.last.metrics.retain(|(name, _)| *name != result.name);
            self.last.metrics.push((result.name, result.value));
        }
        Ok(())
    }

    fn save_checkpoint(&self, path: &std::path::Path, cur_nimg: u64) -> TrainingResult<()> {
        let ckpt = Checkpoint::capture(self.nets.g.as_ref(), self.nets.d.as_ref(), self.nets.gs.as_ref(), cur_nimg);
        self.collab.checkpoints.save(&ckpt, path)
    }

    fn emit_artifact(&self, kind: ArtifactKind, path: PathBuf) {
        self.collab.progress.on_event(ProgressEvent::Artifact { run_id: self.layout.run_id(), kind, path });
    }

    fn finish(&mut self, state: RunState, cancelled: bool) -> TrainingResult<TrainingOutcome> {
        let final_checkpoint = self.layout.network_final_path();
        self.save_checkpoint(&final_checkpoint, state.cur_nimg)?;
        self.artifacts.push(ArtifactKind::NetworkFinal, final_checkpoint.clone());
        self.emit_artifact(ArtifactKind::NetworkFinal, final_checkpoint.clone());
        if let Some(path) = self.summary.path() {
            self.artifacts.push(ArtifactKind::Summaries, path.to_path_buf());
        }

        let manifest = TrainingManifest {
            run_id: self.layout.run_id(),
            run_desc: self.config.run_desc.clone(),
            created_at: Utc::now(),
            dataset_id: self.dataset_id.clone(),
            total_kimg: self.config.total_kimg,
            final_kimg: state.cur_nimg as f64 / 1000.0,
            cancelled,
            metrics: self.last.clone(),
            artifacts: self.artifacts.finish()?,
        };
        let manifest_path = self.layout.manifest_path();
        manifest.save(&manifest_path)?;

        self.collab.progress.on_event(ProgressEvent::Finished {
            run_id: self.layout.run_id(),
            cur_nimg: state.cur_nimg,
            cancelled,
        });
        Ok(TrainingOutcome {
            run_id: self.layout.run_id(),
            run_dir: self.layout.run_dir().to_path_buf(),
            state,
            cancelled,
            final_checkpoint,
            manifest_path,
        })
    }
}

/// Validate the training set and build the networks for it.
fn prepare(
    config: &TrainingConfig,
    collab: &Collaborators,
    training_set: &dyn TrainingSet,
    resume: Option<&Checkpoint>,
) -> TrainingResult<(DatasetId, Networks)> {
    validate_training_set(training_set)?;
    let dataset_id = compute_dataset_id(&config.dataset, training_set)?;
    let [channels, height, width] = training_set.shape();
    tracing::info!(
        "dataset shape: [{channels}, {height}, {width}], dynamic range {:?}, label size {}",
        training_set.dynamic_range(),
        training_set.label_size()
    );

    let shape = NetworkShape { num_channels: channels, resolution: height, label_size: training_set.label_size() };
    let nets = build_networks(config, collab, shape, resume)?;
    log_layers(nets.g.as_ref());
    log_layers(nets.d.as_ref());
    Ok((dataset_id, nets))
}

/// Construct G, D and Gs, fresh or from a resume checkpoint.
fn build_networks(
    config: &TrainingConfig,
    collab: &Collaborators,
    shape: NetworkShape,
    resume: Option<&Checkpoint>,
) -> TrainingResult<Networks> {
    let factory = collab.network_factory.as_ref();
    let (g, d, gs) = match resume {
        None => {
            tracing::info!("constructing networks...");
            let g = factory.build("G", NetworkRole::Generator, shape, &config.g_args)?;
            let d = factory.build("D", NetworkRole::Discriminator, shape, &config.d_args)?;
            let gs = g.clone_as("Gs");
            (g, d, gs)
        }
        Some(ckpt) if config.resume.with_new_nets => {
            let mut g = factory.build("G", NetworkRole::Generator, shape, &config.g_args)?;
            let mut d = factory.build("D", NetworkRole::Discriminator, shape, &config.d_args)?;
            let mut gs = g.clone_as("Gs");
            let copied = g.trainables_mut().copy_matching_from(&ckpt.g.parameters)
                + d.trainables_mut().copy_matching_from(&ckpt.d.parameters)
                + gs.trainables_mut().copy_matching_from(&ckpt.gs.parameters);
            tracing::info!("copied {copied} matching parameter tensors into new networks");
            (g, d, gs)
        }
        Some(ckpt) => (
            factory.restore(&ckpt.g, &config.g_args)?,
            factory.restore(&ckpt.d, &config.d_args)?,
            factory.restore(&ckpt.gs, &config.g_args)?,
        ),
    };

    let (g_shadow, d_shadow) = if config.num_replicas > 1 {
        (Some(g.clone_as("G_shadow")), Some(d.clone_as("D_shadow")))
    } else {
        (None, None)
    };
    Ok(Networks { g, d, gs, g_shadow, d_shadow })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_starts_unticked() {
        let state = RunState::new(5_000);
        assert_eq!(state.cur_tick, -1);
        assert_eq!(state.prev_lod, -1.0);
        assert_eq!(state.tick_start_nimg, 5_000);
    }

    #[test]
    fn test_lod_band_changes() {
        let mut state = RunState::new(0);
        assert!(state.lod_band_changed(3.0));
        state.prev_lod = 3.0;
        assert!(!state.lod_band_changed(3.0));
        assert!(state.lod_band_changed(2.75));
        state.prev_lod = 2.75;
        assert!(!state.lod_band_changed(2.5));
        assert!(state.lod_band_changed(2.0));
        state.prev_lod = 2.0;
        assert!(!state.lod_band_changed(2.0));
    }
}
