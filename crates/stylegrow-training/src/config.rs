//! Typed training configuration.
//!
//! A run is described by a single TOML document. Every field has a default
//! matching the classic progressive-growing setup, so a minimal file only needs
//! the dataset section.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Resolution-keyed overrides with fallback to a base value.
///
/// Keys are exact image resolutions (e.g. `128`). Lookups never match ranges:
/// a resolution absent from the table yields the caller's base value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, T>",
    into = "BTreeMap<String, T>",
    bound(serialize = "T: Clone + Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct ResolutionTable<T> {
    entries: BTreeMap<u32, T>,
}

impl<T> Default for ResolutionTable<T> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<T: Copy> ResolutionTable<T> {
    #[must_use]
    pub fn lookup(&self, resolution: u32, base: T) -> T {
        self.entries.get(&resolution).copied().unwrap_or(base)
    }
}

impl<T> ResolutionTable<T> {
    #[must_use]
    pub fn get(&self, resolution: u32) -> Option<&T> {
        self.entries.get(&resolution)
    }

    pub fn insert(&mut self, resolution: u32, value: T) -> Option<T> {
        self.entries.insert(resolution, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

impl<T> FromIterator<(u32, T)> for ResolutionTable<T> {
    fn from_iter<I: IntoIterator<Item = (u32, T)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl<T> TryFrom<BTreeMap<String, T>> for ResolutionTable<T> {
    type Error = String;

    fn try_from(raw: BTreeMap<String, T>) -> Result<Self, Self::Error> {
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            let resolution: u32 =
                key.trim().parse().map_err(|_| format!("resolution key {key:?} is not an integer"))?;
            entries.insert(resolution, value);
        }
        Ok(Self { entries })
    }
}

impl<T> From<ResolutionTable<T>> for BTreeMap<String, T> {
    fn from(table: ResolutionTable<T>) -> Self {
        table.entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Static inputs to the schedule evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Image resolution used at the beginning. `None` trains at full resolution throughout.
    pub lod_initial_resolution: Option<u32>,
    /// Thousands of real images to show before doubling the resolution.
    pub lod_training_kimg: f64,
    /// Thousands of real images to show when fading in new layers.
    pub lod_transition_kimg: f64,
    pub minibatch_size_base: usize,
    pub minibatch_size_dict: ResolutionTable<usize>,
    /// Samples processed at a time by one replica.
    pub minibatch_gpu_base: usize,
    pub minibatch_gpu_dict: ResolutionTable<usize>,
    pub g_lrate_base: f64,
    pub g_lrate_dict: ResolutionTable<f64>,
    pub d_lrate_base: f64,
    pub d_lrate_dict: ResolutionTable<f64>,
    /// Duration of the learning-rate ramp-up; 0 disables it.
    pub lrate_rampup_kimg: f64,
    pub tick_kimg_base: f64,
    pub tick_kimg_dict: ResolutionTable<f64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lod_initial_resolution: None,
            lod_training_kimg: 600.0,
            lod_transition_kimg: 600.0,
            minibatch_size_base: 32,
            minibatch_size_dict: ResolutionTable::default(),
            minibatch_gpu_base: 4,
            minibatch_gpu_dict: ResolutionTable::default(),
            g_lrate_base: 0.002,
            g_lrate_dict: ResolutionTable::default(),
            d_lrate_base: 0.002,
            d_lrate_dict: ResolutionTable::default(),
            lrate_rampup_kimg: 0.0,
            tick_kimg_base: 4.0,
            tick_kimg_dict: default_tick_kimg_dict(),
        }
    }
}

fn default_tick_kimg_dict() -> ResolutionTable<f64> {
    [(8, 28.0), (16, 24.0), (32, 20.0), (64, 16.0), (128, 12.0), (256, 10.0), (512, 10.0), (1024, 10.0)]
        .into_iter()
        .collect()
}

/// Reject NaN, infinities and negative values.
fn non_negative(name: &str, value: f64) -> TrainingResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrainingError::InvalidConfig(format!("{name} must be a finite value >= 0, got {value}")))
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        non_negative("schedule.lod_training_kimg", self.lod_training_kimg)?;
        non_negative("schedule.lod_transition_kimg", self.lod_transition_kimg)?;
        if let Some(initial) = self.lod_initial_resolution {
            if !initial.is_power_of_two() || initial < 4 {
                return Err(TrainingError::InvalidConfig(format!(
                    "lod_initial_resolution must be a power of two >= 4, got {initial}"
                )));
            }
        }
        let sizes = std::iter::once(self.minibatch_size_base).chain(self.minibatch_size_dict.iter().map(|(_, v)| *v));
        let gpus = std::iter::once(self.minibatch_gpu_base).chain(self.minibatch_gpu_dict.iter().map(|(_, v)| *v));
        if sizes.chain(gpus).any(|v| v == 0) {
            return Err(TrainingError::InvalidConfig("minibatch sizes must be >= 1".to_string()));
        }
        non_negative("schedule.lrate_rampup_kimg", self.lrate_rampup_kimg)?;
        let mut ticks = std::iter::once(self.tick_kimg_base).chain(self.tick_kimg_dict.iter().map(|(_, v)| *v));
        if ticks.any(|t| !t.is_finite() || t <= 0.0) {
            return Err(TrainingError::InvalidConfig("tick_kimg values must be > 0".to_string()));
        }
        Ok(())
    }
}

/// How often a tick-driven artifact is written.
///
/// `FinalOnly` writes the artifact once, when training ends. In TOML this is
/// spelled `"none"`; an integer means "every N ticks".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CadenceRepr", into = "CadenceRepr")]
pub enum SnapshotCadence {
    Every(u32),
    FinalOnly,
}

impl SnapshotCadence {
    #[must_use]
    pub fn is_due(self, cur_tick: u64, done: bool) -> bool {
        match self {
            Self::Every(ticks) => done || cur_tick % u64::from(ticks) == 0,
            Self::FinalOnly => done,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CadenceRepr {
    Ticks(u32),
    Word(String),
}

impl TryFrom<CadenceRepr> for SnapshotCadence {
    type Error = String;

    fn try_from(repr: CadenceRepr) -> Result<Self, Self::Error> {
        match repr {
            CadenceRepr::Ticks(0) => Err("snapshot cadence must be >= 1 tick (use \"none\" to disable)".to_string()),
            CadenceRepr::Ticks(n) => Ok(Self::Every(n)),
            CadenceRepr::Word(w) if w.eq_ignore_ascii_case("none") => Ok(Self::FinalOnly),
            CadenceRepr::Word(w) => Err(format!("unknown snapshot cadence {w:?}")),
        }
    }
}

impl From<SnapshotCadence> for CadenceRepr {
    fn from(cadence: SnapshotCadence) -> Self {
        match cadence {
            SnapshotCadence::Every(n) => Self::Ticks(n),
            SnapshotCadence::FinalOnly => Self::Word("none".to_string()),
        }
    }
}

/// Arguments handed to the dataset loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetArgs {
    /// Loader-specific dataset kind, e.g. `"synthetic"`.
    pub kind: String,
    pub path: Option<PathBuf>,
    pub resolution: Option<u32>,
    pub num_channels: Option<usize>,
    pub label_size: usize,
    pub max_images: Option<usize>,
}

impl Default for DatasetArgs {
    fn default() -> Self {
        Self {
            kind: "synthetic".to_string(),
            path: None,
            resolution: None,
            num_channels: None,
            label_size: 0,
            max_images: None,
        }
    }
}

/// Options forwarded to the network factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NetworkArgs {
    pub latent_size: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossArgs {
    /// Registered loss function name.
    pub func_name: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, f64>,
}

impl Default for LossArgs {
    fn default() -> Self {
        Self { func_name: "logistic_ns_r1".to_string(), params: BTreeMap::new() }
    }
}

impl LossArgs {
    #[must_use]
    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.params.get(name).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerArgs {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for OptimizerArgs {
    fn default() -> Self {
        Self { beta1: 0.0, beta2: 0.99, epsilon: 1e-8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricArgs {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Checkpoint to resume from; `None` trains from scratch.
    pub pkl: Option<PathBuf>,
    /// Assumed training progress at the beginning. Affects reporting and the schedule.
    pub kimg: f64,
    /// Assumed wallclock time at the beginning, in seconds. Affects reporting.
    pub time_secs: f64,
    /// Construct networks from the current config and copy matching parameters from the checkpoint.
    pub with_new_nets: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self { pkl: None, kimg: 0.0, time_secs: 0.0, with_new_nets: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub run_desc: String,
    pub results_dir: PathBuf,
    pub seed: u64,
    pub num_replicas: usize,
    /// Total length of training in thousands of real images.
    pub total_kimg: f64,
    /// Half-life of the generator EMA, in kimg.
    pub g_ema_kimg: f64,
    /// Start of the EMA; defaults to `g_ema_kimg`.
    pub ema_start_kimg: Option<f64>,
    /// Minibatches to run before re-evaluating the schedule.
    pub minibatch_repeats: usize,
    pub lazy_regularization: bool,
    pub d_reg_interval: usize,
    /// Reset optimizer state when new layers are introduced.
    pub reset_opt_for_new_lod: bool,
    pub mirror_augment: bool,
    /// Dynamic range of images fed to the networks.
    pub drange_net: [f32; 2],
    pub image_snapshot_ticks: SnapshotCadence,
    pub network_snapshot_ticks: SnapshotCadence,
    /// Snapshot grid size `[width, height]` in images; derived from the resolution when absent.
    pub grid_size: Option<[usize; 2]>,
    pub schedule: ScheduleConfig,
    pub dataset: DatasetArgs,
    pub g_args: NetworkArgs,
    pub d_args: NetworkArgs,
    pub loss: LossArgs,
    pub g_opt: OptimizerArgs,
    pub d_opt: OptimizerArgs,
    pub metrics: Vec<MetricArgs>,
    pub resume: ResumeConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            run_desc: "stylegrow".to_string(),
            results_dir: PathBuf::from("results"),
            seed: 1000,
            num_replicas: 1,
            total_kimg: 25_000.0,
            g_ema_kimg: 10.0,
            ema_start_kimg: None,
            minibatch_repeats: 4,
            lazy_regularization: false,
            d_reg_interval: 4,
            reset_opt_for_new_lod: true,
            mirror_augment: false,
            drange_net: [-1.0, 1.0],
            image_snapshot_ticks: SnapshotCadence::Every(10),
            network_snapshot_ticks: SnapshotCadence::Every(10),
            grid_size: None,
            schedule: ScheduleConfig::default(),
            dataset: DatasetArgs::default(),
            g_args: NetworkArgs::default(),
            d_args: NetworkArgs::default(),
            loss: LossArgs::default(),
            g_opt: OptimizerArgs::default(),
            d_opt: OptimizerArgs::default(),
            metrics: Vec::new(),
            resume: ResumeConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.exists() {
            return Err(TrainingError::InvalidConfig(format!("config file not found: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    #[must_use]
    pub fn ema_start_kimg(&self) -> f64 {
        self.ema_start_kimg.unwrap_or(self.g_ema_kimg)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.run_desc.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("run_desc is required".to_string()));
        }
        if self.num_replicas == 0 {
            return Err(TrainingError::InvalidConfig("num_replicas must be >= 1".to_string()));
        }
        non_negative("total_kimg", self.total_kimg)?;
        if !self.g_ema_kimg.is_finite() {
            return Err(TrainingError::InvalidConfig(format!("g_ema_kimg must be finite, got {}", self.g_ema_kimg)));
        }
        if let Some(start) = self.ema_start_kimg {
            non_negative("ema_start_kimg", start)?;
        }
        if self.minibatch_repeats == 0 {
            return Err(TrainingError::InvalidConfig("minibatch_repeats must be >= 1".to_string()));
        }
        if self.lazy_regularization && self.d_reg_interval == 0 {
            return Err(TrainingError::InvalidConfig("d_reg_interval must be >= 1".to_string()));
        }
        if self.drange_net[0] == self.drange_net[1] {
            return Err(TrainingError::InvalidConfig("drange_net must span a non-empty range".to_string()));
        }
        non_negative("resume.kimg", self.resume.kimg)?;
        non_negative("resume.time_secs", self.resume.time_secs)?;
        if self.resume.with_new_nets && self.resume.pkl.is_none() {
            return Err(TrainingError::InvalidConfig("resume.with_new_nets requires resume.pkl".to_string()));
        }
        if self.loss.func_name.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("loss.func_name is required".to_string()));
        }
        self.schedule.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolution_table_exact_match_or_base() {
        let table: ResolutionTable<usize> = [(128, 16), (256, 8)].into_iter().collect();
        assert_eq!(table.lookup(128, 32), 16);
        assert_eq!(table.lookup(256, 32), 8);
        assert_eq!(table.lookup(192, 32), 32);
        assert_eq!(table.lookup(64, 32), 32);
    }

    #[test]
    fn test_parse_minimal_toml_uses_defaults() {
        let config: TrainingConfig = toml::from_str("total_kimg = 1.0\n").unwrap();
        assert_eq!(config.total_kimg, 1.0);
        assert_eq!(config.minibatch_repeats, 4);
        assert_eq!(config.schedule.tick_kimg_dict.get(8), Some(&28.0));
        assert_eq!(config.ema_start_kimg(), 10.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_resolution_overrides_and_cadence() {
        let config: TrainingConfig = toml::from_str(
            r#"
image_snapshot_ticks = "none"
network_snapshot_ticks = 5

[schedule]
lod_initial_resolution = 8
minibatch_size_base = 16

[schedule.minibatch_size_dict]
"8" = 64
"16" = 32
"#,
        )
        .unwrap();

        assert_eq!(config.image_snapshot_ticks, SnapshotCadence::FinalOnly);
        assert_eq!(config.network_snapshot_ticks, SnapshotCadence::Every(5));
        assert_eq!(config.schedule.minibatch_size_dict.lookup(8, 16), 64);
        assert_eq!(config.schedule.minibatch_size_dict.lookup(32, 16), 16);
    }

    #[test]
    fn test_rejects_zero_cadence_and_bad_keys() {
        assert!(toml::from_str::<TrainingConfig>("image_snapshot_ticks = 0\n").is_err());
        assert!(toml::from_str::<TrainingConfig>("[schedule.g_lrate_dict]\nbig = 0.1\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TrainingConfig { num_replicas: 0, ..Default::default() };
        assert!(config.validate().is_err());

        config.num_replicas = 1;
        config.schedule.lod_initial_resolution = Some(12);
        assert!(config.validate().is_err());

        config.schedule.lod_initial_resolution = Some(8);
        config.resume.with_new_nets = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_durations() {
        let mut config = TrainingConfig::default();
        config.schedule.lod_training_kimg = f64::NAN;
        assert!(config.validate().is_err());

        config.schedule.lod_training_kimg = 600.0;
        config.schedule.lrate_rampup_kimg = f64::NAN;
        assert!(config.validate().is_err());

        config.schedule.lrate_rampup_kimg = 0.0;
        config.g_ema_kimg = f64::INFINITY;
        assert!(config.validate().is_err());

        config.g_ema_kimg = 0.0;
        config.ema_start_kimg = Some(-1.0);
        assert!(config.validate().is_err());

        config.ema_start_kimg = Some(f64::NAN);
        assert!(config.validate().is_err());

        config.ema_start_kimg = Some(0.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut config = TrainingConfig::default();
        config.schedule.g_lrate_dict.insert(1024, 0.0015);
        config.image_snapshot_ticks = SnapshotCadence::FinalOnly;

        config.save_to_file(&path).unwrap();
        let loaded = TrainingConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_cadence_is_due() {
        assert!(SnapshotCadence::Every(10).is_due(0, false));
        assert!(!SnapshotCadence::Every(10).is_due(3, false));
        assert!(SnapshotCadence::Every(10).is_due(3, true));
        assert!(!SnapshotCadence::FinalOnly.is_due(0, false));
        assert!(SnapshotCadence::FinalOnly.is_due(7, true));
    }
}
