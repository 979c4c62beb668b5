//! Metric collaborator interface and the group that runs metrics against snapshots.

use crate::error::{TrainingError, TrainingResult};
use crate::summary::{format_time, SummaryLog};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A quality metric evaluated against a saved checkpoint.
pub trait Metric: Send {
    fn name(&self) -> &str;

    fn run(&mut self, checkpoint: &Path, run_dir: &Path, num_replicas: usize) -> TrainingResult<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
    pub name: String,
    pub value: f64,
    pub checkpoint: PathBuf,
    pub elapsed_secs: f64,
}

type MetricConstructor = Box<dyn Fn() -> Box<dyn Metric> + Send + Sync>;

/// Metrics looked up by name.
#[derive(Default)]
pub struct MetricRegistry {
    constructors: BTreeMap<String, MetricConstructor>,
}

impl MetricRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Metric> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn create(&self, name: &str) -> TrainingResult<Box<dyn Metric>> {
        self.constructors.get(name).map(|c| c()).ok_or_else(|| {
            let known: Vec<_> = self.constructors.keys().map(String::as_str).collect();
            TrainingError::Metric(format!("unknown metric {name:?} (known: {})", known.join(", ")))
        })
    }
}

/// The configured set of metrics for one run.
#[derive(Default)]
pub struct MetricGroup {
    metrics: Vec<Box<dyn Metric>>,
    pending: Vec<MetricResult>,
}

impl MetricGroup {
    #[must_use]
    pub fn new(metrics: Vec<Box<dyn Metric>>) -> Self {
        Self { metrics, pending: Vec::new() }
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>, registry: &MetricRegistry) -> TrainingResult<Self> {
        let metrics = names.into_iter().map(|n| registry.create(n)).collect::<TrainingResult<Vec<_>>>()?;
        Ok(Self::new(metrics))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name())
    }

    /// Evaluate every metric on `checkpoint` and append a line per metric to `metric-{name}.txt`.
    pub fn run(&mut self, checkpoint: &Path, run_dir: &Path, num_replicas: usize) -> TrainingResult<Vec<MetricResult>> {
        let snapshot_name = checkpoint.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let mut results = Vec::with_capacity(self.metrics.len());
        for metric in &mut self.metrics {
            let start = Instant::now();
            let value = metric.run(checkpoint, run_dir, num_replicas)?;
            let result = MetricResult {
                name: metric.name().to_string(),
                value,
                checkpoint: checkpoint.to_path_buf(),
                elapsed_secs: start.elapsed().as_secs_f64(),
            };

            let line = format!(
                "{:<30}time {:<12} {} {:.4}",
                snapshot_name,
                format_time(result.elapsed_secs),
                result.name,
                result.value
            );
            tracing::info!("{line}");
            let path = metric_log_path(run_dir, &result.name);
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")?;

            results.push(result);
        }
        self.pending.extend(results.iter().cloned());
        Ok(results)
    }

    /// Move results gathered since the last call into the summary log as `Metrics/{name}`.
    pub fn update_summaries(&mut self, summary: &mut SummaryLog) {
        for result in self.pending.drain(..) {
            summary.record(&format!("Metrics/{}", result.name), result.value);
        }
    }
}

#[must_use]
pub fn metric_log_path(run_dir: &Path, name: &str) -> PathBuf {
    run_dir.join(format!("metric-{name}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Constant(f64);

    impl Metric for Constant {
        fn name(&self) -> &str {
            "const"
        }

        fn run(&mut self, _checkpoint: &Path, _run_dir: &Path, _num_replicas: usize) -> TrainingResult<f64> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_run_appends_metric_file_and_feeds_summaries() {
        let temp = TempDir::new().unwrap();
        let mut group = MetricGroup::new(vec![Box::new(Constant(0.25))]);
        let ckpt = temp.path().join("network-snapshot-000004.pkl");

        group.run(&ckpt, temp.path(), 1).unwrap();
        group.run(&ckpt, temp.path(), 1).unwrap();

        let text = std::fs::read_to_string(metric_log_path(temp.path(), "const")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("network-snapshot-000004"));
        assert!(lines[0].ends_with("const 0.2500"));

        let mut summary = SummaryLog::in_memory();
        group.update_summaries(&mut summary);
        assert_eq!(summary.stats()["Metrics/const"].num, 2);
        group.update_summaries(&mut summary);
        assert_eq!(summary.stats()["Metrics/const"].num, 2);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = MetricRegistry::new();
        registry.register("const", || Box::new(Constant(1.0)));
        let group = MetricGroup::from_names(["const"], &registry).unwrap();
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["const"]);
        assert!(MetricGroup::from_names(["fid50k"], &registry).is_err());
    }
}
