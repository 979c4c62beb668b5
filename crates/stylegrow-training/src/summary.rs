//! Scalar summary statistics, accumulated between ticks and flushed as JSON lines.

use crate::error::TrainingResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    num: u64,
    sum: f64,
    sum_sq: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryStat {
    pub num: u64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Serialize)]
struct SummaryRecord<'a> {
    nimg: u64,
    kimg: f64,
    stats: &'a BTreeMap<String, SummaryStat>,
}

/// Named scalar statistics for the current tick.
#[derive(Debug, Default)]
pub struct SummaryLog {
    path: Option<PathBuf>,
    pending: BTreeMap<String, Accumulator>,
}

impl SummaryLog {
    /// Summaries appended to `path`, one JSON object per flush.
    #[must_use]
    pub fn to_file(path: &Path) -> Self {
        Self { path: Some(path.to_path_buf()), pending: BTreeMap::new() }
    }

    /// Summaries that are computed but never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `value` under `name` and return it, so calls can be inlined in reports.
    pub fn record(&mut self, name: &str, value: f64) -> f64 {
        if value.is_finite() {
            let acc = self.pending.entry(name.to_string()).or_default();
            acc.num += 1;
            acc.sum += value;
            acc.sum_sq += value * value;
        }
        value
    }

    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, SummaryStat> {
        self.pending
            .iter()
            .map(|(name, acc)| {
                let n = acc.num as f64;
                let mean = acc.sum / n;
                let var = (acc.sum_sq / n - mean * mean).max(0.0);
                (name.clone(), SummaryStat { num: acc.num, mean, std: var.sqrt() })
            })
            .collect()
    }

    /// Write pending statistics (if a file is attached) and clear them.
    pub fn flush(&mut self, cur_nimg: u64) -> TrainingResult<BTreeMap<String, SummaryStat>> {
        let stats = self.stats();
        self.pending.clear();
        if let Some(path) = &self.path {
            let record = SummaryRecord { nimg: cur_nimg, kimg: cur_nimg as f64 / 1000.0, stats: &stats };
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }
        Ok(stats)
    }
}

/// Human-readable duration: `"12s"`, `"3m 05s"`, `"2h 03m 05s"`, `"1d 02h 03m"`.
#[must_use]
pub fn format_time(seconds: f64) -> String {
    let s = seconds.max(0.0).round() as u64;
    if s < 60 {
        format!("{s}s")
    } else if s < 60 * 60 {
        format!("{}m {:02}s", s / 60, s % 60)
    } else if s < 24 * 60 * 60 {
        format!("{}h {:02}m {:02}s", s / 3600, (s / 60) % 60, s % 60)
    } else {
        format!("{}d {:02}h {:02}m", s / 86_400, (s / 3600) % 24, (s / 60) % 60)
    }
}
