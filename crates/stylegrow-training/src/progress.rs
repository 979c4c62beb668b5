use crate::artifacts::ArtifactKind;
use crate::maintenance::TickReport;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: u32, run_dir: PathBuf, total_kimg: f64 },
    Tick { run_id: u32, report: TickReport },
    Artifact { run_id: u32, kind: ArtifactKind, path: PathBuf },
    Finished { run_id: u32, cur_nimg: u64, cancelled: bool },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, run_dir, total_kimg } => {
                tracing::info!("[run {run_id:05}] training for {total_kimg} kimg in {}", run_dir.display());
            }
            ProgressEvent::Tick { report, .. } => tracing::info!("{report}"),
            ProgressEvent::Artifact { run_id, kind, path } => {
                tracing::debug!("[run {run_id:05}] wrote {kind:?} {}", path.display());
            }
            ProgressEvent::Finished { run_id, cur_nimg, cancelled } => {
                if cancelled {
                    tracing::warn!("[run {run_id:05}] cancelled at {:.1} kimg", cur_nimg as f64 / 1000.0);
                } else {
                    tracing::info!("[run {run_id:05}] finished at {:.1} kimg", cur_nimg as f64 / 1000.0);
                }
            }
        }
    }
}

/// Keeps every event in memory; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
