use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Timing for one stage of a pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTiming {
    pub runs: u64,
    pub avg_duration: Duration,
    pub total_duration: Duration,
    pub last_run: Option<DateTime<Utc>>,
}

/// Per-pipeline execution counters.
///
/// Stages appear in the order they first ran, which is plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    pub stages: IndexMap<String, StageTiming>,
    pub documents_annotated: u64,
    pub failures: u64,
}

impl PipelineMetrics {
    /// Record one stage execution.
    pub fn record_stage(&mut self, stage: &str, duration: Duration) {
        let timing = self.stages.entry(stage.to_string()).or_default();
        timing.runs += 1;
        timing.total_duration += duration;
        timing.last_run = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        timing.avg_duration = if timing.runs == 1 {
            duration
        } else {
            let prev_nanos = timing.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / timing.runs as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Record a finished document.
    pub fn record_document(&mut self, succeeded: bool) {
        self.documents_annotated += 1;
        if !succeeded {
            self.failures += 1;
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.values().map(|t| t.total_duration).sum()
    }

    /// Human-readable timing table.
    pub fn summary(&self) -> String {
        let mut out = String::from("Annotation pipeline timing information:\n");
        for (stage, timing) in &self.stages {
            let _ = writeln!(
                out,
                "{stage}: {:.3} sec total, {:.1} ms avg over {} runs",
                timing.total_duration.as_secs_f64(),
                timing.avg_duration.as_secs_f64() * 1000.0,
                timing.runs,
            );
        }
        let _ = write!(
            out,
            "TOTAL: {:.3} sec for {} documents ({} failed)",
            self.total_duration().as_secs_f64(),
            self.documents_annotated,
            self.failures,
        );
        out
    }
}
