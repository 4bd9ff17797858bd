use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info};
use quire_resource::CacheStats;
use serde::Serialize;

use super::config::Mode;
use crate::error::JobError;

/// Failures kept in the summary; later ones are only counted.
pub const MAX_REPORTED_FAILURES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub index: usize,
    pub message: String,
}

/// Outcome of a run without fatal errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub status: RunStatus,
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: Mode,
    pub processed: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub pages: usize,
    pub setup_ms: u64,
    pub processing_ms: u64,
    pub time_ms: u64,
    pub pdfs_per_sec: f64,
    pub pages_per_sec: f64,
    pub asset_cache: CacheStats,
    pub errors: Vec<RecordFailure>,
}

impl JobSummary {
    /// Writes the end-of-run timing block to the log.
    pub fn log_timing(&self) {
        info!("[SUMMARY] ---------------------------------");
        info!("[SUMMARY] Status:      {:?}", self.status);
        info!(
            "[SUMMARY] Documents:   {} written, {} failed",
            self.processed, self.failed
        );
        info!("[SUMMARY] Pages:       {}", self.pages);
        info!("[SUMMARY] Bytes:       {}", self.total_bytes);
        info!("[SUMMARY] Setup:       {} ms", self.setup_ms);
        info!("[SUMMARY] Processing:  {} ms", self.processing_ms);
        info!("[SUMMARY] Total:       {} ms", self.time_ms);
        info!(
            "[SUMMARY] Throughput:  {:.2} pdf/s, {:.2} pages/s",
            self.pdfs_per_sec, self.pages_per_sec
        );
        info!("[SUMMARY] Asset cache: {}", self.cache_line());
        info!("[SUMMARY] ---------------------------------");
    }

    fn cache_line(&self) -> String {
        format!(
            "{} hits, {} misses, {} evictions, {:.1}% hit rate",
            self.asset_cache.hits,
            self.asset_cache.misses,
            self.asset_cache.evictions,
            self.asset_cache.hit_rate()
        )
    }
}

/// Running totals, owned by the orchestrator while jobs report in.
#[derive(Debug, Default)]
pub struct SummaryRecorder {
    processed: usize,
    failed: usize,
    total_bytes: u64,
    pages: usize,
    errors: Vec<RecordFailure>,
}

impl SummaryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, bytes: usize, pages: usize) {
        self.processed += 1;
        self.total_bytes += bytes as u64;
        self.pages += pages;
    }

    pub fn record_failure(&mut self, index: usize, err: &JobError) {
        error!("[JOB-{}] Failed to process record: {}", index, err);
        self.failed += 1;
        self.errors.push(RecordFailure {
            index,
            message: err.to_string(),
        });
        if self.errors.len() >= 2 * MAX_REPORTED_FAILURES {
            self.trim_errors();
        }
    }

    /// One combined artifact holding `records` records.
    pub fn record_combined_success(&mut self, records: usize, bytes: usize, pages: usize) {
        self.processed += records;
        self.total_bytes += bytes as u64;
        self.pages += pages;
    }

    /// The same failure for several records at once.
    pub fn record_combined_failure(&mut self, indices: &[usize], err: &JobError) {
        error!(
            "[JOB-0] Combined document of {} records failed: {}",
            indices.len(),
            err
        );
        let message = err.to_string();
        self.failed += indices.len();
        for &index in indices.iter().take(MAX_REPORTED_FAILURES) {
            self.errors.push(RecordFailure {
                index,
                message: message.clone(),
            });
        }
        self.trim_errors();
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    fn trim_errors(&mut self) {
        self.errors.sort_by_key(|f| f.index);
        self.errors.truncate(MAX_REPORTED_FAILURES);
    }

    pub fn finish(
        mut self,
        input: &Path,
        output: &Path,
        mode: Mode,
        setup: Duration,
        processing: Duration,
        asset_cache: CacheStats,
    ) -> JobSummary {
        self.trim_errors();
        let status = match (self.processed, self.failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Error,
            _ => RunStatus::Warning,
        };
        let seconds = processing.as_secs_f64();
        let rate = |count: usize| {
            if seconds > 0.0 {
                count as f64 / seconds
            } else {
                0.0
            }
        };
        JobSummary {
            status,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            mode,
            processed: self.processed,
            failed: self.failed,
            total_bytes: self.total_bytes,
            pages: self.pages,
            setup_ms: setup.as_millis() as u64,
            processing_ms: processing.as_millis() as u64,
            time_ms: (setup + processing).as_millis() as u64,
            pdfs_per_sec: rate(self.processed),
            pages_per_sec: rate(self.pages),
            asset_cache,
            errors: self.errors,
        }
    }
}
