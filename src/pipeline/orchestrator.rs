// src/pipeline/orchestrator.rs
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use quire_source::{ElementStream, Record, load_records};
use tokio::task::JoinSet;

use super::concurrency::{ConcurrencyGate, SenderGuard};
use super::config::{Mode, RunOptions};
use super::context::PipelineContext;
use super::output::single_file_name;
use super::progress::RunProgress;
use super::summary::{JobSummary, SummaryRecorder};
use super::worker::{
    OutcomeReceiver, batch_worker, isolated, render_document, render_fragment,
};
use crate::error::{JobError, PipelineError};
use crate::templating::{PAGE_BREAK, wrap_document};

/// Progress is logged every this many finished records.
const PROGRESS_EVERY: usize = 100;

/// A configured run, ready to ingest its input.
///
/// Built by [`PipelineBuilder`](super::PipelineBuilder). [`run`](Self::run) consumes
/// the pipeline: the renderer pool is torn down at the end of every run.
pub struct DocumentPipeline {
    context: PipelineContext,
    options: RunOptions,
    setup: Duration,
}

impl DocumentPipeline {
    pub(crate) fn new(context: PipelineContext, options: RunOptions, setup: Duration) -> Self {
        Self {
            context,
            options,
            setup,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Ingests every record, then reports.
    ///
    /// Record failures end up in the summary; only setup and ingestion errors are
    /// returned as `Err`. The pool is destroyed either way.
    pub async fn run(self) -> Result<JobSummary, PipelineError> {
        let mut setup = self.setup;
        let pool = self.context.pool.clone();

        if self.options.warm_pool {
            let warm_start = Instant::now();
            if let Err(e) = pool.initialize().await {
                pool.destroy().await;
                return Err(e.into());
            }
            setup += warm_start.elapsed();
        }

        info!(
            "Starting {} run: input={}, concurrency={}",
            self.options.mode,
            self.options.input.display(),
            self.options.concurrency
        );
        let processing_start = Instant::now();
        let ingested = self.ingest().await;
        pool.destroy().await;
        let recorder = ingested?;
        let processing = processing_start.elapsed();

        let summary = recorder.finish(
            &self.options.input,
            &self.options.out_dir,
            self.options.mode,
            setup,
            processing,
            self.context.asset_cache().stats(),
        );
        summary.log_timing();
        Ok(summary)
    }

    async fn ingest(&self) -> Result<SummaryRecorder, PipelineError> {
        match (&self.options.stream_tag, self.options.mode) {
            (Some(tag), Mode::Multi) => self.ingest_stream(tag).await,
            (Some(_), Mode::Single) => Err(PipelineError::Config(
                "Streaming with --mode=single is not supported.".to_string(),
            )),
            (None, Mode::Single) => self.ingest_single().await,
            (None, Mode::Multi) => self.ingest_batch().await,
        }
    }

    fn progress(&self, total: usize) -> RunProgress {
        RunProgress::new(total as u64, self.options.show_progress)
    }

    async fn load(&self) -> Result<Vec<Record>, PipelineError> {
        let mut records =
            load_records(&self.options.input, self.options.record_path.as_deref()).await?;
        if let Some(limit) = self.options.limit {
            records.truncate(limit);
        }
        info!("Records: {}", records.len());
        Ok(records)
    }

    async fn ingest_batch(&self) -> Result<SummaryRecorder, PipelineError> {
        let records = Arc::new(self.load().await?);
        let total = records.len();
        if total == 0 {
            return Ok(SummaryRecorder::new());
        }

        let (tx, rx) = async_channel::bounded(self.options.concurrency * 2);
        let guard = SenderGuard::new(tx);
        let collector = tokio::spawn(collect_outcomes(rx, self.progress(total)));

        let cursor = Arc::new(AtomicUsize::new(0));
        let worker_count = self.options.concurrency.min(total);
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(batch_worker(
                worker_id,
                self.context.clone(),
                records.clone(),
                cursor.clone(),
                guard.sender().clone(),
            ));
        }
        debug!("[PRODUCER] {} workers started for {} records", worker_count, total);
        guard.close();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("[PRODUCER] Worker task ended abnormally: {}", e);
            }
        }
        collector
            .await
            .map_err(|e| PipelineError::Aborted(format!("outcome collector failed: {e}")))
    }

    async fn ingest_stream(&self, tag: &str) -> Result<SummaryRecorder, PipelineError> {
        let gate = ConcurrencyGate::new(self.options.concurrency * 2)?;
        let mut stream = ElementStream::open(&self.options.input, tag).await?;

        let (tx, rx) = async_channel::bounded(self.options.concurrency * 2);
        let guard = SenderGuard::new(tx);
        let progress = self.progress(self.options.stream_estimate());
        let collector = tokio::spawn(collect_outcomes(rx, progress));

        let mut jobs = JoinSet::new();
        let mut fatal = None;
        let mut dispatched = 0usize;
        loop {
            if self.options.limit.is_some_and(|limit| dispatched >= limit) {
                debug!("[PRODUCER] Limit of {} records reached", dispatched);
                break;
            }
            let fragment = match stream.next_fragment().await {
                Ok(Some(fragment)) => fragment,
                Ok(None) => break,
                Err(e) => {
                    fatal = Some(PipelineError::from(e));
                    break;
                }
            };
            let permit = match gate.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            };

            let index = dispatched;
            dispatched += 1;
            let ctx = self.context.clone();
            let tag = tag.to_string();
            let sender = guard.sender().clone();
            jobs.spawn(async move {
                let _permit = permit;
                let outcome = isolated(index, async move {
                    render_fragment(&ctx, index, &fragment, &tag).await
                })
                .await;
                if sender.send(outcome).await.is_err() {
                    warn!("[JOB-{}] Outcome dropped, collector is gone", index);
                }
            });

            while let Some(joined) = jobs.try_join_next() {
                if let Err(e) = joined {
                    warn!("[PRODUCER] Job task ended abnormally: {}", e);
                }
            }
            debug!(
                "[PRODUCER] Dispatched {} records, {} in flight, {} waiting for the gate",
                dispatched,
                jobs.len(),
                gate.queue_length()
            );
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                warn!("[PRODUCER] Job task ended abnormally: {}", e);
            }
        }
        guard.close();
        let recorder = collector
            .await
            .map_err(|e| PipelineError::Aborted(format!("outcome collector failed: {e}")))?;
        if let Some(e) = fatal {
            return Err(e);
        }
        info!("[PRODUCER] Done. {} records streamed", dispatched);
        Ok(recorder)
    }

    /// Every record's markup in one document, rendered with a single lease.
    async fn ingest_single(&self) -> Result<SummaryRecorder, PipelineError> {
        let records = self.load().await?;
        let progress = self.progress(records.len());
        let mut recorder = SummaryRecorder::new();
        let mut parts = Vec::with_capacity(records.len());
        let mut included = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match self.context.template.render(record) {
                Ok(markup) => {
                    parts.push(markup);
                    included.push(index);
                }
                Err(e) => recorder.record_failure(index, &JobError::Template(e)),
            }
            progress.inc();
        }
        progress.finish();
        if parts.is_empty() {
            return Ok(recorder);
        }

        let body = parts.join(&format!("\n{PAGE_BREAK}\n"));
        let document = wrap_document(&body, self.context.base_url(), &self.context.css);
        let path = self
            .options
            .out_dir
            .join(single_file_name(&self.options.input));
        let ctx = self.context.clone();
        let outcome = isolated(0, async move { render_document(&ctx, 0, &document, path).await }).await;
        match outcome.result {
            Ok(rendered) => {
                info!(
                    "Wrote combined document of {} records to {}",
                    included.len(),
                    rendered.path.display()
                );
                recorder.record_combined_success(included.len(), rendered.bytes, rendered.pages);
            }
            Err(e) => recorder.record_combined_failure(&included, &e),
        }
        Ok(recorder)
    }
}

/// Owns the running summary and the progress bar while jobs report in.
async fn collect_outcomes(outcomes: OutcomeReceiver, progress: RunProgress) -> SummaryRecorder {
    let mut recorder = SummaryRecorder::new();
    while let Ok(outcome) = outcomes.recv().await {
        match outcome.result {
            Ok(rendered) => {
                debug!("[JOB-{}] Wrote {}", outcome.index, rendered.path.display());
                recorder.record_success(rendered.bytes, rendered.pages);
            }
            Err(e) => recorder.record_failure(outcome.index, &e),
        }
        progress.inc();
        let finished = recorder.processed() + recorder.failed();
        if finished % PROGRESS_EVERY == 0 {
            progress.suspend(|| {
                info!(
                    "[CONSUMER] {} records done ({} failed)",
                    finished,
                    recorder.failed()
                )
            });
        }
    }
    progress.finish();
    recorder
}
