// src/pipeline/worker.rs
//!
//! One job = one record turned into one persisted artifact.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, trace, warn};
use quire_source::{Record, fragment_record};
use quire_traits::RenderRequest;

use super::context::PipelineContext;
use super::output::output_file_name;
use super::page_count::count_pages;
use super::pool::RendererLease;
use crate::error::JobError;
use crate::templating::wrap_document;

/// A persisted artifact.
#[derive(Debug, Clone)]
pub(crate) struct Rendered {
    pub path: PathBuf,
    pub bytes: usize,
    pub pages: usize,
}

/// What a job reports back to the orchestrator.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub index: usize,
    pub result: Result<Rendered, JobError>,
}

pub(crate) type OutcomeSender = async_channel::Sender<JobOutcome>;
pub(crate) type OutcomeReceiver = async_channel::Receiver<JobOutcome>;

/// Renders `document` with a leased session and persists it to `path`.
///
/// The lease goes back to the pool whatever happens after it was acquired.
pub(crate) async fn render_document(
    ctx: &PipelineContext,
    index: usize,
    document: &str,
    path: PathBuf,
) -> Result<Rendered, JobError> {
    let waited = Instant::now();
    let mut lease = ctx.pool.acquire().await?;
    trace!("[JOB-{}] renderer acquired after {:?}", index, waited.elapsed());

    let result = render_and_persist(ctx, index, &mut lease, document, path).await;

    ctx.pool.release(lease).await;
    trace!("[JOB-{}] renderer released", index);
    result
}

async fn render_and_persist(
    ctx: &PipelineContext,
    index: usize,
    lease: &mut RendererLease,
    document: &str,
    path: PathBuf,
) -> Result<Rendered, JobError> {
    let started = Instant::now();
    let bytes = lease
        .render(RenderRequest::new(document, &ctx.render_options), ctx.loader.as_ref())
        .await?;
    debug!("[JOB-{}] rendered {} bytes in {:?}", index, bytes.len(), started.elapsed());

    let pages = if ctx.skip_page_count {
        0
    } else {
        count_pages(&bytes)
    };
    if let Err(source) = ctx.sink.persist(&bytes, &path).await {
        return Err(JobError::Write { path, source });
    }
    Ok(Rendered {
        path,
        bytes: bytes.len(),
        pages,
    })
}

/// Template, wrap, render, persist.
pub(crate) async fn render_record(
    ctx: &PipelineContext,
    index: usize,
    record: &Record,
) -> Result<Rendered, JobError> {
    let fragment = ctx.template.render(record)?;
    let document = wrap_document(&fragment, ctx.base_url(), &ctx.css);
    let path = ctx.out_dir.join(output_file_name(&ctx.out_name, index, record));
    render_document(ctx, index, &document, path).await
}

/// Decodes a streamed `<tag>` fragment, then renders it like any other record.
pub(crate) async fn render_fragment(
    ctx: &PipelineContext,
    index: usize,
    fragment: &[u8],
    tag: &str,
) -> Result<Rendered, JobError> {
    let record = fragment_record(fragment, tag)?;
    render_record(ctx, index, &record).await
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

/// Runs a job on its own task so a panic only fails this record.
pub(crate) async fn isolated<F>(index: usize, job: F) -> JobOutcome
where
    F: Future<Output = Result<Rendered, JobError>> + Send + 'static,
{
    let result = match tokio::spawn(job).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(JobError::Panicked(e.to_string())),
    };
    JobOutcome { index, result }
}

/// Batch worker: claims record indices from a shared cursor until none are left.
pub(crate) async fn batch_worker(
    worker_id: usize,
    ctx: PipelineContext,
    records: Arc<Vec<Record>>,
    cursor: Arc<AtomicUsize>,
    outcomes: OutcomeSender,
) {
    debug!("[WORKER-{}] started", worker_id);
    let mut handled = 0;
    loop {
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        if index >= records.len() {
            break;
        }
        let job_ctx = ctx.clone();
        let job_records = records.clone();
        let outcome = isolated(index, async move {
            render_record(&job_ctx, index, &job_records[index]).await
        })
        .await;
        handled += 1;
        if outcomes.send(outcome).await.is_err() {
            warn!("[WORKER-{}] outcome channel closed, stopping", worker_id);
            break;
        }
    }
    debug!("[WORKER-{}] finished after {} records", worker_id, handled);
}
