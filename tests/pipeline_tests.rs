mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::fixtures::{
    INVOICE_TEMPLATE, write_flagged_records_json, write_invoices_xml, write_records_json,
    write_template,
};
use common::mock_engine::{MockLauncher, MockStats, RENDER_FAILURE_MARKER};
use common::pdf_assertions::{contains_text, page_count};
use common::{TestResult, artifact_names, init_logging, options_in, run_with};
use quire::pipeline::{ArtifactSink, FsSink};
use quire::{
    HandlebarsTemplate, Mode, PipelineBuilder, PipelineError, RecordTemplate, RunStatus,
    TemplateError,
};
use quire_render_lopdf::LopdfLauncher;
use quire_source::Record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fails for records flagged with `"fail": true`.
struct FlaggedFailure {
    inner: HandlebarsTemplate,
}

impl RecordTemplate for FlaggedFailure {
    fn render(&self, record: &Record) -> Result<String, TemplateError> {
        if record["fail"] == true {
            return Err(TemplateError::Render("record is flagged".to_string()));
        }
        self.inner.render(record)
    }
}

/// Panics for records flagged with `"fail": true`.
struct PanickingTemplate;

impl RecordTemplate for PanickingTemplate {
    fn render(&self, record: &Record) -> Result<String, TemplateError> {
        if record["fail"] == true {
            panic!("template blew up on record {}", record["id"]);
        }
        Ok(format!("<p>{}</p>", record["id"]))
    }
}

/// Counts jobs that have started work but not yet persisted their artifact.
#[derive(Default)]
struct JobsInProgress {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

struct EnteringTemplate {
    jobs: Arc<JobsInProgress>,
    inner: HandlebarsTemplate,
}

impl RecordTemplate for EnteringTemplate {
    fn render(&self, record: &Record) -> Result<String, TemplateError> {
        let now = self.jobs.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.max_live.fetch_max(now, Ordering::SeqCst);
        self.inner.render(record)
    }
}

struct LeavingSink {
    jobs: Arc<JobsInProgress>,
}

#[async_trait]
impl ArtifactSink for LeavingSink {
    async fn persist(&self, bytes: &[u8], path: &Path) -> std::io::Result<()> {
        let written = FsSink.persist(bytes, path).await;
        self.jobs.live.fetch_sub(1, Ordering::SeqCst);
        written
    }
}

fn flagged_failure() -> Arc<dyn RecordTemplate> {
    Arc::new(FlaggedFailure {
        inner: HandlebarsTemplate::compile("<p>{{customer}}</p>").unwrap(),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_mode_writes_one_pdf_per_record() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_invoices_xml(dir.path(), 3);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let options = options_in(dir.path(), &input, &template);

    let summary = run_with(options, Arc::new(LopdfLauncher::new()), None).await?;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!((summary.processed, summary.failed), (3, 0));
    assert_eq!(summary.mode, Mode::Multi);
    let out = dir.path().join("out");
    assert_eq!(artifact_names(&out), vec!["0.pdf", "1.pdf", "2.pdf"]);
    assert_eq!(summary.pages, 3);
    assert!(summary.total_bytes > 0);
    assert!(contains_text(&out.join("1.pdf"), "Invoice INV-001"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_mode_writes_one_combined_pdf() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_invoices_xml(dir.path(), 3);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let mut options = options_in(dir.path(), &input, &template);
    options.mode = Mode::Single;

    let summary = run_with(options, Arc::new(LopdfLauncher::new()), None).await?;

    assert_eq!((summary.processed, summary.failed), (3, 0));
    let out = dir.path().join("out");
    assert_eq!(artifact_names(&out), vec!["invoices.pdf"]);
    let combined = out.join("invoices.pdf");
    assert_eq!(page_count(&combined), 3);
    assert_eq!(summary.pages, 3);
    assert!(contains_text(&combined, "Invoice INV-000"));
    assert!(contains_text(&combined, "Invoice INV-002"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_template_failure_only_fails_its_record() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 3, Some(1));
    let template = write_template(dir.path(), "unused");
    let options = options_in(dir.path(), &input, &template);
    let (launcher, _) = MockLauncher::new(Duration::ZERO);

    let summary = run_with(options, launcher, Some(flagged_failure())).await?;

    assert_eq!(summary.status, RunStatus::Warning);
    assert_eq!((summary.processed, summary.failed), (2, 1));
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].index, 1);
    assert!(summary.errors[0].message.contains("record is flagged"));
    assert_eq!(
        artifact_names(&dir.path().join("out")),
        vec!["0.pdf", "2.pdf"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_job_is_isolated() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 4, Some(2));
    let template = write_template(dir.path(), "unused");
    let options = options_in(dir.path(), &input, &template);
    let (launcher, stats) = MockLauncher::new(Duration::from_millis(2));

    let summary = run_with(options, launcher, Some(Arc::new(PanickingTemplate))).await?;

    assert_eq!((summary.processed, summary.failed), (3, 1));
    assert_eq!(summary.errors[0].index, 2);
    assert!(summary.errors[0].message.contains("template blew up on record 2"));
    assert_eq!(MockStats::get(&stats.renders), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_render_failure_is_recorded() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 3, None);
    let template = write_template(
        dir.path(),
        &format!("{{{{#if (eq id 0)}}}}{RENDER_FAILURE_MARKER}{{{{/if}}}}<p>{{{{id}}}}</p>"),
    );
    let options = options_in(dir.path(), &input, &template);
    let (launcher, _) = MockLauncher::new(Duration::ZERO);

    let summary = run_with(options, launcher, None).await?;

    assert_eq!((summary.processed, summary.failed), (2, 1));
    assert_eq!(summary.errors[0].index, 0);
    assert!(summary.errors[0].message.contains("scripted failure"));
    Ok(())
}

#[tokio::test]
async fn test_streaming_single_mode_is_rejected_before_setup() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = write_invoices_xml(dir.path(), 3);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let mut options = options_in(dir.path(), &input, &template);
    options.mode = Mode::Single;
    options.stream_tag = Some("invoice".to_string());
    let (launcher, stats) = MockLauncher::new(Duration::ZERO);

    let err = run_with(options, launcher, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Config(_)));
    assert!(err.to_string().contains("Streaming with --mode=single is not supported."));
    assert_eq!(MockStats::get(&stats.launches), 0);
    assert!(!dir.path().join("out").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_streaming_renders_every_element() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_invoices_xml(dir.path(), 25);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let mut options = options_in(dir.path(), &input, &template);
    options.stream_tag = Some("invoice".to_string());
    options.out_name = "{id}".to_string();
    let (launcher, stats) = MockLauncher::new(Duration::from_millis(1));

    let summary = run_with(options, launcher, None).await?;

    assert_eq!((summary.processed, summary.failed), (25, 0));
    let names = artifact_names(&dir.path().join("out"));
    assert_eq!(names.len(), 25);
    assert_eq!(names[0], "INV-000.pdf");
    assert!(MockStats::get(&stats.max_in_flight) <= 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_streaming_holds_at_most_two_jobs_per_session() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_invoices_xml(dir.path(), 20);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let mut options = options_in(dir.path(), &input, &template);
    options.concurrency = 1;
    options.stream_tag = Some("invoice".to_string());
    // Rendering is far slower than reading the next element.
    let (launcher, stats) = MockLauncher::new(Duration::from_millis(10));
    let jobs = Arc::new(JobsInProgress::default());

    let summary = PipelineBuilder::new(options)
        .with_launcher(launcher)
        .with_template(Arc::new(EnteringTemplate {
            jobs: jobs.clone(),
            inner: HandlebarsTemplate::compile(INVOICE_TEMPLATE)?,
        }))
        .with_sink(Arc::new(LeavingSink { jobs: jobs.clone() }))
        .build()
        .await?
        .run()
        .await?;

    assert_eq!((summary.processed, summary.failed), (20, 0));
    assert_eq!(MockStats::get(&stats.max_in_flight), 1);
    let max_live = jobs.max_live.load(Ordering::SeqCst);
    assert!((1..=2).contains(&max_live), "{max_live} jobs were in progress at once");
    assert_eq!(jobs.live.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scattered_failures_are_all_reported() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let flags: Vec<bool> = (0..40).map(|_| rng.random_bool(0.3)).collect();
    let failing: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter(|(_, fail)| **fail)
        .map(|(i, _)| i)
        .collect();
    let input = write_flagged_records_json(dir.path(), &flags);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);
    let mut options = options_in(dir.path(), &input, &template);
    options.concurrency = 4;
    let (launcher, stats) = MockLauncher::new(Duration::from_millis(1));

    let summary = run_with(options, launcher, Some(flagged_failure())).await?;

    assert_eq!(summary.failed, failing.len());
    assert_eq!(summary.processed, flags.len() - failing.len());
    let reported: Vec<usize> = summary.errors.iter().map(|e| e.index).collect();
    assert_eq!(reported, failing);
    assert_eq!(
        artifact_names(&dir.path().join("out")).len(),
        flags.len() - failing.len()
    );
    assert!(MockStats::get(&stats.max_in_flight) <= 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limit_stops_new_records() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_invoices_xml(dir.path(), 10);
    let template = write_template(dir.path(), INVOICE_TEMPLATE);

    let mut batch = options_in(dir.path(), &input, &template);
    batch.limit = Some(4);
    let (launcher, _) = MockLauncher::new(Duration::ZERO);
    let summary = run_with(batch, launcher, None).await?;
    assert_eq!(summary.processed, 4);

    let mut streaming = options_in(dir.path(), &input, &template);
    streaming.out_dir = dir.path().join("streamed");
    streaming.stream_tag = Some("invoice".to_string());
    streaming.limit = Some(3);
    let (launcher, stats) = MockLauncher::new(Duration::ZERO);
    let summary = run_with(streaming, launcher, None).await?;
    assert_eq!(summary.processed, 3);
    assert_eq!(MockStats::get(&stats.renders), 3);
    assert_eq!(artifact_names(&dir.path().join("streamed")).len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_render_concurrency_never_exceeds_pool_capacity() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 40, None);
    let template = write_template(dir.path(), "<p>{{id}}</p>");
    let mut options = options_in(dir.path(), &input, &template);
    options.concurrency = 3;
    let (launcher, stats) = MockLauncher::new(Duration::from_millis(3));

    let summary = run_with(options, launcher, None).await?;

    assert_eq!(summary.processed, 40);
    assert!(MockStats::get(&stats.max_in_flight) <= 3);
    assert!(MockStats::get(&stats.sessions_opened) <= 3);
    // The pool is torn down at the end of every run.
    assert_eq!(
        MockStats::get(&stats.sessions_closed),
        MockStats::get(&stats.sessions_opened)
    );
    assert_eq!(MockStats::get(&stats.shutdowns), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_runs_report_the_same_counts() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 12, Some(5));
    let template = write_template(dir.path(), "unused");

    let mut previous = None;
    for _ in 0..3 {
        let options = options_in(dir.path(), &input, &template);
        let (launcher, _) = MockLauncher::new(Duration::from_millis(1));
        let summary = run_with(options, launcher, Some(flagged_failure())).await?;
        let counts = (summary.processed, summary.failed, summary.pages, summary.total_bytes);
        if let Some(previous) = previous {
            assert_eq!(counts, previous);
        }
        previous = Some(counts);
    }
    assert_eq!(artifact_names(&dir.path().join("out")).len(), 11);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_mode_leaves_out_failed_records() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 3, Some(0));
    let template = write_template(dir.path(), "unused");
    let mut options = options_in(dir.path(), &input, &template);
    options.mode = Mode::Single;
    let (launcher, _) = MockLauncher::new(Duration::ZERO);

    let summary = run_with(options, launcher, Some(flagged_failure())).await?;

    assert_eq!((summary.processed, summary.failed), (2, 1));
    assert_eq!(summary.pages, 2);
    assert_eq!(artifact_names(&dir.path().join("out")), vec!["records.pdf"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_assets_are_cached_across_records() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G'])?;
    let input = write_records_json(dir.path(), 6, None);
    let template = write_template(dir.path(), r#"<img src="logo.png" alt="Logo"><p>{{id}}</p>"#);
    let mut options = options_in(dir.path(), &input, &template);
    options.concurrency = 1;

    let summary = run_with(options, Arc::new(LopdfLauncher::new()), None).await?;

    assert_eq!(summary.processed, 6);
    assert_eq!(summary.asset_cache.misses, 1);
    assert_eq!(summary.asset_cache.hits, 5);
    Ok(())
}

#[tokio::test]
async fn test_summary_serializes_for_the_cli() -> TestResult {
    init_logging();
    let dir = tempfile::tempdir()?;
    let input = write_records_json(dir.path(), 2, None);
    let template = write_template(dir.path(), "<p>{{id}}</p>");
    let mut options = options_in(dir.path(), &input, &template);
    options.warm_pool = false;
    options.skip_page_count = true;
    let (launcher, _) = MockLauncher::new(Duration::ZERO);

    let summary = run_with(options, launcher, None).await?;
    let json = serde_json::to_value(&summary)?;

    assert_eq!(json["status"], "success");
    assert_eq!(json["processed"], 2);
    assert_eq!(json["pages"], 0);
    assert!(json["input"].as_str().unwrap().ends_with("records.json"));
    Ok(())
}
