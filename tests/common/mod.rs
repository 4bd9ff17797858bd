pub mod fixtures;
pub mod mock_engine;
pub mod pdf_assertions;

use std::path::Path;
use std::sync::Arc;

use quire::{JobSummary, PipelineBuilder, PipelineError, RecordTemplate, RunOptions};
use quire_traits::EngineLauncher;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options for a run over `input` with a template next to it, writing to `<dir>/out`.
pub fn options_in(dir: &Path, input: &Path, template: &Path) -> RunOptions {
    let mut options = RunOptions::new(input, template, dir.join("out"));
    options.concurrency = 2;
    options
}

/// Runs a pipeline with the given launcher and, optionally, an injected template.
pub async fn run_with(
    options: RunOptions,
    launcher: Arc<dyn EngineLauncher>,
    template: Option<Arc<dyn RecordTemplate>>,
) -> Result<JobSummary, PipelineError> {
    let mut builder = PipelineBuilder::new(options).with_launcher(launcher);
    if let Some(template) = template {
        builder = builder.with_template(template);
    }
    builder.build().await?.run().await
}

/// Sorted file names of the artifacts in `dir`.
pub fn artifact_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
