use std::path::PathBuf;

use serde::Serialize;

use crate::error::PipelineError;

/// One artifact per record, or one artifact for the whole input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Multi,
    Single,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Multi => f.write_str("multi"),
            Mode::Single => f.write_str("single"),
        }
    }
}

pub const DEFAULT_OUT_NAME: &str = "{index}.pdf";
pub const DEFAULT_ASSET_CACHE_MB: usize = quire_resource::DEFAULT_BUDGET_MB;

/// Everything a run needs to know.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// XML or JSON input file.
    pub input: PathBuf,
    /// Handlebars template file. Its directory is the base for relative assets.
    pub template: PathBuf,
    pub out_dir: PathBuf,
    /// File name pattern with `{index}` and `{field}` placeholders.
    pub out_name: String,
    pub mode: Mode,
    /// Where the records live inside the input, e.g. `invoices.invoice`.
    pub record_path: Option<String>,
    /// Renderer sessions working at the same time.
    pub concurrency: usize,
    /// Stop after this many records.
    pub limit: Option<usize>,
    /// Stream `<tag>` elements instead of loading the whole input.
    pub stream_tag: Option<String>,
    pub skip_page_count: bool,
    pub css: Option<PathBuf>,
    pub header_template: Option<PathBuf>,
    pub footer_template: Option<PathBuf>,
    /// Open every renderer session before the first record.
    pub warm_pool: bool,
    pub asset_cache_mb: usize,
    /// Expected record count for the progress bar when streaming.
    pub total_records: Option<usize>,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl RunOptions {
    pub fn new(
        input: impl Into<PathBuf>,
        template: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input: input.into(),
            template: template.into(),
            out_dir: out_dir.into(),
            out_name: DEFAULT_OUT_NAME.to_string(),
            mode: Mode::default(),
            record_path: None,
            concurrency: num_cpus::get(),
            limit: None,
            stream_tag: None,
            skip_page_count: false,
            css: None,
            header_template: None,
            footer_template: None,
            warm_pool: true,
            asset_cache_mb: DEFAULT_ASSET_CACHE_MB,
            total_records: None,
            show_progress: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_tag.is_some()
    }

    /// Best guess at the number of streamed records: the expected total, capped
    /// by the limit.
    pub fn stream_estimate(&self) -> usize {
        match (self.total_records, self.limit) {
            (Some(total), Some(limit)) => total.min(limit),
            (total, limit) => total.or(limit).unwrap_or(0),
        }
    }

    /// Rejects option combinations that can never produce a run.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.mode == Mode::Single && self.is_streaming() {
            return Err(PipelineError::Config(
                "Streaming with --mode=single is not supported.".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(PipelineError::Config("limit must be at least 1".to_string()));
        }
        if self.out_name.trim().is_empty() {
            return Err(PipelineError::Config("out_name must not be empty".to_string()));
        }
        if let Some(tag) = &self.stream_tag {
            let valid = !tag.is_empty()
                && tag
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
            if !valid {
                return Err(PipelineError::Config(format!(
                    "'{tag}' is not a valid element name for --stream-tag"
                )));
            }
        }
        if self.input.as_os_str().is_empty() || self.template.as_os_str().is_empty() {
            return Err(PipelineError::Config(
                "input and template are required".to_string(),
            ));
        }
        if self.out_dir.as_os_str().is_empty() {
            return Err(PipelineError::Config("out_dir is required".to_string()));
        }
        Ok(())
    }
}
