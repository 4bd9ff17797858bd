// src/pipeline/builder.rs
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use quire_render_lopdf::LopdfLauncher;
use quire_resource::{AssetCache, CachingLoader, FilesystemResourceProvider};
use quire_traits::{EngineLauncher, RenderOptions, ResourceProvider};
use url::Url;

use super::config::RunOptions;
use super::context::PipelineContext;
use super::orchestrator::DocumentPipeline;
use super::output::{ArtifactSink, FsSink};
use super::pool::RendererPool;
use crate::error::PipelineError;
use crate::templating::{HandlebarsTemplate, RecordTemplate};

/// A builder for creating a [`DocumentPipeline`].
///
/// Every collaborator has a default: the lopdf renderer, a Handlebars template read
/// from `options.template`, the filesystem sink and a filesystem resource provider
/// rooted at the template's directory.
pub struct PipelineBuilder {
    options: RunOptions,
    launcher: Option<Arc<dyn EngineLauncher>>,
    template: Option<Arc<dyn RecordTemplate>>,
    sink: Option<Arc<dyn ArtifactSink>>,
    provider: Option<Arc<dyn ResourceProvider>>,
}

fn read_file(path: &Path, what: &str) -> Result<String, PipelineError> {
    std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Io(io::Error::new(
            e.kind(),
            format!("Failed to read {} from '{}': {}", what, path.display(), e),
        ))
    })
}

fn read_optional(path: Option<&PathBuf>, what: &str) -> Result<Option<String>, PipelineError> {
    path.map(|p| read_file(p, what)).transpose()
}

/// Directory relative asset references resolve against.
fn template_dir(template: &Path) -> PathBuf {
    match template.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl PipelineBuilder {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            launcher: None,
            template: None,
            sink: None,
            provider: None,
        }
    }

    /// Uses another renderer engine instead of the built-in lopdf one.
    pub fn with_launcher(mut self, launcher: Arc<dyn EngineLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Uses an already compiled template; `options.template` is not read.
    pub fn with_template(mut self, template: Arc<dyn RecordTemplate>) -> Self {
        self.template = Some(template);
        self
    }

    /// Compiles Handlebars source instead of reading `options.template`.
    pub fn with_template_source(self, source: &str) -> Result<Self, PipelineError> {
        let template = HandlebarsTemplate::compile(source)?;
        Ok(self.with_template(Arc::new(template)))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_resource_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Validates the options and prepares everything a run needs.
    ///
    /// Nothing is rendered here; the renderer engine is launched by the pool on
    /// first use (or during pre-warming at the start of the run).
    pub async fn build(self) -> Result<DocumentPipeline, PipelineError> {
        let started = Instant::now();
        let options = self.options;
        options.validate()?;

        let template = match self.template {
            Some(template) => template,
            None => {
                let source = read_file(&options.template, "template")?;
                Arc::new(HandlebarsTemplate::compile(&source)?) as Arc<dyn RecordTemplate>
            }
        };
        let css = read_optional(options.css.as_ref(), "stylesheet")?.unwrap_or_default();
        let header_template = read_optional(options.header_template.as_ref(), "header template")?;
        let footer_template = read_optional(options.footer_template.as_ref(), "footer template")?;

        let asset_dir = template_dir(&options.template);
        let base_url = asset_dir
            .canonicalize()
            .ok()
            .and_then(|dir| Url::from_directory_path(dir).ok())
            .map(String::from);
        debug!("Asset base: {:?}", base_url);
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(FilesystemResourceProvider::new(&asset_dir)) as Arc<dyn ResourceProvider>);

        tokio::fs::create_dir_all(&options.out_dir).await.map_err(|e| {
            PipelineError::Io(io::Error::new(
                e.kind(),
                format!(
                    "Failed to create output directory '{}': {}",
                    options.out_dir.display(),
                    e
                ),
            ))
        })?;

        let cache = Arc::new(AssetCache::with_megabytes(options.asset_cache_mb));
        let loader = Arc::new(CachingLoader::new(provider, cache));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(LopdfLauncher::new()) as Arc<dyn EngineLauncher>);
        let pool = RendererPool::new(options.concurrency, launcher)?;

        let context = PipelineContext {
            template,
            pool,
            loader,
            render_options: Arc::new(RenderOptions {
                header_template,
                footer_template,
                base_url,
            }),
            css: Arc::from(css),
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(FsSink) as Arc<dyn ArtifactSink>),
            out_dir: options.out_dir.clone(),
            out_name: options.out_name.clone(),
            skip_page_count: options.skip_page_count,
        };
        let setup = started.elapsed();
        info!("Pipeline ready in {:?}", setup);
        Ok(DocumentPipeline::new(context, options, setup))
    }
}
