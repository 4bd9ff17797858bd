use std::path::PathBuf;
use std::sync::Arc;

use quire_resource::{AssetCache, CachingLoader};
use quire_traits::RenderOptions;

use super::output::ArtifactSink;
use super::pool::RendererPool;
use crate::templating::RecordTemplate;

/// Everything a job needs, shared read-only by all jobs of a run.
///
/// Built once by [`PipelineBuilder`](super::PipelineBuilder) and cloned into every
/// spawned job; all heavy members are behind `Arc`s.
#[derive(Clone)]
pub struct PipelineContext {
    pub template: Arc<dyn RecordTemplate>,
    pub pool: RendererPool,
    /// The run's sub-resource loader, in front of the shared asset cache.
    pub loader: Arc<CachingLoader>,
    pub render_options: Arc<RenderOptions>,
    /// Extra CSS placed in every document.
    pub css: Arc<str>,
    pub sink: Arc<dyn ArtifactSink>,
    pub out_dir: PathBuf,
    pub out_name: String,
    pub skip_page_count: bool,
}

impl PipelineContext {
    pub fn asset_cache(&self) -> &Arc<AssetCache> {
        self.loader.cache()
    }

    /// The `<base href>` every document gets.
    pub fn base_url(&self) -> Option<&str> {
        self.render_options.base_url.as_deref()
    }
}
