use std::sync::Arc;

use log::trace;
use mime_guess::Mime;
use quire_traits::{FetchedAsset, ResourceError, ResourceProvider, SubresourceLoader};
use url::Url;

use crate::cache::AssetCache;

/// Images, fonts and stylesheets are cached; everything else goes straight through.
pub fn is_cacheable(mime: &Mime) -> bool {
    match (mime.type_().as_str(), mime.subtype().as_str()) {
        ("image", _) | ("font", _) | ("text", "css") => true,
        (_, subtype) => subtype.contains("font"),
    }
}

fn guess_mime(location: &str) -> Mime {
    match Url::parse(location) {
        Ok(url) => mime_guess::from_path(url.path()).first_or_octet_stream(),
        Err(_) => mime_guess::from_path(location).first_or_octet_stream(),
    }
}

/// A [`SubresourceLoader`] that consults an [`AssetCache`] before the provider.
#[derive(Debug, Clone)]
pub struct CachingLoader {
    provider: Arc<dyn ResourceProvider>,
    cache: Arc<AssetCache>,
}

impl CachingLoader {
    pub fn new(provider: Arc<dyn ResourceProvider>, cache: Arc<AssetCache>) -> Self {
        Self { provider, cache }
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }
}

impl SubresourceLoader for CachingLoader {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, ResourceError> {
        let mime = guess_mime(url);
        let cacheable = is_cacheable(&mime);

        if cacheable && let Some(hit) = self.cache.lookup(url) {
            trace!("[CACHE] hit {}", url);
            return Ok(FetchedAsset {
                body: hit.body,
                content_type: hit.content_type,
            });
        }

        let body = self.provider.load(url)?;
        let content_type = mime.essence_str().to_string();
        if cacheable {
            self.cache.store(url, body.clone(), content_type.clone());
        }
        Ok(FetchedAsset { body, content_type })
    }
}
