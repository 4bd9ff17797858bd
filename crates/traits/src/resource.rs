//! Resource loading for render-time sub-resources.
//!
//! A renderer session resolves every `src`/`href` it encounters into an absolute
//! URL and asks a [`SubresourceLoader`] for the bytes. Loaders sit in front of a
//! [`ResourceProvider`], which knows how to actually fetch something (filesystem,
//! memory, ...).

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to load resource '{path}': {message}")]
    LoadFailed { path: String, message: String },

    #[error("Unsupported resource location: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::Io(err.to_string())
    }
}

/// Shared resource data type (reference-counted bytes).
pub type SharedResourceData = Arc<Vec<u8>>;

/// A sub-resource handed back to a renderer session.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub body: SharedResourceData,
    pub content_type: String,
}

/// A trait for loading resources from various sources.
///
/// `location` is either an absolute URL (`file:///...`) or a path relative to the
/// provider's base.
pub trait ResourceProvider: Send + Sync + Debug {
    /// Load a resource by its location.
    fn load(&self, location: &str) -> Result<SharedResourceData, ResourceError>;

    /// Check if a resource exists.
    fn exists(&self, location: &str) -> bool;

    /// Returns a human-readable name for this provider (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// The fetch hook a renderer session calls for every sub-resource it needs.
///
/// Implementations must be safe to share between all concurrently running
/// sessions.
pub trait SubresourceLoader: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, ResourceError>;
}

/// An in-memory resource provider keyed by location.
///
/// Mostly useful for tests and for embedding fixed assets.
#[derive(Debug, Default)]
pub struct InMemoryResourceProvider {
    resources: RwLock<HashMap<String, SharedResourceData>>,
    loads: std::sync::atomic::AtomicUsize,
}

impl InMemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource to the in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::LoadFailed` if the internal lock is poisoned.
    pub fn add(&self, location: impl Into<String>, data: Vec<u8>) -> Result<(), ResourceError> {
        let location = location.into();
        let mut resources = self
            .resources
            .write()
            .map_err(|_| ResourceError::LoadFailed {
                path: location.clone(),
                message: "resource store lock poisoned".to_string(),
            })?;
        resources.insert(location, Arc::new(data));
        Ok(())
    }

    /// Number of successful `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl ResourceProvider for InMemoryResourceProvider {
    fn load(&self, location: &str) -> Result<SharedResourceData, ResourceError> {
        let resources = self
            .resources
            .read()
            .map_err(|_| ResourceError::LoadFailed {
                path: location.to_string(),
                message: "resource store lock poisoned".to_string(),
            })?;
        let data = resources
            .get(location)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(location.to_string()))?;
        self.loads.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(data)
    }

    fn exists(&self, location: &str) -> bool {
        self.resources
            .read()
            .map(|r| r.contains_key(location))
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "InMemoryResourceProvider"
    }
}
