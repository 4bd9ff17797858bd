//! Resource providers and the render-time asset cache.
//!
//! ## Available Providers
//!
//! - [`FilesystemResourceProvider`]: loads relative paths and `file://` URLs from disk
//! - [`InMemoryResourceProvider`]: pre-populated in-memory storage (re-exported)
//!
//! ## Caching
//!
//! [`AssetCache`] is a byte-budgeted LRU shared by every renderer session of a run.
//! [`CachingLoader`] puts it in front of a provider and is what sessions actually
//! call.

mod cache;
mod filesystem;
mod loader;

pub use cache::{AssetCache, CacheStats, CachedAsset, DEFAULT_BUDGET_MB};
pub use filesystem::FilesystemResourceProvider;
pub use loader::{CachingLoader, is_cacheable};

pub use quire_traits::InMemoryResourceProvider;
