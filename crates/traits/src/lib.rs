//! Seams between the quire pipeline and its external collaborators.
//!
//! - [`render`]: the external rendering engine (launcher, engine process, session)
//! - [`resource`]: loading render-time sub-resources (images, fonts, stylesheets)

pub mod render;
pub mod resource;

pub use render::{
    EngineLauncher, RenderEngine, RenderError, RenderOptions, RenderRequest, RenderSession,
};
pub use resource::{
    FetchedAsset, InMemoryResourceProvider, ResourceError, ResourceProvider, SharedResourceData,
    SubresourceLoader,
};
