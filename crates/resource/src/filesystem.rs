//! Filesystem-based resource provider.
//!
//! Accepts paths relative to a base directory and absolute `file://` URLs (the form
//! renderer sessions produce after resolving references against the document's
//! `<base href>`). Every resolved path must stay inside the base directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::debug;
use quire_traits::{ResourceError, ResourceProvider, SharedResourceData};
use url::Url;

/// Loads resources from the local filesystem, confined to a base directory.
#[derive(Debug)]
pub struct FilesystemResourceProvider {
    base_path: PathBuf,
    /// Canonicalized base path for containment checks
    canonical_base: Option<PathBuf>,
}

impl FilesystemResourceProvider {
    /// Creates a provider rooted at `base_path`, typically the template's directory.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        let base = base_path.as_ref().to_path_buf();
        // May fail if the directory doesn't exist yet
        let canonical = base.canonicalize().ok();
        Self {
            base_path: base,
            canonical_base: canonical,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base_path
    }

    /// The base directory as a `file://` URL with a trailing slash, suitable for a
    /// document `<base href>`.
    pub fn base_url(&self) -> Option<String> {
        let dir = self.canonical_base.as_ref().unwrap_or(&self.base_path);
        Url::from_directory_path(dir).ok().map(String::from)
    }

    fn blocked(location: &str) -> ResourceError {
        ResourceError::NotFound(format!("{location} (outside of the resource base)"))
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, ResourceError> {
        let candidate = if location.starts_with("file:") {
            let url = Url::parse(location)
                .map_err(|e| ResourceError::Unsupported(format!("{location}: {e}")))?;
            url.to_file_path()
                .map_err(|_| ResourceError::Unsupported(location.to_string()))?
        } else if location.contains("://") || location.starts_with("data:") {
            return Err(ResourceError::Unsupported(location.to_string()));
        } else {
            let relative = Path::new(location);
            if relative.is_absolute()
                || relative.components().any(|c| c == Component::ParentDir)
            {
                return Err(Self::blocked(location));
            }
            self.base_path.join(relative)
        };

        match (candidate.canonicalize(), &self.canonical_base) {
            (Ok(canonical), Some(base)) if canonical.starts_with(base) => Ok(canonical),
            (Ok(_), Some(_)) => Err(Self::blocked(location)),
            (Ok(canonical), None) => Ok(canonical),
            // Nonexistent; the read below reports NotFound
            (Err(_), _) => Ok(candidate),
        }
    }
}

impl ResourceProvider for FilesystemResourceProvider {
    fn load(&self, location: &str) -> Result<SharedResourceData, ResourceError> {
        let full_path = self.resolve(location)?;
        debug!("Loading resource {}", full_path.display());

        std::fs::read(&full_path).map(Arc::new).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound(location.to_string())
            } else {
                ResourceError::LoadFailed {
                    path: location.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    fn exists(&self, location: &str) -> bool {
        self.resolve(location).map(|p| p.is_file()).unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "FilesystemResourceProvider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_relative_path() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img/logo.png"), b"PNGDATA").unwrap();

        let provider = FilesystemResourceProvider::new(dir.path());
        assert_eq!(&*provider.load("img/logo.png").unwrap(), b"PNGDATA");
        assert!(provider.exists("img/logo.png"));
        assert!(!provider.exists("img"));
    }

    #[test]
    fn test_load_file_url_inside_base() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("style.css"), b"p{}").unwrap();

        let provider = FilesystemResourceProvider::new(dir.path());
        let base = provider.base_url().unwrap();
        assert!(base.starts_with("file://"));
        assert!(base.ends_with('/'));

        let url = format!("{base}style.css");
        assert_eq!(&*provider.load(&url).unwrap(), b"p{}");
    }

    #[test]
    fn test_not_found() {
        let dir = tempdir().unwrap();
        let provider = FilesystemResourceProvider::new(dir.path());
        assert!(matches!(
            provider.load("nonexistent.txt"),
            Err(ResourceError::NotFound(_))
        ));
    }

    #[test]
    fn test_blocks_path_traversal() {
        let outer = tempdir().unwrap();
        let base = outer.path().join("templates");
        fs::create_dir(&base).unwrap();
        fs::write(outer.path().join("secret.txt"), b"nope").unwrap();

        let provider = FilesystemResourceProvider::new(&base);
        assert!(provider.load("../secret.txt").is_err());
        assert!(provider.load("/etc/passwd").is_err());

        let escaped = Url::from_file_path(outer.path().join("secret.txt")).unwrap();
        assert!(matches!(
            provider.load(escaped.as_str()),
            Err(ResourceError::NotFound(_))
        ));
        assert!(!provider.exists(escaped.as_str()));
    }

    #[test]
    fn test_rejects_remote_schemes() {
        let dir = tempdir().unwrap();
        let provider = FilesystemResourceProvider::new(dir.path());
        assert!(matches!(
            provider.load("https://example.com/logo.png"),
            Err(ResourceError::Unsupported(_))
        ));
        assert!(matches!(
            provider.load("data:image/png;base64,AAAA"),
            Err(ResourceError::Unsupported(_))
        ));
    }
}
