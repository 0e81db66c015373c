//! Filesystem-backed resolver (`file://` locations).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use url::Url;

use super::{DEFAULT_CONTRACTS_DIR, ResourceResolver, candidate_paths, is_safe_path};
use crate::core::{Millis, SourceLocation, system_time_millis};

/// Resolves view paths against a directory.
#[derive(Debug, Clone)]
pub struct FsResolver {
    root: PathBuf,
    base: SourceLocation,
    contracts_dir: String,
}

impl FsResolver {
    /// Create a resolver rooted at `root` (must exist).
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let url = Url::from_directory_path(&root).map_err(|()| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is not an absolute directory", root.display()),
            )
        })?;
        Ok(Self {
            root,
            base: SourceLocation::new(url),
            contracts_dir: DEFAULT_CONTRACTS_DIR.to_string(),
        })
    }

    pub fn with_contracts_dir(mut self, dir: impl Into<String>) -> Self {
        self.contracts_dir = dir.into();
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, view_path: &str) -> PathBuf {
        self.root.join(view_path.trim_start_matches('/'))
    }
}

impl ResourceResolver for FsResolver {
    fn base(&self) -> &SourceLocation {
        &self.base
    }

    fn resolve(&self, path: &str, contracts: &[String]) -> Option<SourceLocation> {
        if !is_safe_path(path) {
            return None;
        }
        candidate_paths(path, contracts, &self.contracts_dir)
            .into_iter()
            .map(|candidate| self.file_for(&candidate))
            .find(|file| file.is_file())
            .and_then(|file| Url::from_file_path(file).ok())
            .map(SourceLocation::new)
    }

    fn last_modified(&self, location: &SourceLocation) -> Millis {
        location
            .to_file_path()
            .and_then(|p| p.metadata().and_then(|m| m.modified()).ok())
            .map(system_time_millis)
            .unwrap_or(0)
    }

    fn read(&self, location: &SourceLocation) -> io::Result<String> {
        let path = location.to_file_path().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("not a file location: {location}"))
        })?;
        fs::read_to_string(path)
    }

    fn contracts_dir(&self) -> &str {
        &self.contracts_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("contracts/dark")).unwrap();
        fs::write(dir.path().join("index.xhtml"), "<p/>").unwrap();
        fs::write(dir.path().join("contracts/dark/index.xhtml"), "<dark/>").unwrap();
        dir
    }

    #[test]
    fn test_resolve_plain_path() {
        let dir = site();
        let resolver = FsResolver::new(dir.path()).unwrap();
        let loc = resolver.resolve("/index.xhtml", &[]).unwrap();
        assert_eq!(resolver.read(&loc).unwrap(), "<p/>");
        assert_eq!(loc.alias_under(resolver.base()), "/index.xhtml");
        assert!(resolver.resolve("/missing.xhtml", &[]).is_none());
    }

    #[test]
    fn test_resolve_prefers_contract() {
        let dir = site();
        let resolver = FsResolver::new(dir.path()).unwrap();
        let loc = resolver.resolve("/index.xhtml", &["dark".into()]).unwrap();
        assert_eq!(resolver.read(&loc).unwrap(), "<dark/>");

        // unknown contract falls back to the plain path
        let loc = resolver.resolve("/index.xhtml", &["light".into()]).unwrap();
        assert_eq!(resolver.read(&loc).unwrap(), "<p/>");
    }

    #[test]
    fn test_resolve_rejects_parent_segments() {
        let dir = site();
        let resolver = FsResolver::new(dir.path().join("contracts")).unwrap();
        assert!(resolver.resolve("/../index.xhtml", &[]).is_none());
    }

    #[test]
    fn test_last_modified() {
        let dir = site();
        let resolver = FsResolver::new(dir.path()).unwrap();
        let loc = resolver.resolve("/index.xhtml", &[]).unwrap();
        assert!(resolver.last_modified(&loc) > 0);

        let gone = SourceLocation::parse("file:///definitely/not/here.xhtml").unwrap();
        assert_eq!(resolver.last_modified(&gone), 0);
    }
}
