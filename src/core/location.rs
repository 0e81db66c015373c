//! Source location: the resolved, hashable handle to template content.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

/// Resolved template location (the view cache key).
///
/// Invariants:
/// - Equality and hashing are by URL value
/// - Cheap to clone (shared)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation(Arc<Url>);

impl SourceLocation {
    pub fn new(url: Url) -> Self {
        Self(Arc::new(url))
    }

    /// Parse an absolute URL string.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(Self::new)
    }

    /// Resolve `relative` against this location (`../a.xhtml`, `b.xhtml`).
    pub fn join(&self, relative: &str) -> Result<Self, url::ParseError> {
        self.0.join(relative).map(Self::new)
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.0
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Decoded path component.
    pub fn path(&self) -> String {
        percent_encoding::percent_decode_str(self.0.path())
            .decode_utf8_lossy()
            .into_owned()
    }

    /// Filesystem path for `file://` locations.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        self.0.to_file_path().ok()
    }

    /// Alias of this location relative to `base`: `/` + path with the
    /// base path stripped.
    pub fn alias_under(&self, base: &SourceLocation) -> String {
        let path = self.path();
        let base_path = base.path();
        let base_path = base_path.trim_end_matches('/');
        let rest = path.strip_prefix(base_path).unwrap_or(&path);
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }

    /// Like [`alias_under`](Self::alias_under), but `None` when this
    /// location is not inside `base`.
    pub fn relative_to(&self, base: &SourceLocation) -> Option<String> {
        if self.0.scheme() != base.0.scheme() || self.0.host_str() != base.0.host_str() {
            return None;
        }
        let path = self.path();
        let base_path = base.path();
        let rest = path.strip_prefix(base_path.trim_end_matches('/'))?;
        rest.starts_with('/').then(|| rest.to_string())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
