//! In-memory resolver (`mem:///` locations).
//!
//! Content and modification times are set by hand, which makes it the
//! resolver of choice for embedding templates and for tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{DEFAULT_CONTRACTS_DIR, ResourceResolver, candidate_paths, is_safe_path};
use crate::core::{Millis, SourceLocation};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    modified: Millis,
}

/// Resolver over a map of view path → content.
#[derive(Debug)]
pub struct MemoryResolver {
    base: SourceLocation,
    files: DashMap<String, MemoryFile>,
    reads: AtomicUsize,
    contracts_dir: String,
}

impl Default for MemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self {
            // The literal is a valid URL, parsing cannot fail.
            base: SourceLocation::parse("mem:///").unwrap_or_else(|_| unreachable!()),
            files: DashMap::new(),
            reads: AtomicUsize::new(0),
            contracts_dir: DEFAULT_CONTRACTS_DIR.to_string(),
        }
    }

    /// Add or replace a file; `modified` is its modification time.
    pub fn insert(&self, path: &str, content: impl Into<String>, modified: Millis) {
        self.files.insert(
            normalize(path),
            MemoryFile {
                content: content.into(),
                modified,
            },
        );
    }

    /// Bump the modification time without changing content.
    pub fn touch(&self, path: &str, modified: Millis) {
        if let Some(mut file) = self.files.get_mut(&normalize(path)) {
            file.modified = modified;
        }
    }

    pub fn remove(&self, path: &str) {
        self.files.remove(&normalize(path));
    }

    /// Number of successful `read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Location a stored path would resolve to.
    pub fn location(&self, path: &str) -> SourceLocation {
        self.base
            .join(normalize(path).trim_start_matches('/'))
            .unwrap_or_else(|_| self.base.clone())
    }
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl ResourceResolver for MemoryResolver {
    fn base(&self) -> &SourceLocation {
        &self.base
    }

    fn resolve(&self, path: &str, contracts: &[String]) -> Option<SourceLocation> {
        if !is_safe_path(path) {
            return None;
        }
        candidate_paths(path, contracts, &self.contracts_dir)
            .into_iter()
            .find(|candidate| self.files.contains_key(candidate))
            .map(|candidate| self.location(&candidate))
    }

    fn last_modified(&self, location: &SourceLocation) -> Millis {
        self.files
            .get(&location.path())
            .map(|f| f.modified)
            .unwrap_or(0)
    }

    fn read(&self, location: &SourceLocation) -> io::Result<String> {
        let file = self.files.get(&location.path()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{location} not found"))
        })?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(file.content.clone())
    }

    fn contracts_dir(&self) -> &str {
        &self.contracts_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_resolve_read() {
        let resolver = MemoryResolver::new();
        resolver.insert("/a.xhtml", "<p/>", 10);

        let loc = resolver.resolve("/a.xhtml", &[]).unwrap();
        assert_eq!(loc.as_str(), "mem:///a.xhtml");
        assert_eq!(resolver.read(&loc).unwrap(), "<p/>");
        assert_eq!(resolver.last_modified(&loc), 10);
        assert_eq!(resolver.read_count(), 1);
    }

    #[test]
    fn test_touch_and_remove() {
        let resolver = MemoryResolver::new();
        resolver.insert("a.xhtml", "x", 1);
        let loc = resolver.location("/a.xhtml");

        resolver.touch("/a.xhtml", 99);
        assert_eq!(resolver.last_modified(&loc), 99);

        resolver.remove("/a.xhtml");
        assert_eq!(resolver.last_modified(&loc), 0);
        assert_eq!(
            resolver.read(&loc).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_contract_lookup() {
        let resolver = MemoryResolver::new();
        resolver.insert("/layout.xhtml", "plain", 1);
        resolver.insert("/contracts/blue/layout.xhtml", "blue", 1);

        let loc = resolver.resolve("/layout.xhtml", &["blue".into()]).unwrap();
        assert_eq!(loc.path(), "/contracts/blue/layout.xhtml");
        let loc = resolver.resolve("/layout.xhtml", &[]).unwrap();
        assert_eq!(loc.path(), "/layout.xhtml");
    }
}
