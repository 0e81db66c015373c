//! Template resource resolution.
//!
//! The view engine never touches storage directly; it asks a
//! [`ResourceResolver`] to turn a view path into a [`SourceLocation`], to
//! read the content and to report when it last changed.

mod fs;
mod memory;

pub use fs::FsResolver;
pub use memory::MemoryResolver;

use std::fmt;
use std::io;

use crate::core::{Millis, SourceLocation};

/// Default directory holding resource library contracts.
pub const DEFAULT_CONTRACTS_DIR: &str = "/contracts";

/// Resolves and reads template sources.
pub trait ResourceResolver: Send + Sync + fmt::Debug {
    /// Root of the view namespace; aliases are computed relative to it.
    fn base(&self) -> &SourceLocation;

    /// Resolve an absolute view path (`/pages/a.xhtml`).
    ///
    /// Each active contract is tried first, in order, as
    /// `<contracts_dir>/<contract><path>`; then the plain path.
    fn resolve(&self, path: &str, contracts: &[String]) -> Option<SourceLocation>;

    /// Last modification time of `location`, 0 when unknown.
    fn last_modified(&self, location: &SourceLocation) -> Millis;

    fn read(&self, location: &SourceLocation) -> io::Result<String>;

    /// Directory (view path) holding resource library contracts.
    fn contracts_dir(&self) -> &str {
        DEFAULT_CONTRACTS_DIR
    }
}

/// Candidate view paths for `path` under the active contracts, most
/// specific first.
pub(crate) fn candidate_paths(path: &str, contracts: &[String], contracts_dir: &str) -> Vec<String> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let dir = contracts_dir.trim_end_matches('/');
    let mut out: Vec<String> = contracts
        .iter()
        .map(|contract| format!("{dir}/{contract}{path}"))
        .collect();
    out.push(path);
    out
}

/// Reject view paths that try to climb out of the root.
pub(crate) fn is_safe_path(path: &str) -> bool {
    !path.split('/').any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_paths_order() {
        let contracts = vec!["dark".to_string(), "base".to_string()];
        assert_eq!(
            candidate_paths("/index.xhtml", &contracts, "/contracts/"),
            vec![
                "/contracts/dark/index.xhtml",
                "/contracts/base/index.xhtml",
                "/index.xhtml",
            ]
        );
        assert_eq!(candidate_paths("a.xhtml", &[], "/contracts"), vec!["/a.xhtml"]);
    }

    #[test]
    fn test_is_safe_path() {
        assert!(is_safe_path("/a/b.xhtml"));
        assert!(!is_safe_path("/a/../../etc/passwd"));
    }
}
