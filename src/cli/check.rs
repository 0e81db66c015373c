//! `vellum check`: compile every template under a root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use jwalk::WalkDir;
use rayon::prelude::*;

use crate::config::VellumConfig;
use crate::logger::ProgressLine;
use crate::view::{CompileMode, ViewCompiler, ViewError};
use crate::log;

/// Outcome of checking a template root.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub checked: usize,
    /// `(alias, error)`, sorted by alias.
    pub failures: Vec<(String, ViewError)>,
}

impl CheckReport {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn run_check(root: &Path, config: &VellumConfig) -> Result<()> {
    let report = check_templates(root, config, false)?;
    for (alias, error) in &report.failures {
        log!("error"; "{}: {}", alias, error);
    }
    if !report.is_ok() {
        bail!("{} of {} templates failed to compile", report.failures.len(), report.checked);
    }
    log!("check"; "{} templates ok", report.checked);
    Ok(())
}

/// Compile every `*<suffix>` file under `root` in both modes, in parallel.
pub fn check_templates(root: &Path, config: &VellumConfig, quiet: bool) -> Result<CheckReport> {
    if !root.is_dir() {
        bail!("template root {} is not a directory", root.display());
    }
    let files = collect_templates(root, &config.views.suffix);
    let compiler = ViewCompiler::new(config.views.trim_comments);
    let progress = (!quiet).then(|| ProgressLine::new(&[("full", files.len()), ("metadata", files.len())]));

    let mut failures: Vec<(String, ViewError)> = files
        .par_iter()
        .filter_map(|path| {
            let alias = alias_of(root, path);
            check_one(&compiler, path, &alias, progress.as_ref())
                .err()
                .map(|error| (alias, error))
        })
        .collect();
    failures.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some(progress) = progress {
        progress.finish();
    }
    Ok(CheckReport {
        checked: files.len(),
        failures,
    })
}

fn check_one(compiler: &ViewCompiler, path: &Path, alias: &str, progress: Option<&ProgressLine>) -> Result<(), ViewError> {
    let source = fs::read_to_string(path).map_err(|source| ViewError::Io {
        path: alias.to_string(),
        source,
    })?;
    for mode in [CompileMode::Full, CompileMode::MetadataOnly] {
        compiler.compile(&source, alias, mode)?;
        if let Some(p) = progress {
            p.inc(mode.as_str());
        }
    }
    Ok(())
}

fn collect_templates(root: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| p.to_str().is_some_and(|s| s.ends_with(suffix)))
        .collect();
    files.sort();
    files
}

/// View path of `path` relative to `root`, `/`-separated.
fn alias_of(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    format!("/{}", parts.join("/"))
}
