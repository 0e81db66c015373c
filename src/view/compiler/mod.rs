//! Template compiler.
//!
//! Turns XHTML source into a program of [`Handler`]s. The same source
//! compiles in two modes: the full view, or just its `f:metadata` subtree.

mod handler;
mod parse;

pub(crate) use handler::{Handler, apply_all};
pub use handler::{FACET_GROUP_TYPE, METADATA_PANEL_TYPE};

use super::cache::CompileMode;
use super::error::ViewResult;

/// Output of one compilation.
#[derive(Debug, Default)]
pub(crate) struct CompiledProgram {
    pub handlers: Vec<Handler>,
    pub doctype: Option<String>,
    pub xml_decl: Option<String>,
}

/// Compiles template sources; stateless apart from its options.
#[derive(Debug, Clone, Copy)]
pub struct ViewCompiler {
    trim_comments: bool,
}

impl Default for ViewCompiler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ViewCompiler {
    pub fn new(trim_comments: bool) -> Self {
        Self { trim_comments }
    }

    /// Compile `source`; `alias` is used for error positions.
    pub(crate) fn compile(&self, source: &str, alias: &str, mode: CompileMode) -> ViewResult<CompiledProgram> {
        let parsed = parse::parse(source, alias, self.trim_comments)?;
        let handlers = match mode {
            CompileMode::Full => parsed.handlers,
            CompileMode::MetadataOnly => handler::find_metadata(&parsed.handlers)
                .map(|metadata| vec![Handler::Metadata(metadata.clone())])
                .unwrap_or_default(),
        };
        Ok(CompiledProgram {
            handlers,
            doctype: parsed.doctype,
            xml_decl: parsed.xml_decl,
        })
    }

    /// Compile in both modes, discarding the programs.
    pub fn check(&self, source: &str, alias: &str) -> ViewResult<()> {
        self.compile(source, alias, CompileMode::Full)?;
        self.compile(source, alias, CompileMode::MetadataOnly)?;
        Ok(())
    }
}
