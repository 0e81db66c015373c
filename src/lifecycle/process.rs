//! Tree-wide traversal hooks and the four thin phases that call them.

use super::Lifecycle;
use super::error::PipelineError;
use super::phase::PhaseId;
use super::request::RequestContext;
use crate::tree::{ComponentTree, METADATA_FACET, NodeId};
use crate::utils::html::{escape, is_void_element};

/// The component model's side of the lifecycle.
///
/// The four `process_*` hooks walk the view in the request; `render`
/// serializes it.
pub trait TreeProcessor: Send + Sync {
    fn process_decodes(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn process_validators(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn process_updates(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn process_application(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&self, tree: &ComponentTree) -> anyhow::Result<String>;
}

/// No-op traversals; renders text nodes verbatim and components as
/// elements named after their type.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProcessor;

impl TreeProcessor for DefaultProcessor {
    fn render(&self, tree: &ComponentTree) -> anyhow::Result<String> {
        let mut out = String::new();
        for child in tree.children(tree.root()) {
            render_node(tree, *child, &mut out);
        }
        Ok(out)
    }
}

fn render_node(tree: &ComponentTree, id: NodeId, out: &mut String) {
    let Some(node) = tree.get(id) else {
        return;
    };
    if node.attributes.get("rendered").is_some_and(|r| r == "false") {
        return;
    }
    if node.is_text() {
        out.push_str(node.text.as_deref().unwrap_or_default());
        return;
    }

    let tag = node.component_type.as_str();
    out.push('<');
    out.push_str(tag);
    if let Some(cid) = &node.id {
        out.push_str(&format!(" id=\"{}\"", escape(cid)));
    }
    for (name, value) in &node.attributes {
        out.push_str(&format!(" {name}=\"{}\"", escape(value)));
    }

    let facets = node.facets().iter().filter(|(name, _)| name != METADATA_FACET);
    let mut body = String::new();
    for (_, facet) in facets {
        render_node(tree, *facet, &mut body);
    }
    for child in node.children() {
        render_node(tree, *child, &mut body);
    }

    if body.is_empty() && is_void_element(tag) {
        out.push_str("/>");
    } else {
        out.push('>');
        out.push_str(&body);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

// ============================================================================
// Thin phases
// ============================================================================

fn traverse(
    phase: PhaseId,
    ctx: &mut RequestContext,
    hook: impl FnOnce(&mut RequestContext) -> anyhow::Result<()>,
) -> Result<(), PipelineError> {
    if ctx.tree().is_none() {
        return Ok(());
    }
    hook(ctx).map_err(|source| PipelineError::Phase { phase, source })
}

pub(super) fn apply_request_values(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    traverse(PhaseId::ApplyRequestValues, ctx, |ctx| lifecycle.processor().process_decodes(ctx))
}

pub(super) fn process_validations(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    traverse(PhaseId::ProcessValidations, ctx, |ctx| lifecycle.processor().process_validators(ctx))
}

pub(super) fn update_model_values(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    traverse(PhaseId::UpdateModelValues, ctx, |ctx| lifecycle.processor().process_updates(ctx))
}

pub(super) fn invoke_application(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    traverse(PhaseId::InvokeApplication, ctx, |ctx| lifecycle.processor().process_application(ctx))
}
