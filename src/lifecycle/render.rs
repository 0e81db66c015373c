//! RenderResponse: build the view, let pre-render listeners navigate,
//! then serialize and save it.

use super::Lifecycle;
use super::error::PipelineError;
use super::event::SystemEvent;
use super::phase::PhaseId;
use super::request::RequestContext;
use crate::tree::ComponentTree;
use crate::debug;

pub(super) fn render_response(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    let mut rebuilds = 0usize;
    loop {
        build_view(lifecycle, ctx)?;
        lifecycle.publish(&SystemEvent::PreRenderView, ctx).map_err(phase_error)?;

        let built = ctx.tree().map(|tree| tree.view_id().to_string());
        let Some(current) = ctx.view_id() else {
            break;
        };
        if built.as_deref() == Some(current) {
            break;
        }

        rebuilds += 1;
        if let Some(limit) = lifecycle.options().max_view_rebuilds
            && rebuilds > limit
        {
            return Err(PipelineError::RebuildLimit {
                view_id: current.to_string(),
                limit,
            });
        }
        debug!("render"; "view changed to {} during pre-render, rebuilding", current);
    }

    let tree = ctx.tree().ok_or(PipelineError::MissingViewId)?;
    let markup = lifecycle.processor().render(tree).map_err(phase_error)?;
    lifecycle.state_manager().save(tree.view_id(), tree);

    let mut response = String::with_capacity(markup.len() + 64);
    for prolog in [ctx.xml_decl(), ctx.doctype()].into_iter().flatten() {
        response.push_str(prolog);
        response.push('\n');
    }
    response.push_str(&markup);
    ctx.set_response(response);

    lifecycle.publish(&SystemEvent::PostRenderView, ctx).map_err(phase_error)
}

fn phase_error(source: anyhow::Error) -> PipelineError {
    PipelineError::Phase {
        phase: PhaseId::RenderResponse,
        source,
    }
}

/// Make sure the request holds a populated tree for its current view id.
///
/// A tree built for another id is replaced. A populated tree is only
/// re-applied when its source may have changed.
fn build_view(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    let view_id = ctx
        .view_id()
        .or_else(|| ctx.tree().map(ComponentTree::view_id))
        .ok_or(PipelineError::MissingViewId)?
        .to_string();

    let mut tree = match ctx.take_tree() {
        Some(tree) if tree.view_id() == view_id => tree,
        _ => ComponentTree::new(view_id.as_str()),
    };
    let result = populate(lifecycle, ctx, &mut tree, &view_id);
    ctx.set_view_id(view_id);
    ctx.set_tree(tree);
    result
}

fn populate(
    lifecycle: &Lifecycle,
    ctx: &mut RequestContext,
    tree: &mut ComponentTree,
    view_id: &str,
) -> Result<(), PipelineError> {
    let factory = lifecycle.factory();
    let location = factory.resolve_view(ctx, view_id)?;
    let stale = !tree.is_populated() || factory.needs_refresh(&location);
    let view = factory.get_view(ctx, view_id)?;
    if !stale {
        return Ok(());
    }

    let root = tree.root();
    view.apply(factory, ctx, tree, root)?;
    debug!("render"; "applied {} (populated: {})", view_id, tree.is_populated());
    tree.set_populated(true);
    Ok(())
}
