//! RestoreView: find or build the view the request addresses.

use super::Lifecycle;
use super::error::PipelineError;
use super::event::SystemEvent;
use super::exception::{ExceptionStage, QueuedException};
use super::phase::PhaseId;
use super::protected;
use super::request::RequestContext;
use crate::tree::ComponentTree;
use crate::{debug, log};

pub(super) fn restore_view(lifecycle: &Lifecycle, ctx: &mut RequestContext) -> Result<(), PipelineError> {
    if ctx.tree().is_some() {
        debug!("restore"; "reusing view bound to the request");
        deliver_post_restore(lifecycle, ctx);
        if !ctx.is_postback() {
            ctx.render_response();
        }
        return Ok(());
    }

    let view_id = ctx.request().view_path().ok_or(PipelineError::MissingViewId)?;
    let logical = logical_view_id(view_id, &lifecycle.options().suffix);

    if ctx.is_postback() && !ctx.is_error_page() {
        let tree = lifecycle
            .state_manager()
            .restore(&logical)
            .ok_or_else(|| PipelineError::ViewExpired {
                view_id: logical.clone(),
            })?;
        debug!("restore"; "postback: restored view for {}", logical);
        ctx.set_view_id(tree.view_id());
        ctx.set_tree(tree);
    } else {
        debug!("restore"; "new request: creating a view for {}", logical);
        protected::check(lifecycle, ctx, &logical)?;

        let metadata = lifecycle.factory().get_metadata_view(ctx, &logical)?;
        let mut tree = ComponentTree::new(logical.as_str());
        let root = tree.root();
        metadata.apply(lifecycle.factory(), ctx, &mut tree, root)?;
        if !tree.has_metadata() {
            ctx.render_response();
        }
        ctx.set_view_id(logical);
        ctx.set_tree(tree);
    }

    deliver_post_restore(lifecycle, ctx);
    Ok(())
}

/// Map a request path onto a view id: paths without an extension get
/// the default suffix.
pub fn logical_view_id(path: &str, suffix: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.contains('.') || name.is_empty() {
        path.to_string()
    } else {
        format!("{path}{suffix}")
    }
}

/// Publish `PostRestoreState` for every node of the bound view, once.
/// A failing listener stops delivery and is queued against RestoreView.
fn deliver_post_restore(lifecycle: &Lifecycle, ctx: &mut RequestContext) {
    let nodes = match ctx.tree() {
        Some(tree) => tree.visit(tree.root()),
        None => return,
    };
    for node in nodes {
        if let Err(source) = lifecycle.publish(&SystemEvent::PostRestoreState { node }, ctx) {
            log!("restore"; "post-restore delivery aborted: {}", source);
            let error = PipelineError::Phase {
                phase: PhaseId::RestoreView,
                source,
            };
            ctx.queue_exception(QueuedException::new(error, PhaseId::RestoreView, ExceptionStage::Body));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_view_id() {
        assert_eq!(logical_view_id("/index", ".xhtml"), "/index.xhtml");
        assert_eq!(logical_view_id("/index.xhtml", ".xhtml"), "/index.xhtml");
        assert_eq!(logical_view_id("/a.b/index", ".xhtml"), "/a.b/index.xhtml");
        assert_eq!(logical_view_id("/dir/", ".xhtml"), "/dir/");
    }
}
