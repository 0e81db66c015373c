//! `vellum render`: one request through the lifecycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::RenderArgs;
use crate::config::VellumConfig;
use crate::lifecycle::{Lifecycle, Request, RequestContext};
use crate::resource::FsResolver;
use crate::view::ViewFactory;
use crate::debug;

/// Run the request described by `args` and print the result to stdout.
pub fn run_render(args: &RenderArgs, config: &VellumConfig) -> Result<()> {
    let lifecycle = build_lifecycle(&args.root, config)?;
    let output = render_view(&lifecycle, args, config)?;
    println!("{output}");
    Ok(())
}

/// Factory and lifecycle over the templates in `root`.
pub fn build_lifecycle(root: &Path, config: &VellumConfig) -> Result<Lifecycle> {
    let resolver = FsResolver::new(root)
        .with_context(|| format!("cannot open template root {}", root.display()))?
        .with_contracts_dir(config.views.contracts_dir.clone());
    let factory = ViewFactory::new(Arc::new(resolver), config.view_options());
    Ok(Lifecycle::new(Arc::new(factory), config.lifecycle_options()))
}

/// Response body, or the component tree as JSON when `args.tree` is set.
///
/// A postback first issues a GET so there is saved state to restore.
pub fn render_view(lifecycle: &Lifecycle, args: &RenderArgs, config: &VellumConfig) -> Result<String> {
    let context = |request: Request| {
        RequestContext::new(request)
            .with_stage(config.lifecycle.project_stage)
            .with_contracts(args.contracts.clone())
    };

    let mut ctx = context(Request::get(args.view_id.as_str()));
    run(lifecycle, &mut ctx, &args.view_id)?;

    if args.postback {
        let view_id = ctx.view_id().unwrap_or(&args.view_id).to_string();
        debug!("render"; "posting back {}", view_id);
        ctx = context(Request::postback(view_id.as_str()));
        run(lifecycle, &mut ctx, &view_id)?;
    }

    if args.tree {
        let tree = ctx.tree().map(|tree| tree.to_json()).unwrap_or_default();
        return Ok(serde_json::to_string_pretty(&tree)?);
    }
    Ok(ctx.response().unwrap_or_default().to_string())
}

fn run(lifecycle: &Lifecycle, ctx: &mut RequestContext, view_id: &str) -> Result<()> {
    lifecycle
        .execute(ctx)
        .and_then(|()| lifecycle.render(ctx))
        .with_context(|| format!("failed to render {view_id}"))
}
