//! Compiled node handlers.
//!
//! A compiled view is a list of [`Handler`]s. Applying a handler mutates
//! the live component tree under a parent: components are found again by
//! their mark id and re-confirmed, or created on first use.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::debug;
use crate::tree::{
    ComponentTree, METADATA_FACET, Node, NodeId, TEXT_TYPE, finalize_for_deletion, find_marked,
    mark_for_deletion,
};
use crate::view::client::TemplateClient;
use crate::view::context::ViewEvaluationContext;
use crate::view::el::ValueExpr;
use crate::view::error::{ViewError, ViewResult};

/// Component type of the panel holding the view metadata.
pub const METADATA_PANEL_TYPE: &str = "metadata-panel";

/// Component type wrapping several children placed into one facet.
pub const FACET_GROUP_TYPE: &str = "facet-group";

/// One step of a compiled program.
#[derive(Debug, Clone)]
pub(crate) enum Handler {
    Text(TextHandler),
    Component(ComponentHandler),
    Facet(FacetHandler),
    Metadata(MetadataHandler),
    Composition(CompositionHandler),
    Define(DefineHandler),
    Insert(InsertHandler),
    Include(IncludeHandler),
    Param(ParamHandler),
    Fragment(FragmentHandler),
}

impl Handler {
    pub fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        match self {
            Self::Text(h) => h.apply_to(ctx, tree, parent, None),
            Self::Component(h) => h.apply_to(ctx, tree, parent, None),
            Self::Facet(h) => h.apply(ctx, tree, parent),
            Self::Metadata(h) => h.apply(ctx, tree),
            Self::Composition(h) => h.apply(ctx, tree, parent),
            // only applied through a template client
            Self::Define(_) => Ok(()),
            Self::Insert(h) => h.apply(ctx, tree, parent),
            Self::Include(h) => h.apply(ctx, tree, parent),
            Self::Param(h) => h.apply(ctx),
            Self::Fragment(h) => h.apply(ctx, tree, parent),
        }
    }

    fn apply_as_facet(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        facet: &str,
    ) -> ViewResult<()> {
        match self {
            Self::Text(h) => h.apply_to(ctx, tree, parent, Some(facet)),
            Self::Component(h) => h.apply_to(ctx, tree, parent, Some(facet)),
            other => other.apply(ctx, tree, parent),
        }
    }

    /// First `f:metadata` handler anywhere below this one.
    pub fn find_metadata(&self) -> Option<&MetadataHandler> {
        match self {
            Self::Metadata(h) => Some(h),
            Self::Component(h) => find_metadata(&h.body),
            Self::Facet(h) => find_metadata(&h.body),
            Self::Composition(h) => find_metadata(&h.client.body),
            Self::Define(h) => find_metadata(&h.body),
            Self::Insert(h) => find_metadata(&h.client.body),
            Self::Fragment(h) => find_metadata(&h.body),
            Self::Text(_) | Self::Include(_) | Self::Param(_) => None,
        }
    }
}

pub(crate) fn find_metadata(handlers: &[Handler]) -> Option<&MetadataHandler> {
    handlers.iter().find_map(Handler::find_metadata)
}

pub(crate) fn apply_all(
    handlers: &[Handler],
    ctx: &mut ViewEvaluationContext<'_>,
    tree: &mut ComponentTree,
    parent: NodeId,
) -> ViewResult<()> {
    for handler in handlers {
        handler.apply(ctx, tree, parent)?;
    }
    Ok(())
}

/// Find the node a handler created under `tag_id` last time, or create it.
///
/// A found node is re-confirmed (unmarked) and moved to the end of its
/// parent so children follow template order.
fn find_or_create<F>(
    ctx: &mut ViewEvaluationContext<'_>,
    tree: &mut ComponentTree,
    parent: NodeId,
    tag_id: &str,
    facet: Option<&str>,
    make: F,
) -> (NodeId, String, bool)
where
    F: FnOnce(&ViewEvaluationContext<'_>, &str) -> Node,
{
    let mark = ctx.generate_unique_id(tag_id);
    let (id, found) = match find_marked(tree, parent, &mark) {
        Some(existing) => {
            if let Some(node) = tree.get_mut(existing) {
                node.marked_deleted = false;
            }
            (existing, true)
        }
        None => {
            let mut node = make(ctx, &mark);
            node.mark = Some(mark.clone());
            (tree.create(node), false)
        }
    };
    match facet {
        Some(name) => tree.set_facet(parent, name, id),
        None => tree.append_child(parent, id),
    }
    (id, mark, found)
}

// ============================================================================
// Text
// ============================================================================

/// A run of literal markup with embedded expressions.
#[derive(Debug, Clone)]
pub(crate) struct TextHandler {
    pub tag_id: String,
    pub text: ValueExpr,
}

impl TextHandler {
    fn apply_to(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        facet: Option<&str>,
    ) -> ViewResult<()> {
        let text = ctx.evaluate_markup(&self.text)?;
        let (node, _, _) = find_or_create(ctx, tree, parent, &self.tag_id, facet, |ctx, mark| {
            let mut node = Node::new(TEXT_TYPE);
            node.id = Some(ctx.component_id(mark));
            node
        });
        if let Some(node) = tree.get_mut(node) {
            node.text = Some(text);
        }
        Ok(())
    }
}

// ============================================================================
// Components
// ============================================================================

/// A prefixed tag that becomes a component (`h:outputText`, `x:panel`).
#[derive(Debug, Clone)]
pub(crate) struct ComponentHandler {
    pub tag: String,
    pub tag_id: String,
    pub id: Option<ValueExpr>,
    pub transient: bool,
    pub attributes: Vec<(String, ValueExpr)>,
    pub body: Vec<Handler>,
}

impl ComponentHandler {
    fn apply_to(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        facet: Option<&str>,
    ) -> ViewResult<()> {
        let explicit_id = self.id.as_ref().map(|id| ctx.evaluate(id)).transpose()?;
        let mut attributes = BTreeMap::new();
        for (name, value) in &self.attributes {
            attributes.insert(name.clone(), ctx.evaluate(value)?);
        }

        let (node, _, found) = find_or_create(ctx, tree, parent, &self.tag_id, facet, |ctx, mark| {
            let mut node = Node::new(self.tag.as_str());
            node.id = Some(ctx.component_id(mark));
            node
        });
        if let Some(n) = tree.get_mut(node) {
            if let Some(id) = explicit_id {
                n.id = Some(id);
            }
            n.transient = self.transient;
            n.attributes = attributes;
        }

        if found {
            mark_for_deletion(tree, node);
        }
        apply_all(&self.body, ctx, tree, node)?;
        if found {
            finalize_for_deletion(tree, node);
        }
        Ok(())
    }
}

/// `f:facet name="…"`.
#[derive(Debug, Clone)]
pub(crate) struct FacetHandler {
    pub name: String,
    pub tag_id: String,
    pub body: Vec<Handler>,
}

impl FacetHandler {
    fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        if let [single] = self.body.as_slice() {
            return single.apply_as_facet(ctx, tree, parent, &self.name);
        }

        let (group, _, found) = find_or_create(ctx, tree, parent, &self.tag_id, Some(&self.name), |ctx, mark| {
            let mut node = Node::new(FACET_GROUP_TYPE);
            node.id = Some(ctx.component_id(mark));
            node
        });
        if found {
            mark_for_deletion(tree, group);
        }
        apply_all(&self.body, ctx, tree, group)?;
        if found {
            finalize_for_deletion(tree, group);
        }
        Ok(())
    }
}

/// `f:metadata`: builds the metadata facet of the view root.
#[derive(Debug, Clone)]
pub(crate) struct MetadataHandler {
    pub body: Vec<Handler>,
}

impl MetadataHandler {
    fn apply(&self, ctx: &mut ViewEvaluationContext<'_>, tree: &mut ComponentTree) -> ViewResult<()> {
        let root = tree.root();
        let panel = match tree.facet(root, METADATA_FACET) {
            Some(panel) => panel,
            None => {
                let mut node = Node::new(METADATA_PANEL_TYPE);
                node.id = Some(METADATA_FACET.to_string());
                let panel = tree.create(node);
                tree.set_facet(root, METADATA_FACET, panel);
                panel
            }
        };
        mark_for_deletion(tree, panel);
        apply_all(&self.body, ctx, tree, panel)?;
        finalize_for_deletion(tree, panel);
        Ok(())
    }
}

// ============================================================================
// Templating
// ============================================================================

/// Definitions and body a composition offers to its template.
#[derive(Debug)]
pub(crate) struct CompositionClient {
    pub defines: FxHashMap<String, Arc<Vec<Handler>>>,
    pub body: Vec<Handler>,
}

impl TemplateClient for CompositionClient {
    fn apply_definition(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        name: Option<&str>,
    ) -> ViewResult<bool> {
        match name {
            Some(name) => match self.defines.get(name) {
                Some(body) => apply_all(body, ctx, tree, parent).map(|()| true),
                None => Ok(false),
            },
            None => apply_all(&self.body, ctx, tree, parent).map(|()| true),
        }
    }
}

/// `ui:composition` and `ui:decorate`.
#[derive(Debug, Clone)]
pub(crate) struct CompositionHandler {
    pub template: Option<ValueExpr>,
    /// `ui:decorate` pushes its client; `ui:composition` extends.
    pub decorate: bool,
    pub params: Vec<ParamHandler>,
    pub client: Arc<CompositionClient>,
    pub alias: String,
    pub line: usize,
}

impl CompositionHandler {
    fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        let Some(template) = &self.template else {
            return apply_all(&self.client.body, ctx, tree, parent);
        };
        ctx.push_scope();
        let result = self.apply_template(template, ctx, tree, parent);
        ctx.pop_scope();
        result
    }

    fn apply_template(
        &self,
        template: &ValueExpr,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        for param in &self.params {
            param.apply(ctx)?;
        }

        let client: Arc<dyn TemplateClient> = self.client.clone();
        let handle = if self.decorate {
            ctx.push_client(client)
        } else {
            ctx.extend_client(client)
        };

        let included = match ctx.evaluate(template) {
            Ok(path) if path.trim().is_empty() => Err(ViewError::compile(
                &self.alias,
                self.line,
                "template attribute resolved to an empty path",
            )),
            Ok(path) => ctx.include_path(tree, parent, path.trim()),
            Err(e) => Err(e),
        };
        let popped = ctx.pop_client(handle);
        included.and(popped)
    }
}

/// `ui:define name="…"`; applied only through its composition.
#[derive(Debug, Clone)]
pub(crate) struct DefineHandler {
    pub name: String,
    pub body: Arc<Vec<Handler>>,
}

/// Default content of a `ui:insert`, offered to nested templates.
#[derive(Debug)]
pub(crate) struct InsertClient {
    pub name: Option<String>,
    pub body: Vec<Handler>,
}

impl TemplateClient for InsertClient {
    fn apply_definition(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        name: Option<&str>,
    ) -> ViewResult<bool> {
        match (&self.name, name) {
            (Some(own), Some(wanted)) if own == wanted => {
                apply_all(&self.body, ctx, tree, parent).map(|()| true)
            }
            _ => Ok(false),
        }
    }
}

/// `ui:insert [name="…"]`.
#[derive(Debug, Clone)]
pub(crate) struct InsertHandler {
    pub client: Arc<InsertClient>,
}

impl InsertHandler {
    fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        let handle = ctx.extend_client(self.client.clone());
        let found = ctx.include_definition(tree, parent, self.client.name.as_deref());
        let popped = ctx.pop_client(handle);
        if !found? {
            apply_all(&self.client.body, ctx, tree, parent)?;
        }
        popped
    }
}

/// `ui:include src="…"` with nested `ui:param`s.
#[derive(Debug, Clone)]
pub(crate) struct IncludeHandler {
    pub src: ValueExpr,
    pub params: Vec<ParamHandler>,
}

impl IncludeHandler {
    fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        let src = ctx.evaluate(&self.src)?;
        let path = src.trim();
        if path.is_empty() {
            debug!("view"; "{}: ui:include src resolved to nothing, skipped", ctx.view().alias());
            return Ok(());
        }

        ctx.push_scope();
        let result = self
            .params
            .iter()
            .try_for_each(|param| param.apply(ctx))
            .and_then(|()| ctx.include_path(tree, parent, path));
        ctx.pop_scope();
        result
    }
}

/// `ui:param name="…" value="…"`.
#[derive(Debug, Clone)]
pub(crate) struct ParamHandler {
    pub name: ValueExpr,
    pub value: ValueExpr,
}

impl ParamHandler {
    fn apply(&self, ctx: &mut ViewEvaluationContext<'_>) -> ViewResult<()> {
        let name = ctx.evaluate(&self.name)?;
        let value = ctx.evaluate(&self.value)?;
        ctx.set_variable(name, value);
        Ok(())
    }
}

/// `ui:fragment [rendered="…"]`.
#[derive(Debug, Clone)]
pub(crate) struct FragmentHandler {
    pub rendered: Option<ValueExpr>,
    pub body: Vec<Handler>,
}

impl FragmentHandler {
    fn apply(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        if let Some(rendered) = &self.rendered
            && ctx.evaluate(rendered)?.trim() == "false"
        {
            return Ok(());
        }
        apply_all(&self.body, ctx, tree, parent)
    }
}
