//! Live component tree.
//!
//! An arena of [`Node`]s addressed by [`NodeId`]. The engine only needs the
//! narrow contract a component model offers: ordered children, named facets,
//! a string attribute map and the transient flag. On top of that every node
//! carries the bookkeeping the view engine uses to reconcile re-applied
//! templates (`mark`, `marked_deleted`, `applied`).
//!
//! Removing a node frees its whole subtree; stale `NodeId`s then resolve to
//! `None` until [`ComponentTree::compact`] renumbers the arena.

mod deletion;
mod token;

pub use deletion::{finalize_for_deletion, find_marked, mark_for_deletion};
pub use token::ApplyToken;

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Facet holding the view metadata (view parameters and the like).
pub const METADATA_FACET: &str = "jakarta_faces_metadata";

/// Component type of tree roots.
pub const VIEW_ROOT_TYPE: &str = "view-root";

/// Component type of literal text / markup instructions.
pub const TEXT_TYPE: &str = "text";

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One component.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Component type (`h:outputText`, `text`, `view-root`, ...).
    pub component_type: String,
    /// Component id, unique among siblings.
    pub id: Option<String>,
    /// Literal content of text instructions.
    pub text: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub transient: bool,
    /// Mark id assigned by the handler that created the node.
    pub mark: Option<String>,
    /// Set by `mark_for_deletion`, cleared when a handler re-confirms the node.
    pub marked_deleted: bool,
    /// Generation tag of the compiled view that produced the node.
    pub applied: Option<ApplyToken>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    facets: Vec<(String, NodeId)>,
}

impl Node {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn facets(&self) -> &[(String, NodeId)] {
        &self.facets
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        self.component_type == TEXT_TYPE
    }
}

/// Component tree for one view.
#[derive(Debug, Clone)]
pub struct ComponentTree {
    view_id: String,
    nodes: Vec<Option<Node>>,
    root: NodeId,
    /// Whether the full view has been built onto this tree.
    populated: bool,
}

impl ComponentTree {
    pub fn new(view_id: impl Into<String>) -> Self {
        Self {
            view_id: view_id.into(),
            nodes: vec![Some(Node::new(VIEW_ROOT_TYPE))],
            root: NodeId(0),
            populated: false,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    pub fn set_view_id(&mut self, view_id: impl Into<String>) {
        self.view_id = view_id.into();
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
    }

    /// Number of live nodes (root included).
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Add a detached node to the arena.
    pub fn create(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Some(node));
        id
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or(&[])
    }

    pub fn facets(&self, id: NodeId) -> &[(String, NodeId)] {
        self.get(id).map(Node::facets).unwrap_or(&[])
    }

    pub fn facet(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.facets(id)
            .iter()
            .find(|(facet, _)| facet == name)
            .map(|(_, node)| *node)
    }

    /// Facets first, then children (the order the engine visits them in).
    pub fn facets_and_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.facets(id).iter().map(|(_, n)| *n).collect();
        out.extend_from_slice(self.children(id));
        out
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Put `child` under facet `name`, dropping whatever was there before.
    pub fn set_facet(&mut self, parent: NodeId, name: &str, child: NodeId) {
        if let Some(old) = self.facet(parent, name)
            && old != child
        {
            self.remove(old);
        }
        self.detach(child);
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            match node.facets.iter_mut().find(|(facet, _)| facet == name) {
                Some(slot) => slot.1 = child,
                None => node.facets.push((name.to_string(), child)),
            }
        }
    }

    /// Remove a node and free its subtree.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.index()).and_then(Option::take) {
                stack.extend(node.children);
                stack.extend(node.facets.into_iter().map(|(_, n)| n));
            }
        }
    }

    /// Renumber live nodes densely, dropping the slots freed by `remove`.
    /// Every `NodeId` taken before the call is invalid afterwards.
    pub fn compact(&mut self) {
        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0u32;
        for (slot, node) in remap.iter_mut().zip(&self.nodes) {
            if node.is_some() {
                *slot = Some(NodeId(next));
                next += 1;
            }
        }
        if next as usize == self.nodes.len() {
            return;
        }

        let remapped = |id: NodeId| remap.get(id.index()).copied().flatten();
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .flatten()
            .map(|mut node| {
                node.parent = node.parent.and_then(remapped);
                node.children = node.children.into_iter().filter_map(remapped).collect();
                node.facets = node
                    .facets
                    .into_iter()
                    .filter_map(|(name, id)| remapped(id).map(|id| (name, id)))
                    .collect();
                Some(node)
            })
            .collect();
        self.root = remapped(self.root).unwrap_or(NodeId(0));
    }

    /// Drop every child and facet of `parent` for which `keep` is false.
    pub fn retain<F>(&mut self, parent: NodeId, mut keep: F) -> usize
    where
        F: FnMut(&Node) -> bool,
    {
        let doomed: Vec<NodeId> = self
            .facets_and_children(parent)
            .into_iter()
            .filter(|id| self.get(*id).is_some_and(|n| !keep(n)))
            .collect();
        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }

    /// Pre-order traversal from `from`, facets before children.
    pub fn visit(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !self.contains(id) {
                continue;
            }
            out.push(id);
            let mut next = self.facets_and_children(id);
            next.reverse();
            stack.extend(next);
        }
        out
    }

    /// Find a node by component id anywhere in the tree.
    pub fn find_by_id(&self, component_id: &str) -> Option<NodeId> {
        self.visit(self.root)
            .into_iter()
            .find(|id| self.get(*id).and_then(|n| n.id.as_deref()) == Some(component_id))
    }

    /// Whether the root carries a non-empty metadata facet.
    pub fn has_metadata(&self) -> bool {
        self.facet(self.root, METADATA_FACET)
            .is_some_and(|facet| !self.children(facet).is_empty())
    }

    /// JSON dump of the tree (for diagnostics and the CLI).
    pub fn to_json(&self) -> Value {
        let mut root = self.node_json(self.root);
        if let Value::Object(map) = &mut root {
            map.insert("viewId".into(), json!(self.view_id));
        }
        root
    }

    fn node_json(&self, id: NodeId) -> Value {
        let Some(node) = self.get(id) else {
            return Value::Null;
        };
        let mut map = Map::new();
        map.insert("type".into(), json!(node.component_type));
        if let Some(cid) = &node.id {
            map.insert("id".into(), json!(cid));
        }
        if let Some(text) = &node.text {
            map.insert("text".into(), json!(text));
        }
        if !node.attributes.is_empty() {
            map.insert("attributes".into(), json!(node.attributes));
        }
        if !node.facets.is_empty() {
            let facets: Map<String, Value> = node
                .facets
                .iter()
                .map(|(name, child)| (name.clone(), self.node_json(*child)))
                .collect();
            map.insert("facets".into(), Value::Object(facets));
        }
        if !node.children.is_empty() {
            let children: Vec<Value> = node.children.iter().map(|c| self.node_json(*c)).collect();
            map.insert("children".into(), Value::Array(children));
        }
        Value::Object(map)
    }

    /// Unlink `id` from its parent's children / facets.
    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.get(id).and_then(|n| n.parent) else {
            return;
        };
        if let Some(node) = self.get_mut(parent) {
            node.children.retain(|c| *c != id);
            node.facets.retain(|(_, f)| *f != id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut ComponentTree, parent: NodeId, id: &str) -> NodeId {
        let mut node = Node::new("h:outputText");
        node.id = Some(id.to_string());
        let child = tree.create(node);
        tree.append_child(parent, child);
        child
    }

    #[test]
    fn test_append_and_remove_subtree() {
        let mut tree = ComponentTree::new("/index.xhtml");
        let root = tree.root();
        let panel = leaf(&mut tree, root, "panel");
        let inner = leaf(&mut tree, panel, "inner");
        assert_eq!(tree.len(), 3);

        tree.remove(panel);
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains(inner));
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn test_compact_drops_freed_slots() {
        let mut tree = ComponentTree::new("/index.xhtml");
        let root = tree.root();
        let gone = leaf(&mut tree, root, "gone");
        leaf(&mut tree, gone, "inner");
        let kept = leaf(&mut tree, root, "kept");
        leaf(&mut tree, kept, "child");
        let meta = tree.create(Node::new("meta"));
        tree.set_facet(root, METADATA_FACET, meta);
        tree.remove(gone);
        let before = tree.to_json();

        tree.compact();
        assert_eq!(tree.nodes.len(), tree.len());
        assert_eq!(tree.to_json(), before);

        // repeated apply-and-prune cycles no longer grow the arena
        for _ in 0..10 {
            let root = tree.root();
            let temp = leaf(&mut tree, root, "temp");
            tree.remove(temp);
            tree.compact();
        }
        assert_eq!(tree.nodes.len(), tree.len());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        tree.remove(root);
        assert!(tree.contains(root));
    }

    #[test]
    fn test_facet_replacement_frees_old() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let first = tree.create(Node::new("h:panel"));
        let second = tree.create(Node::new("h:panel"));

        tree.set_facet(root, "header", first);
        tree.set_facet(root, "header", second);

        assert_eq!(tree.facet(root, "header"), Some(second));
        assert!(!tree.contains(first));
        assert_eq!(tree.facets(root).len(), 1);
    }

    #[test]
    fn test_visit_order_facets_first() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let a = leaf(&mut tree, root, "a");
        let f = tree.create(Node::new("h:panel"));
        tree.set_facet(root, "header", f);
        let b = leaf(&mut tree, a, "b");

        assert_eq!(tree.visit(root), vec![root, f, a, b]);
        assert_eq!(tree.find_by_id("b"), Some(b));
    }

    #[test]
    fn test_retain() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        leaf(&mut tree, root, "keep");
        leaf(&mut tree, root, "drop");

        let removed = tree.retain(root, |n| n.id.as_deref() != Some("drop"));
        assert_eq!(removed, 1);
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn test_has_metadata() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        assert!(!tree.has_metadata());

        let facet = tree.create(Node::new("f:metadata"));
        tree.set_facet(root, METADATA_FACET, facet);
        assert!(!tree.has_metadata());

        leaf(&mut tree, facet, "param");
        assert!(tree.has_metadata());
    }

    #[test]
    fn test_json_dump() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        leaf(&mut tree, root, "out");
        let json = tree.to_json();
        assert_eq!(json["viewId"], "/a.xhtml");
        assert_eq!(json["children"][0]["id"], "out");
    }
}
