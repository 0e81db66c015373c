//! Mark-and-finalize reconciliation of re-applied children.
//!
//! Before a handler re-runs its body against an existing component, every
//! child and facet it created last time is marked. Re-running the body
//! re-confirms (unmarks) whatever it still produces; finalizing removes the
//! rest. Nodes without a mark (added programmatically) are never touched.

use super::{ComponentTree, NodeId};

/// Mark every handler-created child and facet of `parent` for deletion.
pub fn mark_for_deletion(tree: &mut ComponentTree, parent: NodeId) {
    for id in tree.facets_and_children(parent) {
        if let Some(node) = tree.get_mut(id)
            && node.mark.is_some()
        {
            node.marked_deleted = true;
        }
    }
}

/// Remove every child and facet of `parent` that is still marked.
pub fn finalize_for_deletion(tree: &mut ComponentTree, parent: NodeId) -> usize {
    tree.retain(parent, |node| !node.marked_deleted)
}

/// Find the child or facet of `parent` that a handler created under `mark`.
pub fn find_marked(tree: &ComponentTree, parent: NodeId, mark: &str) -> Option<NodeId> {
    tree.facets_and_children(parent)
        .into_iter()
        .find(|id| tree.get(*id).and_then(|n| n.mark.as_deref()) == Some(mark))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn marked(tree: &mut ComponentTree, parent: NodeId, mark: &str) -> NodeId {
        let mut node = Node::new("h:outputText");
        node.mark = Some(mark.to_string());
        let id = tree.create(node);
        tree.append_child(parent, id);
        id
    }

    #[test]
    fn test_unconfirmed_children_are_removed() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let keep = marked(&mut tree, root, "m1");
        let drop = marked(&mut tree, root, "m2");
        let manual = tree.create(Node::new("h:panel"));
        tree.append_child(root, manual);

        mark_for_deletion(&mut tree, root);
        assert!(tree.get(manual).is_some_and(|n| !n.marked_deleted));

        // handler re-confirms m1 only
        let found = find_marked(&tree, root, "m1").unwrap();
        tree.get_mut(found).unwrap().marked_deleted = false;

        assert_eq!(finalize_for_deletion(&mut tree, root), 1);
        assert!(tree.contains(keep));
        assert!(!tree.contains(drop));
        assert!(tree.contains(manual));
    }

    #[test]
    fn test_find_marked_searches_facets() {
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let mut node = Node::new("h:panel");
        node.mark = Some("facet-mark".into());
        let facet = tree.create(node);
        tree.set_facet(root, "header", facet);

        assert_eq!(find_marked(&tree, root, "facet-mark"), Some(facet));
        assert_eq!(find_marked(&tree, root, "missing"), None);
    }
}
