//! Saved view state for postbacks, and the session token protected views
//! are checked against.

use dashmap::DashMap;

use crate::tree::ComponentTree;

pub trait StateManager: Send + Sync {
    fn save(&self, view_id: &str, tree: &ComponentTree);

    /// `None` when nothing was saved for `view_id` (the view expired).
    fn restore(&self, view_id: &str) -> Option<ComponentTree>;

    /// Token a protected view must be requested with.
    fn token(&self) -> &str;
}

/// Keeps saved trees in memory, keyed by view id.
#[derive(Debug)]
pub struct MemoryStateManager {
    states: DashMap<String, ComponentTree>,
    token: String,
}

impl Default for MemoryStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateManager {
    pub fn new() -> Self {
        Self::with_token(random_token())
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            states: DashMap::new(),
            token: token.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateManager for MemoryStateManager {
    fn save(&self, view_id: &str, tree: &ComponentTree) {
        let mut saved = tree.clone();
        saved.compact();
        self.states.insert(view_id.to_string(), saved);
    }

    fn restore(&self, view_id: &str) -> Option<ComponentTree> {
        self.states.get(view_id).map(|tree| tree.value().clone())
    }

    fn token(&self) -> &str {
        &self.token
    }
}

/// Random v4 uuid from the OS generator, as 32 hex digits.
fn random_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_restore() {
        let states = MemoryStateManager::new();
        assert!(states.restore("/a.xhtml").is_none());

        let mut tree = ComponentTree::new("/a.xhtml");
        tree.set_populated(true);
        states.save("/a.xhtml", &tree);

        let restored = states.restore("/a.xhtml").unwrap();
        assert_eq!(restored.view_id(), "/a.xhtml");
        assert!(restored.is_populated());
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn test_saved_tree_is_compacted() {
        use crate::tree::Node;

        let states = MemoryStateManager::new();
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let mut ids = Vec::new();
        for i in 0..4 {
            let mut node = Node::new("h:panel");
            node.id = Some(format!("p{i}"));
            let id = tree.create(node);
            tree.append_child(root, id);
            ids.push(id);
        }
        tree.remove(ids[0]);
        tree.remove(ids[2]);
        states.save("/a.xhtml", &tree);

        let restored = states.restore("/a.xhtml").unwrap();
        assert_eq!(restored.to_json(), tree.to_json());
        assert_eq!(restored.len(), 3);
        // renumbered densely: the survivors take the low slots
        let p3 = restored.find_by_id("p3").unwrap();
        assert_eq!(restored.children(restored.root()), &[restored.find_by_id("p1").unwrap(), p3]);
        assert!(restored.get(ids[3]).is_none());
    }

    #[test]
    fn test_tokens() {
        let a = MemoryStateManager::new();
        let b = MemoryStateManager::new();
        assert_eq!(a.token().len(), 32);
        assert_ne!(a.token(), b.token());
        assert_eq!(MemoryStateManager::with_token("t").token(), "t");
    }

    #[test]
    fn test_tokens_share_no_half_on_one_thread() {
        let tokens: Vec<String> = (0..64).map(|_| random_token()).collect();
        assert!(tokens.iter().all(|t| t.bytes().all(|b| b.is_ascii_hexdigit())));

        let mut halves: Vec<&str> = tokens.iter().flat_map(|t| [&t[..16], &t[16..]]).collect();
        halves.sort_unstable();
        halves.dedup();
        assert_eq!(halves.len(), 128);
    }
}
