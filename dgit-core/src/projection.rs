//! Lazily enumerated virtual trees
//!
//! A projection produces the children of one node at a time, so only the
//! part of the tree that is currently visited exists in memory. Children
//! always come in git tree order.

use crate::model::{CategoryPath, DatasetDescriptor, ModelType};
use crate::object::{EntryMode, ObjectId, TreeEntry};

/// Object id of a projected node, when it is known without computing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Resolved(ObjectId),
    Unresolved,
}

impl NodeId {
    pub fn resolved(&self) -> Option<ObjectId> {
        match self {
            NodeId::Resolved(id) => Some(*id),
            NodeId::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    ModelType(ModelType),
    Category {
        model_type: ModelType,
        category: CategoryPath,
    },
    Dataset(DatasetDescriptor),
}

/// One node of the working-tree projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Escaped entry name
    pub name: String,
    /// Escaped path from the root
    pub path: String,
    pub kind: NodeKind,
    pub id: NodeId,
}

impl Node {
    pub fn mode(&self) -> EntryMode {
        match self.kind {
            NodeKind::Dataset(_) => EntryMode::File,
            NodeKind::ModelType(_) | NodeKind::Category { .. } => EntryMode::Tree,
        }
    }
}

/// What the depth-first cursor needs from a node
pub trait ProjectedNode {
    fn name(&self) -> &str;
    fn path(&self) -> &str;
    fn is_tree(&self) -> bool;

    /// Key that orders siblings the way git orders tree entries
    fn sort_key(&self) -> Vec<u8> {
        let mode = if self.is_tree() {
            EntryMode::Tree
        } else {
            EntryMode::File
        };
        TreeEntry::sort_key(self.name(), mode)
    }
}

impl ProjectedNode for Node {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_tree(&self) -> bool {
        self.mode().is_tree()
    }
}

pub trait Projection {
    type Node: ProjectedNode;

    /// Children of `parent` in git order; the top level for `None`.
    /// Expands exactly one level.
    fn children(&self, parent: Option<&Self::Node>) -> anyhow::Result<Vec<Self::Node>>;
}

/// Pre-order walk over a projection, holding one frame per open level
pub struct DepthFirst<'a, P: Projection> {
    projection: &'a P,
    stack: Vec<std::vec::IntoIter<P::Node>>,
    pending: Option<anyhow::Error>,
}

impl<'a, P: Projection> DepthFirst<'a, P> {
    /// Walk the whole projection
    pub fn new(projection: &'a P) -> Self {
        Self::start(projection, projection.children(None))
    }

    /// Walk everything below `node`, without `node` itself
    pub fn below(projection: &'a P, node: &P::Node) -> Self {
        Self::start(projection, projection.children(Some(node)))
    }

    fn start(projection: &'a P, top: anyhow::Result<Vec<P::Node>>) -> Self {
        let (stack, pending) = match top {
            Ok(nodes) => (vec![nodes.into_iter()], None),
            Err(err) => (Vec::new(), Some(err)),
        };
        Self {
            projection,
            stack,
            pending,
        }
    }

    /// Current nesting level, 1 for top-level nodes
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl<P: Projection> Iterator for DepthFirst<'_, P> {
    type Item = anyhow::Result<P::Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }
        loop {
            let frame = self.stack.last_mut()?;
            let Some(node) = frame.next() else {
                self.stack.pop();
                continue;
            };
            if node.is_tree() {
                match self.projection.children(Some(&node)) {
                    Ok(children) => self.stack.push(children.into_iter()),
                    Err(err) => {
                        self.stack.clear();
                        return Some(Err(err));
                    }
                }
            }
            return Some(Ok(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed tree described by paths; a trailing `/` marks a folder
    struct Paths(Vec<&'static str>);

    #[derive(Clone)]
    struct PathNode(String, bool);

    impl ProjectedNode for PathNode {
        fn name(&self) -> &str {
            crate::path::file_name(&self.0)
        }
        fn path(&self) -> &str {
            &self.0
        }
        fn is_tree(&self) -> bool {
            self.1
        }
    }

    impl Projection for Paths {
        type Node = PathNode;

        fn children(&self, parent: Option<&PathNode>) -> anyhow::Result<Vec<PathNode>> {
            let prefix = parent.map(|p| format!("{}/", p.0)).unwrap_or_default();
            let mut nodes: Vec<PathNode> = self
                .0
                .iter()
                .filter_map(|p| p.strip_prefix(prefix.as_str()))
                .filter(|rest| !rest.trim_end_matches('/').contains('/') && !rest.is_empty())
                .map(|rest| {
                    let is_tree = rest.ends_with('/');
                    PathNode(format!("{}{}", prefix, rest.trim_end_matches('/')), is_tree)
                })
                .collect();
            nodes.sort_by_key(|n| n.sort_key());
            Ok(nodes)
        }
    }

    #[test]
    fn test_pre_order_in_git_order() {
        let tree = Paths(vec!["b/", "b/x", "a.txt", "a/", "a/y/", "a/y/z"]);
        let walked: Vec<String> = DepthFirst::new(&tree).map(|n| n.unwrap().0).collect();
        // "a.txt" sorts before the folder "a" because '.' < '/'
        assert_eq!(walked, vec!["a.txt", "a", "a/y", "a/y/z", "b", "b/x"]);

        let below_a: Vec<String> = DepthFirst::below(&tree, &PathNode("a".into(), true))
            .map(|n| n.unwrap().0)
            .collect();
        assert_eq!(below_a, vec!["a/y", "a/y/z"]);
    }
}
