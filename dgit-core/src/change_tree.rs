//! Projection of a pending change list
//!
//! Only folders that contain at least one change exist in this tree. The
//! changes are kept sorted by path, so every folder covers a contiguous
//! range of them.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use crate::model::Change;
use crate::path;
use crate::projection::{ProjectedNode, Projection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNodeKind {
    /// Folder with changes below it
    Subtree,
    File(Change),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNode {
    pub name: String,
    pub path: String,
    pub kind: ChangeNodeKind,
    range: Range<usize>,
}

impl ChangeNode {
    pub fn change(&self) -> Option<&Change> {
        match &self.kind {
            ChangeNodeKind::File(change) => Some(change),
            ChangeNodeKind::Subtree => None,
        }
    }
}

impl ProjectedNode for ChangeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_tree(&self) -> bool {
        matches!(self.kind, ChangeNodeKind::Subtree)
    }
}

#[derive(Debug, Clone)]
pub struct ChangeTree {
    changes: Arc<[Change]>,
}

impl ChangeTree {
    /// Build from an unordered list. For repeated paths the last change wins.
    pub fn new(changes: impl IntoIterator<Item = Change>) -> Self {
        let by_path: BTreeMap<String, Change> = changes
            .into_iter()
            .map(|change| (change.path.clone(), change))
            .collect();
        Self {
            changes: by_path.into_values().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// All changes, sorted by path
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    fn nodes_in(&self, prefix: &str, range: Range<usize>) -> Vec<ChangeNode> {
        let mut nodes = Vec::new();
        let mut i = range.start;
        while i < range.end {
            let full = &self.changes[i].path;
            let rest = if prefix.is_empty() {
                full.as_str()
            } else {
                &full[prefix.len() + 1..]
            };
            match rest.split_once('/') {
                None => {
                    nodes.push(ChangeNode {
                        name: rest.to_string(),
                        path: full.clone(),
                        kind: ChangeNodeKind::File(self.changes[i].clone()),
                        range: i..i + 1,
                    });
                    i += 1;
                }
                Some((name, _)) => {
                    let folder = path::join(prefix, name);
                    let start = i;
                    while i < range.end && path::is_within(&self.changes[i].path, &folder) {
                        i += 1;
                    }
                    nodes.push(ChangeNode {
                        name: name.to_string(),
                        path: folder,
                        kind: ChangeNodeKind::Subtree,
                        range: start..i,
                    });
                }
            }
        }
        nodes.sort_by_key(|n| n.sort_key());
        nodes
    }

    /// Top-level nodes
    pub fn root(&self) -> Vec<ChangeNode> {
        self.nodes_in("", 0..self.changes.len())
    }

    /// Direct children of a folder node
    pub fn children_of(&self, node: &ChangeNode) -> Vec<ChangeNode> {
        match node.kind {
            ChangeNodeKind::Subtree => self.nodes_in(&node.path, node.range.clone()),
            ChangeNodeKind::File(_) => Vec::new(),
        }
    }
}

impl Projection for ChangeTree {
    type Node = ChangeNode;

    fn children(&self, parent: Option<&ChangeNode>) -> anyhow::Result<Vec<ChangeNode>> {
        Ok(match parent {
            Some(node) => self.children_of(node),
            None => self.root(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use crate::projection::DepthFirst;

    fn tree(paths: &[&str]) -> ChangeTree {
        ChangeTree::new(paths.iter().map(|p| Change::new(*p, ChangeKind::Modified)))
    }

    #[test]
    fn test_only_touched_folders_exist() {
        let changes = tree(&["Flow/cat1/rec2.json", "Process/rec1.json", "Flow/rec3.json", "Flow/cat1/sub/rec4.json"]);
        let root = changes.root();
        let names: Vec<&str> = root.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Flow", "Process"]);

        let flow = changes.children_of(&root[0]);
        let flow_names: Vec<(&str, bool)> = flow.iter().map(|n| (n.name.as_str(), n.is_tree())).collect();
        assert_eq!(flow_names, vec![("cat1", true), ("rec3.json", false)]);

        let cat1 = changes.children_of(&flow[0]);
        assert_eq!(cat1.len(), 2);
        assert_eq!(cat1[0].path, "Flow/cat1/rec2.json");
        assert_eq!(cat1[1].path, "Flow/cat1/sub");
    }

    #[test]
    fn test_similar_prefixes_stay_apart() {
        let changes = tree(&["Flow/cat1/a.json", "Flow/cat1-x/b.json", "Flow/cat10/c.json"]);
        let flow = changes.children_of(&changes.root()[0]);
        let names: Vec<&str> = flow.iter().map(|n| n.name.as_str()).collect();
        // git order: '-' < '/' < '0'
        assert_eq!(names, vec!["cat1-x", "cat1", "cat10"]);
        assert!(flow.iter().all(|n| changes.children_of(n).len() == 1));
    }

    #[test]
    fn test_last_change_wins_and_full_walk() {
        let changes = ChangeTree::new(vec![
            Change::new("Actor/a.json", ChangeKind::Added),
            Change::new("Actor/a.json", ChangeKind::Deleted),
        ]);
        assert_eq!(changes.len(), 1);
        let walked: Vec<ChangeNode> = DepthFirst::new(&changes).map(|n| n.unwrap()).collect();
        assert_eq!(walked.len(), 2);
        assert_eq!(walked[1].change().map(|c| c.kind), Some(ChangeKind::Deleted));
    }
}
