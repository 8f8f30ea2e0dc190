//! Working-tree projection of the live dataset
//!
//! Model types form the top level, categories the folders below them and
//! datasets the files. Datasets and categories of mounted libraries are left
//! out. A dataset's id comes from the object-id cache when the
//! cached entry still matches the dataset's version stamp; otherwise it stays
//! unresolved and has to be computed by serializing the record. Folder ids
//! are never resolved here.

use std::sync::Arc;

use crate::cache::ObjectIdCache;
use crate::model::{CategoryPath, ModelType};
use crate::path;
use crate::projection::{Node, NodeId, NodeKind, ProjectedNode, Projection};
use crate::store::DatasetStore;

#[derive(Clone)]
pub struct WorkspaceTree {
    store: Arc<dyn DatasetStore>,
    cache: Option<ObjectIdCache>,
}

impl WorkspaceTree {
    pub fn new(store: Arc<dyn DatasetStore>, cache: Option<ObjectIdCache>) -> Self {
        Self { store, cache }
    }

    fn model_type_nodes(&self) -> anyhow::Result<Vec<Node>> {
        let present = self.store.model_types()?;
        Ok(ModelType::ALL
            .iter()
            .filter(|t| present.contains(t))
            .map(|t| Node {
                name: t.as_str().to_string(),
                path: t.as_str().to_string(),
                kind: NodeKind::ModelType(*t),
                id: NodeId::Unresolved,
            })
            .collect())
    }

    fn folder_nodes(&self, parent: &str, model_type: ModelType, category: &CategoryPath) -> anyhow::Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for info in self.store.child_categories(model_type, category)? {
            if info.library.is_some() {
                continue;
            }
            let escaped = path::escape_segment(&info.name);
            nodes.push(Node {
                path: path::join(parent, &escaped),
                name: escaped,
                kind: NodeKind::Category {
                    model_type,
                    category: category.child(info.name),
                },
                id: NodeId::Unresolved,
            });
        }
        for dataset in self.store.datasets(model_type, category)? {
            if dataset.library.is_some() {
                continue;
            }
            let name = path::dataset_file_name(&dataset.ref_id);
            let node_path = path::join(parent, &name);
            let id = match &self.cache {
                Some(cache) => cache.lookup_valid(&node_path, dataset.state)?,
                None => None,
            };
            nodes.push(Node {
                name,
                path: node_path,
                kind: NodeKind::Dataset(dataset),
                id: id.map_or(NodeId::Unresolved, NodeId::Resolved),
            });
        }
        nodes.sort_by_key(|n| n.sort_key());
        Ok(nodes)
    }
}

impl Projection for WorkspaceTree {
    type Node = Node;

    fn children(&self, parent: Option<&Node>) -> anyhow::Result<Vec<Node>> {
        let Some(parent) = parent else {
            return self.model_type_nodes();
        };
        match &parent.kind {
            NodeKind::ModelType(model_type) => {
                self.folder_nodes(&parent.path, *model_type, &CategoryPath::root())
            }
            NodeKind::Category {
                model_type,
                category,
            } => self.folder_nodes(&parent.path, *model_type, category),
            NodeKind::Dataset(_) => Ok(Vec::new()),
        }
    }
}
