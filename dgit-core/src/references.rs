//! Locating datasets in commits

use futures::future::BoxFuture;

use crate::commits::Commits;
use crate::diffs::{DiffSide, Diffs};
use crate::error::Result;
use crate::model::{DiffType, ModelType, Reference};
use crate::object::{ObjectId, Tree};
use crate::path;
use crate::storage::{branch_ref, Repository};

pub struct References<'a, R: Repository + ?Sized> {
    repo: &'a R,
    branch: String,
}

impl<'a, R: Repository + ?Sized> References<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self {
            repo,
            branch: "main".to_string(),
        }
    }

    /// Branch used when a query names no commit
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// The dataset `ref_id` as stored in `commit`
    pub async fn get(&self, model_type: ModelType, ref_id: &str, commit: ObjectId) -> Result<Option<Reference>> {
        let refs = self.find().commit(commit).model(model_type, ref_id).all().await?;
        Ok(refs.into_iter().next())
    }

    pub fn find(&self) -> ReferenceQuery<'_, 'a, R> {
        ReferenceQuery {
            references: self,
            commit: None,
            path: None,
            model_type: None,
            ref_id: None,
            changed_since: None,
        }
    }

    /// Collect every dataset blob below `tree`
    fn collect<'s>(
        &'s self,
        prefix: String,
        tree: Tree,
        commit: ObjectId,
        filter: &'s ReferenceFilter,
        out: &'s mut Vec<Reference>,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            for entry in tree.iter() {
                let entry_path = path::join(&prefix, &entry.name);
                if entry.mode.is_tree() {
                    if entry.name.ends_with(path::BINARY_SUFFIX) || !filter.may_contain(&entry_path) {
                        continue;
                    }
                    let subtree = self.repo.read_tree(entry.id).await?;
                    self.collect(entry_path, subtree, commit, filter, out).await?;
                } else if let Some(reference) = Reference::from_path(&entry_path, commit, Some(entry.id)) {
                    if filter.matches(&reference) {
                        out.push(reference);
                    }
                }
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Default)]
struct ReferenceFilter {
    path: Option<String>,
    model_type: Option<ModelType>,
    ref_id: Option<String>,
}

impl ReferenceFilter {
    /// Whether datasets matching the filter may live below `folder`
    fn may_contain(&self, folder: &str) -> bool {
        if let Some(model_type) = self.model_type {
            if !path::is_within(folder, model_type.as_str()) {
                return false;
            }
        }
        match &self.path {
            Some(filter) => path::overlaps(folder, filter),
            None => true,
        }
    }

    fn matches(&self, reference: &Reference) -> bool {
        self.model_type.is_none_or(|t| t == reference.model_type)
            && self.ref_id.as_ref().is_none_or(|id| *id == reference.ref_id)
            && self.path.as_ref().is_none_or(|p| path::is_within(&reference.path, p))
    }
}

pub struct ReferenceQuery<'r, 'a, R: Repository + ?Sized> {
    references: &'r References<'a, R>,
    commit: Option<ObjectId>,
    path: Option<String>,
    model_type: Option<ModelType>,
    ref_id: Option<String>,
    changed_since: Option<ObjectId>,
}

impl<'r, 'a, R: Repository + ?Sized> ReferenceQuery<'r, 'a, R> {
    /// Look at this commit instead of the branch head
    pub fn commit(mut self, commit: ObjectId) -> Self {
        self.commit = Some(commit);
        self
    }

    /// Only datasets at or below this escaped path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    /// A single dataset
    pub fn model(mut self, model_type: ModelType, ref_id: impl Into<String>) -> Self {
        self.model_type = Some(model_type);
        self.ref_id = Some(ref_id.into());
        self
    }

    /// Only datasets that changed after `since`. Deleted datasets are
    /// reported without an object id.
    pub fn changed_since(mut self, since: ObjectId) -> Self {
        self.changed_since = Some(since);
        self
    }

    pub async fn count(self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn all(self) -> Result<Vec<Reference>> {
        let references = self.references;
        let target = match self.commit {
            Some(commit) => commit,
            None => match references.repo.read_ref(&branch_ref(&references.branch)).await? {
                Some(head) => head,
                None => return Ok(Vec::new()),
            },
        };
        let filter = ReferenceFilter {
            path: self.path,
            model_type: self.model_type,
            ref_id: self.ref_id,
        };

        if let Some(since) = self.changed_since {
            let ancestor = Commits::new(references.repo).nearest_ancestor(target, since).await?;
            if let Some(ancestor) = ancestor {
                return changes_between(references.repo, ancestor, target, &filter).await;
            }
            tracing::debug!("No ancestor of {} at or before {}, listing everything", target, since);
        }

        let commit = references.repo.read_commit(target).await?;
        let root = references.repo.read_tree(commit.tree_id).await?;
        let mut found = Vec::new();
        references.collect(String::new(), root, target, &filter, &mut found).await?;
        Ok(found)
    }
}

async fn changes_between<R: Repository + ?Sized>(
    repo: &R,
    ancestor: ObjectId,
    target: ObjectId,
    filter: &ReferenceFilter,
) -> Result<Vec<Reference>> {
    let diffs = Diffs::new(repo);
    let mut query = diffs.find().between(DiffSide::Commit(ancestor), DiffSide::Commit(target));
    if let Some(model_type) = filter.model_type {
        query = query.model_type(model_type);
    }
    if let Some(folder) = &filter.path {
        query = query.path(folder.clone());
    }

    let mut found = Vec::new();
    for diff in query.all().await? {
        if matches!(diff.diff_type, DiffType::Deleted | DiffType::Renamed) {
            if let Some(old_path) = &diff.old_path {
                found.extend(Reference::from_path(old_path, target, None));
            }
        }
        if diff.diff_type != DiffType::Deleted {
            if let Some(new_path) = &diff.new_path {
                found.extend(Reference::from_path(new_path, target, diff.new_id));
            }
        }
    }
    found.retain(|reference| filter.matches(reference));
    Ok(found)
}
