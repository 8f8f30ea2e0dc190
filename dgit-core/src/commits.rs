//! Commit history access

use crate::error::Result;
use crate::object::{Commit, ObjectId, Tree};
use crate::storage::{branch_ref, RefLogEntry, Repository, STASH_REF};

/// A commit together with its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub commit: Commit,
}

impl CommitInfo {
    /// Committer time, unix seconds
    pub fn timestamp(&self) -> i64 {
        self.commit.committer.timestamp
    }
}

pub struct Commits<'a, R: Repository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: Repository + ?Sized> Commits<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    pub async fn get(&self, id: ObjectId) -> Result<CommitInfo> {
        let commit = self.repo.read_commit(id).await?;
        Ok(CommitInfo { id, commit })
    }

    /// Commit the branch points at
    pub async fn head(&self, branch: &str) -> Result<Option<CommitInfo>> {
        match self.repo.read_ref(&branch_ref(branch)).await? {
            Some(id) => Ok(Some(self.get(id).await?)),
            None => Ok(None),
        }
    }

    /// First-parent history starting at `from`, newest first
    pub async fn log(&self, from: ObjectId, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        let mut history = Vec::new();
        let mut next = Some(from);
        while let Some(id) = next {
            if limit.is_some_and(|limit| history.len() >= limit) {
                break;
            }
            let info = self.get(id).await?;
            next = info.commit.parents.first().copied();
            history.push(info);
        }
        Ok(history)
    }

    /// `since` itself when it lies on the first-parent line of `target`,
    /// otherwise the newest commit on that line not newer than `since`
    pub async fn nearest_ancestor(&self, target: ObjectId, since: ObjectId) -> Result<Option<ObjectId>> {
        let line = self.log(target, None).await?;
        if line.iter().any(|info| info.id == since) {
            return Ok(Some(since));
        }
        let since_time = self.get(since).await?.timestamp();
        Ok(line
            .iter()
            .find(|info| info.timestamp() <= since_time)
            .map(|info| info.id))
    }

    /// Tree of `commit` below an escaped folder path; `None` when the folder
    /// does not exist
    pub async fn tree_at(&self, commit: ObjectId, folder: &str) -> Result<Option<Tree>> {
        let commit = self.repo.read_commit(commit).await?;
        let mut tree = self.repo.read_tree(commit.tree_id).await?;
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            match tree.get(segment) {
                Some(entry) if entry.mode.is_tree() => tree = self.repo.read_tree(entry.id).await?,
                _ => return Ok(None),
            }
        }
        Ok(Some(tree))
    }

    /// Stashed commits, oldest first
    pub async fn stashes(&self) -> Result<Vec<RefLogEntry>> {
        Ok(self.repo.reflog(STASH_REF).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectKind, Signature};
    use crate::repository::MemoryRepository;
    use crate::storage::{ObjectStore, RefStore};
    use bytes::Bytes;

    async fn commit(repo: &MemoryRepository, parent: Option<ObjectId>, time: i64) -> ObjectId {
        let tree = repo.put(ObjectKind::Tree, Bytes::from(Tree::new().encode())).await.unwrap();
        let sig = Signature::new("t", "t@example.com", time, 0);
        let commit = Commit::new(tree, parent.into_iter().collect(), sig.clone(), sig, format!("at {}", time));
        repo.put(ObjectKind::Commit, Bytes::from(commit.encode())).await.unwrap()
    }

    #[tokio::test]
    async fn test_log_and_nearest_ancestor() {
        let repo = MemoryRepository::new();
        let c1 = commit(&repo, None, 100).await;
        let c2 = commit(&repo, Some(c1), 200).await;
        let c3 = commit(&repo, Some(c2), 300).await;
        repo.update_ref("refs/heads/main", None, c3).await.unwrap();

        let commits = Commits::new(&repo);
        assert_eq!(commits.head("main").await.unwrap().unwrap().id, c3);
        let log: Vec<ObjectId> = commits.log(c3, None).await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(log, vec![c3, c2, c1]);
        assert_eq!(commits.log(c3, Some(2)).await.unwrap().len(), 2);

        assert_eq!(commits.nearest_ancestor(c3, c2).await.unwrap(), Some(c2));

        // a commit from another line of history, between c1 and c2
        let side = commit(&repo, None, 150).await;
        assert_eq!(commits.nearest_ancestor(c3, side).await.unwrap(), Some(c1));
        let older = commit(&repo, None, 50).await;
        assert_eq!(commits.nearest_ancestor(c3, older).await.unwrap(), None);
    }
}
