//! Working tree and staging index
//!
//! Binds an [`ObjectStore`] to a [`MemFs`] checkout of one commit. The index
//! mirrors the root tree of the checked-out commit; staging writes a file to the
//! filesystem and records its blob, removal drops the entry from both. Subtrees
//! from the checkout are carried as opaque entries so their ids never change.

use crate::memfs::{FsError, MemFs};
use crate::object::{Commit, MODE_EXECUTABLE, MODE_FILE, ObjectId, Signature, Tree, TreeEntry};
use crate::store::{ObjectStore, StoreError};
use bytes::Bytes;

/// Errors raised by working-tree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Not tracked: {0}")]
    NotTracked(String),

    #[error("Nothing to commit")]
    NothingToCommit,

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// How an index entry differs from the head tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One pending change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

/// A commit on the first-parent chain
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: ObjectId,
    pub commit: Commit,
}

/// Mutable working tree over an in-memory filesystem and object store
#[derive(Debug)]
pub struct Worktree {
    fs: MemFs,
    store: ObjectStore,
    index: Tree,
    head: ObjectId,
    head_tree: ObjectId,
}

impl Worktree {
    /// Check out `head` from `store` into a fresh filesystem
    pub fn checkout(store: ObjectStore, head: ObjectId) -> Result<Self, WorktreeError> {
        let commit = store.read_commit(&head)?;
        let index = store.read_tree(&commit.tree)?;

        let mut fs = MemFs::new();
        write_tree(&store, &mut fs, &index, "")?;

        tracing::debug!("Checked out {} ({} files)", head, fs.len());

        Ok(Self {
            fs,
            store,
            index,
            head,
            head_tree: commit.tree,
        })
    }

    pub fn head(&self) -> ObjectId {
        self.head
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn fs(&self) -> &MemFs {
        &self.fs
    }

    /// Names tracked at the root of the index
    pub fn tracked(&self) -> Vec<String> {
        self.index.names().map(str::to_string).collect()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.index.get(name).is_some()
    }

    /// Write `data` to `name` and stage it, replacing any entry of that name
    pub fn stage(&mut self, name: &str, data: Bytes) -> Result<ObjectId, WorktreeError> {
        if name.contains('/') {
            return Err(FsError::InvalidName(name.to_string()).into());
        }
        self.fs.write(name, data.clone())?;

        let id = self.store.write_blob(data);
        let mode = match self.index.get(name) {
            Some(existing) if existing.mode == MODE_EXECUTABLE => MODE_EXECUTABLE,
            _ => MODE_FILE,
        };
        self.index.insert(TreeEntry::new(mode, name, id));

        tracing::debug!("Staged {} as blob {}", name, id);
        Ok(id)
    }

    /// Drop `name` from the index and the filesystem
    pub fn remove(&mut self, name: &str) -> Result<(), WorktreeError> {
        let entry = self
            .index
            .remove(name)
            .ok_or_else(|| WorktreeError::NotTracked(name.to_string()))?;

        if entry.is_tree() {
            self.fs.remove_dir_all(name);
        } else if let Err(e) = self.fs.remove(name) {
            // gitlinks are never checked out
            tracing::debug!("No working file for {}: {}", name, e);
        }

        tracing::debug!("Removed {}", name);
        Ok(())
    }

    /// Pending changes of the index against the head tree
    pub fn status(&self) -> Result<Vec<Change>, WorktreeError> {
        let head = self.store.read_tree(&self.head_tree)?;
        let mut changes = Vec::new();

        for entry in self.index.iter() {
            match head.get(&entry.name) {
                None => changes.push(Change {
                    path: entry.name.clone(),
                    kind: ChangeKind::Added,
                }),
                Some(old) if old.id != entry.id || old.mode != entry.mode => changes.push(Change {
                    path: entry.name.clone(),
                    kind: ChangeKind::Modified,
                }),
                Some(_) => {}
            }
        }
        for entry in head.iter() {
            if self.index.get(&entry.name).is_none() {
                changes.push(Change {
                    path: entry.name.clone(),
                    kind: ChangeKind::Deleted,
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    /// Record the index as a new commit on top of head
    pub fn commit(&mut self, author: Signature, message: &str) -> Result<ObjectId, WorktreeError> {
        let tree_id = self.store.write_tree(&self.index);
        if tree_id == self.head_tree {
            return Err(WorktreeError::NothingToCommit);
        }

        let commit = Commit::new(tree_id, vec![self.head], author, message);
        let id = self.store.write_commit(&commit);

        tracing::debug!("Created commit {} (tree {}, parent {})", id, tree_id, self.head);

        self.head = id;
        self.head_tree = tree_id;
        Ok(id)
    }

    /// First-parent history from head, newest first
    pub fn log(&self) -> Result<Vec<LogEntry>, WorktreeError> {
        let mut entries = Vec::new();
        let mut next = Some(self.head);
        while let Some(id) = next {
            let commit = self.store.read_commit(&id)?;
            next = commit.parents.first().copied();
            entries.push(LogEntry { id, commit });
        }
        Ok(entries)
    }
}

fn write_tree(store: &ObjectStore, fs: &mut MemFs, tree: &Tree, prefix: &str) -> Result<(), WorktreeError> {
    for entry in tree.iter() {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };

        if entry.is_tree() {
            write_tree(store, fs, &store.read_tree(&entry.id)?, &path)?;
        } else if !entry.is_gitlink() {
            // symlinks land as plain files holding the target path
            fs.write(&path, store.read_blob(&entry.id)?)?;
        }
    }
    Ok(())
}
