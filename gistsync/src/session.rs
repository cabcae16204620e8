//! Synchronization session over one in-memory clone
//!
//! A [`GitSyncSession`] owns an ephemeral clone of the snippet repository:
//! an in-memory filesystem and object store, the working tree over them, and
//! the remote it came from. Callers stage files, remove the placeholder,
//! commit and push; dropping the session discards everything not pushed.

use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::http::HttpRemote;
use crate::info::Info;
use crate::remote::{Credentials, RefUpdate, Remote};
use bytes::Bytes;
use gistsync_core::{
    Change, FsError, ObjectId, ObjectStore, PackWriter, Signature, Worktree, WorktreeError, unpack,
};
use std::path::Path;

/// Result of [`GitSyncSession::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing new since the last successful push; the remote was not contacted
    UpToDate,
    Pushed {
        old: ObjectId,
        new: ObjectId,
        objects: usize,
    },
}

/// One commit as reported by [`GitSyncSession::log`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// Ephemeral clone of a snippet repository
pub struct GitSyncSession<R = HttpRemote> {
    info: Info,
    credentials: Credentials,
    worktree: Worktree,
    remote: R,
    branch: String,
    /// Remote tip as of the clone or the last successful push
    remote_tip: ObjectId,
}

impl GitSyncSession<HttpRemote> {
    /// Clone `info.git_url` over smart HTTP into fresh in-memory storage
    pub async fn open(info: Info, access_token: impl Into<String>, config: &SessionConfig) -> Result<Self> {
        let remote =
            HttpRemote::new(&info.git_url, config).map_err(|e| SyncError::clone_failed(&info.git_url, e))?;
        Self::open_with(info, access_token, remote).await
    }
}

impl<R: Remote> GitSyncSession<R> {
    /// Clone through `remote` into fresh in-memory storage
    pub async fn open_with(info: Info, access_token: impl Into<String>, remote: R) -> Result<Self> {
        let credentials = Credentials::new(info.id.clone(), access_token);
        let url = remote.url().to_string();

        let cloned = remote
            .clone_repo(&credentials)
            .await
            .map_err(|e| SyncError::clone_failed(&url, e))?;

        let mut store = ObjectStore::new();
        let summary = unpack(&cloned.pack, &mut store).map_err(|e| SyncError::clone_failed(&url, e))?;
        let worktree = Worktree::checkout(store, cloned.head).map_err(|e| SyncError::clone_failed(&url, e))?;

        tracing::info!(
            "Cloned {} ({} at {}, {} objects, {} files)",
            url,
            cloned.branch,
            cloned.head,
            summary.objects,
            worktree.fs().len()
        );

        Ok(Self {
            info,
            credentials,
            worktree,
            remote,
            branch: cloned.branch,
            remote_tip: cloned.head,
        })
    }

    /// Copy the file at `source` into the working tree under its final path
    /// component and stage it. Returns the staged name.
    pub async fn stage_file(&mut self, source: impl AsRef<Path>) -> Result<String> {
        let source = source.as_ref();
        let name = match source.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                let shown = source.display().to_string();
                return Err(SyncError::StagingWriteFailed {
                    source: FsError::InvalidName(shown.clone()).into(),
                    name: shown,
                });
            }
        };

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| SyncError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?;
        let size = data.len();

        self.worktree
            .stage(&name, Bytes::from(data))
            .map_err(|e| SyncError::StagingWriteFailed {
                name: name.clone(),
                source: e,
            })?;

        tracing::debug!("Staged {} from {} ({} bytes)", name, source.display(), size);
        Ok(name)
    }

    /// Remove a tracked entry from the working tree and the index
    pub fn remove_file(&mut self, name: &str) -> Result<()> {
        self.worktree.remove(name).map_err(|e| match e {
            WorktreeError::NotTracked(name) => SyncError::EntryNotFound(name),
            other => SyncError::RemoveFailed {
                name: name.to_string(),
                source: other,
            },
        })
    }

    /// Commit the index as `info.name <info.email>` at the current time
    pub fn commit(&mut self, message: &str) -> Result<ObjectId> {
        let author = Signature::now(self.info.name.clone(), self.info.email.clone());
        let id = self.worktree.commit(author, message).map_err(|e| match e {
            WorktreeError::NothingToCommit => SyncError::NothingToCommit,
            other => SyncError::CommitFailed(other),
        })?;

        tracing::info!("Created commit {} on {}", id, self.branch);
        Ok(id)
    }

    /// Send every commit made since the clone or the last successful push.
    ///
    /// The ref update expects the remote to still be at the tip this session
    /// last saw and is never forced. On failure the session is unchanged and
    /// the push may be retried.
    pub async fn push(&mut self) -> Result<PushOutcome> {
        let head = self.worktree.head();
        if head == self.remote_tip {
            tracing::debug!("{} is up to date at {}", self.branch, head);
            return Ok(PushOutcome::UpToDate);
        }

        let url = self.remote.url().to_string();
        let store = self.worktree.store();
        let ids = store
            .missing_from(head, &[self.remote_tip])
            .map_err(|e| SyncError::push_failed(&url, e))?;
        let pack = PackWriter::from_store(store, &ids)
            .and_then(PackWriter::finish)
            .map_err(|e| SyncError::push_failed(&url, e))?;

        let update = RefUpdate {
            refname: self.branch.clone(),
            old: self.remote_tip,
            new: head,
        };
        tracing::debug!("Pushing {} objects ({} bytes) to {}", ids.len(), pack.len(), url);

        self.remote
            .push(&update, pack, &self.credentials)
            .await
            .map_err(|e| {
                if e.is_unauthorized() {
                    SyncError::AuthenticationFailed { url: url.clone(), source: e }
                } else if e.is_non_fast_forward() {
                    SyncError::NonFastForward {
                        refname: update.refname.clone(),
                        source: e,
                    }
                } else {
                    SyncError::push_failed(&url, e)
                }
            })?;

        tracing::info!("Pushed {} {} -> {}", update.refname, update.old, update.new);
        self.remote_tip = head;
        Ok(PushOutcome::Pushed {
            old: update.old,
            new: update.new,
            objects: ids.len(),
        })
    }

    /// First-parent history from the session head, newest first
    pub fn log(&self) -> std::result::Result<Vec<CommitInfo>, WorktreeError> {
        Ok(self
            .worktree
            .log()?
            .into_iter()
            .map(|entry| CommitInfo {
                id: entry.id,
                tree: entry.commit.tree,
                parents: entry.commit.parents,
                author: entry.commit.author,
                committer: entry.commit.committer,
                message: entry.commit.message,
            })
            .collect())
    }

    /// Pending changes against the session head
    pub fn status(&self) -> std::result::Result<Vec<Change>, WorktreeError> {
        self.worktree.status()
    }

    pub fn head(&self) -> ObjectId {
        self.worktree.head()
    }

    /// Tip the remote held at the clone or the last successful push
    pub fn remote_tip(&self) -> ObjectId {
        self.remote_tip
    }

    /// Whether commits are waiting to be pushed
    pub fn has_unpushed(&self) -> bool {
        self.worktree.head() != self.remote_tip
    }

    /// Working-tree content of `name`
    pub fn read_file(&self, name: &str) -> Option<Bytes> {
        self.worktree.fs().read(name).ok().cloned()
    }

    /// Names tracked at the root of the index
    pub fn tracked_files(&self) -> Vec<String> {
        self.worktree.tracked()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.worktree.is_tracked(name)
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Full name of the branch being updated
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }
}

impl<R> std::fmt::Debug for GitSyncSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSyncSession")
            .field("info", &self.info)
            .field("credentials", &self.credentials)
            .field("branch", &self.branch)
            .field("head", &self.worktree.head())
            .field("remote_tip", &self.remote_tip)
            .finish()
    }
}
