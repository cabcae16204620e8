//! In-process remote
//!
//! A bare repository held in memory that serves clones as real packfiles and
//! accepts pushes by unpacking them, enforcing fast-forward updates of its one
//! branch. Handles are cheap to clone and share state, so a test can keep one
//! handle while a session owns another.

use crate::error::TransportError;
use crate::remote::{ClonedRepo, Credentials, RefUpdate, Remote};
use async_trait::async_trait;
use bytes::Bytes;
use gistsync_core::{
    Commit, LogEntry, ObjectId, ObjectStore, PackWriter, Signature, StoreError, Tree, TreeEntry, unpack,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_BRANCH: &str = "refs/heads/master";

#[derive(Debug)]
struct State {
    store: ObjectStore,
    tip: ObjectId,
    required: Option<Credentials>,
    clone_credentials: Vec<Credentials>,
    push_credentials: Vec<Credentials>,
    fail_next_push: Option<String>,
    pushes: usize,
}

impl State {
    fn empty() -> Self {
        Self {
            store: ObjectStore::new(),
            tip: ObjectId::ZERO,
            required: None,
            clone_credentials: Vec::new(),
            push_credentials: Vec::new(),
            fail_next_push: None,
            pushes: 0,
        }
    }

    fn commit_files(&mut self, mut tree: Tree, files: &[(&str, &[u8])], message: &str) -> ObjectId {
        for (name, data) in files {
            let id = self.store.write_blob(data.to_vec());
            tree.insert(TreeEntry::file(*name, id));
        }
        let tree_id = self.store.write_tree(&tree);
        let parents = if self.tip.is_zero() { vec![] } else { vec![self.tip] };
        let author = Signature::now("gistsync", "gistsync@localhost");
        self.tip = self.store.write_commit(&Commit::new(tree_id, parents, author, message));
        self.tip
    }

    fn check_credentials(&self, credentials: &Credentials) -> Result<(), TransportError> {
        match &self.required {
            Some(required) if required != credentials => Err(TransportError::Unauthorized { status: 401 }),
            _ => Ok(()),
        }
    }

    fn tip_tree(&self) -> Result<Tree, StoreError> {
        if self.tip.is_zero() {
            return Ok(Tree::new());
        }
        self.store.read_tree(&self.store.read_commit(&self.tip)?.tree)
    }
}

/// Shared handle to an in-memory bare repository
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    url: String,
    branch: String,
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    /// Empty repository; clones fail until something is committed
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_state(url.into(), State::empty())
    }

    /// Repository with one root commit holding `files`
    pub fn with_files(url: impl Into<String>, files: &[(&str, &[u8])]) -> Self {
        let mut state = State::empty();
        state.commit_files(Tree::new(), files, "");
        Self::from_state(url.into(), state)
    }

    fn from_state(url: String, state: State) -> Self {
        Self {
            url,
            branch: DEFAULT_BRANCH.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Reject clones and pushes that do not present `credentials`
    pub async fn require_credentials(&self, credentials: Credentials) {
        self.state.lock().await.required = Some(credentials);
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub async fn tip(&self) -> ObjectId {
        self.state.lock().await.tip
    }

    /// Commit `files` on top of the tip as another writer would
    pub async fn advance(&self, files: &[(&str, &[u8])], message: &str) -> Result<ObjectId, StoreError> {
        let mut state = self.state.lock().await;
        let tree = state.tip_tree()?;
        let id = state.commit_files(tree, files, message);
        tracing::debug!("Remote {} advanced to {}", self.url, id);
        Ok(id)
    }

    /// Root-level files of the tip commit
    pub async fn files_at_tip(&self) -> Result<BTreeMap<String, Bytes>, StoreError> {
        let state = self.state.lock().await;
        let mut files = BTreeMap::new();
        for entry in state.tip_tree()?.iter() {
            if !entry.is_tree() && !entry.is_gitlink() {
                files.insert(entry.name.clone(), state.store.read_blob(&entry.id)?);
            }
        }
        Ok(files)
    }

    /// First-parent history of the branch, newest first
    pub async fn log(&self) -> Result<Vec<LogEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries = Vec::new();
        let mut next = (!state.tip.is_zero()).then_some(state.tip);
        while let Some(id) = next {
            let commit = state.store.read_commit(&id)?;
            next = commit.parents.first().copied();
            entries.push(LogEntry { id, commit });
        }
        Ok(entries)
    }

    pub async fn clone_credentials(&self) -> Vec<Credentials> {
        self.state.lock().await.clone_credentials.clone()
    }

    pub async fn push_credentials(&self) -> Vec<Credentials> {
        self.state.lock().await.push_credentials.clone()
    }

    /// Make the next push fail with an HTTP 500 carrying `reason`
    pub async fn fail_next_push(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_push = Some(reason.into());
    }

    /// Number of accepted pushes
    pub async fn push_count(&self) -> usize {
        self.state.lock().await.pushes
    }
}

fn missing_objects(e: StoreError) -> TransportError {
    TransportError::Remote(format!("missing necessary objects: {}", e))
}

#[async_trait]
impl Remote for MemoryRemote {
    fn url(&self) -> &str {
        &self.url
    }

    async fn clone_repo(&self, credentials: &Credentials) -> Result<ClonedRepo, TransportError> {
        let mut state = self.state.lock().await;
        state.clone_credentials.push(credentials.clone());
        state.check_credentials(credentials)?;

        if state.tip.is_zero() {
            return Err(TransportError::EmptyRepository);
        }
        let ids = state.store.reachable(&[state.tip]).map_err(missing_objects)?;
        let pack = PackWriter::from_store(&state.store, &ids)?.finish()?;

        Ok(ClonedRepo {
            branch: self.branch.clone(),
            head: state.tip,
            pack,
        })
    }

    async fn push(&self, update: &RefUpdate, pack: Bytes, credentials: &Credentials) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.push_credentials.push(credentials.clone());
        state.check_credentials(credentials)?;

        if let Some(reason) = state.fail_next_push.take() {
            return Err(TransportError::Status {
                url: format!("{}/git-receive-pack", self.url),
                status: 500,
                body: reason,
            });
        }
        if update.refname != self.branch {
            return Err(TransportError::Rejected {
                refname: update.refname.clone(),
                reason: "unknown ref".into(),
            });
        }
        if update.old != state.tip {
            return Err(TransportError::StaleRef {
                refname: update.refname.clone(),
                expected: update.old,
                found: state.tip,
            });
        }

        // all-or-nothing: the store only changes once the update is accepted
        let mut scratch = state.store.clone();
        let summary = unpack(&pack, &mut scratch)?;
        scratch.reachable(&[update.new]).map_err(missing_objects)?;
        if !state.tip.is_zero() && !scratch.is_ancestor(state.tip, update.new).map_err(missing_objects)? {
            return Err(TransportError::Rejected {
                refname: update.refname.clone(),
                reason: "non-fast-forward".into(),
            });
        }

        tracing::debug!(
            "Remote {} accepted {} objects, {} -> {}",
            self.url,
            summary.objects,
            update.old,
            update.new
        );
        state.store = scratch;
        state.tip = update.new;
        state.pushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "memory://gist/abc123.git";

    fn creds() -> Credentials {
        Credentials::new("johndoe", "secret")
    }

    fn placeholder() -> MemoryRemote {
        MemoryRemote::with_files(URL, &[("dummy.go", b"package dummy")])
    }

    /// Clone, add a file on top, and pack the new objects
    async fn next_commit(remote: &MemoryRemote, parents: Option<Vec<ObjectId>>) -> (RefUpdate, Bytes) {
        let cloned = remote.clone_repo(&creds()).await.unwrap();
        let mut store = ObjectStore::new();
        unpack(&cloned.pack, &mut store).unwrap();

        let parents = parents.unwrap_or_else(|| vec![cloned.head]);
        let mut tree = Tree::new();
        tree.insert(TreeEntry::file("notes.txt", store.write_blob(b"hi".to_vec())));
        let tree_id = store.write_tree(&tree);
        let author = Signature::parse("John Doe <jdoe@x.com> 1500000000 +0000").unwrap();
        let new = store.write_commit(&Commit::new(tree_id, parents, author, "update"));

        let ids = store.missing_from(new, &[cloned.head]).unwrap();
        let pack = PackWriter::from_store(&store, &ids).unwrap().finish().unwrap();
        let update = RefUpdate {
            refname: cloned.branch,
            old: cloned.head,
            new,
        };
        (update, pack)
    }

    #[tokio::test]
    async fn test_clone_serves_reachable_objects() {
        let remote = placeholder();
        let cloned = remote.clone_repo(&creds()).await.unwrap();

        assert_eq!(cloned.branch, DEFAULT_BRANCH);
        assert_eq!(cloned.head, remote.tip().await);

        let mut store = ObjectStore::new();
        let summary = unpack(&cloned.pack, &mut store).unwrap();
        assert_eq!(summary.objects, 3);
        assert!(store.read_commit(&cloned.head).unwrap().is_root());
        assert_eq!(remote.clone_credentials().await, vec![creds()]);
    }

    #[tokio::test]
    async fn test_empty_repository() {
        let remote = MemoryRemote::new(URL);
        assert!(matches!(
            remote.clone_repo(&creds()).await,
            Err(TransportError::EmptyRepository)
        ));
    }

    #[tokio::test]
    async fn test_push_fast_forward() {
        let remote = placeholder();
        let (update, pack) = next_commit(&remote, None).await;

        remote.push(&update, pack, &creds()).await.unwrap();

        assert_eq!(remote.tip().await, update.new);
        assert_eq!(remote.push_count().await, 1);
        let files = remote.files_at_tip().await.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["notes.txt"]);
        assert_eq!(remote.log().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_push_rejects_stale_old() {
        let remote = placeholder();
        let (update, pack) = next_commit(&remote, None).await;
        let moved = remote.advance(&[("other.txt", b"x")], "concurrent").await.unwrap();

        let err = remote.push(&update, pack, &creds()).await.unwrap_err();
        assert!(err.is_non_fast_forward());
        assert_eq!(remote.tip().await, moved);
        assert_eq!(remote.push_count().await, 0);
    }

    #[tokio::test]
    async fn test_push_rejects_unrelated_history() {
        let remote = placeholder();
        let (update, pack) = next_commit(&remote, Some(vec![])).await;

        let err = remote.push(&update, pack, &creds()).await.unwrap_err();
        assert!(err.is_non_fast_forward(), "{}", err);
        assert_eq!(remote.push_count().await, 0);
    }

    #[tokio::test]
    async fn test_required_credentials() {
        let remote = placeholder();
        remote.require_credentials(creds()).await;
        let wrong = Credentials::new("johndoe", "nope");

        assert!(remote.clone_repo(&wrong).await.unwrap_err().is_unauthorized());
        let (update, pack) = next_commit(&remote, None).await;
        assert!(remote.push(&update, pack.clone(), &wrong).await.unwrap_err().is_unauthorized());
        remote.push(&update, pack, &creds()).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_next_push_is_one_shot() {
        let remote = placeholder();
        let (update, pack) = next_commit(&remote, None).await;
        remote.fail_next_push("hook declined").await;

        assert!(matches!(
            remote.push(&update, pack.clone(), &creds()).await,
            Err(TransportError::Status { status: 500, .. })
        ));
        remote.push(&update, pack, &creds()).await.unwrap();
    }
}
