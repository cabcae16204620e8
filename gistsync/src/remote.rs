//! Remote capability used by a session to clone and push

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use gistsync_core::ObjectId;

/// Basic-auth credentials for the remote
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a clone: the branch followed and a pack of everything reachable from its tip
#[derive(Debug, Clone)]
pub struct ClonedRepo {
    /// Full ref name, e.g. `refs/heads/main`
    pub branch: String,
    pub head: ObjectId,
    pub pack: Bytes,
}

/// A single fast-forward ref update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: String,
    /// Tip the remote is expected to hold
    pub old: ObjectId,
    pub new: ObjectId,
}

/// A Git remote able to serve a clone and accept a push
#[async_trait]
pub trait Remote: Send + Sync {
    /// Remote URL, for messages
    fn url(&self) -> &str;

    /// Fetch the default branch and every object reachable from its tip
    async fn clone_repo(&self, credentials: &Credentials) -> Result<ClonedRepo, TransportError>;

    /// Send `pack` and move `update.refname` from `update.old` to `update.new`
    async fn push(&self, update: &RefUpdate, pack: Bytes, credentials: &Credentials) -> Result<(), TransportError>;
}
