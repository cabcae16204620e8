//! Error types for synchronization sessions

use gistsync_core::{ObjectId, PackError, PktLineError, WorktreeError};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Session step a [`SyncError`] was raised by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Open,
    Stage,
    Remove,
    Commit,
    Push,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Open => "open",
            Step::Stage => "stage",
            Step::Remove => "remove",
            Step::Commit => "commit",
            Step::Push => "push",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`crate::GitSyncSession`]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Clone of {url} failed: {source}")]
    CloneFailed {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Cannot read {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot stage {name}: {source}")]
    StagingWriteFailed {
        name: String,
        #[source]
        source: WorktreeError,
    },

    #[error("Not tracked: {0}")]
    EntryNotFound(String),

    #[error("Cannot remove {name}: {source}")]
    RemoveFailed {
        name: String,
        #[source]
        source: WorktreeError,
    },

    #[error("Nothing to commit")]
    NothingToCommit,

    #[error("Commit failed: {0}")]
    CommitFailed(#[source] WorktreeError),

    #[error("Authentication to {url} failed: {source}")]
    AuthenticationFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Push to {refname} is not a fast-forward: {source}")]
    NonFastForward {
        refname: String,
        #[source]
        source: TransportError,
    },

    #[error("Push to {url} failed: {source}")]
    PushFailed {
        url: String,
        #[source]
        source: BoxError,
    },
}

impl SyncError {
    pub fn step(&self) -> Step {
        match self {
            SyncError::CloneFailed { .. } => Step::Open,
            SyncError::SourceUnreadable { .. } | SyncError::StagingWriteFailed { .. } => Step::Stage,
            SyncError::EntryNotFound(_) | SyncError::RemoveFailed { .. } => Step::Remove,
            SyncError::NothingToCommit | SyncError::CommitFailed(_) => Step::Commit,
            SyncError::AuthenticationFailed { .. }
            | SyncError::NonFastForward { .. }
            | SyncError::PushFailed { .. } => Step::Push,
        }
    }

    pub(crate) fn clone_failed(url: &str, source: impl Into<BoxError>) -> Self {
        SyncError::CloneFailed {
            url: url.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn push_failed(url: &str, source: impl Into<BoxError>) -> Self {
        SyncError::PushFailed {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

/// Errors raised while talking to a remote
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("pkt-line error: {0}")]
    PktLine(#[from] PktLineError),

    #[error("Pack error: {0}")]
    Pack(#[from] PackError),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("{refname} is at {found}, expected {expected}")]
    StaleRef {
        refname: String,
        expected: ObjectId,
        found: ObjectId,
    },

    #[error("Remote rejected {refname}: {reason}")]
    Rejected { refname: String, reason: String },

    #[error("Remote repository is empty")]
    EmptyRepository,
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }

    /// Whether the remote refused the update because its ref has moved
    pub fn is_non_fast_forward(&self) -> bool {
        match self {
            TransportError::StaleRef { .. } => true,
            TransportError::Rejected { reason, .. } => {
                reason.contains("non-fast-forward") || reason.contains("fetch first") || reason.contains("stale")
            }
            _ => false,
        }
    }
}
