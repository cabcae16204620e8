//! One-shot upload flow: stage files, drop the placeholder, commit, push

use crate::error::Result;
use crate::remote::Remote;
use crate::session::{GitSyncSession, PushOutcome};
use gistsync_core::ObjectId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File the snippet was created with so that it could exist at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
    pub content: String,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self {
            name: "dummy.go".to_string(),
            content: "package dummy".to_string(),
        }
    }
}

/// What [`GitSyncSession::publish`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Staged names in argument order
    pub staged: Vec<String>,
    /// Whether the placeholder was removed
    pub placeholder_removed: bool,
    pub commit: ObjectId,
    pub outcome: PushOutcome,
}

impl<R: Remote> GitSyncSession<R> {
    /// Replace the placeholder with `paths` in a single commit and push it.
    ///
    /// Stops at the first file that cannot be staged; nothing is committed or
    /// pushed in that case, though files staged before it stay staged. The
    /// placeholder is only removed while it still holds its original content;
    /// a staged file of the same name replaces it instead.
    pub async fn publish<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        placeholder: &Placeholder,
        message: &str,
    ) -> Result<PublishReport> {
        let mut staged = Vec::with_capacity(paths.len());
        for path in paths {
            staged.push(self.stage_file(path).await?);
        }

        let placeholder_removed = if staged.iter().any(|name| *name == placeholder.name) {
            tracing::debug!("{} was uploaded; keeping it", placeholder.name);
            false
        } else if !self.is_tracked(&placeholder.name) {
            tracing::warn!("Placeholder {} is not tracked", placeholder.name);
            false
        } else if !self.holds_placeholder(placeholder) {
            tracing::warn!("{} was edited since the snippet was created; keeping it", placeholder.name);
            false
        } else {
            self.remove_file(&placeholder.name)?;
            true
        };

        let commit = self.commit(message)?;
        let outcome = self.push().await?;

        tracing::info!("Published {} files to {}", staged.len(), self.info().html_url);
        Ok(PublishReport {
            staged,
            placeholder_removed,
            commit,
            outcome,
        })
    }

    fn holds_placeholder(&self, placeholder: &Placeholder) -> bool {
        self.read_file(&placeholder.name)
            .is_some_and(|data| data.as_ref() == placeholder.content.as_bytes())
    }
}
