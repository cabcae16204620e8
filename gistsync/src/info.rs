//! Identity of a remote snippet repository

use serde::{Deserialize, Serialize};

/// What the snippet provider hands over once the placeholder resource exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Owner login; doubles as the push username
    pub id: String,
    /// Commit author name
    pub name: String,
    /// Commit author email
    pub email: String,
    /// Human-facing page of the snippet
    #[serde(default)]
    pub html_url: String,
    /// Clone and push endpoint
    pub git_url: String,
}
