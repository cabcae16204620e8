//! Session configuration
//!
//! Passed explicitly to [`crate::GitSyncSession::open`]; the library never
//! reads configuration from the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport settings for one synchronization session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sent as the HTTP `User-Agent` and as the Git `agent=` capability
    pub user_agent: String,
    /// Branch to clone and push instead of the remote's default branch
    pub branch: Option<String>,
    /// Overall per-request timeout in seconds; none by default
    pub timeout_secs: Option<u64>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("gistsync/", env!("CARGO_PKG_VERSION")).to_string(),
            branch: None,
            timeout_secs: None,
            connect_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
