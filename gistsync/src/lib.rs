//! gistsync: publish local files to a hosted snippet through an in-memory Git clone
//!
//! Given the [`Info`] a snippet provider returns for a freshly created
//! placeholder snippet, a [`GitSyncSession`] clones its Git remote into memory,
//! stages the caller's files, removes the placeholder, commits with the
//! owner's identity and pushes the result back. Nothing touches the local disk
//! except reading the files being uploaded.
//!
//! ```no_run
//! use gistsync::{GitSyncSession, Info, Placeholder, SessionConfig};
//!
//! # async fn run(info: Info, token: String) -> gistsync::Result<()> {
//! let mut session = GitSyncSession::open(info, token, &SessionConfig::default()).await?;
//! session
//!     .publish(&["photo.png", "notes.txt"], &Placeholder::default(), "update")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod info;
pub mod memory;
pub mod protocol;
pub mod publish;
pub mod remote;
pub mod session;

pub use config::SessionConfig;
pub use error::{Result, Step, SyncError, TransportError};
pub use http::HttpRemote;
pub use info::Info;
pub use memory::MemoryRemote;
pub use publish::{Placeholder, PublishReport};
pub use remote::{ClonedRepo, Credentials, RefUpdate, Remote};
pub use session::{CommitInfo, GitSyncSession, PushOutcome};
