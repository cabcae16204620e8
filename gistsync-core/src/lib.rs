//! gistsync Core Library
//!
//! Everything needed to hold a Git repository clone entirely in memory:
//! - Object model (Blob, Tree, Commit) with Git-compatible SHA-1 ids
//! - Content-addressed object store
//! - In-memory working directory
//! - Working tree / staging index and commit creation
//! - Packfile reading (with delta resolution) and writing
//! - pkt-line framing for the Git wire protocol

pub mod memfs;
pub mod object;
pub mod packfile;
pub mod pktline;
pub mod store;
pub mod worktree;

pub use memfs::{FsError, MemFs};
pub use object::{
    Commit, ObjectError, ObjectId, ObjectKind, Signature, Tree, TreeEntry, MODE_EXECUTABLE, MODE_FILE,
    MODE_GITLINK, MODE_SYMLINK, MODE_TREE,
};
pub use packfile::{PackError, PackWriter, UnpackSummary, unpack};
pub use pktline::{Demuxed, Packet, PktLineError, PktReader, PktWriter, demux_sideband};
pub use store::{ObjectStore, RawObject, StoreError};
pub use worktree::{Change, ChangeKind, LogEntry, Worktree, WorktreeError};
