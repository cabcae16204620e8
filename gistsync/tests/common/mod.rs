//! Shared helpers for gistsync integration tests
#![allow(dead_code)]

pub mod git_server;

use gistsync::{Info, MemoryRemote};
use std::path::{Path, PathBuf};

pub const GIT_URL: &str = "memory://gist.example.com/abc123.git";
pub const TOKEN: &str = "secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gistsync=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn info(git_url: &str) -> Info {
    Info {
        id: "johndoe".to_string(),
        name: "John Doe".to_string(),
        email: "jdoe@x.com".to_string(),
        html_url: "https://gist.example.com/abc123".to_string(),
        git_url: git_url.to_string(),
    }
}

/// Remote holding only the placeholder commit
pub fn placeholder_remote() -> MemoryRemote {
    MemoryRemote::with_files(GIT_URL, &[("dummy.go", b"package dummy")])
}

pub fn write_file(dir: &Path, relative: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}
