//! In-memory working directory
//!
//! A hierarchical byte store addressed by `/`-separated relative paths.
//! Directories exist implicitly while they contain files.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Errors raised by the in-memory filesystem
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

/// Check that `path` is a relative, normalized path Git can record.
pub fn validate_path(path: &str) -> Result<(), FsError> {
    let invalid = || FsError::InvalidName(path.to_string());

    if path.is_empty() || path.contains('\0') {
        return Err(invalid());
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(invalid());
        }
        if component.eq_ignore_ascii_case(".git") {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Volatile filesystem backing one working tree
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: BTreeMap<String, Bytes>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or truncate `path` with `data`
    pub fn write(&mut self, path: &str, data: impl Into<Bytes>) -> Result<(), FsError> {
        validate_path(path)?;

        if self.is_dir(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        let mut prefix = String::new();
        for component in path.split('/').take(path.matches('/').count()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if self.files.contains_key(&prefix) {
                return Err(FsError::NotADirectory(prefix));
            }
        }

        self.files.insert(path.to_string(), data.into());
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<&Bytes, FsError> {
        self.files
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    /// Whether any file lives below `path`
    pub fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    /// Remove a single file
    pub fn remove(&mut self, path: &str) -> Result<Bytes, FsError> {
        if self.is_dir(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        self.files
            .remove(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Remove a directory and everything below it; returns the number of files removed
    pub fn remove_dir_all(&mut self, path: &str) -> usize {
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = self
            .files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.files.remove(key);
        }
        doomed.len()
    }

    /// All file paths in lexical order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_overwrite() {
        let mut fs = MemFs::new();
        fs.write("report.csv", b"a,b".to_vec()).unwrap();
        fs.write("report.csv", b"c,d".to_vec()).unwrap();
        assert_eq!(fs.read("report.csv").unwrap().as_ref(), b"c,d");
        assert_eq!(fs.len(), 1);
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", ".", "..", ".git", ".GIT", "a//b", "/abs", "trailing/", "dir/../x", "nul\0"] {
            assert!(
                matches!(validate_path(name), Err(FsError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(validate_path("dir/.gitignore").is_ok());
        assert!(validate_path("photo.png").is_ok());
    }

    #[test]
    fn test_file_and_directory_conflicts() {
        let mut fs = MemFs::new();
        fs.write("docs/readme.md", b"x".to_vec()).unwrap();

        assert!(fs.is_dir("docs"));
        assert!(fs.exists("docs"));
        assert_eq!(fs.write("docs", b"y".to_vec()), Err(FsError::IsDirectory("docs".into())));
        assert_eq!(fs.remove("docs"), Err(FsError::IsDirectory("docs".into())));

        fs.write("plain", b"z".to_vec()).unwrap();
        assert_eq!(
            fs.write("plain/child", b"z".to_vec()),
            Err(FsError::NotADirectory("plain".into()))
        );
    }

    #[test]
    fn test_remove_dir_all_keeps_siblings() {
        let mut fs = MemFs::new();
        fs.write("dir/a", b"1".to_vec()).unwrap();
        fs.write("dir/sub/b", b"2".to_vec()).unwrap();
        fs.write("dir-other", b"3".to_vec()).unwrap();
        fs.write("dir.txt", b"4".to_vec()).unwrap();

        assert_eq!(fs.remove_dir_all("dir"), 2);
        let left: Vec<&str> = fs.paths().collect();
        assert_eq!(left, vec!["dir-other", "dir.txt"]);
    }

    #[test]
    fn test_remove_missing() {
        let mut fs = MemFs::new();
        assert_eq!(fs.remove("nope"), Err(FsError::NotFound("nope".into())));
    }
}
