//! Core object model for gistsync
//!
//! Implements Git's content-addressable objects (Blob, Tree, Commit) using the
//! exact encodings Git hashes, so ids computed here agree with any Git remote.

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

/// Length of a raw SHA-1 object id
pub const OBJECT_ID_LEN: usize = 20;

/// Regular file
pub const MODE_FILE: u32 = 0o100644;
/// Executable file
pub const MODE_EXECUTABLE: u32 = 0o100755;
/// Symbolic link
pub const MODE_SYMLINK: u32 = 0o120000;
/// Subdirectory
pub const MODE_TREE: u32 = 0o040000;
/// Submodule commit
pub const MODE_GITLINK: u32 = 0o160000;

/// Errors raised while decoding objects
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("Invalid object id: {0}")]
    InvalidId(String),

    #[error("Unknown object kind: {0}")]
    UnknownKind(String),

    #[error("Malformed {kind} object: {reason}")]
    Malformed { kind: ObjectKind, reason: String },
}

impl ObjectError {
    fn malformed(kind: ObjectKind, reason: impl Into<String>) -> Self {
        ObjectError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The all-zero id Git uses for "no object"
    pub const ZERO: ObjectId = ObjectId([0u8; OBJECT_ID_LEN]);

    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an ObjectId from a raw slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ObjectError> {
        let arr: [u8; OBJECT_ID_LEN] = bytes
            .try_into()
            .map_err(|_| ObjectError::InvalidId(hex::encode(bytes)))?;
        Ok(Self(arr))
    }

    /// Hash an object body the way Git does: `<kind> <len>\0<body>`
    pub fn hash_object(kind: ObjectKind, body: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(body.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(body);
        Self(hasher.finalize().into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, ObjectError> {
        let bytes = hex::decode(hex_str).map_err(|_| ObjectError::InvalidId(hex_str.to_string()))?;
        if bytes.len() != OBJECT_ID_LEN {
            return Err(ObjectError::InvalidId(hex_str.to_string()));
        }
        Self::from_slice(&bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; OBJECT_ID_LEN]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Name used in the object header
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ObjectError> {
        match name {
            "commit" => Ok(ObjectKind::Commit),
            "tree" => Ok(ObjectKind::Tree),
            "blob" => Ok(ObjectKind::Blob),
            "tag" => Ok(ObjectKind::Tag),
            other => Err(ObjectError::UnknownKind(other.to_string())),
        }
    }

    /// Type code used in packfile entry headers
    pub fn type_code(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }

    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Unix mode as Git records it (kept verbatim so ids survive re-encoding)
    pub mode: u32,
    /// Name of the entry
    pub name: String,
    /// Object ID (points to Blob, Tree or a submodule commit)
    pub id: ObjectId,
}

impl TreeEntry {
    /// Create a new tree entry
    pub fn new(mode: u32, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// Regular file entry
    pub fn file(name: impl Into<String>, id: ObjectId) -> Self {
        Self::new(MODE_FILE, name, id)
    }

    pub fn is_tree(&self) -> bool {
        self.mode == MODE_TREE
    }

    pub fn is_gitlink(&self) -> bool {
        self.mode == MODE_GITLINK
    }

    /// Git orders entries by name, comparing a subtree as if its name ended in `/`
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// Directory object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update an entry
    pub fn insert(&mut self, entry: TreeEntry) -> Option<TreeEntry> {
        self.entries.insert(entry.name.clone(), entry)
    }

    /// Remove an entry
    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    /// Get an entry
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in lexical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over entries in Git's canonical order
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        let mut entries: Vec<&TreeEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.sort_key());
        entries.into_iter()
    }

    /// Encode as a Git tree body
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in self.iter() {
            out.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Decode a Git tree body
    pub fn decode(data: &[u8]) -> Result<Self, ObjectError> {
        let mut tree = Tree::new();
        let mut pos = 0;

        while pos < data.len() {
            let space = find(data, pos, b' ')
                .ok_or_else(|| ObjectError::malformed(ObjectKind::Tree, "entry without mode"))?;
            let mode_str = std::str::from_utf8(&data[pos..space])
                .map_err(|_| ObjectError::malformed(ObjectKind::Tree, "non-ascii mode"))?;
            let mode = u32::from_str_radix(mode_str, 8).map_err(|_| {
                ObjectError::malformed(ObjectKind::Tree, format!("bad mode {}", mode_str))
            })?;

            let nul = find(data, space + 1, 0)
                .ok_or_else(|| ObjectError::malformed(ObjectKind::Tree, "unterminated name"))?;
            let name = std::str::from_utf8(&data[space + 1..nul])
                .map_err(|_| ObjectError::malformed(ObjectKind::Tree, "name is not utf-8"))?;

            let id_end = nul + 1 + OBJECT_ID_LEN;
            if id_end > data.len() {
                return Err(ObjectError::malformed(ObjectKind::Tree, "truncated entry id"));
            }
            let id = ObjectId::from_slice(&data[nul + 1..id_end])?;

            tree.insert(TreeEntry::new(mode, name, id));
            pos = id_end;
        }

        Ok(tree)
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(ObjectKind::Tree, &self.encode())
    }
}

fn find(data: &[u8], from: usize, byte: u8) -> Option<usize> {
    data[from..].iter().position(|b| *b == byte).map(|i| i + from)
}

/// Author or committer identity with a timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl Signature {
    /// Build a signature, dropping `<`, `>` and line breaks from name and email
    /// as git does so the header line stays parseable
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: DateTime<FixedOffset>) -> Self {
        Self {
            name: sanitize_ident(name.into()),
            email: sanitize_ident(email.into()),
            when,
        }
    }

    /// Signature stamped with the current wall-clock time in the local offset
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Local::now();
        Self::new(name, email, now.with_timezone(now.offset()))
    }

    /// Encode as `Name <email> <seconds> <+hhmm>`
    pub fn encode(&self) -> String {
        let offset = self.when.offset().local_minus_utc();
        let sign = if offset < 0 { '-' } else { '+' };
        let abs = offset.abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.when.timestamp(),
            sign,
            abs / 3600,
            (abs % 3600) / 60
        )
    }

    pub fn parse(line: &str) -> Result<Self, ObjectError> {
        let bad = |reason: &str| ObjectError::malformed(ObjectKind::Commit, format!("{}: {}", reason, line));

        let open = line.find('<').ok_or_else(|| bad("signature without email"))?;
        let close = line.rfind('>').ok_or_else(|| bad("signature without email"))?;
        if close < open {
            return Err(bad("signature email out of order"));
        }

        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();

        let mut rest = line[close + 1..].split_whitespace();
        let seconds: i64 = rest
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("signature without timestamp"))?;
        let tz = rest.next().unwrap_or("+0000");
        let offset = parse_offset(tz).ok_or_else(|| bad("bad timezone"))?;
        let when = offset
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| bad("timestamp out of range"))?;

        Ok(Self { name, email, when })
    }
}

fn sanitize_ident(value: String) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '\n' | '\r' | '\0'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz.len() != 5 {
        return None;
    }
    let sign = match &tz[..1] {
        "+" => 1,
        "-" => -1,
        _ => return None,
    };
    let hours: i32 = tz[1..3].parse().ok()?;
    let minutes: i32 = tz[3..5].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Commit object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Tree object ID for this commit
    pub tree: ObjectId,
    /// Parent commit IDs (empty for a root commit)
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Headers after `committer` (encoding, gpgsig, ...), values with continuation lines joined by `\n`
    pub extra_headers: Vec<(String, String)>,
    /// Commit message, stored verbatim
    pub message: String,
}

impl Commit {
    /// Create a commit whose committer is its author
    pub fn new(tree: ObjectId, parents: Vec<ObjectId>, author: Signature, message: impl Into<String>) -> Self {
        Self {
            tree,
            parents,
            committer: author.clone(),
            author,
            extra_headers: Vec::new(),
            message: message.into(),
        }
    }

    /// Encode as a Git commit body
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        for (key, value) in &self.extra_headers {
            out.push_str(key);
            out.push(' ');
            out.push_str(&value.replace('\n', "\n "));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// Decode a Git commit body
    pub fn decode(data: &[u8]) -> Result<Self, ObjectError> {
        let text = String::from_utf8_lossy(data);
        let (headers, message) = match text.find("\n\n") {
            Some(split) => (&text[..split], &text[split + 2..]),
            None => (text.trim_end_matches('\n'), ""),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra_headers: Vec<(String, String)> = Vec::new();

        for line in headers.lines() {
            if let Some(continuation) = line.strip_prefix(' ') {
                match extra_headers.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(continuation);
                    }
                    None => {
                        return Err(ObjectError::malformed(ObjectKind::Commit, "continuation without header"));
                    }
                }
                continue;
            }

            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" if tree.is_none() => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" if author.is_none() => author = Some(Signature::parse(value)?),
                "committer" if committer.is_none() => committer = Some(Signature::parse(value)?),
                _ => extra_headers.push((key.to_string(), value.to_string())),
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| ObjectError::malformed(ObjectKind::Commit, "missing tree"))?,
            parents,
            author: author.ok_or_else(|| ObjectError::malformed(ObjectKind::Commit, "missing author"))?,
            committer: committer
                .ok_or_else(|| ObjectError::malformed(ObjectKind::Commit, "missing committer"))?,
            extra_headers,
            message: message.to_string(),
        })
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(ObjectKind::Commit, &self.encode())
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}
