//! In-memory object store
//!
//! Holds every object of one repository clone as raw, already-encoded bytes
//! keyed by id. Nothing here ever touches the disk; the store lives and dies
//! with its owner.

use crate::object::{Commit, ObjectError, ObjectId, ObjectKind, Tree};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(ObjectId),

    #[error("Object {id} is a {actual}, expected a {expected}")]
    WrongKind {
        id: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] ObjectError),
}

/// An encoded object body with its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl RawObject {
    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(self.kind, &self.data)
    }
}

/// Content-addressed object storage
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: HashMap<ObjectId, RawObject>,
}

impl ObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Check if object exists
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Store an encoded object body; returns its id
    pub fn insert(&mut self, kind: ObjectKind, data: impl Into<Bytes>) -> ObjectId {
        let data = data.into();
        let id = ObjectId::hash_object(kind, &data);
        self.objects.entry(id).or_insert(RawObject { kind, data });
        id
    }

    /// Get object by ID
    pub fn get(&self, id: &ObjectId) -> Result<&RawObject> {
        self.objects.get(id).ok_or(StoreError::NotFound(*id))
    }

    fn get_kind(&self, id: &ObjectId, expected: ObjectKind) -> Result<&RawObject> {
        let object = self.get(id)?;
        if object.kind != expected {
            return Err(StoreError::WrongKind {
                id: *id,
                expected,
                actual: object.kind,
            });
        }
        Ok(object)
    }

    pub fn write_blob(&mut self, data: impl Into<Bytes>) -> ObjectId {
        self.insert(ObjectKind::Blob, data)
    }

    pub fn write_tree(&mut self, tree: &Tree) -> ObjectId {
        self.insert(ObjectKind::Tree, tree.encode())
    }

    pub fn write_commit(&mut self, commit: &Commit) -> ObjectId {
        self.insert(ObjectKind::Commit, commit.encode())
    }

    pub fn read_blob(&self, id: &ObjectId) -> Result<Bytes> {
        Ok(self.get_kind(id, ObjectKind::Blob)?.data.clone())
    }

    pub fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        Ok(Tree::decode(&self.get_kind(id, ObjectKind::Tree)?.data)?)
    }

    pub fn read_commit(&self, id: &ObjectId) -> Result<Commit> {
        Ok(Commit::decode(&self.get_kind(id, ObjectKind::Commit)?.data)?)
    }

    /// Every object reachable from `tips`: commits, their ancestors, trees and blobs.
    ///
    /// Submodule (gitlink) entries point outside the repository and are skipped.
    /// The result lists each object once, commits before the trees they name.
    pub fn reachable(&self, tips: &[ObjectId]) -> Result<Vec<ObjectId>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut commits: Vec<ObjectId> = tips.iter().copied().filter(|id| !id.is_zero()).collect();

        while let Some(id) = commits.pop() {
            if !seen.insert(id) {
                continue;
            }
            let commit = self.read_commit(&id)?;
            order.push(id);
            self.walk_tree(commit.tree, &mut seen, &mut order)?;
            commits.extend(commit.parents.iter().rev().copied());
        }

        Ok(order)
    }

    fn walk_tree(&self, id: ObjectId, seen: &mut HashSet<ObjectId>, order: &mut Vec<ObjectId>) -> Result<()> {
        if !seen.insert(id) {
            return Ok(());
        }
        let tree = self.read_tree(&id)?;
        order.push(id);

        for entry in tree.iter() {
            if entry.is_gitlink() {
                continue;
            }
            if entry.is_tree() {
                self.walk_tree(entry.id, seen, order)?;
            } else if seen.insert(entry.id) {
                self.get(&entry.id)?;
                order.push(entry.id);
            }
        }
        Ok(())
    }

    /// Objects reachable from `tip` that are not reachable from any of `known`
    pub fn missing_from(&self, tip: ObjectId, known: &[ObjectId]) -> Result<Vec<ObjectId>> {
        let have: HashSet<ObjectId> = self.reachable(known)?.into_iter().collect();
        Ok(self
            .reachable(&[tip])?
            .into_iter()
            .filter(|id| !have.contains(id))
            .collect())
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors
    pub fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool> {
        let mut seen = HashSet::new();
        let mut stack = vec![descendant];
        while let Some(id) = stack.pop() {
            if id == ancestor {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.read_commit(&id)?.parents);
        }
        Ok(false)
    }
}
