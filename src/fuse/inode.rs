//! Inode table holding the synthesized read-only tree.
//!
//! The tree is built once at mount from repository listings and is then only
//! mutated to cache refined file sizes and access times. Each node lives in
//! the inode map and is linked from exactly one parent's `children` map; the
//! root (ino 1) is its own parent.
//!
//! Name collisions between a file and a directory never overwrite: the entry
//! being inserted gets a `FILE_<n>_` / `DIR_<n>_` prefixed name and the rename
//! is recorded in an append-only ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use thiserror::Error;

use crate::api::types::ObjectRef;

/// Root inode number (standard FUSE convention).
pub const ROOT_INO: u64 = 1;

/// Default block size for attribute and statfs reporting.
pub const BLOCK_SIZE: u32 = 4096;

/// Mode bits of every directory (read-only).
pub const DIR_PERM: u16 = 0o555;

/// Mode bits of every file (read-only).
pub const FILE_PERM: u16 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
}

impl TreeError {
    /// POSIX error code reported to the kernel.
    pub fn errno(self) -> libc::c_int {
        match self {
            TreeError::NotFound => libc::ENOENT,
            TreeError::Exists => libc::EEXIST,
            TreeError::NotADirectory => libc::ENOTDIR,
            TreeError::IsADirectory => libc::EISDIR,
            TreeError::NotEmpty => libc::ENOTEMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// Kind-specific node data.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Directory {
        /// Child name -> child inode.
        children: BTreeMap<String, u64>,
    },
    File {
        /// Where the bytes live; `None` only for synthetic files.
        origin: Option<ObjectRef>,
        /// Whether `size` already reflects the special headers.
        size_refined: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub ino: u64,
    pub parent_ino: u64,
    pub name: String,
    pub content: NodeContent,
    /// Logical size; for directories the metadata byte total at creation.
    pub size: u64,
    pub perm: u16,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self.content {
            NodeContent::Directory { .. } => NodeKind::Directory,
            NodeContent::File { .. } => NodeKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    pub fn children(&self) -> Option<&BTreeMap<String, u64>> {
        match &self.content {
            NodeContent::Directory { children } => Some(children),
            NodeContent::File { .. } => None,
        }
    }

    pub fn origin(&self) -> Option<&ObjectRef> {
        match &self.content {
            NodeContent::File { origin, .. } => origin.as_ref(),
            NodeContent::Directory { .. } => None,
        }
    }

    /// Files whose size has not been checked against the special headers yet.
    pub fn needs_size_refinement(&self) -> bool {
        matches!(
            self.content,
            NodeContent::File {
                origin: Some(_),
                size_refined: false
            }
        )
    }
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Directory that holds (or would hold) the leaf; `None` if unreachable.
    pub parent: Option<u64>,
    /// Last path segment.
    pub name: String,
    pub existing: Option<u64>,
    pub existing_is_dir: bool,
}

// ── Tree ──────────────────────────────────────────────────────────────────────

/// Tree shared between the ingestion workers and the filesystem handlers.
pub type SharedTree = Arc<Mutex<Tree>>;

/// Lock the tree, recovering it if a previous holder panicked.
pub fn lock_tree(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: HashMap<u64, Node>,
    next_ino: u64,
    /// Synthesized path -> originally intended path.
    renamed: BTreeMap<String, String>,
    uid: u32,
    gid: u32,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only the root directory.
    pub fn new() -> Self {
        Self::with_timestamp(SystemTime::now())
    }

    pub fn with_timestamp(timestamp: SystemTime) -> Self {
        let root = Node {
            ino: ROOT_INO,
            parent_ino: ROOT_INO,
            name: String::new(),
            content: NodeContent::Directory {
                children: BTreeMap::new(),
            },
            size: 0,
            perm: DIR_PERM,
            created: timestamp,
            accessed: timestamp,
            modified: timestamp,
        };

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INO, root);

        Self {
            nodes,
            next_ino: ROOT_INO + 1,
            renamed: BTreeMap::new(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    /// Owner reported for every node (the mounting user).
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Node> {
        self.nodes.get_mut(&ino)
    }

    pub fn find_child(&self, parent_ino: u64, name: &str) -> Option<u64> {
        self.nodes
            .get(&parent_ino)?
            .children()?
            .get(name)
            .copied()
    }

    /// Directory child `name` of `parent_ino`, following a collision rename.
    ///
    /// If `name` is taken by a file, the directory inserted afterwards lives
    /// under the first `DIR_<n>_<name>`.
    pub fn find_dir_child(&self, parent_ino: u64, name: &str) -> Option<u64> {
        let is_dir = |ino: u64| self.nodes.get(&ino).map(Node::is_dir).unwrap_or(false);

        let ino = self.find_child(parent_ino, name)?;
        if is_dir(ino) {
            return Some(ino);
        }
        (1..)
            .map(|n| self.find_child(parent_ino, &format!("DIR_{}_{}", n, name)))
            .take_while(Option::is_some)
            .flatten()
            .find(|ino| is_dir(*ino))
    }

    /// Children of a directory as (name, ino, kind), in name order.
    pub fn children(&self, ino: u64) -> Result<Vec<(String, u64, NodeKind)>, TreeError> {
        let node = self.nodes.get(&ino).ok_or(TreeError::NotFound)?;
        let children = node.children().ok_or(TreeError::NotADirectory)?;
        Ok(children
            .iter()
            .filter_map(|(name, child)| {
                self.nodes
                    .get(child)
                    .map(|c| (name.clone(), *child, c.kind()))
            })
            .collect())
    }

    /// Slash-joined path of `ino` relative to the root ("" for the root).
    pub fn path_of(&self, ino: u64) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&ino)?;
        while current.ino != ROOT_INO {
            segments.push(current.name.as_str());
            current = self.nodes.get(&current.parent_ino)?;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Resolve `path`; empty segments (`a//b`, leading or trailing `/`) are ignored.
    pub fn lookup(&self, path: &str) -> Lookup {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let Some((leaf, dirs)) = segments.split_last() else {
            return Lookup {
                parent: None,
                name: String::new(),
                existing: Some(ROOT_INO),
                existing_is_dir: true,
            };
        };

        let unreachable = Lookup {
            parent: None,
            name: leaf.to_string(),
            existing: None,
            existing_is_dir: false,
        };

        let mut current = ROOT_INO;
        for segment in dirs {
            match self.find_child(current, segment) {
                Some(child) if self.nodes.get(&child).map(Node::is_dir).unwrap_or(false) => {
                    current = child;
                }
                _ => return unreachable,
            }
        }

        let existing = self.find_child(current, leaf);
        let existing_is_dir = existing
            .and_then(|ino| self.nodes.get(&ino))
            .map(Node::is_dir)
            .unwrap_or(false);

        Lookup {
            parent: Some(current),
            name: leaf.to_string(),
            existing,
            existing_is_dir,
        }
    }

    /// Inode at `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<u64> {
        self.lookup(path).existing
    }

    /// Insert a node at `path`.
    ///
    /// Fails with `NotFound` if the parent directory does not exist and with
    /// `Exists` if a node of the same kind already has the name; the tree is
    /// unchanged in both cases. A node of the opposite kind under the same
    /// name is kept, and the new node is linked under a tagged name instead.
    /// Returns the inode of the new node.
    pub fn insert(
        &mut self,
        path: &str,
        kind: NodeKind,
        size: u64,
        timestamp: SystemTime,
        origin: Option<ObjectRef>,
    ) -> Result<u64, TreeError> {
        let found = self.lookup(path);
        if found.name.is_empty() {
            return Err(TreeError::Exists);
        }
        let parent = found.parent.ok_or(TreeError::NotFound)?;

        let name = match found.existing {
            None => found.name,
            Some(_) if found.existing_is_dir == (kind == NodeKind::Directory) => {
                return Err(TreeError::Exists);
            }
            Some(_) => {
                let tag = match kind {
                    NodeKind::Directory => "DIR",
                    NodeKind::File => "FILE",
                };
                let parent_path = self.path_of(parent).unwrap_or_default();
                let original = join_path(&parent_path, &found.name);
                if self.has_renamed(&original, kind) {
                    return Err(TreeError::Exists);
                }
                let renamed = self.free_name(parent, tag, &found.name);
                let synthesized = join_path(&parent_path, &renamed);
                log::warn!(
                    "{:?} clashes with an existing entry of another type, exposing it as {:?}",
                    original,
                    synthesized
                );
                self.renamed.insert(synthesized, original);
                renamed
            }
        };

        Ok(self.link(parent, name, kind, size, timestamp, origin))
    }

    /// Whether a node of `kind` already stands in for `original` under a tagged name.
    fn has_renamed(&self, original: &str, kind: NodeKind) -> bool {
        self.renamed
            .iter()
            .filter(|(_, intended)| intended.as_str() == original)
            .filter_map(|(synthesized, _)| self.resolve(synthesized))
            .any(|ino| self.nodes.get(&ino).map(Node::kind) == Some(kind))
    }

    /// First `<tag>_<n>_<name>` (n >= 1) not taken under `parent`.
    fn free_name(&self, parent: u64, tag: &str, name: &str) -> String {
        (1u64..)
            .map(|n| format!("{}_{}_{}", tag, n, name))
            .find(|candidate| self.find_child(parent, candidate).is_none())
            .unwrap_or_else(|| format!("{}_{}", tag, name))
    }

    fn link(
        &mut self,
        parent: u64,
        name: String,
        kind: NodeKind,
        size: u64,
        timestamp: SystemTime,
        origin: Option<ObjectRef>,
    ) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;

        let (content, perm) = match kind {
            NodeKind::Directory => (
                NodeContent::Directory {
                    children: BTreeMap::new(),
                },
                DIR_PERM,
            ),
            NodeKind::File => (
                NodeContent::File {
                    origin,
                    size_refined: false,
                },
                FILE_PERM,
            ),
        };

        if let Some(NodeContent::Directory { children }) =
            self.nodes.get_mut(&parent).map(|p| &mut p.content)
        {
            children.insert(name.clone(), ino);
        }

        self.nodes.insert(
            ino,
            Node {
                ino,
                parent_ino: parent,
                name,
                content,
                size,
                perm,
                created: timestamp,
                accessed: timestamp,
                modified: timestamp,
            },
        );
        ino
    }

    pub fn set_size(&mut self, ino: u64, size: u64) -> Result<(), TreeError> {
        self.nodes.get_mut(&ino).ok_or(TreeError::NotFound)?.size = size;
        Ok(())
    }

    /// Cache the refined size of a file.
    pub fn refine_size(&mut self, ino: u64, size: u64) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&ino).ok_or(TreeError::NotFound)?;
        match &mut node.content {
            NodeContent::File { size_refined, .. } => {
                *size_refined = true;
                node.size = size;
                Ok(())
            }
            NodeContent::Directory { .. } => Err(TreeError::IsADirectory),
        }
    }

    /// Record an access.
    pub fn touch(&mut self, ino: u64, time: SystemTime) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.accessed = time;
        }
    }

    /// Unlink an empty directory. The root is never removed.
    pub fn remove_empty_dir(&mut self, ino: u64) -> Result<(), TreeError> {
        if ino == ROOT_INO {
            return Err(TreeError::NotEmpty);
        }
        let node = self.nodes.get(&ino).ok_or(TreeError::NotFound)?;
        let children = node.children().ok_or(TreeError::NotADirectory)?;
        if !children.is_empty() {
            return Err(TreeError::NotEmpty);
        }

        let (parent, name) = (node.parent_ino, node.name.clone());
        if let Some(NodeContent::Directory { children }) =
            self.nodes.get_mut(&parent).map(|p| &mut p.content)
        {
            children.remove(&name);
        }
        self.nodes.remove(&ino);
        Ok(())
    }

    /// Collision renames, synthesized path -> original path.
    pub fn renamed(&self) -> &BTreeMap<String, String> {
        &self.renamed
    }

    /// Originally intended path of a renamed node.
    pub fn original_path(&self, synthesized: &str) -> Option<&str> {
        self.renamed.get(synthesized).map(String::as_str)
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
