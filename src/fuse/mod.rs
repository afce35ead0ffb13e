//! FUSE filesystem module for stratafs.
//!
//! Serves the tree built by the ingestion pipeline as a read-only volume.
//! File contents are never cached: every read becomes one ranged request
//! against the repository that listed the object.
//!
//! The tree, handle table and handler methods on [`StrataFS`] do not depend
//! on libfuse. The `operations` module and mount/unmount functions require
//! the `fuse` feature.

pub mod file_handle;
pub mod inode;
#[cfg(feature = "fuse")]
pub mod operations;
pub mod sanitize;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

#[cfg(feature = "fuse")]
use std::path::Path;

#[cfg(feature = "fuse")]
use fuser::MountOption;
use unicode_normalization::UnicodeNormalization;

use crate::api::repository::logical_size;
use crate::registry::RepositoryRegistry;
use file_handle::HandleTable;
use inode::{lock_tree, Node, NodeKind, SharedTree, BLOCK_SIZE};

/// Longest file name reported by `statfs`.
pub const MAX_NAME_LEN: u32 = 255;

/// Attributes of one node, detached from the tree lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl NodeAttr {
    fn of(node: &Node, uid: u32, gid: u32) -> Self {
        Self {
            ino: node.ino,
            kind: node.kind(),
            size: node.size,
            perm: node.perm,
            uid,
            gid,
            created: node.created,
            accessed: node.accessed,
            modified: node.modified,
        }
    }

    /// 512-byte blocks, as `stat` reports them.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }

    pub fn nlink(&self) -> u32 {
        match self.kind {
            NodeKind::Directory => 2,
            NodeKind::File => 1,
        }
    }
}

/// One `readdir` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: NodeKind,
    pub name: String,
}

/// Volume statistics for `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub blocks: u64,
    pub files: u64,
    pub block_size: u32,
    pub name_len: u32,
}

/// The mounted filesystem.
///
/// Every handler takes the tree lock for the time it touches nodes and
/// releases it before any network request.
pub struct StrataFS {
    /// Tree shared with the ingestion pipeline.
    pub tree: SharedTree,
    /// Open file and directory handles.
    pub handles: HandleTable,
    /// Repositories that serve the objects in the tree.
    pub registry: Arc<RepositoryRegistry>,
    /// Tokio runtime handle; FUSE callbacks block on it for network I/O.
    pub rt: tokio::runtime::Handle,
}

impl StrataFS {
    pub fn new(
        tree: SharedTree,
        registry: Arc<RepositoryRegistry>,
        rt: tokio::runtime::Handle,
    ) -> Self {
        Self {
            tree,
            handles: HandleTable::new(),
            registry,
            rt,
        }
    }

    /// Log the mounted tree.
    pub fn init(&self) {
        let tree = lock_tree(&self.tree);
        log::info!(
            "StrataFS::init: {} nodes, {} renamed on collision",
            tree.len(),
            tree.renamed().len()
        );
    }

    /// Drop every open handle.
    pub fn destroy(&mut self) {
        let tree = lock_tree(&self.tree);
        log::info!(
            "StrataFS destroyed: {} nodes, {} handles still open",
            tree.len(),
            self.handles.len()
        );
        self.handles.clear();
    }

    /// Open `ino` as a directory (`want_dir`) or as a file.
    ///
    /// Fails with `ENOENT` for unknown nodes, `EISDIR`/`ENOTDIR` on a kind
    /// mismatch and `EROFS` for files opened for writing.
    pub fn open_node(&mut self, ino: u64, want_dir: bool, flags: i32) -> Result<u64, libc::c_int> {
        let is_dir = {
            let tree = lock_tree(&self.tree);
            tree.get(ino).ok_or(libc::ENOENT)?.is_dir()
        };

        match (is_dir, want_dir) {
            (true, false) => return Err(libc::EISDIR),
            (false, true) => return Err(libc::ENOTDIR),
            _ => {}
        }
        if !is_dir && flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(libc::EROFS);
        }

        Ok(self.handles.open(ino, is_dir, flags))
    }

    /// Attributes of `ino`.
    ///
    /// The first call for a file probes the repository's special headers
    /// and stores the logical size on the node. A failed probe reports the
    /// listed size and is retried on the next call.
    pub fn attributes(&self, ino: u64) -> Result<NodeAttr, libc::c_int> {
        let (attr, origin) = {
            let tree = lock_tree(&self.tree);
            let node = tree.get(ino).ok_or(libc::ENOENT)?;
            let origin = node
                .needs_size_refinement()
                .then(|| node.origin().cloned())
                .flatten();
            (NodeAttr::of(node, tree.uid(), tree.gid()), origin)
        };

        let Some(origin) = origin else {
            return Ok(attr);
        };
        let Some(repository) = self.registry.get(&origin.repository) else {
            log::error!("No repository named {:?} serves {}", origin.repository, origin);
            return Ok(attr);
        };

        match self
            .rt
            .block_on(logical_size(repository.as_ref(), &origin, attr.size))
        {
            Ok(size) => {
                let mut tree = lock_tree(&self.tree);
                tree.refine_size(ino, size).map_err(|e| e.errno())?;
                let node = tree.get(ino).ok_or(libc::ENOENT)?;
                Ok(NodeAttr::of(node, tree.uid(), tree.gid()))
            }
            Err(e) => {
                log::error!("Failed to fetch special headers of {}: {}", origin, e);
                Ok(attr)
            }
        }
    }

    /// Attributes of the child `name` of `parent`.
    pub fn lookup_child(&self, parent: u64, name: &str) -> Result<NodeAttr, libc::c_int> {
        let child = {
            let tree = lock_tree(&self.tree);
            let dir = tree.get(parent).ok_or(libc::ENOENT)?;
            if !dir.is_dir() {
                return Err(libc::ENOTDIR);
            }
            match name {
                "." => parent,
                ".." => dir.parent_ino,
                _ => tree
                    .find_child(parent, name)
                    .or_else(|| tree.find_child(parent, &name.nfc().collect::<String>()))
                    .ok_or(libc::ENOENT)?,
            }
        };
        self.attributes(child)
    }

    /// Read up to `size` bytes at `offset` from the file behind `fh`.
    ///
    /// The window is clamped to the file's logical size; reading at or past
    /// the end returns no bytes.
    pub fn read_node(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, libc::c_int> {
        let handle = self.handles.get(fh).ok_or(libc::EBADF)?;
        if handle.is_dir {
            return Err(libc::EISDIR);
        }
        if offset < 0 {
            return Err(libc::EINVAL);
        }
        let ino = handle.ino;

        let file_size = self.attributes(ino)?.size;
        let start = offset as u64;
        if start >= file_size || size == 0 {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(size as u64).min(file_size);

        let origin = {
            let tree = lock_tree(&self.tree);
            let node = tree.get(ino).ok_or(libc::ENOENT)?;
            node.origin().cloned().ok_or(libc::EIO)?
        };
        let repository = self.registry.get(&origin.repository).ok_or_else(|| {
            log::error!("No repository named {:?} serves {}", origin.repository, origin);
            libc::EIO
        })?;

        let mut data = self
            .rt
            .block_on(repository.fetch_range(&origin, start, end))
            .map_err(|e| {
                log::error!("Read of {} [{}, {}) failed: {}", origin, start, end, e);
                libc::EIO
            })?;
        data.truncate((end - start) as usize);

        lock_tree(&self.tree).touch(ino, SystemTime::now());
        Ok(data)
    }

    /// Entries of the directory behind `fh`: `.`, `..`, then every child.
    pub fn list_dir(&self, fh: u64) -> Result<Vec<DirEntry>, libc::c_int> {
        let handle = self.handles.get(fh).ok_or(libc::EBADF)?;
        if !handle.is_dir {
            return Err(libc::ENOTDIR);
        }

        let tree = lock_tree(&self.tree);
        let node = tree.get(handle.ino).ok_or(libc::ENOENT)?;
        let children = tree.children(handle.ino).map_err(|e| e.errno())?;

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            ino: handle.ino,
            kind: NodeKind::Directory,
            name: ".".to_string(),
        });
        entries.push(DirEntry {
            ino: node.parent_ino,
            kind: NodeKind::Directory,
            name: "..".to_string(),
        });
        entries.extend(
            children
                .into_iter()
                .map(|(name, ino, kind)| DirEntry { ino, kind, name }),
        );
        Ok(entries)
    }

    /// Invalidate `fh`.
    pub fn close_node(&mut self, fh: u64) -> Result<(), libc::c_int> {
        self.handles.release(fh).map(|_| ()).ok_or(libc::EBADF)
    }

    pub fn volume_stats(&self) -> VolumeStats {
        let tree = lock_tree(&self.tree);
        let total = tree.get(inode::ROOT_INO).map(|root| root.size).unwrap_or(0);
        VolumeStats {
            blocks: total.div_ceil(BLOCK_SIZE as u64),
            files: tree.len() as u64,
            block_size: BLOCK_SIZE,
            name_len: MAX_NAME_LEN,
        }
    }
}

/// Default mount point: ~/Projects
pub fn default_mount_point() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Projects"))
}

/// Mount `fs` at `mount_path` on a dedicated OS thread.
///
/// fuser runs its own event loop, so the thread blocks until unmount. The
/// call waits briefly for an immediate mount failure before reporting
/// success.
#[cfg(feature = "fuse")]
pub fn mount_filesystem(
    fs: StrataFS,
    mount_path: &Path,
) -> Result<std::thread::JoinHandle<()>, String> {
    if mount_path.is_symlink() {
        return Err(format!(
            "Mount point {} is a symlink, refusing to mount",
            mount_path.display()
        ));
    }
    if !mount_path.exists() {
        std::fs::create_dir_all(mount_path)
            .map_err(|e| format!("Failed to create mount point: {}", e))?;
    }

    let options = vec![
        MountOption::FSName("stratafs".to_string()),
        MountOption::Subtype("stratafs".to_string()),
        MountOption::RO,
        MountOption::DefaultPermissions,
    ];

    let (tx, rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);
    let thread_path = mount_path.to_path_buf();

    let handle = std::thread::Builder::new()
        .name("fuse-mount".to_string())
        .spawn(move || {
            log::info!("Mounting StrataFS at {}", thread_path.display());
            match fuser::mount2(fs, &thread_path, &options) {
                Ok(()) => {
                    log::info!("FUSE filesystem unmounted cleanly");
                    let _ = tx.send(Ok(()));
                }
                Err(e) => {
                    log::error!("FUSE mount error: {}", e);
                    let _ = tx.send(Err(format!("FUSE mount error: {}", e)));
                }
            }
        })
        .map_err(|e| format!("Failed to spawn FUSE thread: {}", e))?;

    // mount2 blocks while mounted, so silence means success.
    match rx.recv_timeout(std::time::Duration::from_secs(2)) {
        Ok(Ok(())) => Err("FUSE filesystem unmounted immediately after mounting".to_string()),
        Ok(Err(e)) => Err(e),
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            log::info!("FUSE mount confirmed at {}", mount_path.display());
            Ok(handle)
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
            Err("FUSE mount thread exited unexpectedly".to_string())
        }
    }
}

/// Unmount the filesystem at `mount_path`, trying each platform tool in turn.
#[cfg(feature = "fuse")]
pub fn unmount_filesystem(mount_path: &Path) -> Result<(), String> {
    log::info!("Unmounting StrataFS at {}", mount_path.display());

    #[cfg(target_os = "linux")]
    let commands: &[(&str, &[&str])] = &[
        ("fusermount3", &["-u"]),
        ("fusermount", &["-u"]),
        ("umount", &[]),
    ];
    #[cfg(not(target_os = "linux"))]
    let commands: &[(&str, &[&str])] = &[("umount", &[]), ("diskutil", &["unmount", "force"])];

    for (program, args) in commands {
        match std::process::Command::new(program)
            .args(*args)
            .arg(mount_path)
            .status()
        {
            Ok(status) if status.success() => {
                log::info!("FUSE filesystem unmounted via {}", program);
                return Ok(());
            }
            Ok(status) => log::debug!("{} exited with {}", program, status),
            Err(e) => log::debug!("Failed to run {}: {}", program, e),
        }
    }

    Err(format!(
        "Failed to unmount {}; close programs using it and retry",
        mount_path.display()
    ))
}
