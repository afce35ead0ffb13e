//! FUSE filesystem trait implementation for StrataFS.
//!
//! Implements the read-only set: init, destroy, lookup, getattr, open, read,
//! release, opendir, readdir, releasedir, statfs. Anything that would modify
//! the volume is left to fuser's defaults, and the mount is `ro` anyway.
//!
//! Network I/O blocks on the tokio runtime from inside the handlers; the
//! request executor's retry bound and the client timeout limit each call.

#[cfg(feature = "fuse")]
mod implementation {
    use fuser::{
        FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
        ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
    };
    use std::ffi::OsStr;
    use std::time::Duration;

    use crate::fuse::inode::{NodeKind, BLOCK_SIZE};
    use crate::fuse::{NodeAttr, StrataFS};

    /// TTL for attribute and entry replies. The tree does not change after
    /// mount, apart from refined file sizes.
    const TTL: Duration = Duration::from_secs(1);

    fn file_type(kind: NodeKind) -> FileType {
        match kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        }
    }

    fn to_file_attr(attr: &NodeAttr) -> FileAttr {
        FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks(),
            atime: attr.accessed,
            mtime: attr.modified,
            ctime: attr.modified,
            crtime: attr.created,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink(),
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    impl Filesystem for StrataFS {
        /// The tree is complete before mount; no network I/O here.
        fn init(
            &mut self,
            _req: &Request<'_>,
            _config: &mut KernelConfig,
        ) -> Result<(), libc::c_int> {
            StrataFS::init(self);
            Ok(())
        }

        fn destroy(&mut self) {
            StrataFS::destroy(self);
        }

        fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let Some(name) = name.to_str() else {
                reply.error(libc::ENOENT);
                return;
            };
            match self.lookup_child(parent, name) {
                Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), 0),
                Err(errno) => reply.error(errno),
            }
        }

        fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
            match self.attributes(ino) {
                Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
                Err(errno) => reply.error(errno),
            }
        }

        fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
            match self.open_node(ino, false, flags) {
                Ok(fh) => reply.opened(fh, 0),
                Err(errno) => reply.error(errno),
            }
        }

        fn read(
            &mut self,
            _req: &Request<'_>,
            _ino: u64,
            fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock: Option<u64>,
            reply: ReplyData,
        ) {
            match self.read_node(fh, offset, size) {
                Ok(data) => reply.data(&data),
                Err(errno) => reply.error(errno),
            }
        }

        fn release(
            &mut self,
            _req: &Request<'_>,
            _ino: u64,
            fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            match self.close_node(fh) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        }

        /// fh=0 means "no handle" to some FUSE backends, so handles start at 1.
        fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
            match self.open_node(ino, true, flags) {
                Ok(fh) => reply.opened(fh, 0),
                Err(errno) => reply.error(errno),
            }
        }

        /// Returns every entry in one pass; `offset` skips the ones already sent.
        fn readdir(
            &mut self,
            _req: &Request<'_>,
            _ino: u64,
            fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let entries = match self.list_dir(fh) {
                Ok(entries) => entries,
                Err(errno) => {
                    reply.error(errno);
                    return;
                }
            };

            for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
                // add() returns true once the reply buffer is full
                if reply.add(entry.ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        }

        fn releasedir(
            &mut self,
            _req: &Request<'_>,
            _ino: u64,
            fh: u64,
            _flags: i32,
            reply: ReplyEmpty,
        ) {
            match self.close_node(fh) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        }

        /// Read-only volume: no free blocks, no free inodes.
        fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
            let stats = self.volume_stats();
            reply.statfs(
                stats.blocks,
                0,
                0,
                stats.files,
                0,
                stats.block_size,
                stats.name_len,
                stats.block_size,
            );
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::SystemTime;

        #[test]
        fn test_file_attr_mapping() {
            let now = SystemTime::now();
            let attr = NodeAttr {
                ino: 7,
                kind: NodeKind::File,
                size: 1025,
                perm: 0o444,
                uid: 1000,
                gid: 1000,
                created: now,
                accessed: now,
                modified: now,
            };
            let fa = to_file_attr(&attr);
            assert_eq!(fa.ino, 7);
            assert_eq!(fa.kind, FileType::RegularFile);
            assert_eq!(fa.blocks, 3);
            assert_eq!(fa.nlink, 1);
            assert_eq!(fa.perm, 0o444);
            assert_eq!(fa.blksize, BLOCK_SIZE);
        }

        #[test]
        fn test_directory_attr_mapping() {
            let now = SystemTime::now();
            let attr = NodeAttr {
                ino: 1,
                kind: NodeKind::Directory,
                size: 0,
                perm: 0o555,
                uid: 0,
                gid: 0,
                created: now,
                accessed: now,
                modified: now,
            };
            let fa = to_file_attr(&attr);
            assert_eq!(fa.kind, FileType::Directory);
            assert_eq!(fa.nlink, 2);
            assert_eq!(fa.blocks, 0);
        }
    }
}
