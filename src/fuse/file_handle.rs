//! Open handle table.
//!
//! A handle binds an opaque number to a node for the duration of one
//! open/release (or opendir/releasedir) session. Nothing is buffered: the
//! filesystem is read-only and reads go straight to the repository.

use std::collections::HashMap;
use std::time::Instant;

/// One open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenHandle {
    pub ino: u64,
    pub is_dir: bool,
    /// Open flags passed by the kernel.
    pub flags: i32,
    pub opened_at: Instant,
}

/// Handles of every open session, keyed by handle number.
#[derive(Debug)]
pub struct HandleTable {
    next_fh: u64,
    open: HashMap<u64, OpenHandle>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: 1,
            open: HashMap::new(),
        }
    }

    /// Allocate a handle for `ino`. Handle numbers are never reused.
    pub fn open(&mut self, ino: u64, is_dir: bool, flags: i32) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open.insert(
            fh,
            OpenHandle {
                ino,
                is_dir,
                flags,
                opened_at: Instant::now(),
            },
        );
        fh
    }

    pub fn get(&self, fh: u64) -> Option<&OpenHandle> {
        self.open.get(&fh)
    }

    /// Invalidate `fh`, returning the session it belonged to.
    pub fn release(&mut self, fh: u64) -> Option<OpenHandle> {
        self.open.remove(&fh)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Drop every handle (unmount).
    pub fn clear(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let mut table = HandleTable::new();
        let a = table.open(2, false, libc::O_RDONLY);
        let b = table.open(2, false, libc::O_RDONLY);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a).unwrap().ino, 2);
    }

    #[test]
    fn test_release_invalidates() {
        let mut table = HandleTable::new();
        let fh = table.open(3, true, 0);
        let released = table.release(fh).unwrap();
        assert!(released.is_dir);
        assert!(table.get(fh).is_none());
        assert!(table.release(fh).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_numbers_not_reused_after_release() {
        let mut table = HandleTable::new();
        let first = table.open(2, false, 0);
        table.release(first);
        let second = table.open(2, false, 0);
        assert!(second > first);
    }

    #[test]
    fn test_clear() {
        let mut table = HandleTable::new();
        table.open(2, false, 0);
        table.open(3, true, 0);
        table.clear();
        assert!(table.is_empty());
    }
}
