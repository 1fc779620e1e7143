//! The append-only side logs: value-based validation entries, the undo log
//! for in-place writers, and user commit/rollback callbacks.

use crate::internal::platform::{self, Mask, Word};
use core::sync::atomic::Ordering::{Acquire, Relaxed};

/// A `(address, observed value, mask)` triple recorded by value-validating
/// runtimes on every transactional read.
#[derive(Copy, Clone, Debug)]
struct ValueEntry {
    addr: *const Word,
    val:  Word,
    mask: Mask,
}

/// Read log for value-based validation. A transaction is valid while every
/// logged word still holds its logged bytes.
#[derive(Debug)]
pub struct ValueList {
    data: Vec<ValueEntry>,
}

impl ValueList {
    pub fn new() -> Self {
        ValueList {
            data: Vec::with_capacity(64),
        }
    }

    #[inline]
    pub fn log(&mut self, addr: *const Word, val: Word, mask: Mask) {
        self.data.push(ValueEntry { addr, val, mask });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Re-reads every logged word. Returns false as soon as any logged byte
    /// has changed.
    #[inline]
    pub unsafe fn still_valid(&self) -> bool {
        let mut valid = true;
        for entry in &self.data {
            let current = platform::load_word(entry.addr, Acquire);
            valid &= (current ^ entry.val) & entry.mask == 0;
        }
        valid
    }
}

/// A `(address, previous value, mask)` triple recorded by in-place writers
/// before each store.
#[derive(Copy, Clone, Debug)]
struct UndoEntry {
    addr: *mut Word,
    old:  Word,
    mask: Mask,
}

/// Undo log for encounter-time-writing runtimes. Replayed in reverse on
/// abort.
#[derive(Debug)]
pub struct UndoLog {
    data: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn new() -> Self {
        UndoLog {
            data: Vec::with_capacity(64),
        }
    }

    #[inline]
    pub fn log(&mut self, addr: *mut Word, old: Word, mask: Mask) {
        self.data.push(UndoEntry { addr, old, mask });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Replays the log newest-first, restoring every logged byte. Entries
    /// that fall inside `protected` are skipped: writes to a protected
    /// object must survive the abort.
    pub unsafe fn undo(&self, protected: Option<(*const u8, usize)>) {
        let (lo, hi) = match protected {
            Some((base, len)) => (base as usize, base as usize + len),
            None => (1, 0),
        };
        for entry in self.data.iter().rev() {
            let addr = entry.addr as usize;
            if addr >= lo && addr + platform::WORD_SIZE <= hi {
                continue;
            }
            platform::store_word_masked(entry.addr, entry.old, entry.mask, Relaxed);
        }
    }
}

/// Deferred user callbacks, run once the transaction's fate is known.
pub struct UserCallbackLog {
    on_commit:   Vec<Box<dyn FnOnce()>>,
    on_rollback: Vec<Box<dyn FnOnce()>>,
}

impl UserCallbackLog {
    pub fn new() -> Self {
        UserCallbackLog {
            on_commit:   Vec::new(),
            on_rollback: Vec::new(),
        }
    }

    #[inline]
    pub fn defer_on_commit(&mut self, f: Box<dyn FnOnce()>) {
        self.on_commit.push(f);
    }

    #[inline]
    pub fn defer_on_rollback(&mut self, f: Box<dyn FnOnce()>) {
        self.on_rollback.push(f);
    }

    /// Runs the commit callbacks in registration order; rollback callbacks
    /// are discarded unrun.
    pub fn commit(&mut self) {
        self.on_rollback.clear();
        for f in self.on_commit.drain(..) {
            f();
        }
    }

    /// Runs the rollback callbacks in registration order; commit callbacks
    /// are discarded unrun.
    pub fn rollback(&mut self) {
        self.on_commit.clear();
        for f in self.on_rollback.drain(..) {
            f();
        }
    }
}

impl core::fmt::Debug for UserCallbackLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserCallbackLog")
            .field("on_commit", &self.on_commit.len())
            .field("on_rollback", &self.on_rollback.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::platform::FULL_MASK;

    #[test]
    fn value_list_detects_change() {
        let mut x = 7usize;
        let addr = &mut x as *mut usize;
        let mut vlist = ValueList::new();
        vlist.log(addr, 7, FULL_MASK);
        assert!(unsafe { vlist.still_valid() });
        unsafe { *addr = 8 };
        assert!(!unsafe { vlist.still_valid() });
    }

    #[test]
    fn value_list_masked_bytes_only() {
        let mut x = 0xAABBusize;
        let addr = &mut x as *mut usize;
        let mut vlist = ValueList::new();
        vlist.log(addr, 0xBB, 0xFF);
        unsafe { *addr = 0xCCBB }; // the logged byte is untouched
        assert!(unsafe { vlist.still_valid() });
        unsafe { *addr = 0xCCCC };
        assert!(!unsafe { vlist.still_valid() });
    }

    #[test]
    fn undo_restores_in_reverse() {
        let mut x = 0usize;
        let addr = &mut x as *mut usize;
        let mut undo = UndoLog::new();
        undo.log(addr, 0, FULL_MASK);
        unsafe { *addr = 1 };
        undo.log(addr, 1, FULL_MASK);
        unsafe { *addr = 2 };
        unsafe { undo.undo(None) };
        assert_eq!(x, 0, "newest-first replay must land on the oldest value");
    }

    #[test]
    fn undo_skips_protected_range() {
        let mut x = 0usize;
        let addr = &mut x as *mut usize;
        let mut undo = UndoLog::new();
        undo.log(addr, 0, FULL_MASK);
        unsafe { *addr = 9 };
        let range = (addr as *const u8, platform::WORD_SIZE);
        unsafe { undo.undo(Some(range)) };
        assert_eq!(x, 9, "protected write must survive the abort");
    }

    #[test]
    fn callbacks_follow_fate() {
        use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
        use std::sync::Arc;

        let committed = Arc::new(AtomicUsize::new(0));
        let rolled_back = Arc::new(AtomicUsize::new(0));

        let mut log = UserCallbackLog::new();
        let c = committed.clone();
        let r = rolled_back.clone();
        log.defer_on_commit(Box::new(move || {
            let _ = c.fetch_add(1, SeqCst);
        }));
        log.defer_on_rollback(Box::new(move || {
            let _ = r.fetch_add(1, SeqCst);
        }));
        log.commit();
        assert_eq!(committed.load(SeqCst), 1);
        assert_eq!(rolled_back.load(SeqCst), 0);

        let r2 = rolled_back.clone();
        log.defer_on_rollback(Box::new(move || {
            let _ = r2.fetch_add(1, SeqCst);
        }));
        log.rollback();
        assert_eq!(rolled_back.load(SeqCst), 1);
    }
}
