//! The shared metadata every runtime hangs its conflict detection off of:
//! a table of ownership records, a table of bytelocks, a table of bitlocks,
//! and the cache-line-padded global counters.
//!
//! An ownership record ("orec") is two words. `v` holds either a version
//! number (lock bit clear) or the owning thread's lock word (lock bit set).
//! `p` holds the version observed at acquire time and is meaningful only
//! while the lock bit is set. Because the lock bit is the most significant
//! bit, a locked `v` compares greater than every timestamp, so the common
//! `v <= start_time` check refuses locked orecs for free.
//!
//! All addresses that hash to the same table slot share its fate; false
//! conflicts are possible and harmless.

use crate::internal::platform::Word;
use core::sync::atomic::{
    AtomicU32, AtomicU8, AtomicUsize,
    Ordering::{self, Relaxed},
};
use crossbeam_utils::CachePadded;

/// Number of orec stripes. Matches the historical 2^20 table.
pub const NUM_STRIPES: usize = 1 << 20;

/// Number of byte/bitlock stripes. Bytelocks are a cache line each, so their
/// table is kept smaller than the orec table.
pub const BYTELOCK_STRIPES: usize = 1 << 16;

/// Upper bound on participating threads, set by the width of a bytelock's
/// reader vector.
pub const MAX_THREADS: usize = 60;

/// The most significant bit of an orec marks it locked.
pub const LOCK_BIT: Word = 1 << (core::mem::size_of::<Word>() * 8 - 1);

/// The value an orec holds while thread `id` owns it.
#[inline]
pub const fn lock_word(id: usize) -> Word {
    LOCK_BIT | id as Word
}

#[inline]
pub const fn is_locked(v: Word) -> bool {
    v & LOCK_BIT != 0
}

/// An ownership record.
pub struct Orec {
    v: AtomicUsize,
    p: AtomicUsize,
}

impl Orec {
    const fn new() -> Self {
        Orec {
            v: AtomicUsize::new(0),
            p: AtomicUsize::new(0),
        }
    }

    /// Current version-or-lock word.
    #[inline]
    pub fn load(&self, o: Ordering) -> Word {
        self.v.load(o)
    }

    /// Attempts to move the orec from the unlocked version `expected` to the
    /// caller's lock word. On success the previous version is saved in `p`.
    #[inline]
    #[must_use]
    pub fn try_lock(&self, expected: Word, lock_word: Word) -> bool {
        debug_assert!(!is_locked(expected), "locking over a locked orec");
        if self
            .v
            .compare_exchange(expected, lock_word, Ordering::Acquire, Relaxed)
            .is_ok()
        {
            self.p.store(expected, Relaxed);
            true
        } else {
            false
        }
    }

    /// The version saved by `try_lock`. Meaningful only while locked.
    #[inline]
    pub fn prev(&self) -> Word {
        self.p.load(Relaxed)
    }

    /// Installs `version` and releases the lock. The caller must hold the
    /// lock, and `version` must exceed every version previously installed.
    #[inline]
    pub fn release(&self, version: Word) {
        debug_assert!(
            is_locked(self.v.load(Relaxed)),
            "releasing an orec that is not locked"
        );
        debug_assert!(!is_locked(version), "releasing an orec to a locked value");
        self.v.store(version, Ordering::Release);
    }

    /// Stamps the orec with an arbitrary value. Reserved for turbo-mode
    /// writers, which own the commit order outright.
    #[inline]
    pub fn stamp(&self, version: Word) {
        self.v.store(version, Ordering::Release);
    }
}

impl core::fmt::Debug for Orec {
    #[inline(never)]
    #[cold]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let v = self.load(Relaxed);
        f.debug_struct("Orec")
            .field("locked", &is_locked(v))
            .field("version", &(v & !LOCK_BIT))
            .finish()
    }
}

const OREC_INIT: Orec = Orec::new();
static ORECS: [Orec; NUM_STRIPES] = [OREC_INIT; NUM_STRIPES];

/// Maps an address to its ownership record.
#[inline]
pub fn orec_of(addr: *const ()) -> &'static Orec {
    &ORECS[(addr as usize >> 3) % NUM_STRIPES]
}

/// A visible-reader lock stripe: one owner id plus one byte per thread.
pub struct Bytelock {
    owner:   AtomicU32,
    readers: [AtomicU8; MAX_THREADS],
}

impl Bytelock {
    const fn new() -> Self {
        const READER_INIT: AtomicU8 = AtomicU8::new(0);
        Bytelock {
            owner:   AtomicU32::new(0),
            readers: [READER_INIT; MAX_THREADS],
        }
    }

    /// The owning thread's id plus one, or 0 when unowned.
    #[inline]
    pub fn owner(&self) -> u32 {
        self.owner.load(Ordering::SeqCst)
    }

    /// CAS the owner slot from free to `id + 1`.
    #[inline]
    #[must_use]
    pub fn try_claim(&self, id: usize) -> bool {
        self.owner
            .compare_exchange(0, id as u32 + 1, Ordering::SeqCst, Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn release_owner(&self) {
        self.owner.store(0, Ordering::Release);
    }

    #[inline]
    pub fn set_read_byte(&self, id: usize) {
        self.readers[id].store(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn clear_read_byte(&self, id: usize) {
        self.readers[id].store(0, Ordering::Release);
    }

    #[inline]
    pub fn read_byte(&self, id: usize) -> bool {
        self.readers[id].load(Ordering::SeqCst) != 0
    }

    /// Ids of every thread currently marked as a reader, except `me`.
    #[inline]
    pub fn other_readers<'a>(&'a self, me: usize) -> impl Iterator<Item = usize> + 'a {
        (0..MAX_THREADS).filter(move |&i| i != me && self.readers[i].load(Ordering::Acquire) != 0)
    }
}

const BYTELOCK_INIT: Bytelock = Bytelock::new();
static BYTELOCKS: [Bytelock; BYTELOCK_STRIPES] = [BYTELOCK_INIT; BYTELOCK_STRIPES];

/// Maps an address to its bytelock stripe.
#[inline]
pub fn bytelock_of(addr: *const ()) -> &'static Bytelock {
    &BYTELOCKS[(addr as usize >> 3) % BYTELOCK_STRIPES]
}

/// A visible-reader lock stripe with one bit per thread instead of one byte.
pub struct Bitlock {
    owner:   AtomicU32,
    readers: AtomicUsize,
}

impl Bitlock {
    const fn new() -> Self {
        Bitlock {
            owner:   AtomicU32::new(0),
            readers: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn owner(&self) -> u32 {
        self.owner.load(Ordering::SeqCst)
    }

    #[inline]
    #[must_use]
    pub fn try_claim(&self, id: usize) -> bool {
        self.owner
            .compare_exchange(0, id as u32 + 1, Ordering::SeqCst, Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn release_owner(&self) {
        self.owner.store(0, Ordering::Release);
    }

    #[inline]
    pub fn set_read_bit(&self, id: usize) {
        let _ = self.readers.fetch_or(1 << id, Ordering::SeqCst);
    }

    #[inline]
    pub fn clear_read_bit(&self, id: usize) {
        let _ = self.readers.fetch_and(!(1 << id), Ordering::Release);
    }

    #[inline]
    pub fn read_bit(&self, id: usize) -> bool {
        self.readers.load(Relaxed) & (1 << id) != 0
    }

    /// True when any thread other than `me` holds a read bit.
    #[inline]
    pub fn has_other_readers(&self, me: usize) -> bool {
        self.readers.load(Ordering::SeqCst) & !(1 << me) != 0
    }
}

const BITLOCK_INIT: Bitlock = Bitlock::new();
static BITLOCKS: [Bitlock; BYTELOCK_STRIPES] = [BITLOCK_INIT; BYTELOCK_STRIPES];

/// Maps an address to its bitlock stripe.
#[inline]
pub fn bitlock_of(addr: *const ()) -> &'static Bitlock {
    &BITLOCKS[(addr as usize >> 3) % BYTELOCK_STRIPES]
}

/// The global commit clock. Doubles as the TML/NOrec sequence lock and the
/// version source for every orec algorithm, so a live algorithm switch never
/// observes an orec version from the future.
pub static TIMESTAMP: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Trails `TIMESTAMP`; a writer advances it only after its writeback is
/// visible, which gives the ordered algorithms their deferred-update
/// guarantee.
pub static LAST_COMPLETE: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// The hourglass word. Nonzero while a distressed transaction runs solo.
pub static HOURGLASS: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Fairness clock for the FCM contention manager.
pub static FCM_CLOCK: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Cohorts: transactions currently running.
pub static STARTED: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Cohorts: transactions waiting to commit.
pub static CPENDING: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Cohorts: transactions that have finished committing.
pub static COMMITTED: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Cohorts: order of the last member of the previous cohort, plus one.
pub static LAST_ORDER: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// CohortsEager: nonzero while the last member of a cohort writes in place.
pub static INPLACE: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

const EPOCH_INIT: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// One fairness slot per thread, written by the FCM contention manager.
pub static FCM_EPOCHS: [CachePadded<AtomicUsize>; MAX_THREADS] = [EPOCH_INIT; MAX_THREADS];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_word_has_lock_bit() {
        for id in 0..MAX_THREADS {
            assert!(is_locked(lock_word(id)));
            assert_eq!(lock_word(id) & !LOCK_BIT, id);
        }
    }

    #[test]
    fn locked_compares_greater_than_any_version() {
        // the `v <= start_time` fast path must reject locked orecs
        assert!(lock_word(0) > NUM_STRIPES as Word);
        assert!(lock_word(MAX_THREADS - 1) > !LOCK_BIT);
    }

    #[test]
    fn orec_lock_release_cycle() {
        let o = Orec::new();
        assert_eq!(o.load(Relaxed), 0);
        assert!(o.try_lock(0, lock_word(3)));
        assert!(is_locked(o.load(Relaxed)));
        assert_eq!(o.prev(), 0);
        assert!(!o.try_lock(0, lock_word(4)), "double lock must fail");
        o.release(10);
        assert_eq!(o.load(Relaxed), 10);
    }

    #[test]
    fn same_stripe_same_orec() {
        let xs = [0usize; 4];
        let a = orec_of(&xs[0] as *const _ as *const ());
        let b = orec_of(&xs[0] as *const _ as *const ());
        assert!(core::ptr::eq(a, b));
    }

    #[test]
    fn bytelock_claim_and_drain() {
        let l = Bytelock::new();
        assert!(l.try_claim(2));
        assert_eq!(l.owner(), 3);
        assert!(!l.try_claim(4));
        l.set_read_byte(1);
        assert_eq!(l.other_readers(2).collect::<Vec<_>>(), vec![1]);
        l.clear_read_byte(1);
        assert_eq!(l.other_readers(2).count(), 0);
        l.release_owner();
        assert_eq!(l.owner(), 0);
    }

    #[test]
    fn bitlock_bits() {
        let l = Bitlock::new();
        l.set_read_bit(5);
        assert!(l.read_bit(5));
        assert!(l.has_other_readers(0));
        assert!(!l.has_other_readers(5));
        l.clear_read_bit(5);
        assert!(!l.has_other_readers(0));
    }
}
