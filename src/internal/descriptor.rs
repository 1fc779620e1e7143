//! The per-thread transaction descriptor and the process-wide threads table.
//!
//! A descriptor is created the first time a thread touches the runtime and
//! lives until process exit (it is leaked, matching the table's `'static`
//! references). The owning thread is the only mutator of the descriptor;
//! the one exception is the `Shared` slice, which other threads address
//! through the threads table to deliver remote aborts and to read the
//! commit counters at shutdown.

use crate::internal::{
    logs::{UndoLog, UserCallbackLog, ValueList},
    metadata::{lock_word, Bitlock, Bytelock, Orec, MAX_THREADS},
    platform::Word,
    wbmm::WbmmPolicy,
    write_set::WriteSet,
};
use core::sync::atomic::{
    AtomicPtr, AtomicU32, AtomicU64, AtomicUsize,
    Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst},
};

/// Transaction states published through `Shared::alive`.
pub const TX_ACTIVE: u32 = 0;
pub const TX_ABORTED: u32 = 1;
pub const TX_COMMITTED: u32 = 2;

/// The remotely visible slice of a descriptor.
#[derive(Debug)]
pub struct Shared {
    alive:      AtomicU32,
    commits_ro: AtomicU64,
    commits_rw: AtomicU64,
    aborts:     AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Shared {
            alive:      AtomicU32::new(TX_ACTIVE),
            commits_ro: AtomicU64::new(0),
            commits_rw: AtomicU64::new(0),
            aborts:     AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn alive(&self) -> u32 {
        self.alive.load(Acquire)
    }

    #[inline]
    pub fn set_alive(&self, state: u32) {
        self.alive.store(state, Release);
    }

    /// CAS on the liveness word; the path remote killers take.
    #[inline]
    #[must_use]
    pub fn try_transition(&self, from: u32, to: u32) -> bool {
        self.alive.compare_exchange(from, to, AcqRel, Relaxed).is_ok()
    }

    pub fn commits_ro(&self) -> u64 {
        self.commits_ro.load(Relaxed)
    }

    pub fn commits_rw(&self) -> u64 {
        self.commits_rw.load(Relaxed)
    }

    pub fn aborts(&self) -> u64 {
        self.aborts.load(Relaxed)
    }
}

static THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);

const THREAD_INIT: AtomicPtr<Shared> = AtomicPtr::new(core::ptr::null_mut());
static THREADS: [AtomicPtr<Shared>; MAX_THREADS] = [THREAD_INIT; MAX_THREADS];

/// Number of descriptors ever created.
#[inline]
pub fn thread_count() -> usize {
    THREAD_COUNT.load(Acquire)
}

/// The shared slice of thread `id`'s descriptor.
///
/// # Panics
///
/// Panics if no thread with that id has registered.
#[inline]
pub fn shared_of(id: usize) -> &'static Shared {
    let ptr = THREADS[id].load(Acquire);
    assert!(!ptr.is_null(), "no descriptor registered for thread id {}", id);
    unsafe { &*ptr }
}

/// Walks every registered thread's shared slice.
pub fn for_each_shared(mut f: impl FnMut(usize, &'static Shared)) {
    for id in 0..thread_count() {
        let ptr = THREADS[id].load(Acquire);
        if !ptr.is_null() {
            f(id, unsafe { &*ptr });
        }
    }
}

/// Per-thread runtime state. One per thread, process lifetime.
pub struct Descriptor {
    /// Dense id, assigned at first use.
    pub id: usize,

    /// `lock_word(id)`; the value this thread stamps into orecs it owns.
    pub my_lock: Word,

    /// Flat nesting depth. Only the outermost begin/end do real work.
    pub nesting_depth: usize,

    // clock snapshots; each algorithm interprets its own subset
    pub start_time: Word,
    pub ts_cache:   Word,
    pub end_time:   Word,

    /// Commit ticket for ordered runtimes. `None` until the first write.
    pub order: Option<Word>,

    /// In-place irrevocable mode (oldest ordered writer, or the TML lock
    /// holder).
    pub turbo: bool,

    /// Set by an internal rollback; every later barrier call fails fast
    /// until the driver restarts the transaction.
    pub doomed: bool,

    // logs
    pub r_orecs:     Vec<&'static Orec>,
    pub locks:       Vec<&'static Orec>,
    pub r_bytelocks: Vec<&'static Bytelock>,
    pub w_bytelocks: Vec<&'static Bytelock>,
    pub r_bitlocks:  Vec<&'static Bitlock>,
    pub w_bitlocks:  Vec<&'static Bitlock>,
    pub writes:      WriteSet,
    pub vlist:       ValueList,
    pub undo_log:    UndoLog,
    pub callbacks:   UserCallbackLog,

    /// Rollback preserves writes into this range (see
    /// `WriteSet::rollback_with_protected_range`).
    pub protected_range: Option<(*const u8, usize)>,

    pub allocator: WbmmPolicy,

    // contention manager state
    pub consec_aborts: u32,
    pub seed:          u32,
    pub hourglass:     bool,

    shared: &'static Shared,
}

impl Descriptor {
    /// Creates and registers a descriptor for the calling thread.
    #[inline(never)]
    #[cold]
    pub fn new() -> &'static mut Descriptor {
        let id = THREAD_COUNT.fetch_add(1, SeqCst);
        assert!(
            id < MAX_THREADS,
            "thread limit ({}) exceeded; the reader vectors cannot track more threads",
            MAX_THREADS
        );
        let shared: &'static Shared = Box::leak(Box::new(Shared::new()));
        THREADS[id].store(shared as *const Shared as *mut Shared, Release);

        Box::leak(Box::new(Descriptor {
            id,
            my_lock: lock_word(id),
            nesting_depth: 0,
            start_time: 0,
            ts_cache: 0,
            end_time: 0,
            order: None,
            turbo: false,
            doomed: false,
            r_orecs: Vec::with_capacity(64),
            locks: Vec::with_capacity(64),
            r_bytelocks: Vec::with_capacity(64),
            w_bytelocks: Vec::with_capacity(64),
            r_bitlocks: Vec::with_capacity(64),
            w_bitlocks: Vec::with_capacity(64),
            writes: WriteSet::new(),
            vlist: ValueList::new(),
            undo_log: UndoLog::new(),
            callbacks: UserCallbackLog::new(),
            protected_range: None,
            allocator: WbmmPolicy::new(id),
            consec_aborts: 0,
            seed: (id as u32).wrapping_mul(0x9E37_79B9) | 1,
            hourglass: false,
            shared,
        }))
    }

    #[inline]
    pub fn shared(&self) -> &'static Shared {
        self.shared
    }

    /// Marsaglia xorshift; the randomness source for backoff.
    #[inline]
    pub fn next_rand(&mut self) -> u32 {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        x
    }

    #[inline]
    pub fn bump_ro_commit(&mut self) {
        let _ = self.shared.commits_ro.fetch_add(1, Relaxed);
        crate::internal::stats::ro_commit();
    }

    #[inline]
    pub fn bump_rw_commit(&mut self) {
        let _ = self.shared.commits_rw.fetch_add(1, Relaxed);
        crate::internal::stats::rw_commit();
    }

    #[inline]
    pub fn bump_abort(&mut self) {
        let _ = self.shared.aborts.fetch_add(1, Relaxed);
        crate::internal::stats::conflict();
    }
}

impl core::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("nesting_depth", &self.nesting_depth)
            .field("start_time", &self.start_time)
            .field("doomed", &self.doomed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_nonzero_and_varies() {
        let desc = Descriptor::new();
        let a = desc.next_rand();
        let b = desc.next_rand();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn shared_transitions() {
        let s = Shared::new();
        assert_eq!(s.alive(), TX_ACTIVE);
        assert!(s.try_transition(TX_ACTIVE, TX_ABORTED));
        assert!(!s.try_transition(TX_ACTIVE, TX_COMMITTED));
        s.set_alive(TX_ACTIVE);
        assert!(s.try_transition(TX_ACTIVE, TX_COMMITTED));
    }
}
