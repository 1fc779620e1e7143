//! Write-buffered memory management: allocation and deallocation inside a
//! speculative region, with epoch-based reclamation so a doomed transaction
//! can never touch memory that has been handed back to the allocator.
//!
//! Every thread owns an epoch counter. Odd means "inside a transaction".
//! Frees issued by committed transactions accumulate in a pre-limbo buffer;
//! when it fills, the buffer is stamped with a snapshot of every thread's
//! epoch and moved to the limbo list. A limbo bag is reclaimed once every
//! thread has either left the epoch it was stamped with or is outside any
//! transaction.

use crate::internal::{metadata::MAX_THREADS, stats};
use core::sync::atomic::{AtomicUsize, Ordering::{Acquire, Relaxed, Release}};
use crossbeam_utils::CachePadded;
use std::alloc::{self, Layout};

const EPOCH_INIT: CachePadded<AtomicUsize> = CachePadded::new(AtomicUsize::new(0));

/// Every thread's allocator epoch, indexed by thread id.
static TRANS_EPOCHS: [CachePadded<AtomicUsize>; MAX_THREADS] = [EPOCH_INIT; MAX_THREADS];

/// Pointers buffered before they are stamped and moved to limbo.
const PRELIMBO_CAPACITY: usize = 64;

/// True when no thread is inside a transaction. The epoch words double as
/// the in-transaction flags, which is what live algorithm switching needs.
pub fn all_quiescent() -> bool {
    TRANS_EPOCHS.iter().all(|e| e.load(Acquire) & 1 == 0)
}

#[derive(Copy, Clone, Debug)]
struct Reclaimable {
    ptr:    *mut u8,
    layout: Layout,
}

impl Reclaimable {
    #[inline]
    unsafe fn reclaim(self) {
        alloc::dealloc(self.ptr, self.layout);
    }
}

/// A full pre-limbo buffer stamped with the epochs every thread held when it
/// was sealed.
#[derive(Debug)]
struct SealedBag {
    snapshot: [usize; MAX_THREADS],
    ptrs:     Vec<Reclaimable>,
}

impl SealedBag {
    /// A bag is reclaimable once no thread can still be inside the epoch the
    /// bag was stamped with.
    fn quiesced(&self) -> bool {
        for (i, &stamped) in self.snapshot.iter().enumerate() {
            let current = TRANS_EPOCHS[i].load(Acquire);
            if current & 1 == 1 && current <= stamped {
                return false;
            }
        }
        true
    }
}

/// Per-thread allocator state. Owned by the descriptor; never shared.
#[derive(Debug)]
pub struct WbmmPolicy {
    id:       usize,
    prelimbo: Vec<Reclaimable>,
    limbo:    Vec<SealedBag>,
    frees:    Vec<Reclaimable>,
    allocs:   Vec<Reclaimable>,
}

impl WbmmPolicy {
    pub fn new(id: usize) -> Self {
        debug_assert!(id < MAX_THREADS, "thread id out of range for the epoch table");
        WbmmPolicy {
            id,
            prelimbo: Vec::with_capacity(PRELIMBO_CAPACITY),
            limbo: Vec::new(),
            frees: Vec::new(),
            allocs: Vec::new(),
        }
    }

    #[inline]
    fn epoch(&self) -> &'static AtomicUsize {
        &TRANS_EPOCHS[self.id]
    }

    #[inline]
    fn in_transaction(&self) -> bool {
        self.epoch().load(Relaxed) & 1 == 1
    }

    /// Moves to an odd epoch and starts logging.
    #[inline]
    pub fn on_tx_begin(&mut self) {
        let e = self.epoch().load(Relaxed);
        debug_assert!(e & 1 == 0, "allocator begin while already in a transaction");
        self.epoch().store(e + 1, Release);
    }

    /// Discards the alloc log, leaves the epoch, and schedules the frees.
    ///
    /// The epoch exit comes first: the committing thread is done with the
    /// freed memory, and every other thread is covered by the snapshot taken
    /// when the prelimbo seals.
    pub fn on_tx_commit(&mut self) {
        debug_assert!(self.in_transaction(), "allocator commit outside a transaction");
        self.allocs.clear();
        let e = self.epoch().load(Relaxed);
        self.epoch().store(e + 1, Release);
        while let Some(r) = self.frees.pop() {
            self.schedule_for_reclaim(r);
        }
    }

    /// Unrolls the allocs, discards the frees, and leaves the epoch.
    pub fn on_tx_abort(&mut self) {
        debug_assert!(self.in_transaction(), "allocator abort outside a transaction");
        self.frees.clear();
        for r in self.allocs.drain(..) {
            // the allocation never escaped the aborted transaction
            unsafe { r.reclaim() };
        }
        let e = self.epoch().load(Relaxed);
        self.epoch().store(e + 1, Release);
    }

    /// Allocates memory that is reclaimed automatically if the running
    /// transaction aborts.
    pub fn tx_alloc(&mut self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            alloc::handle_alloc_error(layout);
        }
        if self.in_transaction() {
            self.allocs.push(Reclaimable { ptr, layout });
        }
        ptr
    }

    /// Frees memory. Inside a transaction the free is deferred to commit;
    /// outside, it goes straight to the reclaimer.
    ///
    /// `ptr` must have been allocated with `layout` and not freed already.
    pub unsafe fn tx_free(&mut self, ptr: *mut u8, layout: Layout) {
        let r = Reclaimable { ptr, layout };
        if self.in_transaction() {
            self.frees.push(r);
        } else {
            self.schedule_for_reclaim(r);
        }
    }

    /// Buffers a free; on overflow, stamps the buffer and tucks it into the
    /// limbo list until every thread has moved past the stamp.
    fn schedule_for_reclaim(&mut self, r: Reclaimable) {
        self.prelimbo.push(r);
        if unlikely!(self.prelimbo.len() >= PRELIMBO_CAPACITY) {
            self.seal_prelimbo();
        }
    }

    #[inline(never)]
    #[cold]
    fn seal_prelimbo(&mut self) {
        let mut snapshot = [0usize; MAX_THREADS];
        for (slot, epoch) in snapshot.iter_mut().zip(TRANS_EPOCHS.iter()) {
            *slot = epoch.load(Acquire);
        }
        let ptrs = core::mem::replace(&mut self.prelimbo, Vec::with_capacity(PRELIMBO_CAPACITY));
        self.limbo.push(SealedBag { snapshot, ptrs });
        self.collect();
    }

    /// Reclaims every quiesced bag. The limbo list is ordered oldest first,
    /// and a younger bag can never quiesce before an older one, so stop at
    /// the first bag still in flight.
    fn collect(&mut self) {
        let mut reclaimed = 0;
        while let Some(bag) = self.limbo.first() {
            if !bag.quiesced() {
                break;
            }
            let bag = self.limbo.remove(0);
            reclaimed += bag.ptrs.len();
            for r in bag.ptrs {
                unsafe { r.reclaim() };
            }
        }
        if reclaimed > 0 {
            stats::limbo_reclaimed(reclaimed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_layout() -> Layout {
        Layout::from_size_align(32, 8).unwrap()
    }

    #[test]
    fn abort_frees_allocations() {
        let mut wbmm = WbmmPolicy::new(MAX_THREADS - 1);
        wbmm.on_tx_begin();
        let p = wbmm.tx_alloc(leak_layout());
        assert!(!p.is_null());
        assert_eq!(wbmm.allocs.len(), 1);
        wbmm.on_tx_abort();
        assert!(wbmm.allocs.is_empty(), "aborted allocation must be unrolled");
    }

    #[test]
    fn commit_defers_frees_to_limbo() {
        let mut wbmm = WbmmPolicy::new(MAX_THREADS - 2);
        wbmm.on_tx_begin();
        let p = wbmm.tx_alloc(leak_layout());
        unsafe { wbmm.tx_free(p, leak_layout()) };
        assert_eq!(wbmm.frees.len(), 1);
        wbmm.on_tx_commit();
        assert!(wbmm.frees.is_empty());
        assert_eq!(wbmm.prelimbo.len(), 1, "committed free waits in prelimbo");
    }

    #[test]
    fn prelimbo_overflow_reclaims_when_quiesced() {
        let mut wbmm = WbmmPolicy::new(MAX_THREADS - 3);
        for _ in 0..PRELIMBO_CAPACITY {
            wbmm.on_tx_begin();
            let p = wbmm.tx_alloc(leak_layout());
            unsafe { wbmm.tx_free(p, leak_layout()) };
            wbmm.on_tx_commit();
        }
        // all threads are outside transactions, so sealing also collects
        assert!(wbmm.limbo.is_empty());
        assert!(wbmm.prelimbo.is_empty());
    }

    #[test]
    fn free_outside_transaction_goes_to_prelimbo() {
        let mut wbmm = WbmmPolicy::new(MAX_THREADS - 4);
        let p = wbmm.tx_alloc(leak_layout());
        unsafe { wbmm.tx_free(p, leak_layout()) };
        assert_eq!(wbmm.prelimbo.len(), 1);
    }
}
