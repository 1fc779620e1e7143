//! LLT: orecs with lazy acquire and a GV1-style clock, closely following
//! TL2. Reads double-check the orec around the dereference and abort rather
//! than wait or extend; every writer increments the clock, which lets commit
//! skip read-set validation when nobody else committed in between.

use crate::{
    internal::{
        algs::{
            acquire_write_set, overlay, reads_valid_or_mine, release_locks, release_locks_undo,
            Algorithm, TmResult,
        },
        descriptor::Descriptor,
        metadata::{orec_of, TIMESTAMP},
        platform::{self, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, SeqCst},
};

pub struct Llt;

pub static LLT: Llt = Llt;

impl Algorithm for Llt {
    fn name(&self) -> &'static str {
        "LLT"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        tx.start_time = TIMESTAMP.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        // read orec, then value, then orec again
        let o = orec_of(addr as *const ());
        let ivt = o.load(Acquire);
        fence(Acquire);
        let tmp = platform::load_word(addr, Acquire);
        fence(Acquire);
        let ivt2 = o.load(Acquire);

        // too new, or no consistent view: abort
        if unlikely!(ivt > tx.start_time || ivt != ivt2) {
            return Err(self.conflict(tx));
        }

        tx.r_orecs.push(o);
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.writes.is_empty() {
            stats::read_set_size(tx.r_orecs.len());
            tx.r_orecs.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            return Ok(());
        }

        // acquire locks
        if unlikely!(!acquire_write_set(tx)) {
            return Err(self.conflict(tx));
        }

        // increment the global timestamp since we have writes
        let end_time = 1 + TIMESTAMP.fetch_add(1, SeqCst);

        // skip validation if nobody else committed
        if end_time != tx.start_time + 1 && !reads_valid_or_mine(tx, tx.start_time) {
            return Err(self.conflict(tx));
        }

        unsafe { tx.writes.writeback() };

        fence(SeqCst);
        release_locks(tx, end_time);

        stats::read_set_size(tx.r_orecs.len());
        stats::write_set_size(tx.writes.len());
        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.commit();
        tx.allocator.on_tx_commit();
        tx.bump_rw_commit();
        Ok(())
    }

    fn rollback(&self, tx: &mut Descriptor) {
        unsafe {
            tx.writes.rollback_with_protected_range(tx.protected_range);
        }
        release_locks_undo(tx);
        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::metadata::{is_locked, LOCK_BIT};

    #[test]
    fn locked_orec_is_always_too_new() {
        // any start_time fails the `ivt <= start_time` test against a lock word
        assert!(is_locked(LOCK_BIT | 5));
        assert!((LOCK_BIT | 5) > !LOCK_BIT);
    }
}
