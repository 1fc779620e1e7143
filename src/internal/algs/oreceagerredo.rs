//! OrecEagerRedo: encounter-time orec acquisition like OrecEager, but with
//! a redo log and commit-time writeback instead of in-place update, so
//! rollback only has to restore orec versions.

use crate::{
    internal::{
        algs::{
            overlay, reads_valid_or_mine, release_locks, release_locks_undo, Algorithm, TmResult,
        },
        descriptor::Descriptor,
        metadata::{is_locked, orec_of, TIMESTAMP},
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

pub struct OrecEagerRedo;

pub static OREC_EAGER_REDO: OrecEagerRedo = OrecEagerRedo;

impl OrecEagerRedo {
    fn extend(&self, tx: &mut Descriptor, newts: Word) -> TmResult {
        if unlikely!(!reads_valid_or_mine(tx, tx.start_time)) {
            return Err(self.conflict(tx));
        }
        tx.start_time = newts;
        stats::timestamp_extension();
        Ok(())
    }
}

impl Algorithm for OrecEagerRedo {
    fn name(&self) -> &'static str {
        "OrecEagerRedo"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        tx.start_time = TIMESTAMP.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let o = orec_of(addr as *const ());
        loop {
            let tmp = platform::load_word(addr, Acquire);
            fence(Acquire);
            let ivt = o.load(Acquire);

            // common case: new read to an uncontended location
            if likely!(ivt <= tx.start_time) {
                tx.r_orecs.push(o);
                return Ok(tmp);
            }

            // next best: locked by me; serve buffered bytes from the log
            if ivt == tx.my_lock {
                let found = tx.writes.find(addr, mask);
                if let Lookup::Hit(v) = found {
                    return Ok(v);
                }
                return Ok(overlay(found, tmp));
            }

            if unlikely!(is_locked(ivt)) {
                return Err(self.conflict(tx));
            }

            let newts = TIMESTAMP.load(Acquire);
            self.extend(tx, newts)?;
        }
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        // buffer the write
        tx.writes.insert(addr, val, mask);

        // then acquire the orec at encounter time
        let o = orec_of(addr as *const ());
        loop {
            let ivt = o.load(Acquire);

            if likely!(ivt <= tx.start_time) {
                if unlikely!(!o.try_lock(ivt, tx.my_lock)) {
                    return Err(self.conflict(tx));
                }
                tx.locks.push(o);
                return Ok(());
            }

            // already mine
            if ivt == tx.my_lock {
                return Ok(());
            }

            if unlikely!(is_locked(ivt)) {
                return Err(self.conflict(tx));
            }

            let newts = TIMESTAMP.load(Acquire);
            self.extend(tx, newts)?;
        }
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

        // all locks are held already, so validate
        if unlikely!(!reads_valid_or_mine(tx, tx.start_time)) {
            return Err(self.conflict(tx));
        }

        unsafe { tx.writes.writeback() };

        let end_time = 1 + TIMESTAMP.fetch_add(1, SeqCst);
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
