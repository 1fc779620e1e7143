//! OrecALA: OrecLazy plus privatization safety. TL2-style timestamps give
//! ALA publication safety, per-read polling of the commit clock catches
//! doomed transactions, and writers depart commit in clock order through the
//! `last_complete` counter, which closes the deferred-update half of the
//! privatization problem.

use crate::{
    internal::{
        algs::{
            acquire_write_set, overlay, reads_valid, reads_valid_or_mine, release_locks,
            release_locks_undo, Algorithm, Privatization, TmResult,
        },
        descriptor::Descriptor,
        metadata::{orec_of, LAST_COMPLETE, TIMESTAMP},
        platform::{self, spin64, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, Release, SeqCst},
};

pub struct OrecAla;

pub static OREC_ALA: OrecAla = OrecAla;

/// Wait until `end_time - 1` writers have finished their writeback, then
/// publish our own completion.
#[inline]
fn ordered_depart(end_time: Word) {
    while LAST_COMPLETE.load(Acquire) != end_time - 1 {
        spin64();
    }
    LAST_COMPLETE.store(end_time, Release);
}

impl Algorithm for OrecAla {
    fn name(&self) -> &'static str {
        "OrecALA"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        // start after the last cleanup, not the last commit, so begin never
        // waits on an in-flight writeback
        tx.start_time = LAST_COMPLETE.load(Acquire);
        tx.ts_cache = tx.start_time;
        tx.end_time = 0;
        Actions::RUN_INSTRUMENTED
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        // read the location, log the orec
        let tmp = platform::load_word(addr, Acquire);
        let o = orec_of(addr as *const ());
        tx.r_orecs.push(o);
        fence(Acquire);

        // not locked, not too new
        if unlikely!(o.load(Acquire) > tx.start_time) {
            return Err(self.conflict(tx));
        }

        // privatization safety: poll the clock, maybe validate
        let ts = TIMESTAMP.load(Acquire);
        if unlikely!(ts != tx.ts_cache) {
            if !reads_valid(tx, tx.start_time) {
                return Err(self.conflict(tx));
            }
            tx.ts_cache = ts;
        }
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

        if unlikely!(!acquire_write_set(tx)) {
            return Err(self.conflict(tx));
        }
        fence(SeqCst);

        tx.end_time = 1 + TIMESTAMP.fetch_add(1, SeqCst);
        fence(SeqCst);

        // skip validation if nobody committed since my last validation
        if tx.end_time != tx.ts_cache + 1 && !reads_valid_or_mine(tx, tx.start_time) {
            return Err(self.conflict(tx));
        }

        unsafe { tx.writes.writeback() };
        fence(SeqCst);
        let end_time = tx.end_time;
        release_locks(tx, end_time);

        // depart in the order we took clock tickets
        ordered_depart(end_time);
        tx.end_time = 0;

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
        fence(SeqCst);

        // an abort between the clock increment and lock release still owes
        // the system its slot in the cleanup order
        if tx.end_time != 0 {
            while LAST_COMPLETE.load(Acquire) < tx.end_time - 1 {
                spin64();
            }
            LAST_COMPLETE.store(tx.end_time, Release);
            tx.end_time = 0;
        }

        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn on_switch_to(&self) {
        // no writer is mid-commit during a switch, so the trailing counter
        // catches up to the clock
        LAST_COMPLETE.store(TIMESTAMP.load(Acquire), Release);
    }

    fn privatization(&self) -> Privatization {
        Privatization::Ala
    }
}
