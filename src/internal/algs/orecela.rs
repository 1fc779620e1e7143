//! OrecELA: like OrecALA, but with TinySTM-style extendable timestamps
//! instead of TL2-style ones, trading some publication safety for fewer
//! aborts. The start time can never scale past `last_complete`, or reads
//! would need prevalidation again.

use crate::{
    internal::{
        algs::{
            acquire_write_set, overlay, reads_valid, reads_valid_or_mine, release_locks,
            release_locks_undo, Algorithm, Privatization, TmResult,
        },
        descriptor::Descriptor,
        metadata::{is_locked, orec_of, LAST_COMPLETE, TIMESTAMP},
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

pub struct OrecEla;

pub static OREC_ELA: OrecEla = OrecEla;

impl OrecEla {
    /// Validate, then scale the start time forward, capped by
    /// `last_complete`.
    fn extend(&self, tx: &mut Descriptor, ts: Word) -> TmResult {
        if unlikely!(!reads_valid(tx, tx.start_time)) {
            return Err(self.conflict(tx));
        }
        fence(Acquire);
        let cs = LAST_COMPLETE.load(Acquire);
        tx.start_time = ts.min(cs);
        stats::timestamp_extension();
        Ok(())
    }
}

impl Algorithm for OrecEla {
    fn name(&self) -> &'static str {
        "OrecELA"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        tx.start_time = LAST_COMPLETE.load(Acquire);
        tx.end_time = 0;
        Actions::RUN_INSTRUMENTED
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        let o = orec_of(addr as *const ());
        loop {
            let tmp = platform::load_word(addr, Acquire);
            fence(Acquire);
            let ivt = o.load(Acquire);

            // common case: new read to an uncontended location. No
            // prevalidation needed; `last_complete` gives a globally clean
            // state.
            if likely!(ivt <= tx.start_time) {
                tx.r_orecs.push(o);
                // privatization safety: poll the clock and validate whenever
                // somebody has committed, to catch doomed transactions
                let ts = TIMESTAMP.load(Acquire);
                fence(Acquire);
                if unlikely!(ts != tx.start_time) {
                    self.extend(tx, ts)?;
                }
                return Ok(overlay(found, tmp));
            }

            // if lock held, spin and retry
            if is_locked(ivt) {
                spin64();
                continue;
            }

            // unlocked but too new: validate and scale forward
            let newts = TIMESTAMP.load(Acquire);
            self.extend(tx, newts)?;
        }
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        fence(Acquire);
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

        if tx.end_time != tx.start_time + 1 && !reads_valid_or_mine(tx, tx.start_time) {
            return Err(self.conflict(tx));
        }

        unsafe { tx.writes.writeback() };
        fence(SeqCst);
        let end_time = tx.end_time;
        release_locks(tx, end_time);

        // depart in ticket order to close the deferred-update race
        while LAST_COMPLETE.load(Acquire) != end_time - 1 {
            spin64();
        }
        LAST_COMPLETE.store(end_time, Release);
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
        LAST_COMPLETE.store(TIMESTAMP.load(Acquire), Release);
    }

    fn privatization(&self) -> Privatization {
        Privatization::Ela
    }
}
