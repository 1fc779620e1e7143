//! OrecEager: orecs, encounter-time locking, in-place update, and an undo
//! log, in the LSA/TinySTM family. The abort path releases each orec at one
//! past its saved version and drags the global clock forward if needed,
//! preserving the invariant that the clock dominates every unlocked orec.

use crate::{
    internal::{
        algs::{reads_valid_or_mine, Algorithm, TmResult},
        cm::ContentionManager,
        descriptor::Descriptor,
        metadata::{is_locked, orec_of, TIMESTAMP},
        platform::{self, Mask, Word},
        stats,
    },
    tx::Actions,
};
use core::marker::PhantomData;
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, Relaxed, Release, SeqCst},
};

pub struct OrecEager<C> {
    name: &'static str,
    _cm:  PhantomData<fn() -> C>,
}

pub static OREC_EAGER: OrecEager<crate::internal::cm::HyperAggressive> =
    OrecEager::with_name("OrecEager");
pub static OREC_EAGER_BACKOFF: OrecEager<crate::internal::cm::Backoff> =
    OrecEager::with_name("OrecEagerBackoff");
pub static OREC_EAGER_HOUR: OrecEager<crate::internal::cm::Hourglass> =
    OrecEager::with_name("OrecEagerHour");

impl<C: ContentionManager> OrecEager<C> {
    pub const fn with_name(name: &'static str) -> Self {
        OrecEager {
            name,
            _cm: PhantomData,
        }
    }

    /// Validate, then scale the start time to `newts`.
    fn extend(&self, tx: &mut Descriptor, newts: Word) -> TmResult {
        if unlikely!(!reads_valid_or_mine(tx, tx.start_time)) {
            return Err(self.conflict(tx));
        }
        tx.start_time = newts;
        stats::timestamp_extension();
        Ok(())
    }
}

impl<C: ContentionManager> Algorithm for OrecEager<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        C::on_begin(tx);
        tx.allocator.on_tx_begin();
        tx.start_time = TIMESTAMP.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        let o = orec_of(addr as *const ());
        loop {
            // read the orec BEFORE reading anything else
            let ivt = o.load(Acquire);
            fence(Acquire);
            let tmp = platform::load_word(addr, Acquire);

            // best case: I locked it already; writes are in place
            if ivt == tx.my_lock {
                return Ok(tmp);
            }

            // re-read the orec AFTER reading the value
            fence(Acquire);
            let ivt2 = o.load(Acquire);

            // common case: a new read to an unlocked, old location
            if likely!(ivt == ivt2 && ivt <= tx.start_time) {
                tx.r_orecs.push(o);
                return Ok(tmp);
            }

            // abort if locked by another thread
            if unlikely!(is_locked(ivt)) {
                return Err(self.conflict(tx));
            }

            // unlocked but too new: scale the timestamp and try again
            let newts = TIMESTAMP.load(Acquire);
            self.extend(tx, newts)?;
        }
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        let o = orec_of(addr as *const ());
        loop {
            let ivt = o.load(Acquire);

            // common case: uncontended location... lock it, or abort on fail
            if likely!(ivt <= tx.start_time) {
                if unlikely!(!o.try_lock(ivt, tx.my_lock)) {
                    return Err(self.conflict(tx));
                }
                tx.locks.push(o);
                tx.undo_log
                    .log(addr, platform::load_word(addr, Relaxed), mask);
                platform::store_word_masked(addr, val, mask, Release);
                return Ok(());
            }

            // next best: I already hold the lock. Undo-log anyway; many
            // locations hash to the same orec, so the lock does not mean
            // *this* word was logged.
            if ivt == tx.my_lock {
                tx.undo_log
                    .log(addr, platform::load_word(addr, Relaxed), mask);
                platform::store_word_masked(addr, val, mask, Release);
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
        // the lock set identifies read-only transactions
        if tx.locks.is_empty() {
            stats::read_set_size(tx.r_orecs.len());
            tx.r_orecs.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            C::on_commit(tx);
            return Ok(());
        }

        let end_time = 1 + TIMESTAMP.fetch_add(1, SeqCst);

        // skip validation if nobody else committed since my last validation
        if end_time != tx.start_time + 1 && !reads_valid_or_mine(tx, tx.start_time) {
            return Err(self.conflict(tx));
        }

        for o in tx.locks.drain(..) {
            o.release(end_time);
        }

        stats::read_set_size(tx.r_orecs.len());
        stats::undo_log_size(tx.undo_log.len());
        tx.r_orecs.clear();
        tx.undo_log.clear();
        tx.callbacks.commit();
        tx.allocator.on_tx_commit();
        tx.bump_rw_commit();
        C::on_commit(tx);
        Ok(())
    }

    fn rollback(&self, tx: &mut Descriptor) {
        // run the undo log
        unsafe { tx.undo_log.undo(tx.protected_range) };
        fence(Release);

        // release the locks at one past their saved versions, tracking the
        // highest version written
        let mut max = 0;
        for o in tx.locks.drain(..) {
            let newver = o.prev() + 1;
            o.release(newver);
            max = max.max(newver);
        }
        // the clock must stay >= every unlocked orec; transient CAS failure
        // is tolerated because someone else moved the clock past us
        let ts = TIMESTAMP.load(Relaxed);
        if max > ts {
            let _ = TIMESTAMP.compare_exchange(ts, ts + 1, SeqCst, Relaxed);
        }

        tx.r_orecs.clear();
        tx.undo_log.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
        C::on_abort(tx);
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }
}
