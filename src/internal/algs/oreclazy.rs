//! OrecLazy: orecs, commit-time locking, and a redo log, in the style of
//! the "patient" STM. Reads wait out in-flight commits instead of aborting,
//! and scale the start time forward when a location is merely too new.

use crate::{
    internal::{
        algs::{
            acquire_write_set, overlay, reads_valid, reads_valid_or_mine, release_locks,
            release_locks_undo, Algorithm, TmResult,
        },
        cm::ContentionManager,
        descriptor::Descriptor,
        metadata::{is_locked, orec_of, TIMESTAMP},
        platform::{self, spin64, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::marker::PhantomData;
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, SeqCst},
};

pub struct OrecLazy<C> {
    name: &'static str,
    _cm:  PhantomData<fn() -> C>,
}

pub static OREC_LAZY: OrecLazy<crate::internal::cm::HyperAggressive> =
    OrecLazy::with_name("OrecLazy");
pub static OREC_LAZY_BACKOFF: OrecLazy<crate::internal::cm::Backoff> =
    OrecLazy::with_name("OrecLazyBackoff");
pub static OREC_LAZY_HOUR: OrecLazy<crate::internal::cm::Hourglass> =
    OrecLazy::with_name("OrecLazyHour");

impl<C: ContentionManager> OrecLazy<C> {
    pub const fn with_name(name: &'static str) -> Self {
        OrecLazy {
            name,
            _cm: PhantomData,
        }
    }
}

impl<C: ContentionManager> Algorithm for OrecLazy<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        C::on_begin(tx);
        tx.allocator.on_tx_begin();
        tx.start_time = TIMESTAMP.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
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

            // common case: new read to an uncontended, old location
            if likely!(ivt <= tx.start_time) {
                tx.r_orecs.push(o);
                return Ok(overlay(found, tmp));
            }

            // if lock held, spin and retry
            if is_locked(ivt) {
                spin64();
                continue;
            }

            // unlocked but too new: validate and scale the start time
            let newts = TIMESTAMP.load(Acquire);
            if unlikely!(!reads_valid(tx, tx.start_time)) {
                return Err(self.conflict(tx));
            }
            tx.start_time = newts;
            stats::timestamp_extension();
        }
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
            C::on_commit(tx);
            return Ok(());
        }

        if unlikely!(!acquire_write_set(tx)) {
            return Err(self.conflict(tx));
        }

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
        C::on_commit(tx);
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
        C::on_abort(tx);
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }
}
