//! NOrec: one global sequence lock plus value-based validation. No
//! ownership records at all; a transaction is valid while every value it
//! has read is still in memory. Offers ALA publication safety.

use crate::{
    internal::{
        algs::{overlay, Algorithm, Privatization, TmResult},
        cm::ContentionManager,
        descriptor::Descriptor,
        metadata::TIMESTAMP,
        platform::{self, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::marker::PhantomData;
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, Relaxed, Release, SeqCst},
};

pub struct NOrec<C> {
    name: &'static str,
    _cm:  PhantomData<fn() -> C>,
}

pub static NOREC: NOrec<crate::internal::cm::HyperAggressive> = NOrec::with_name("NOrec");
pub static NOREC_BACKOFF: NOrec<crate::internal::cm::Backoff> = NOrec::with_name("NOrecBackoff");
pub static NOREC_HOUR: NOrec<crate::internal::cm::Hourglass> = NOrec::with_name("NOrecHour");

impl<C: ContentionManager> NOrec<C> {
    pub const fn with_name(name: &'static str) -> Self {
        NOrec {
            name,
            _cm: PhantomData,
        }
    }

    /// Spins until the sequence lock is even and the whole value list checks
    /// out, then returns the post-validation timestamp.
    unsafe fn validate(&self, tx: &mut Descriptor) -> TmResult<Word> {
        loop {
            let s = TIMESTAMP.load(Acquire);
            if unlikely!(s & 1 == 1) {
                continue;
            }
            fence(Acquire);
            if !tx.vlist.still_valid() {
                return Err(self.conflict(tx));
            }
            fence(Acquire);
            if likely!(TIMESTAMP.load(Acquire) == s) {
                return Ok(s);
            }
        }
    }
}

impl<C: ContentionManager> Algorithm for NOrec<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        C::on_begin(tx);
        // sample the sequence lock, rounding down if odd; the first read
        // will catch the in-flight writer
        tx.start_time = TIMESTAMP.load(Acquire) & !1;
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        // RAW check first
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        // a read is valid iff it happens while the seqlock is even and
        // unchanged since start_time
        let mut tmp = platform::load_word(addr, Acquire);
        fence(Acquire);
        while unlikely!(tx.start_time != TIMESTAMP.load(Acquire)) {
            tx.start_time = self.validate(tx)?;
            tmp = platform::load_word(addr, Acquire);
            fence(Acquire);
        }

        tx.vlist.log(addr, tmp, mask);
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.writes.is_empty() {
            stats::value_log_size(tx.vlist.len());
            tx.vlist.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            C::on_commit(tx);
            return Ok(());
        }

        // grab the sequence lock from a valid state
        while TIMESTAMP
            .compare_exchange(tx.start_time, tx.start_time + 1, SeqCst, Relaxed)
            .is_err()
        {
            tx.start_time = unsafe { self.validate(tx)? };
        }

        unsafe { tx.writes.writeback() };

        // release the sequence lock, then clean up
        TIMESTAMP.store(tx.start_time + 2, Release);
        stats::write_set_size(tx.writes.len());
        stats::value_log_size(tx.vlist.len());
        tx.vlist.clear();
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
        tx.vlist.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
        C::on_abort(tx);
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn on_switch_to(&self) {
        // every begin rounds down to even, so only an odd lock left behind
        // by a dying writer needs repair
        if TIMESTAMP.load(Relaxed) & 1 == 1 {
            let _ = TIMESTAMP.fetch_add(1, SeqCst);
        }
    }

    fn privatization(&self) -> Privatization {
        Privatization::Ala
    }
}
