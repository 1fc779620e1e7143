//! CToken: writers draw a ticket from the clock at their first write and
//! commit strictly in ticket order. Readers validate against the trailing
//! `last_complete` counter, so writebacks become visible in ticket order.
//!
//! A conflict abort does not surrender the ticket: the retry inherits it and
//! must still commit in order, even if it re-executes read-only.

use crate::{
    internal::{
        algs::{overlay, reads_valid, Algorithm, TmResult},
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

pub struct CToken;

pub static CTOKEN: CToken = CToken;

/// Re-validate against `finish_cache` and remember the validation time.
#[inline]
fn validate_to(tx: &mut Descriptor, finish_cache: Word) -> bool {
    if !reads_valid(tx, tx.ts_cache) {
        return false;
    }
    tx.ts_cache = finish_cache;
    true
}

impl Algorithm for CToken {
    fn name(&self) -> &'static str {
        "CToken"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        // the time of the last completed writeback
        tx.ts_cache = LAST_COMPLETE.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        let tmp = platform::load_word(addr, Acquire);
        fence(Acquire);

        let o = orec_of(addr as *const ());
        // abort if this changed since the last time I saw someone finish
        if unlikely!(o.load(Acquire) > tx.ts_cache) {
            return Err(self.conflict(tx));
        }
        tx.r_orecs.push(o);

        let finish = LAST_COMPLETE.load(Acquire);
        if unlikely!(finish > tx.ts_cache) && !validate_to(tx, finish) {
            return Err(self.conflict(tx));
        }
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        if tx.order.is_none() {
            // first write: draw the commit ticket
            tx.order = Some(1 + TIMESTAMP.fetch_add(1, SeqCst));
        }
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        // no ticket means genuinely read-only; a ticket without writes means
        // we aborted after our first write and must still commit in order
        let order = match tx.order {
            None => {
                stats::read_set_size(tx.r_orecs.len());
                tx.r_orecs.clear();
                tx.callbacks.commit();
                tx.allocator.on_tx_commit();
                tx.bump_ro_commit();
                return Ok(());
            }
            Some(order) => order,
        };

        // wait for my turn
        while LAST_COMPLETE.load(Acquire) != order - 1 {
            spin64();
        }

        let finish = LAST_COMPLETE.load(Acquire);
        if finish > tx.ts_cache && !validate_to(tx, finish) {
            return Err(self.conflict(tx));
        }

        // mark every location in the write set, then write back
        if !tx.writes.is_empty() {
            for entry in tx.writes.iter() {
                let o = orec_of(entry.addr() as *const ());
                o.stamp(order);
                fence(Release);
                unsafe { entry.writeback() };
            }
        }

        fence(SeqCst);
        LAST_COMPLETE.store(order, Release);
        tx.order = None;

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
        // NB: the ticket survives the abort; the retry commits in order
        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn on_cancel(&self, tx: &mut Descriptor) {
        // a cancelled ticket holder retires its slot vacuously; nothing was
        // written back, so completing the order is safe
        if let Some(order) = tx.order.take() {
            while LAST_COMPLETE.load(Acquire) != order - 1 {
                spin64();
            }
            LAST_COMPLETE.store(order, Release);
        }
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn on_switch_to(&self) {
        LAST_COMPLETE.store(TIMESTAMP.load(Acquire), Release);
    }
}
