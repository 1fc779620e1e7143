//! CTokenTurbo: CToken, plus an aggressive check for whether this thread has
//! become the oldest ticket holder. The oldest writer switches to an
//! irrevocable "turbo" mode with in-place writes and no further validation.
//!
//! A turbo transaction cannot self-abort; attempting to is a fatal error.

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

pub struct CTokenTurbo;

pub static CTOKEN_TURBO: CTokenTurbo = CTokenTurbo;

impl CTokenTurbo {
    /// Validate against `finish_cache`; if this thread is now the oldest
    /// ticket holder and has writes, flush them in place and go turbo.
    fn validate_and_maybe_turbo(&self, tx: &mut Descriptor, finish_cache: Word) -> bool {
        if !reads_valid(tx, tx.ts_cache) {
            return false;
        }
        tx.ts_cache = finish_cache;

        if tx.order == Some(tx.ts_cache + 1) && !tx.writes.is_empty() {
            let order = tx.order.unwrap();
            for entry in tx.writes.iter() {
                let o = orec_of(entry.addr() as *const ());
                o.stamp(order);
                fence(Release);
                unsafe { entry.writeback() };
            }
            tx.turbo = true;
            stats::turbo_entry();
        }
        true
    }
}

impl Algorithm for CTokenTurbo {
    fn name(&self) -> &'static str {
        "CTokenTurbo"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        tx.ts_cache = LAST_COMPLETE.load(Acquire);

        // a writer that aborted after taking its ticket may already be the
        // oldest; if so it restarts in turbo mode
        if tx.order == Some(tx.ts_cache + 1) {
            tx.turbo = true;
            stats::turbo_entry();
        }
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        if tx.turbo {
            fence(Acquire);
            return Ok(platform::load_word(addr, Acquire));
        }

        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }

        let tmp = platform::load_word(addr, Acquire);
        fence(Acquire);

        let o = orec_of(addr as *const ());
        if unlikely!(o.load(Acquire) > tx.ts_cache) {
            return Err(self.conflict(tx));
        }
        tx.r_orecs.push(o);

        let finish = LAST_COMPLETE.load(Acquire);
        if unlikely!(finish > tx.ts_cache) && !self.validate_and_maybe_turbo(tx, finish) {
            return Err(self.conflict(tx));
        }
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        if tx.turbo {
            // mark the orec, then update the location
            let o = orec_of(addr as *const ());
            o.stamp(tx.order.expect("turbo transaction without an order"));
            fence(Release);
            platform::store_word_masked(addr, val, mask, Release);
            return Ok(());
        }

        if tx.order.is_none() {
            // no writes yet: draw the ticket, buffer, and test for turbo.
            // Only the first write tests; until now we had no order, so we
            // were not allowed to go turbo.
            tx.order = Some(1 + TIMESTAMP.fetch_add(1, SeqCst));
            tx.writes.insert(addr, val, mask);
            let finish = LAST_COMPLETE.load(Acquire);
            if !self.validate_and_maybe_turbo(tx, finish) {
                return Err(self.conflict(tx));
            }
            return Ok(());
        }

        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.turbo {
            fence(SeqCst);
            LAST_COMPLETE.store(tx.order.take().expect("turbo without order"), Release);
            tx.turbo = false;

            stats::read_set_size(tx.r_orecs.len());
            stats::write_set_size(tx.writes.len());
            tx.r_orecs.clear();
            tx.writes.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_rw_commit();
            return Ok(());
        }

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

        while LAST_COMPLETE.load(Acquire) != order - 1 {
            spin64();
        }

        if !reads_valid(tx, tx.ts_cache) {
            return Err(self.conflict(tx));
        }

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
        assert!(
            !tx.turbo,
            "attempt to abort a turbo-mode transaction; turbo writers are irrevocable"
        );
        unsafe {
            tx.writes.rollback_with_protected_range(tx.protected_range);
        }
        // the ticket survives; the retry must still commit in order
        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn on_cancel(&self, tx: &mut Descriptor) {
        if let Some(order) = tx.order.take() {
            while LAST_COMPLETE.load(Acquire) != order - 1 {
                spin64();
            }
            LAST_COMPLETE.store(order, Release);
        }
    }

    fn is_irrevocable(&self, tx: &Descriptor) -> bool {
        tx.turbo
    }

    fn supports_adaptivity(&self) -> bool {
        false
    }

    fn on_switch_to(&self) {
        LAST_COMPLETE.store(TIMESTAMP.load(Acquire), Release);
    }
}
