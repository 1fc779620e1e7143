//! CohortsEager: Cohorts, with one optimization. When a writer discovers
//! that every other member of its cohort is already waiting to commit, it is
//! the cohort's last runner, so it skips the redo log and writes in place
//! under the `INPLACE` flag. Everyone else then validates against its
//! stamps.

use crate::{
    internal::{
        algs::{
            cohorts::{cohort_reads_valid, join_cohort},
            overlay, Algorithm, TmResult,
        },
        descriptor::Descriptor,
        metadata::{orec_of, COMMITTED, CPENDING, INPLACE, LAST_COMPLETE, LAST_ORDER, STARTED},
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

pub struct CohortsEager;

pub static COHORTS_EAGER: CohortsEager = CohortsEager;

impl Algorithm for CohortsEager {
    fn name(&self) -> &'static str {
        "CohortsEager"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        loop {
            join_cohort();
            // an in-place writer counts as a cohort that is still committing
            if likely!(INPLACE.load(Acquire) == 0) {
                break;
            }
            let _ = STARTED.fetch_sub(1, SeqCst);
        }
        tx.allocator.on_tx_begin();
        tx.ts_cache = LAST_COMPLETE.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        if tx.turbo {
            return Ok(platform::load_word(addr, Acquire));
        }

        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }
        let tmp = platform::load_word(addr, Acquire);
        tx.r_orecs.push(orec_of(addr as *const ()));
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        if tx.turbo {
            let o = orec_of(addr as *const ());
            o.stamp(STARTED.load(Acquire));
            platform::store_word_masked(addr, val, mask, Release);
            return Ok(());
        }

        if tx.writes.is_empty() {
            // first write: if everyone else in the cohort is already waiting
            // to commit, this transaction is the last runner and may elide
            // the redo log entirely
            if CPENDING.load(Acquire) + 1 == STARTED.load(Acquire) {
                INPLACE.store(1, SeqCst);
                fence(SeqCst);
                // the double check is necessary; a member may have started
                // between the test and the flag
                if CPENDING.load(Acquire) + 1 == STARTED.load(Acquire) {
                    let o = orec_of(addr as *const ());
                    o.stamp(STARTED.load(Acquire));
                    platform::store_word_masked(addr, val, mask, Release);
                    tx.turbo = true;
                    stats::turbo_entry();
                    return Ok(());
                }
                INPLACE.store(0, Release);
            }
        }

        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.turbo {
            // cpending counts us; its new value is our order
            let order = CPENDING.fetch_add(1, SeqCst) + 1;

            stats::read_set_size(tx.r_orecs.len());
            tx.r_orecs.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_rw_commit();

            while LAST_COMPLETE.load(Acquire) != order - 1 {
                spin64();
            }
            INPLACE.store(0, Release);
            LAST_COMPLETE.store(order, Release);
            let _ = COMMITTED.fetch_add(1, SeqCst);
            tx.turbo = false;
            return Ok(());
        }

        if tx.writes.is_empty() {
            let _ = STARTED.fetch_sub(1, SeqCst);
            stats::read_set_size(tx.r_orecs.len());
            tx.r_orecs.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            return Ok(());
        }

        let order = CPENDING.fetch_add(1, SeqCst) + 1;
        tx.order = Some(order);

        while LAST_COMPLETE.load(Acquire) != order - 1 {
            spin64();
        }

        // wait until the whole cohort is ready
        while CPENDING.load(Acquire) < STARTED.load(Acquire) {
            spin64();
        }

        // if an in-place writer ran, everyone validates; otherwise only the
        // first committer of the cohort is exempt
        if (INPLACE.load(Acquire) == 1 || order != LAST_ORDER.load(Acquire))
            && !cohort_reads_valid(tx)
        {
            return Err(self.conflict(tx));
        }

        for entry in tx.writes.iter() {
            let o = orec_of(entry.addr() as *const ());
            o.stamp(order);
            unsafe { entry.writeback() };
        }
        fence(SeqCst);

        let _ = COMMITTED.fetch_add(1, SeqCst);
        LAST_ORDER.store(STARTED.load(Acquire) + 1, Release);
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
            "attempt to abort an in-place cohort writer; it is irrevocable"
        );
        unsafe {
            tx.writes.rollback_with_protected_range(tx.protected_range);
        }
        if let Some(order) = tx.order.take() {
            LAST_COMPLETE.store(order, Release);
            let _ = COMMITTED.fetch_add(1, SeqCst);
        }
        let _ = STARTED.fetch_sub(1, SeqCst);

        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn is_irrevocable(&self, tx: &Descriptor) -> bool {
        tx.turbo
    }

    fn supports_adaptivity(&self) -> bool {
        false
    }
}
