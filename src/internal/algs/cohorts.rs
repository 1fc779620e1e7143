//! Cohorts: transactions run in groups. Nobody starts while a group is
//! committing, and everybody in a group finishes running before the first
//! member commits, so execution never overlaps writeback. Members commit in
//! the order they announced readiness.

use crate::{
    internal::{
        algs::{overlay, Algorithm, TmResult},
        descriptor::Descriptor,
        metadata::{orec_of, COMMITTED, CPENDING, LAST_COMPLETE, LAST_ORDER, STARTED},
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

pub struct Cohorts;

pub static COHORTS: Cohorts = Cohorts;

/// Block until no cohort is mid-commit, then join the running cohort.
#[inline]
pub(super) fn join_cohort() {
    loop {
        // wait until everyone is committed
        while CPENDING.load(Acquire) != COMMITTED.load(Acquire) {
            spin64();
        }
        let _ = STARTED.fetch_add(1, SeqCst);
        // recheck; a writer may have reached its commit point in between
        if likely!(CPENDING.load(Acquire) == COMMITTED.load(Acquire)) {
            return;
        }
        let _ = STARTED.fetch_sub(1, SeqCst);
    }
}

/// Validation for cohort members: reads must predate the cohort.
#[inline]
pub(super) fn cohort_reads_valid(tx: &Descriptor) -> bool {
    for o in &tx.r_orecs {
        if unlikely!(o.load(Acquire) > tx.ts_cache) {
            return false;
        }
    }
    true
}

impl Algorithm for Cohorts {
    fn name(&self) -> &'static str {
        "Cohorts"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        join_cohort();
        tx.allocator.on_tx_begin();
        tx.ts_cache = LAST_COMPLETE.load(Acquire);
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let found = tx.writes.find(addr, mask);
        if let Lookup::Hit(v) = found {
            return Ok(v);
        }
        // no in-flight validation: writebacks cannot start while this
        // transaction is still running
        let tmp = platform::load_word(addr, Acquire);
        tx.r_orecs.push(orec_of(addr as *const ()));
        Ok(overlay(found, tmp))
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.writes.is_empty() {
            // leave the cohort
            let _ = STARTED.fetch_sub(1, SeqCst);
            stats::read_set_size(tx.r_orecs.len());
            tx.r_orecs.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            return Ok(());
        }

        // announce readiness; the counter value is the commit order
        let order = CPENDING.fetch_add(1, SeqCst) + 1;
        tx.order = Some(order);

        // wait for my turn
        while LAST_COMPLETE.load(Acquire) != order - 1 {
            spin64();
        }

        // the first member of a cohort to commit skips validation
        if order != LAST_ORDER.load(Acquire) && !cohort_reads_valid(tx) {
            return Err(self.conflict(tx));
        }

        // mark the orecs
        for entry in tx.writes.iter() {
            orec_of(entry.addr() as *const ()).stamp(order);
        }

        // wait until the whole cohort is ready to commit
        while CPENDING.load(Acquire) < STARTED.load(Acquire) {
            spin64();
        }

        unsafe { tx.writes.writeback() };
        fence(SeqCst);

        LAST_ORDER.store(STARTED.load(Acquire) + 1, Release);
        LAST_COMPLETE.store(order, Release);
        let _ = COMMITTED.fetch_add(1, SeqCst);
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
        // a ready-to-commit aborter completes its slot vacuously so the rest
        // of the cohort is not stuck behind it
        if let Some(order) = tx.order.take() {
            LAST_COMPLETE.store(order, Release);
            let _ = COMMITTED.fetch_add(1, SeqCst);
        }
        // leave the cohort
        let _ = STARTED.fetch_sub(1, SeqCst);

        tx.r_orecs.clear();
        tx.writes.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    /// The cohort counters and orec stamps are not expressed in commit-clock
    /// time, so live switching in or out is not supported.
    fn supports_adaptivity(&self) -> bool {
        false
    }
}
