//! TML: a single sequence lock shared by all transactions. Readers validate
//! the lock on every read; the first write upgrades the transaction to the
//! sole irrevocable writer by making the lock odd.

use crate::{
    internal::{
        algs::{Algorithm, Privatization, TmResult},
        descriptor::Descriptor,
        metadata::TIMESTAMP,
        platform::{self, spin64, Mask, Word},
    },
    tx::Actions,
};
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, Relaxed, Release, SeqCst},
};

pub struct Tml;

pub static TML: Tml = Tml;

impl Algorithm for Tml {
    fn name(&self) -> &'static str {
        "TML"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        // sample the sequence lock until it is even (unheld)
        loop {
            tx.start_time = TIMESTAMP.load(Acquire);
            if likely!(tx.start_time & 1 == 0) {
                break;
            }
            spin64();
        }
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        let val = platform::load_word(addr, Acquire);
        if tx.turbo {
            return Ok(val);
        }
        // the value load must settle before the sequence lock is sampled
        fence(Acquire);
        if unlikely!(TIMESTAMP.load(Acquire) != tx.start_time) {
            return Err(self.conflict(tx));
        }
        Ok(val)
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        if likely!(tx.turbo) {
            platform::store_word_masked(addr, val, mask, Release);
            return Ok(());
        }
        // become the writer, or fail trying
        if TIMESTAMP
            .compare_exchange(tx.start_time, tx.start_time + 1, SeqCst, Relaxed)
            .is_err()
        {
            return Err(self.conflict(tx));
        }
        tx.turbo = true;
        platform::store_word_masked(addr, val, mask, Release);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.turbo {
            TIMESTAMP.store(tx.start_time + 2, Release);
            tx.turbo = false;
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_rw_commit();
        } else {
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
        }
        Ok(())
    }

    fn rollback(&self, tx: &mut Descriptor) {
        assert!(
            !tx.turbo,
            "the TML writer is irrevocable and cannot roll back"
        );
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();
    }

    fn is_irrevocable(&self, tx: &Descriptor) -> bool {
        tx.turbo
    }

    fn on_switch_to(&self) {
        // the sequence lock must be even or every begin will block
        if TIMESTAMP.load(Relaxed) & 1 == 1 {
            let _ = TIMESTAMP.fetch_add(1, SeqCst);
        }
    }

    fn privatization(&self) -> Privatization {
        Privatization::Ala
    }
}
