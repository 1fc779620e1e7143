//! BitEager: ByteEager with one reader bit per thread instead of one byte.
//! The whole reader vector fits in a word, so the writer's drain loop is a
//! single load instead of a walk over sixty bytes.

use crate::{
    internal::{
        algs::{
            byteeager::{ACQUIRE_TIMEOUT, DRAIN_TIMEOUT, READ_TIMEOUT},
            Algorithm, Privatization, TmResult,
        },
        cm::exp_backoff,
        descriptor::Descriptor,
        metadata::bitlock_of,
        platform::{self, Mask, Word},
        stats,
    },
    tx::Actions,
};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

pub struct BitEager;

pub static BIT_EAGER: BitEager = BitEager;

impl Algorithm for BitEager {
    fn name(&self) -> &'static str {
        "BitEager"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        let lock = bitlock_of(addr as *const ());
        let me = tx.id;

        if lock.owner() == me as u32 + 1 {
            return Ok(platform::load_word(addr, Acquire));
        }

        if lock.read_bit(me) {
            return Ok(platform::load_word(addr, Acquire));
        }

        tx.r_bitlocks.push(lock);

        let mut tries = 0;
        loop {
            lock.set_read_bit(me);

            if likely!(lock.owner() == 0) {
                return Ok(platform::load_word(addr, Acquire));
            }

            lock.clear_read_bit(me);
            while lock.owner() != 0 {
                tries += 1;
                if unlikely!(tries > READ_TIMEOUT) {
                    stats::timeout_conflict();
                    return Err(self.conflict(tx));
                }
            }
        }
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        let lock = bitlock_of(addr as *const ());
        let me = tx.id;

        if lock.owner() == me as u32 + 1 {
            tx.undo_log
                .log(addr, platform::load_word(addr, Relaxed), mask);
            platform::store_word_masked(addr, val, mask, Release);
            return Ok(());
        }

        let mut tries = 0;
        while !lock.try_claim(me) {
            tries += 1;
            if unlikely!(tries > ACQUIRE_TIMEOUT) {
                stats::timeout_conflict();
                return Err(self.conflict(tx));
            }
        }

        tx.w_bitlocks.push(lock);
        lock.clear_read_bit(me);

        // the whole reader vector drains in one load
        tries = 0;
        while lock.has_other_readers(me) {
            tries += 1;
            if unlikely!(tries > DRAIN_TIMEOUT) {
                stats::timeout_conflict();
                return Err(self.conflict(tx));
            }
        }

        tx.undo_log
            .log(addr, platform::load_word(addr, Relaxed), mask);
        platform::store_word_masked(addr, val, mask, Release);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        let read_only = tx.w_bitlocks.is_empty();

        for lock in tx.w_bitlocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bitlocks.drain(..) {
            lock.clear_read_bit(me);
        }

        stats::undo_log_size(tx.undo_log.len());
        tx.undo_log.clear();
        tx.callbacks.commit();
        tx.allocator.on_tx_commit();
        if read_only {
            tx.bump_ro_commit();
        } else {
            tx.bump_rw_commit();
        }
        tx.consec_aborts = 0;
        Ok(())
    }

    fn rollback(&self, tx: &mut Descriptor) {
        unsafe { tx.undo_log.undo(tx.protected_range) };

        for lock in tx.w_bitlocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bitlocks.drain(..) {
            lock.clear_read_bit(me);
        }

        tx.undo_log.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();

        tx.consec_aborts += 1;
        exp_backoff(tx);
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn privatization(&self) -> Privatization {
        Privatization::Strong
    }
}
