//! ByteEager: the TLRW-style runtime. Every stripe carries a visible
//! per-thread read byte and a single owner slot; locks are acquired eagerly,
//! updates go in place under an undo log, and every wait loop is bounded by
//! a timeout that converts deadlock into a conflict.

use crate::{
    internal::{
        algs::{Algorithm, Privatization, TmResult},
        cm::exp_backoff,
        descriptor::Descriptor,
        metadata::{bytelock_of, MAX_THREADS},
        platform::{self, Mask, Word},
        stats,
    },
    tx::Actions,
};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

/// Spin bounds for the three wait loops.
pub(super) const READ_TIMEOUT: u32 = 1024;
pub(super) const ACQUIRE_TIMEOUT: u32 = 1024;
pub(super) const DRAIN_TIMEOUT: u32 = 4096;

pub struct ByteEager;

pub static BYTE_EAGER: ByteEager = ByteEager;

impl Algorithm for ByteEager {
    fn name(&self) -> &'static str {
        "ByteEager"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // do I have the write lock?
        if lock.owner() == me as u32 + 1 {
            return Ok(platform::load_word(addr, Acquire));
        }

        // do I have a read lock?
        if lock.read_byte(me) {
            return Ok(platform::load_word(addr, Acquire));
        }

        // log this location
        tx.r_bytelocks.push(lock);

        // now try to get a read lock
        let mut tries = 0;
        loop {
            // mark my reader byte
            lock.set_read_byte(me);

            // if nobody has the write lock, we're done
            if likely!(lock.owner() == 0) {
                return Ok(platform::load_word(addr, Acquire));
            }

            // drop the read lock, wait (with timeout) for release
            lock.clear_read_byte(me);
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
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // if I already have the write lock, log and write
        if lock.owner() == me as u32 + 1 {
            tx.undo_log
                .log(addr, platform::load_word(addr, Relaxed), mask);
            platform::store_word_masked(addr, val, mask, Release);
            return Ok(());
        }

        // get the write lock, with timeout
        let mut tries = 0;
        while !lock.try_claim(me) {
            tries += 1;
            if unlikely!(tries > ACQUIRE_TIMEOUT) {
                stats::timeout_conflict();
                return Err(self.conflict(tx));
            }
        }

        // log the lock, drop any read lock I have
        tx.w_bytelocks.push(lock);
        lock.clear_read_byte(me);

        // wait (with timeout) for readers to drain out
        for reader in 0..MAX_THREADS {
            if reader == me {
                continue;
            }
            tries = 0;
            while lock.read_byte(reader) {
                tries += 1;
                if unlikely!(tries > DRAIN_TIMEOUT) {
                    stats::timeout_conflict();
                    return Err(self.conflict(tx));
                }
            }
        }

        // add to undo log, do in-place write
        tx.undo_log
            .log(addr, platform::load_word(addr, Relaxed), mask);
        platform::store_word_masked(addr, val, mask, Release);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        let read_only = tx.w_bytelocks.is_empty();

        // release write locks, then read locks
        for lock in tx.w_bytelocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bytelocks.drain(..) {
            lock.clear_read_byte(me);
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

        for lock in tx.w_bytelocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bytelocks.drain(..) {
            lock.clear_read_byte(me);
        }

        tx.undo_log.clear();
        tx.callbacks.rollback();
        tx.allocator.on_tx_abort();
        tx.bump_abort();

        // randomized exponential backoff
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
