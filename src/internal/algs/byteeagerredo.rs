//! ByteEagerRedo: ByteEager's visible readers and eager write locks, but
//! with buffered writes instead of in-place update. Rollback discards the
//! redo log (honoring any protected range), so there is no undo traffic at
//! all.

use crate::{
    internal::{
        algs::{
            byteeager::{ACQUIRE_TIMEOUT, DRAIN_TIMEOUT, READ_TIMEOUT},
            overlay, Algorithm, Privatization, TmResult,
        },
        cm::exp_backoff,
        descriptor::Descriptor,
        metadata::{bytelock_of, MAX_THREADS},
        platform::{self, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::sync::atomic::Ordering::{Acquire, Release};

pub struct ByteEagerRedo;

pub static BYTE_EAGER_REDO: ByteEagerRedo = ByteEagerRedo;

impl Algorithm for ByteEagerRedo {
    fn name(&self) -> &'static str {
        "ByteEagerRedo"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // if I hold the write lock, the log may shadow memory
        if lock.owner() == me as u32 + 1 {
            let found = tx.writes.find(addr, mask);
            if let Lookup::Hit(v) = found {
                return Ok(v);
            }
            return Ok(overlay(found, platform::load_word(addr, Acquire)));
        }

        if lock.read_byte(me) {
            return Ok(platform::load_word(addr, Acquire));
        }

        tx.r_bytelocks.push(lock);

        let mut tries = 0;
        loop {
            lock.set_read_byte(me);
            if likely!(lock.owner() == 0) {
                return Ok(platform::load_word(addr, Acquire));
            }

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

        if lock.owner() == me as u32 + 1 {
            tx.writes.insert(addr, val, mask);
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

        tx.w_bytelocks.push(lock);
        lock.clear_read_byte(me);

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

        // buffer the write
        tx.writes.insert(addr, val, mask);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        let read_only = tx.w_bytelocks.is_empty();

        if !read_only {
            // replay the redo log while the write locks are still held
            unsafe { tx.writes.writeback() };
        }

        for lock in tx.w_bytelocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bytelocks.drain(..) {
            lock.clear_read_byte(me);
        }

        stats::write_set_size(tx.writes.len());
        tx.writes.clear();
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
        unsafe {
            tx.writes.rollback_with_protected_range(tx.protected_range);
        }

        for lock in tx.w_bytelocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bytelocks.drain(..) {
            lock.clear_read_byte(me);
        }

        tx.writes.clear();
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
