//! ByEAR: bytelocks with buffered writes and requestor-wins conflict
//! resolution. Instead of waiting for a conflicting thread, a transaction
//! CASes the other thread's liveness word to ABORTED; every potentially
//! conflicting step is followed by a check of our own liveness word.

use crate::{
    internal::{
        algs::{overlay, Algorithm, Privatization, TmResult},
        descriptor::{shared_of, Descriptor, TX_ABORTED, TX_ACTIVE, TX_COMMITTED},
        metadata::{bytelock_of, Bytelock, MAX_THREADS},
        platform::{self, Mask, Word},
        stats,
        write_set::Lookup,
    },
    tx::Actions,
};
use core::sync::atomic::{
    fence,
    Ordering::{Acquire, Release},
};

pub struct ByEar;

pub static BYEAR: ByEar = ByEar;

/// True once the calling transaction has been aborted remotely.
#[inline]
fn killed(tx: &Descriptor) -> bool {
    tx.shared().alive() == TX_ABORTED
}

impl ByEar {
    /// Handle a stripe with an owner: abort it if it is active, abort
    /// ourselves if it is already writing back, read through if it is
    /// unwinding (its writes are buffered, so memory is clean).
    fn resolve_owner(&self, tx: &mut Descriptor, owner: u32) -> TmResult {
        match shared_of(owner as usize - 1).alive() {
            TX_COMMITTED => Err(self.conflict(tx)),
            TX_ACTIVE => {
                if shared_of(owner as usize - 1).try_transition(TX_ACTIVE, TX_ABORTED) {
                    stats::remote_kill();
                    Ok(())
                } else {
                    Err(self.conflict(tx))
                }
            }
            _ => Ok(()),
        }
    }

    /// Abort the current owner (with liveness checks) and claim the stripe.
    fn claim_stripe(&self, tx: &mut Descriptor, lock: &'static Bytelock) -> TmResult {
        loop {
            let owner = lock.owner();
            if owner != 0 {
                let _ = shared_of(owner as usize - 1).try_transition(TX_ACTIVE, TX_ABORTED);
            } else if lock.try_claim(tx.id) {
                return Ok(());
            }
            if unlikely!(killed(tx)) {
                return Err(self.conflict(tx));
            }
        }
    }

    /// Abort every active reader of the stripe other than ourselves.
    fn clear_readers(&self, tx: &mut Descriptor, lock: &'static Bytelock) -> TmResult {
        for reader in 0..MAX_THREADS {
            if reader == tx.id || !lock.read_byte(reader) {
                continue;
            }
            // CAS, not a plain store: marking a committing transaction
            // aborted would let its writeback race with our readers
            if shared_of(reader).alive() == TX_ACTIVE {
                if shared_of(reader).try_transition(TX_ACTIVE, TX_ABORTED) {
                    stats::remote_kill();
                } else {
                    return Err(self.conflict(tx));
                }
            }
        }
        Ok(())
    }
}

impl Algorithm for ByEar {
    fn name(&self) -> &'static str {
        "ByEAR"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        tx.shared().set_alive(TX_ACTIVE);
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word> {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // skip instrumentation if I am the writer
        if lock.owner() == me as u32 + 1 {
            let found = tx.writes.find(addr, mask);
            if let Lookup::Hit(v) = found {
                return Ok(v);
            }
            return Ok(overlay(found, platform::load_word(addr, Acquire)));
        }

        if !lock.read_byte(me) {
            tx.r_bytelocks.push(lock);
            lock.set_read_byte(me);
        }

        let owner = lock.owner();
        if owner != 0 {
            self.resolve_owner(tx, owner)?;
        }

        fence(Acquire);
        let result = platform::load_word(addr, Acquire);
        fence(Acquire);

        if unlikely!(killed(tx)) {
            return Err(self.conflict(tx));
        }
        Ok(result)
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // fastpath for repeat writes to the same stripe
        if lock.owner() == me as u32 + 1 {
            tx.writes.insert(addr, val, mask);
            return Ok(());
        }

        self.claim_stripe(tx, lock)?;
        tx.w_bytelocks.push(lock);
        lock.clear_read_byte(me);

        self.clear_readers(tx, lock)?;

        tx.writes.insert(addr, val, mask);

        if unlikely!(killed(tx)) {
            return Err(self.conflict(tx));
        }
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        if tx.w_bytelocks.is_empty() {
            let me = tx.id;
            for lock in tx.r_bytelocks.drain(..) {
                lock.clear_read_byte(me);
            }
            tx.writes.clear();
            tx.callbacks.commit();
            tx.allocator.on_tx_commit();
            tx.bump_ro_commit();
            return Ok(());
        }

        // atomically mark self committed; a failure means somebody killed us
        if !tx.shared().try_transition(TX_ACTIVE, TX_COMMITTED) {
            return Err(self.conflict(tx));
        }

        unsafe { tx.writes.writeback() };
        fence(Release);

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
        tx.bump_rw_commit();
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
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn privatization(&self) -> Privatization {
        Privatization::Strong
    }
}
