//! ByEAU: bytelocks, undo-logged in-place writes, and remote aborts that
//! are mediated by the plugged-in contention manager. Models the
//! requestor-wins behavior of best-effort hardware TM: when A conflicts with
//! B and the contention manager sides with A, A aborts B; otherwise A aborts
//! itself to avoid deadlock.

use crate::{
    internal::{
        algs::{Algorithm, Privatization, TmResult},
        cm::ContentionManager,
        descriptor::{shared_of, Descriptor, TX_ABORTED, TX_ACTIVE},
        metadata::{bytelock_of, Bytelock, MAX_THREADS},
        platform::{self, Mask, Word},
        stats,
    },
    tx::Actions,
};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

pub struct ByEau<C> {
    name: &'static str,
    _cm:  PhantomData<fn() -> C>,
}

pub static BYEAU: ByEau<crate::internal::cm::HyperAggressive> = ByEau::with_name("ByEAU");
pub static BYEAU_BACKOFF: ByEau<crate::internal::cm::Backoff> = ByEau::with_name("ByEAUBackoff");
pub static BYEAU_FCM: ByEau<crate::internal::cm::Fcm> = ByEau::with_name("ByEAUFCM");
pub static BYEAU_HOUR: ByEau<crate::internal::cm::Hourglass> = ByEau::with_name("ByEAUHour");

#[inline]
fn killed(tx: &Descriptor) -> bool {
    tx.shared().alive() == TX_ABORTED
}

impl<C: ContentionManager> ByEau<C> {
    pub const fn with_name(name: &'static str) -> Self {
        ByEau {
            name,
            _cm: PhantomData,
        }
    }

    /// Abort the stripe's owner (with the CM's blessing) and wait for the
    /// stripe to come free, watching our own liveness all the while.
    fn oust_owner(&self, tx: &mut Descriptor, lock: &'static Bytelock) -> TmResult {
        loop {
            let owner = lock.owner();
            if owner == 0 {
                return Ok(());
            }
            // only abort the owner if the CM says it's ok; otherwise abort
            // ourselves to prevent deadlock
            if C::may_kill(tx, owner as usize - 1) {
                if shared_of(owner as usize - 1).try_transition(TX_ACTIVE, TX_ABORTED) {
                    stats::remote_kill();
                }
            } else {
                return Err(self.conflict(tx));
            }
            if unlikely!(killed(tx)) {
                return Err(self.conflict(tx));
            }
        }
    }

    /// Acquire the stripe's owner slot, ousting any current owner.
    fn claim_stripe(&self, tx: &mut Descriptor, lock: &'static Bytelock) -> TmResult {
        loop {
            self.oust_owner(tx, lock)?;
            if lock.try_claim(tx.id) {
                return Ok(());
            }
            if unlikely!(killed(tx)) {
                return Err(self.conflict(tx));
            }
        }
    }

    /// Abort every marked reader the CM lets us abort.
    fn clear_readers(&self, tx: &mut Descriptor, lock: &'static Bytelock) -> TmResult {
        for reader in 0..MAX_THREADS {
            if reader == tx.id || !lock.read_byte(reader) {
                continue;
            }
            if C::may_kill(tx, reader) {
                if shared_of(reader).try_transition(TX_ACTIVE, TX_ABORTED) {
                    stats::remote_kill();
                }
            } else {
                return Err(self.conflict(tx));
            }
        }
        Ok(())
    }
}

impl<C: ContentionManager> Algorithm for ByEau<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        // mark self alive, then notify the CM (it may block)
        tx.shared().set_alive(TX_ACTIVE);
        C::on_begin(tx);
        tx.allocator.on_tx_begin();
        Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES
    }

    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        // skip instrumentation if I am the writer; updates are in place
        if lock.owner() != me as u32 + 1 {
            if !lock.read_byte(me) {
                tx.r_bytelocks.push(lock);
                lock.set_read_byte(me);
            }
            self.oust_owner(tx, lock)?;
        }

        let result = platform::load_word(addr, Acquire);

        if unlikely!(killed(tx)) {
            return Err(self.conflict(tx));
        }
        Ok(result)
    }

    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        let lock = bytelock_of(addr as *const ());
        let me = tx.id;

        if lock.owner() != me as u32 + 1 {
            self.claim_stripe(tx, lock)?;
            tx.w_bytelocks.push(lock);
            lock.clear_read_byte(me);
            self.clear_readers(tx, lock)?;
        }

        tx.undo_log
            .log(addr, platform::load_word(addr, Relaxed), mask);
        platform::store_word_masked(addr, val, mask, Release);

        if unlikely!(killed(tx)) {
            return Err(self.conflict(tx));
        }
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        let read_only = tx.w_bytelocks.is_empty();

        for lock in tx.w_bytelocks.drain(..) {
            lock.release_owner();
        }
        let me = tx.id;
        for lock in tx.r_bytelocks.drain(..) {
            lock.clear_read_byte(me);
        }

        C::on_commit(tx);

        stats::undo_log_size(tx.undo_log.len());
        tx.undo_log.clear();
        tx.callbacks.commit();
        tx.allocator.on_tx_commit();
        if read_only {
            tx.bump_ro_commit();
        } else {
            tx.bump_rw_commit();
        }
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
        C::on_abort(tx);
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        false
    }

    fn privatization(&self) -> Privatization {
        Privatization::Strong
    }
}
