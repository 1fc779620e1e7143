//! CGL: coarse-grained locking. One global test-and-set spinlock held for
//! the duration of every transaction. No speculation, no aborts, strong
//! privatization, and the baseline every other runtime is measured against.

use crate::{
    internal::{
        algs::{Algorithm, Privatization, TmResult},
        descriptor::Descriptor,
        platform::{self, Mask, Word},
        spinlock::TatasLock,
    },
    tx::Actions,
};
use core::sync::atomic::Ordering::{Acquire, Release};
use lock_api::RawMutex;

static CGL_LOCK: TatasLock = TatasLock::INIT;

pub struct Cgl;

pub static CGL: Cgl = Cgl;

impl Algorithm for Cgl {
    fn name(&self) -> &'static str {
        "CGL"
    }

    fn begin(&self, tx: &mut Descriptor) -> Actions {
        CGL_LOCK.lock();
        tx.allocator.on_tx_begin();
        Actions::RUN_UNINSTRUMENTED
    }

    unsafe fn read(&self, _tx: &mut Descriptor, addr: *mut Word, _mask: Mask) -> TmResult<Word> {
        Ok(platform::load_word(addr, Acquire))
    }

    unsafe fn write(&self, _tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask) -> TmResult {
        platform::store_word_masked(addr, val, mask, Release);
        Ok(())
    }

    fn commit(&self, tx: &mut Descriptor) -> TmResult {
        tx.callbacks.commit();
        tx.allocator.on_tx_commit();
        tx.bump_rw_commit();
        unsafe { CGL_LOCK.unlock() };
        Ok(())
    }

    fn rollback(&self, _tx: &mut Descriptor) {
        // in-place writes with no undo log; there is nothing to restore
        panic!("CGL transactions are irrevocable and cannot roll back");
    }

    fn is_irrevocable(&self, _tx: &Descriptor) -> bool {
        true
    }

    fn become_irrevocable(&self, _tx: &mut Descriptor) -> bool {
        true
    }

    fn privatization(&self) -> Privatization {
        Privatization::Strong
    }
}
