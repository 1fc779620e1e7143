//! The algorithm cores. Every runtime implements [`Algorithm`]; the public
//! API only ever talks to the currently dispatched `&'static dyn Algorithm`.
//!
//! The barriers return `Result` instead of longjmping: a barrier that
//! detects a conflict releases everything the descriptor holds (via
//! `rollback`), marks the descriptor doomed, and hands back
//! `Error::CONFLICT`. The retry loop in `thread_key` plays the role of the
//! checkpoint.

use crate::{
    internal::{
        descriptor::Descriptor,
        platform::{Mask, Word},
    },
    tx::{Actions, Error},
};
use core::sync::atomic::Ordering::Acquire;

pub mod biteager;
pub mod byear;
pub mod byeau;
pub mod byteeager;
pub mod byteeagerredo;
pub mod cgl;
pub mod cohorts;
pub mod cohortseager;
pub mod ctoken;
pub mod ctokenturbo;
pub mod llt;
pub mod norec;
pub mod oreceager;
pub mod oreceagerredo;
pub mod orecela;
pub mod oreclazy;
pub mod orecala;
pub mod tml;

pub type TmResult<T = ()> = Result<T, Error>;

/// How strongly an algorithm isolates transactional state from
/// non-transactional accesses after privatization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Privatization {
    /// No privatization safety.
    None,
    /// Asymmetric lock atomicity.
    Ala,
    /// Extendable-timestamp lock atomicity.
    Ela,
    /// Safe against all private use.
    Strong,
}

/// One concurrency-control discipline.
///
/// `begin` is invoked only for the outermost transaction of a flat nest,
/// `commit` only for the outermost end. `rollback` must leave every piece of
/// shared metadata the descriptor touched in a quiescent state and reset the
/// logs; it is called exactly once per abort, by whichever barrier detects
/// the conflict.
pub trait Algorithm: Sync + 'static {
    fn name(&self) -> &'static str;

    fn begin(&self, tx: &mut Descriptor) -> Actions;

    /// Reads the bytes of `*addr` selected by `mask`.
    unsafe fn read(&self, tx: &mut Descriptor, addr: *mut Word, mask: Mask) -> TmResult<Word>;

    /// Writes the bytes of `val` selected by `mask` into `*addr`.
    unsafe fn write(&self, tx: &mut Descriptor, addr: *mut Word, val: Word, mask: Mask)
        -> TmResult;

    fn commit(&self, tx: &mut Descriptor) -> TmResult;

    fn rollback(&self, tx: &mut Descriptor);

    fn is_irrevocable(&self, tx: &Descriptor) -> bool;

    /// Attempts to make the running transaction irrevocable. Algorithms
    /// without support refuse, which the API surfaces as a fatal error.
    fn become_irrevocable(&self, _tx: &mut Descriptor) -> bool {
        false
    }

    /// Called after a rollback that will NOT be retried (user cancel).
    /// Ticket-ordered runtimes use this to retire an outstanding commit
    /// ticket so later writers are not stuck behind a transaction that will
    /// never run again.
    fn on_cancel(&self, _tx: &mut Descriptor) {}

    /// Prepares global metadata when the dispatcher installs this
    /// algorithm.
    fn on_switch_to(&self) {}

    /// Turbo-capable runtimes cannot promise quiescent per-stripe metadata
    /// and publish `false` to opt out of live switching.
    fn supports_adaptivity(&self) -> bool {
        true
    }

    fn privatization(&self) -> Privatization {
        Privatization::None
    }

    /// Standard conflict exit: roll everything back, doom the descriptor so
    /// later barrier calls fail fast, and return the error the driver
    /// retries on.
    fn conflict(&self, tx: &mut Descriptor) -> Error {
        self.rollback(tx);
        tx.doomed = true;
        Error::CONFLICT
    }
}

/// True when every read orec still carries a version no newer than `bound`.
#[inline]
pub(crate) fn reads_valid(tx: &Descriptor, bound: Word) -> bool {
    for o in &tx.r_orecs {
        if unlikely!(o.load(Acquire) > bound) {
            return false;
        }
    }
    true
}

/// Like [`reads_valid`], but orecs this thread owns are exempt.
#[inline]
pub(crate) fn reads_valid_or_mine(tx: &Descriptor, bound: Word) -> bool {
    for o in &tx.r_orecs {
        let v = o.load(Acquire);
        if unlikely!(v > bound && v != tx.my_lock) {
            return false;
        }
    }
    true
}

/// Commit-time lock acquisition: walk the write set, CAS-installing this
/// thread's lock word over every orec whose version is old enough, skipping
/// orecs already owned. Returns false on the first orec that cannot be
/// acquired; the caller aborts, and `rollback` releases whatever was taken.
#[inline]
pub(crate) fn acquire_write_set(tx: &mut Descriptor) -> bool {
    let start_time = tx.start_time;
    let my_lock = tx.my_lock;
    let Descriptor { writes, locks, .. } = tx;
    for entry in writes.iter() {
        let o = crate::internal::metadata::orec_of(entry.addr() as *const ());
        let ivt = o.load(Acquire);
        if likely!(ivt <= start_time) {
            if unlikely!(!o.try_lock(ivt, my_lock)) {
                return false;
            }
            locks.push(o);
        } else if unlikely!(ivt != my_lock) {
            return false;
        }
    }
    true
}

/// Drains the lock list, installing `version` into every held orec.
#[inline]
pub(crate) fn release_locks(tx: &mut Descriptor, version: Word) {
    for o in tx.locks.drain(..) {
        o.release(version);
    }
}

/// Drains the lock list, restoring every held orec's pre-acquire version.
#[inline]
pub(crate) fn release_locks_undo(tx: &mut Descriptor) {
    for o in tx.locks.drain(..) {
        o.release(o.prev());
    }
}

/// Overlays previously written bytes onto a word read from memory.
#[inline]
pub(crate) fn overlay(
    found: crate::internal::write_set::Lookup,
    mem: Word,
) -> Word {
    use crate::internal::write_set::Lookup;
    match found {
        Lookup::Miss => mem,
        Lookup::Hit(v) => v,
        Lookup::Partial { val, mask } => crate::internal::platform::merge_word(mem, val, mask),
    }
}
