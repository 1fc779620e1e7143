//! Thread local state, [`ThreadKey`], used to run transactions.
//!
//! A handle to the thread local state can be acquired by calling
//! [`thread_key::get`]. The handle owns this thread's descriptor and is the
//! only way to start transactions.
//!
//! The retry loop in [`ThreadKey::atomic`] is the checkpoint of the whole
//! design: a conflicting barrier rolls the descriptor back, hands an error
//! up through the closure, and the loop re-executes it from the top. Because
//! the closure's stack state is rebuilt on every attempt, the transaction's
//! own stack frames never need logging.
//!
//! [`thread_key::get`]: fn.get.html

use crate::{
    internal::{
        algs::Algorithm,
        descriptor::{Descriptor, TX_ACTIVE},
        dispatch,
        platform::{Mask, Word, FULL_MASK},
        stats,
    },
    tx::{Actions, BeginFlags, Error},
};
use core::{
    cell::Cell,
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    ptr::NonNull,
};
use parking_lot::Mutex;
use std::alloc::Layout;

lazy_static::lazy_static! {
    /// Descriptors of exited threads, waiting to be adopted by new ones.
    /// Reuse keeps the dense id space within `MAX_THREADS` no matter how
    /// many threads come and go.
    static ref FREE_DESCRIPTORS: Mutex<Vec<usize>> = Mutex::new(Vec::new());
}

struct Slot {
    desc: Cell<*mut Descriptor>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let desc = self.desc.get();
        if !desc.is_null() {
            polystm_stats::flush_thread_stats();
            FREE_DESCRIPTORS.lock().push(desc as usize);
        }
    }
}

thread_local! {
    static SLOT: Slot = Slot {
        desc: Cell::new(core::ptr::null_mut()),
    };
}

#[inline(never)]
#[cold]
fn init_descriptor(slot: &Slot) -> *mut Descriptor {
    let recycled = FREE_DESCRIPTORS.lock().pop();
    let desc = match recycled {
        Some(addr) => {
            let desc = addr as *mut Descriptor;
            unsafe { (*desc).shared().set_alive(TX_ACTIVE) };
            desc
        }
        None => Descriptor::new() as *mut Descriptor,
    };
    slot.desc.set(desc);
    desc
}

/// Returns a handle to this thread's transactional state, creating and
/// registering the descriptor on first use.
#[inline]
pub fn get() -> ThreadKey {
    SLOT.with(|slot| {
        let mut desc = slot.desc.get();
        if unlikely!(desc.is_null()) {
            desc = init_descriptor(slot);
        }
        ThreadKey {
            desc:      unsafe { NonNull::new_unchecked(desc) },
            _not_send: PhantomData,
        }
    })
}

/// Initializes the transactional system. Idempotent; the first transaction
/// would do the same work.
pub fn sys_init() {
    let _ = dispatch::current();
}

/// Reports per-thread commit/abort counters and, with the `stats` feature,
/// the merged event statistics. Idempotent.
pub fn sys_shutdown() {
    crate::internal::descriptor::for_each_shared(|id, shared| {
        println!(
            "Thread: {}; RO Commits: {}; RW Commits: {}; Aborts: {}",
            id,
            shared.commits_ro(),
            shared.commits_rw(),
            shared.aborts()
        );
    });
    polystm_stats::flush_thread_stats();
    polystm_stats::print_summary();
}

/// A handle to this thread's transactional state.
///
/// `ThreadKey` can be acquired by calling [`get`].
#[derive(Clone)]
pub struct ThreadKey {
    desc:      NonNull<Descriptor>,
    _not_send: PhantomData<*mut ()>,
}

impl Debug for ThreadKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.pad("ThreadKey { .. }")
    }
}

/// Rolls back and resets the descriptor if the transaction body unwinds.
struct PanicGuard {
    desc: *mut Descriptor,
    alg:  &'static dyn Algorithm,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        unsafe {
            if !(*self.desc).doomed {
                self.alg.rollback(&mut *self.desc);
            }
            (*self.desc).doomed = false;
            (*self.desc).protected_range = None;
            (*self.desc).nesting_depth = 0;
        }
    }
}

impl ThreadKey {
    /// Runs `f` transactionally until it commits.
    ///
    /// Conflicts and [`Error::RETRY`] never escape: the closure simply runs
    /// again. [`Error::CANCEL`] (and the other user-initiated reasons) roll
    /// the transaction back and surface as `Err`.
    ///
    /// Reentrant calls nest flatly: an inner `atomic` runs its closure as
    /// part of the enclosing transaction, and only the outermost call
    /// commits. An error returned by an inner call must be propagated (`?`)
    /// so the outermost loop can retry.
    ///
    /// # Examples
    ///
    /// ```
    /// use polystm::{thread_key, tvar::TVar};
    ///
    /// static X: TVar<i32> = TVar::new(0);
    ///
    /// let thread_key = thread_key::get();
    /// thread_key
    ///     .atomic(|tx| {
    ///         let x = X.get(tx)?;
    ///         X.set(tx, x + 1)
    ///     })
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn atomic<'tv, F, O>(&'tv self, f: F) -> Result<O, Error>
    where
        F: FnMut(&mut Tx<'tv>) -> Result<O, Error>,
    {
        self.atomic_with(BeginFlags::RUN_INSTRUMENTED, f)
    }

    /// [`atomic`](ThreadKey::atomic) with explicit begin flags.
    pub fn atomic_with<'tv, F, O>(&'tv self, flags: BeginFlags, mut f: F) -> Result<O, Error>
    where
        F: FnMut(&mut Tx<'tv>) -> Result<O, Error>,
    {
        let desc = self.desc.as_ptr();

        if unlikely!(flags.contains(BeginFlags::ABORT_TRANSACTION)) {
            // the region exists only to cancel its enclosing transaction
            return Err(Error::OUTER);
        }

        // flat nesting: run the closure inside the enclosing transaction
        if unsafe { (*desc).nesting_depth > 0 } {
            unsafe { (*desc).nesting_depth += 1 };
            let mut tx = Tx::new(self.desc, dispatch::current(), Actions::NONE);
            let result = f(&mut tx);
            unsafe { (*desc).nesting_depth -= 1 };
            return result;
        }

        loop {
            let alg = dispatch::current();
            let actions = unsafe {
                (*desc).nesting_depth = 1;
                (*desc).doomed = false;
                alg.begin(&mut *desc)
            };

            let guard = PanicGuard { desc, alg };
            let mut tx = Tx::new(self.desc, alg, actions);
            let result = f(&mut tx);
            core::mem::forget(guard);
            unsafe { (*desc).nesting_depth = 0 };

            match result {
                Ok(o) => {
                    if unsafe { (*desc).doomed } {
                        // a barrier failed and the closure swallowed it
                        unsafe { (*desc).doomed = false };
                        continue;
                    }
                    match alg.commit(unsafe { &mut *desc }) {
                        Ok(()) => return Ok(o),
                        Err(_) => {
                            unsafe { (*desc).doomed = false };
                            continue;
                        }
                    }
                }
                Err(error) => {
                    unsafe {
                        if !(*desc).doomed {
                            // user-initiated abort; nothing rolled back yet
                            alg.rollback(&mut *desc);
                        }
                        (*desc).doomed = false;
                        (*desc).protected_range = None;
                    }
                    if error.is_retryable() {
                        stats::user_retry();
                        continue;
                    }
                    unsafe { alg.on_cancel(&mut *desc) };
                    return Err(error);
                }
            }
        }
    }

    /// The name of the installed algorithm.
    #[inline]
    pub fn algorithm_name(&self) -> &'static str {
        dispatch::current().name()
    }
}

/// An in-flight transaction. Handed to the closure run by
/// [`ThreadKey::atomic`]; every transactional operation goes through it.
pub struct Tx<'tv> {
    desc:    NonNull<Descriptor>,
    alg:     &'static dyn Algorithm,
    actions: Actions,
    _marker: PhantomData<fn(&'tv ()) -> &'tv ()>,
}

impl Debug for Tx<'_> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.pad("Tx { .. }")
    }
}

impl<'tv> Tx<'tv> {
    #[inline]
    fn new(desc: NonNull<Descriptor>, alg: &'static dyn Algorithm, actions: Actions) -> Self {
        Tx {
            desc,
            alg,
            actions,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn desc(&mut self) -> &mut Descriptor {
        unsafe { &mut *self.desc.as_ptr() }
    }

    /// The actions the algorithm requested at begin time.
    #[inline]
    pub fn actions(&self) -> Actions {
        self.actions
    }

    /// Reads one word of transactional memory.
    ///
    /// `addr` must be word-aligned and live for the duration of the
    /// transaction.
    #[inline]
    pub unsafe fn read_word(&mut self, addr: *const Word) -> Result<Word, Error> {
        self.read_word_masked(addr, FULL_MASK)
    }

    /// Reads the bytes of a word selected by `mask`.
    #[inline]
    pub unsafe fn read_word_masked(&mut self, addr: *const Word, mask: Mask) -> Result<Word, Error> {
        if unlikely!(self.desc().doomed) {
            return Err(Error::CONFLICT);
        }
        let alg = self.alg;
        alg.read(self.desc(), addr as *mut Word, mask)
    }

    /// Writes one word of transactional memory.
    #[inline]
    pub unsafe fn write_word(&mut self, addr: *mut Word, val: Word) -> Result<(), Error> {
        self.write_word_masked(addr, val, FULL_MASK)
    }

    /// Writes the bytes of `val` selected by `mask`.
    #[inline]
    pub unsafe fn write_word_masked(
        &mut self,
        addr: *mut Word,
        val: Word,
        mask: Mask,
    ) -> Result<(), Error> {
        if unlikely!(self.desc().doomed) {
            return Err(Error::CONFLICT);
        }
        let alg = self.alg;
        alg.write(self.desc(), addr, val, mask)
    }

    /// Allocates memory that is reclaimed automatically if the transaction
    /// aborts.
    #[inline]
    pub fn alloc(&mut self, layout: Layout) -> *mut u8 {
        self.desc().allocator.tx_alloc(layout)
    }

    /// Frees memory. The free is deferred until commit and then handed to
    /// the epoch reclaimer, so no concurrent transaction can observe the
    /// memory die.
    ///
    /// `ptr` must have been allocated with `layout` and not freed already.
    #[inline]
    pub unsafe fn free(&mut self, ptr: *mut u8, layout: Layout) {
        self.desc().allocator.tx_free(ptr, layout)
    }

    /// An error value requesting re-execution from the top.
    #[inline]
    pub fn retry(&self) -> Error {
        Error::RETRY
    }

    /// An error value cancelling the transaction. Route it out of the
    /// closure; the driver rolls back and returns it to the caller.
    #[inline]
    pub fn cancel(&self) -> Error {
        Error::CANCEL
    }

    /// Cancels like an unwinding exception block: writes that land inside
    /// `range` survive the rollback.
    #[inline]
    pub fn cancel_with_protected_range(&mut self, range: (*const u8, usize)) -> Error {
        self.desc().protected_range = Some(range);
        Error::EXCEPTION_BLOCK
    }

    /// Registers a callback to run if the transaction commits.
    #[inline]
    pub fn on_commit(&mut self, f: impl FnOnce() + 'static) {
        self.desc().callbacks.defer_on_commit(Box::new(f));
    }

    /// Registers a callback to run if the transaction rolls back.
    #[inline]
    pub fn on_rollback(&mut self, f: impl FnOnce() + 'static) {
        self.desc().callbacks.defer_on_rollback(Box::new(f));
    }

    /// True when the transaction can no longer abort.
    #[inline]
    pub fn is_irrevocable(&mut self) -> bool {
        let alg = self.alg;
        alg.is_irrevocable(self.desc())
    }

    /// Makes the transaction irrevocable.
    ///
    /// # Panics
    ///
    /// Panics if the installed algorithm does not support in-flight
    /// irrevocability; most do not.
    pub fn become_irrevocable(&mut self) {
        let alg = self.alg;
        if !alg.become_irrevocable(self.desc()) {
            panic!(
                "become_irrevocable is not supported by the {} runtime",
                alg.name()
            );
        }
    }
}
