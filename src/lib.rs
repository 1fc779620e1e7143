//! A library of software transactional memory runtimes.
//!
//! `polystm` executes marked regions of code speculatively, detecting
//! conflicts between threads and either committing a region's effects
//! atomically or rolling them back and retrying. Several interchangeable
//! concurrency-control algorithms sit behind one API; the `STM_CONFIG`
//! environment variable selects one at startup (default `NOrec`), and
//! [`set_algorithm`] can switch between most of them at runtime under
//! quiescence.
//!
//! # Examples
//!
//! Getting a handle to the thread local state:
//! ```
//! use polystm::thread_key;
//!
//! let thread_key = thread_key::get();
//! ```
//!
//! Creating transactional memory cells:
//! ```
//! use polystm::tvar::TVar;
//!
//! static A: TVar<i32> = TVar::new(0);
//! let b = TVar::new(42);
//! ```
//!
//! Performing a transaction to swap the two values:
//! ```
//! # use polystm::{thread_key, tvar::TVar};
//! # let thread_key = thread_key::get();
//! # static A: TVar<i32> = TVar::new(0);
//! # let b = TVar::new(42);
//! thread_key
//!     .atomic(|tx| {
//!         let temp = A.get(tx)?;
//!         let b_val = b.get(tx)?;
//!         A.set(tx, b_val)?;
//!         b.set(tx, temp)?;
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!(b.into_inner(), 0);
//! ```
//!
//! # The algorithm family
//!
//! | Name | Conflict detection | Versioning |
//! |---|---|---|
//! | `CGL` | one global spinlock | in-place |
//! | `TML` | global sequence lock | in-place |
//! | `NOrec`* | sequence lock + value validation | redo log |
//! | `LLT` | orecs, commit-time acquire | redo log |
//! | `OrecEager`* | orecs, encounter-time acquire | in-place + undo |
//! | `OrecEagerRedo` | orecs, encounter-time acquire | redo log |
//! | `OrecLazy`* | orecs, commit-time acquire | redo log |
//! | `OrecALA` | `OrecLazy` + ordered commit | redo log |
//! | `OrecELA` | `OrecALA` + extendable timestamps | redo log |
//! | `CToken` | ticket-ordered writers | redo log |
//! | `CTokenTurbo` | `CToken` + in-place turbo mode | redo / in-place |
//! | `Cohorts` | grouped execution | redo log |
//! | `CohortsEager` | `Cohorts` + last-runner elision | redo / in-place |
//! | `ByteEager` | visible readers (bytes) | in-place + undo |
//! | `ByteEagerRedo` | visible readers (bytes) | redo log |
//! | `ByEAR` | visible readers + remote abort | redo log |
//! | `ByEAU`* | visible readers + mediated remote abort | in-place + undo |
//! | `BitEager` | visible readers (bits) | in-place + undo |
//!
//! Names marked `*` also register contention-managed variants (`Backoff`,
//! `Hour`, `FCM` suffixes).

#![warn(missing_debug_implementations)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

#[macro_use]
mod internal;

pub mod stats;
pub mod thread_key;
pub mod tvar;
pub mod tx;

pub use crate::{
    internal::dispatch::{set_algorithm, SwitchError},
    thread_key::{sys_init, sys_shutdown, ThreadKey, Tx},
    tvar::TVar,
};

/// The name of the installed algorithm.
#[inline]
pub fn algorithm_name() -> &'static str {
    crate::internal::dispatch::current().name()
}

#[cfg(test)]
mod counter {
    use crate::{thread_key, tvar::TVar};

    #[test]
    fn single_thread_counter() {
        const ITER_COUNT: usize = 10_000;
        let c = TVar::new(0usize);
        let thread_key = thread_key::get();
        for _ in 0..ITER_COUNT {
            thread_key
                .atomic(|tx| {
                    let v = c.get(tx)?;
                    c.set(tx, v + 1)
                })
                .unwrap();
        }
        assert_eq!(c.into_inner(), ITER_COUNT);
    }

    #[test]
    fn read_after_write_sees_own_write() {
        let a = TVar::new(1u64);
        let thread_key = thread_key::get();
        let observed = thread_key
            .atomic(|tx| {
                a.set(tx, 2)?;
                a.get(tx)
            })
            .unwrap();
        assert_eq!(observed, 2);
        assert_eq!(a.into_inner(), 2);
    }

    #[test]
    fn last_write_wins() {
        let a = TVar::new(0u32);
        let thread_key = thread_key::get();
        thread_key
            .atomic(|tx| {
                a.set(tx, 1)?;
                a.set(tx, 2)?;
                a.set(tx, 3)
            })
            .unwrap();
        assert_eq!(a.into_inner(), 3);
    }

    #[test]
    fn empty_transaction_commits() {
        let thread_key = thread_key::get();
        thread_key.atomic(|_| Ok(())).unwrap();
    }

    #[test]
    fn sub_word_values() {
        let a = TVar::new(7u8);
        let b = TVar::new((1u16, 2u8));
        let thread_key = thread_key::get();
        thread_key
            .atomic(|tx| {
                let x = a.get(tx)?;
                a.set(tx, x + 1)?;
                let (p, q) = b.get(tx)?;
                b.set(tx, (p + 1, q + 1))
            })
            .unwrap();
        assert_eq!(a.into_inner(), 8);
        assert_eq!(b.into_inner(), (2, 3));
    }

    #[test]
    fn multi_word_values() {
        let a = TVar::new([1u64, 2, 3]);
        let thread_key = thread_key::get();
        thread_key
            .atomic(|tx| {
                let mut v = a.get(tx)?;
                v[0] += 10;
                v[2] += 30;
                a.set(tx, v)
            })
            .unwrap();
        assert_eq!(a.into_inner(), [11, 2, 33]);
    }
}

#[cfg(test)]
mod cancel {
    use crate::{thread_key, tvar::TVar, tx::AbortReason};

    #[test]
    fn cancel_discards_writes() {
        let a = TVar::new(5i32);
        let thread_key = thread_key::get();
        let err = thread_key
            .atomic(|tx| -> Result<(), _> {
                a.set(tx, 6)?;
                Err(tx.cancel())
            })
            .unwrap_err();
        assert_eq!(err.reason(), AbortReason::UserAbort);
        assert_eq!(a.into_inner(), 5, "cancelled write must not land");
    }

    #[test]
    fn retry_reexecutes() {
        let a = TVar::new(0i32);
        let thread_key = thread_key::get();
        let mut first = true;
        thread_key
            .atomic(|tx| {
                a.set(tx, 1)?;
                if first {
                    first = false;
                    return Err(tx.retry());
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(a.into_inner(), 1);
    }

    #[test]
    fn nested_runs_flat() {
        let a = TVar::new(0i32);
        let thread_key = thread_key::get();
        thread_key
            .atomic(|tx| {
                a.set(tx, 1)?;
                let inner = thread_key.atomic(|tx2| a.get(tx2));
                assert_eq!(inner, Ok(1), "inner transaction must see outer writes");
                Ok(())
            })
            .unwrap();
        assert_eq!(a.into_inner(), 1);
    }
}
