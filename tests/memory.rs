//! Allocator behavior at transaction boundaries.

use crossbeam_utils::thread;
use polystm::{thread_key, tvar::TVar};
use std::alloc::Layout;

#[test]
fn cancelled_allocations_are_unrolled() {
    const ITER_COUNT: usize = 10_000;
    let thread_key = thread_key::get();
    for _ in 0..ITER_COUNT {
        let err = thread_key
            .atomic(|tx| -> Result<(), _> {
                let p = tx.alloc(Layout::from_size_align(64, 8).unwrap());
                assert!(!p.is_null());
                Err(tx.cancel())
            })
            .unwrap_err();
        let _ = err;
    }
}

#[test]
fn churn_alloc_free_across_threads() {
    const ITER_COUNT: usize = 5_000;
    const THREAD_COUNT: usize = 8;
    let layout = Layout::from_size_align(48, 8).unwrap();

    thread::scope(|s| {
        for _ in 0..THREAD_COUNT {
            s.spawn(|_| {
                let thread_key = thread_key::get();
                for _ in 0..ITER_COUNT {
                    thread_key
                        .atomic(|tx| {
                            let p = tx.alloc(layout);
                            // write through it; the memory is private until
                            // the transaction publishes it, and this one
                            // never does
                            unsafe {
                                p.write_bytes(0xAB, 48);
                                tx.free(p, layout);
                            }
                            Ok(())
                        })
                        .unwrap();
                }
            });
        }
    })
    .unwrap();
}

#[test]
fn retried_transactions_do_not_leak_allocations() {
    let flag = TVar::new(0u32);
    let thread_key = thread_key::get();
    let mut attempts = 0;
    thread_key
        .atomic(|tx| {
            let p = tx.alloc(Layout::from_size_align(32, 8).unwrap());
            assert!(!p.is_null());
            attempts += 1;
            if attempts < 4 {
                return Err(tx.retry());
            }
            flag.set(tx, attempts)
        })
        .unwrap();
    assert_eq!(flag.into_inner(), 4);
}
