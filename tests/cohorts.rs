//! Cohorts runs in its own process; group-based commit cannot coexist
//! with live switching, so the algorithm is chosen through `STM_CONFIG`.

use crossbeam_utils::thread;
use polystm::{thread_key, tvar::TVar};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

#[test]
fn cohorts_counter_and_consistency() {
    std::env::set_var("STM_CONFIG", "Cohorts");
    polystm::sys_init();
    assert_eq!(polystm::algorithm_name(), "Cohorts");

    // two-thread counter
    const ITER_COUNT: usize = 5_000;
    let counter = TVar::new(0usize);
    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|_| {
                let thread_key = thread_key::get();
                for _ in 0..ITER_COUNT {
                    thread_key
                        .atomic(|tx| {
                            let v = counter.get(tx)?;
                            counter.set(tx, v + 1)
                        })
                        .unwrap();
                }
            });
        }
    })
    .unwrap();
    assert_eq!(counter.into_inner(), 2 * ITER_COUNT);

    // writer/reader atomicity
    let a = TVar::new(0u32);
    let b = TVar::new(0u32);
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|_| {
            let thread_key = thread_key::get();
            for i in 0..20_000usize {
                let v = (i % 2) as u32;
                thread_key
                    .atomic(|tx| {
                        a.set(tx, v)?;
                        b.set(tx, v)
                    })
                    .unwrap();
            }
            stop.store(true, Relaxed);
        });
        s.spawn(|_| {
            let thread_key = thread_key::get();
            while !stop.load(Relaxed) {
                let (x, y) = thread_key
                    .atomic(|tx| Ok((a.get(tx)?, b.get(tx)?)))
                    .unwrap();
                assert_eq!(x, y, "Cohorts exposed a torn pair");
            }
        });
    })
    .unwrap();
}
