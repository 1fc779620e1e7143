//! Writer/reader atomicity: a transaction that keeps two locations equal
//! must never expose a mixed state to a reading transaction, under any
//! algorithm.

use crossbeam_utils::thread;
use polystm::{set_algorithm, thread_key, tvar::TVar};
use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Mutex,
};

static SWEEP_LOCK: Mutex<()> = Mutex::new(());

fn writer_reader_invariant(algorithm: &str, iters: usize) {
    set_algorithm(algorithm).unwrap();

    let a = TVar::new(0u32);
    let b = TVar::new(0u32);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|_| {
            let thread_key = thread_key::get();
            for i in 0..iters {
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
                assert_eq!(
                    x, y,
                    "{} exposed a torn pair ({}, {})",
                    algorithm, x, y
                );
            }
        });
    })
    .unwrap();
}

#[test]
fn no_torn_reads_under_lock_based_runtimes() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    for algorithm in &["CGL", "TML", "ByteEager", "BitEager", "ByEAR", "ByEAU"] {
        writer_reader_invariant(algorithm, 20_000);
    }
}

#[test]
fn no_torn_reads_under_orec_runtimes() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    for algorithm in &[
        "LLT",
        "OrecEager",
        "OrecEagerRedo",
        "OrecLazy",
        "OrecALA",
        "OrecELA",
        "CToken",
    ] {
        writer_reader_invariant(algorithm, 20_000);
    }
}

#[test]
fn no_torn_reads_under_value_validation() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    for algorithm in &["NOrec", "NOrecBackoff"] {
        writer_reader_invariant(algorithm, 20_000);
    }
}
