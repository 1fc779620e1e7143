//! Shared-counter workloads, swept across every algorithm that supports
//! live switching. The turbo-capable runtimes are exercised in their own
//! processes via `STM_CONFIG` (see the crate documentation); they refuse
//! in-process switching by design.

use crossbeam_utils::thread;
use polystm::{set_algorithm, thread_key, tvar::TVar, SwitchError};
use std::sync::Mutex;

/// Algorithm switching and the global metadata are process-wide, so tests
/// that sweep algorithms serialize on this.
static SWEEP_LOCK: Mutex<()> = Mutex::new(());

fn switchable_algorithms() -> Vec<&'static str> {
    vec![
        "CGL",
        "TML",
        "NOrec",
        "NOrecBackoff",
        "NOrecHour",
        "LLT",
        "OrecEager",
        "OrecEagerBackoff",
        "OrecEagerHour",
        "OrecEagerRedo",
        "OrecLazy",
        "OrecLazyBackoff",
        "OrecLazyHour",
        "OrecALA",
        "OrecELA",
        "CToken",
        "ByteEager",
        "ByteEagerRedo",
        "ByEAR",
        "ByEAU",
        "ByEAUBackoff",
        "ByEAUFCM",
        "ByEAUHour",
        "BitEager",
    ]
}

fn hammer_counter(threads: usize, iters: usize) -> usize {
    let counter = TVar::new(0usize);
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|_| {
                let thread_key = thread_key::get();
                for _ in 0..iters {
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
    counter.into_inner()
}

#[test]
fn two_thread_counter_all_algorithms() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    const ITER_COUNT: usize = 2_000;

    for name in switchable_algorithms() {
        set_algorithm(name).unwrap();
        assert_eq!(polystm::algorithm_name(), name);
        let total = hammer_counter(2, ITER_COUNT);
        assert_eq!(
            total,
            2 * ITER_COUNT,
            "lost updates under {}",
            name
        );
    }
}

#[test]
fn four_thread_counter_default_algorithm() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    set_algorithm("NOrec").unwrap();
    const ITER_COUNT: usize = 10_000;
    assert_eq!(hammer_counter(4, ITER_COUNT), 4 * ITER_COUNT);
}

#[test]
fn hourglass_makes_progress_under_extreme_contention() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    set_algorithm("NOrecHour").unwrap();
    // every transaction writes the same word; the hourglass serializes the
    // distressed ones until they get through
    const ITER_COUNT: usize = 1_000;
    assert_eq!(hammer_counter(4, ITER_COUNT), 4 * ITER_COUNT);
}

#[test]
fn switching_is_refused_for_turbo_runtimes() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    polystm::sys_init();
    for name in &["CTokenTurbo", "Cohorts", "CohortsEager"] {
        assert_eq!(
            set_algorithm(name),
            Err(SwitchError::AdaptivityUnsupported),
            "{} must refuse live switching",
            name
        );
    }
    assert_eq!(
        set_algorithm("NoSuchAlgorithm"),
        Err(SwitchError::UnknownAlgorithm)
    );
}
