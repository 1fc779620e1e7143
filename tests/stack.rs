//! A Treiber-style stack built on transactional push/pop, exercising the
//! allocator: nodes are allocated and freed inside transactions, and the
//! epoch reclaimer keeps doomed readers safe from reuse.

use crossbeam_utils::thread;
use polystm::{set_algorithm, thread_key, tvar::TVar, ThreadKey};
use std::{
    alloc::Layout,
    ptr,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Mutex,
    },
};

static SWEEP_LOCK: Mutex<()> = Mutex::new(());

#[repr(C)]
struct Node {
    next:  usize,
    value: usize,
}

fn push(thread_key: &ThreadKey, head: &TVar<usize>, value: usize) {
    thread_key
        .atomic(|tx| {
            let node = tx.alloc(Layout::new::<Node>()) as *mut Node;
            let next = head.get(tx)?;
            unsafe {
                ptr::addr_of_mut!((*node).next).write(next);
                ptr::addr_of_mut!((*node).value).write(value);
            }
            head.set(tx, node as usize)
        })
        .unwrap();
}

fn pop(thread_key: &ThreadKey, head: &TVar<usize>) -> Option<usize> {
    thread_key
        .atomic(|tx| {
            let node = head.get(tx)? as *mut Node;
            if node.is_null() {
                return Ok(None);
            }
            let next = unsafe { tx.read_word(ptr::addr_of!((*node).next))? };
            let value = unsafe { tx.read_word(ptr::addr_of!((*node).value))? };
            head.set(tx, next)?;
            unsafe { tx.free(node as *mut u8, Layout::new::<Node>()) };
            Ok(Some(value))
        })
        .unwrap()
}

fn stack_workload(algorithm: &str, threads: usize, iters: usize) {
    set_algorithm(algorithm).unwrap();

    let head = TVar::new(0usize);
    let pushed_sum = AtomicU64::new(0);
    let pushed_count = AtomicU64::new(0);
    let popped_sum = AtomicU64::new(0);
    let popped_count = AtomicU64::new(0);

    thread::scope(|s| {
        for t in 0..threads {
            let head = &head;
            let pushed_sum = &pushed_sum;
            let pushed_count = &pushed_count;
            let popped_sum = &popped_sum;
            let popped_count = &popped_count;
            s.spawn(move |_| {
                let thread_key = thread_key::get();
                for i in 0..iters {
                    // unique value: owner in the high bits, sequence in the low
                    let value = (t << 32) | i;
                    push(&thread_key, head, value);
                    pushed_sum.fetch_add(value as u64, Relaxed);
                    pushed_count.fetch_add(1, Relaxed);

                    if i % 2 == 1 {
                        if let Some(v) = pop(&thread_key, head) {
                            popped_sum.fetch_add(v as u64, Relaxed);
                            popped_count.fetch_add(1, Relaxed);
                        }
                    }
                }
            });
        }
    })
    .unwrap();

    // drain what's left single-threaded
    let thread_key = thread_key::get();
    let mut drained_sum = 0u64;
    let mut drained_count = 0u64;
    while let Some(v) = pop(&thread_key, &head) {
        drained_sum += v as u64;
        drained_count += 1;
    }

    assert_eq!(
        drained_count + popped_count.load(Relaxed),
        pushed_count.load(Relaxed),
        "{}: lost or double-popped nodes",
        algorithm
    );
    assert_eq!(
        drained_sum + popped_sum.load(Relaxed),
        pushed_sum.load(Relaxed),
        "{}: stack contents diverged from the push/pop history",
        algorithm
    );
}

#[test]
fn concurrent_stack_value_validation() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    stack_workload("NOrec", 4, 2_000);
}

#[test]
fn concurrent_stack_orec_runtimes() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    stack_workload("OrecLazy", 4, 2_000);
    stack_workload("OrecEager", 4, 2_000);
    stack_workload("OrecELA", 4, 2_000);
}

#[test]
fn concurrent_stack_visible_readers() {
    let _guard = SWEEP_LOCK.lock().unwrap();
    stack_workload("ByteEager", 4, 2_000);
}
