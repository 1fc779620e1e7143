//! Failure paths: panics inside transactions, deferred user callbacks, and
//! rollback with a protected range.

use polystm::{thread_key, tvar::TVar, tx::AbortReason};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
};

#[test]
fn panic_inside_transaction_is_recoverable() {
    let x = TVar::new(3i32);
    let thread_key = thread_key::get();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        thread_key
            .atomic(|tx| -> Result<(), _> {
                x.set(tx, 4)?;
                panic!("test panic")
            })
            .unwrap()
    }));
    assert!(result.is_err());

    // the write must not have landed, and the runtime must accept new
    // transactions on this thread
    let v = thread_key.atomic(|tx| x.get(tx)).unwrap();
    assert_eq!(v, 3, "failed to roll back a panicked transaction");
}

#[test]
fn commit_callbacks_run_on_commit_only() {
    let committed = Arc::new(AtomicUsize::new(0));
    let rolled_back = Arc::new(AtomicUsize::new(0));
    let thread_key = thread_key::get();

    let c = committed.clone();
    let r = rolled_back.clone();
    thread_key
        .atomic(move |tx| {
            let c = c.clone();
            let r = r.clone();
            tx.on_commit(move || {
                let _ = c.fetch_add(1, SeqCst);
            });
            tx.on_rollback(move || {
                let _ = r.fetch_add(1, SeqCst);
            });
            Ok(())
        })
        .unwrap();

    assert_eq!(committed.load(SeqCst), 1);
    assert_eq!(rolled_back.load(SeqCst), 0);
}

#[test]
fn rollback_callbacks_run_on_cancel() {
    let rolled_back = Arc::new(AtomicUsize::new(0));
    let thread_key = thread_key::get();

    let r = rolled_back.clone();
    let err = thread_key
        .atomic(move |tx| -> Result<(), _> {
            let r = r.clone();
            tx.on_rollback(move || {
                let _ = r.fetch_add(1, SeqCst);
            });
            Err(tx.cancel())
        })
        .unwrap_err();

    assert_eq!(err.reason(), AbortReason::UserAbort);
    assert_eq!(rolled_back.load(SeqCst), 1);
}

#[test]
fn protected_range_survives_exception_abort() {
    // an "exception object" whose transactional writes must survive the
    // rollback, the way an in-flight exception leaving an atomic block does
    let exception_payload = TVar::new(0usize);
    let plain = TVar::new(0usize);
    let thread_key = thread_key::get();

    let err = thread_key
        .atomic(|tx| -> Result<(), _> {
            exception_payload.set(tx, 41)?;
            plain.set(tx, 99)?;
            let range = (
                &exception_payload as *const _ as *const u8,
                core::mem::size_of::<TVar<usize>>(),
            );
            Err(tx.cancel_with_protected_range(range))
        })
        .unwrap_err();

    assert_eq!(err.reason(), AbortReason::ExceptionBlock);
    assert_eq!(
        exception_payload.into_inner(),
        41,
        "protected write must survive the abort"
    );
    assert_eq!(plain.into_inner(), 0, "unprotected write must be discarded");
}
