//! Contention management policies. Algorithms are generic over a policy and
//! call into it at begin, abort, and commit; visible-reader algorithms that
//! kill remote transactions additionally ask `may_kill` for permission.
//!
//! All policies here only make sense under attacker-wins conflict handling.

use crate::internal::{
    descriptor::{shared_of, Descriptor, TX_ACTIVE},
    metadata::{FCM_CLOCK, FCM_EPOCHS, HOURGLASS},
    platform::{elapsed_nanos, spin64},
    stats,
};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};

/// Smallest backoff exponent.
const BACKOFF_MIN: u32 = 4;
/// Largest backoff exponent.
const BACKOFF_MAX: u32 = 16;
/// Consecutive aborts before a transaction reaches for the hourglass.
const ABORT_THRESHOLD: u32 = 2;

pub trait ContentionManager: 'static {
    fn on_begin(_tx: &mut Descriptor) {}
    fn on_abort(_tx: &mut Descriptor) {}
    fn on_commit(_tx: &mut Descriptor) {}

    /// May `tx` forcibly abort thread `other`?
    fn may_kill(_tx: &Descriptor, _other: usize) -> bool {
        true
    }
}

/// Randomized exponential backoff, bounded by
/// `[2^BACKOFF_MIN, 2^BACKOFF_MAX]` nanoseconds.
pub(crate) fn exp_backoff(tx: &mut Descriptor) {
    let bits = (tx.consec_aborts + BACKOFF_MIN - 1).min(BACKOFF_MAX);
    let delay = u64::from(tx.next_rand() & ((1 << bits) - 1));
    let stop_at = elapsed_nanos() + delay;
    while elapsed_nanos() < stop_at {
        spin64();
    }
    stats::backoff();
}

/// Never waits, never yields; the algorithm's own conflict rule decides
/// every outcome.
pub struct HyperAggressive;

impl ContentionManager for HyperAggressive {}

/// On abort, sleep for a randomized exponentially growing interval.
pub struct Backoff;

impl ContentionManager for Backoff {
    fn on_abort(tx: &mut Descriptor) {
        tx.consec_aborts += 1;
        exp_backoff(tx);
    }

    fn on_commit(tx: &mut Descriptor) {
        tx.consec_aborts = 0;
    }
}

/// Fairness-clock policy from Bobba et al.: each transaction takes a ticket
/// at begin, and may only kill transactions holding younger tickets.
pub struct Fcm;

impl ContentionManager for Fcm {
    fn on_begin(tx: &mut Descriptor) {
        let stamp = FCM_CLOCK.fetch_add(1, SeqCst);
        FCM_EPOCHS[tx.id].store(stamp, Release);
    }

    fn may_kill(tx: &Descriptor, other: usize) -> bool {
        shared_of(tx.id).alive() == TX_ACTIVE
            && FCM_EPOCHS[tx.id].load(Acquire) < FCM_EPOCHS[other].load(Acquire)
    }
}

#[inline]
fn hourglass_wait(tx: &Descriptor) {
    if !tx.hourglass {
        while HOURGLASS.load(Acquire) != 0 {
            spin64();
        }
    }
}

#[inline]
fn hourglass_try_enter(tx: &mut Descriptor) {
    if HOURGLASS
        .compare_exchange(0, 1, SeqCst, Relaxed)
        .is_ok()
    {
        tx.hourglass = true;
        stats::hourglass_entry();
    }
}

#[inline]
fn hourglass_exit(tx: &mut Descriptor) {
    if tx.hourglass {
        HOURGLASS.store(0, Release);
        tx.hourglass = false;
    }
    tx.consec_aborts = 0;
}

/// After `ABORT_THRESHOLD` consecutive aborts, a transaction grabs the
/// hourglass and the rest of the system serializes behind it until it
/// commits.
pub struct Hourglass;

impl ContentionManager for Hourglass {
    fn on_begin(tx: &mut Descriptor) {
        hourglass_wait(tx);
    }

    fn on_abort(tx: &mut Descriptor) {
        if tx.hourglass {
            return;
        }
        tx.consec_aborts += 1;
        if tx.consec_aborts > ABORT_THRESHOLD {
            hourglass_try_enter(tx);
        }
    }

    fn on_commit(tx: &mut Descriptor) {
        hourglass_exit(tx);
    }
}

/// `Hourglass`, with randomized exponential backoff while outside the
/// hourglass.
pub struct HourglassBackoff;

impl ContentionManager for HourglassBackoff {
    fn on_begin(tx: &mut Descriptor) {
        hourglass_wait(tx);
    }

    fn on_abort(tx: &mut Descriptor) {
        if tx.hourglass {
            return;
        }
        tx.consec_aborts += 1;
        if tx.consec_aborts > ABORT_THRESHOLD {
            hourglass_try_enter(tx);
        } else {
            exp_backoff(tx);
        }
    }

    fn on_commit(tx: &mut Descriptor) {
        hourglass_exit(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::descriptor::Descriptor;

    #[test]
    fn backoff_resets_on_commit() {
        let tx = Descriptor::new();
        Backoff::on_abort(tx);
        Backoff::on_abort(tx);
        assert_eq!(tx.consec_aborts, 2);
        Backoff::on_commit(tx);
        assert_eq!(tx.consec_aborts, 0);
    }

    #[test]
    fn hourglass_entered_after_threshold_and_released() {
        let tx = Descriptor::new();
        for _ in 0..=ABORT_THRESHOLD {
            Hourglass::on_abort(tx);
        }
        assert!(tx.hourglass, "threshold crossings must reach for the hourglass");
        assert_eq!(HOURGLASS.load(Relaxed), 1);
        Hourglass::on_commit(tx);
        assert!(!tx.hourglass);
        assert_eq!(HOURGLASS.load(Relaxed), 0);
    }

    #[test]
    fn fcm_kills_only_younger() {
        let a = Descriptor::new();
        let b = Descriptor::new();
        Fcm::on_begin(a);
        Fcm::on_begin(b);
        // `a` drew the older ticket
        assert!(Fcm::may_kill(a, b.id));
        assert!(!Fcm::may_kill(b, a.id));
    }
}
