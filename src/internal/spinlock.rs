//! A very simple and cheap test-and-test-and-set spinlock. This is the
//! entire concurrency control of the CGL runtime: one of these, held for the
//! duration of every transaction.

use lock_api::{GuardNoSend, RawMutex};
use std::sync::atomic::{AtomicUsize, Ordering::*};

#[derive(Debug)]
pub struct TatasLock {
    held: AtomicUsize,
}

unsafe impl RawMutex for TatasLock {
    const INIT: TatasLock = TatasLock {
        held: AtomicUsize::new(0),
    };
    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        if unlikely!(self.held.swap(1, Acquire) != 0) {
            self.lock_slow();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.held.load(Relaxed) == 0 && self.held.swap(1, Acquire) == 0
    }

    #[inline]
    unsafe fn unlock(&self) {
        debug_assert!(
            self.held.load(Relaxed) != 0,
            "attempt to unlock an unlocked `TatasLock`"
        );
        self.held.store(0, Release);
    }
}

impl TatasLock {
    #[cold]
    #[inline(never)]
    fn lock_slow(&self) {
        loop {
            while self.held.load(Relaxed) != 0 {
                core::hint::spin_loop();
            }
            if self.held.swap(1, Acquire) == 0 {
                return;
            }
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Relaxed) != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn send_sync<T: Send + Sync>() {}

    #[test]
    fn is_send_sync() {
        send_sync::<TatasLock>()
    }

    #[test]
    fn lock_cycle() {
        let lock = TatasLock::INIT;
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }
}
