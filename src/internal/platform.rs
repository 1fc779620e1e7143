//! Thin wrappers over the platform primitives the runtimes are built from:
//! word-sized atomic views of client memory, a brief pause instruction, and a
//! monotonic nanosecond clock.
//!
//! All speculative accesses to client memory go through the atomic views
//! below. A doomed transaction may race with a committing writer; routing the
//! racy loads and stores through atomics keeps that speculation well defined,
//! and validation makes it correct.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// The granule of all barrier traffic.
pub type Word = usize;

/// Byte mask over a `Word`. Each live byte contributes `0xFF`.
pub type Mask = usize;

pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Mask selecting every byte of a word.
pub const FULL_MASK: Mask = !0;

#[inline]
unsafe fn as_atomic<'a>(addr: *const Word) -> &'a AtomicUsize {
    debug_assert!(
        addr as usize % WORD_SIZE == 0,
        "unaligned word access through a barrier"
    );
    &*(addr as *const AtomicUsize)
}

/// Reads one word of client memory.
#[inline]
pub unsafe fn load_word(addr: *const Word, o: Ordering) -> Word {
    as_atomic(addr).load(o)
}

/// Writes one word of client memory.
#[inline]
pub unsafe fn store_word(addr: *mut Word, val: Word, o: Ordering) {
    as_atomic(addr).store(val, o)
}

/// Writes the masked bytes of `val` into the word at `addr`, preserving the
/// unmasked bytes. The caller must hold whatever lock makes the
/// read-modify-write safe.
#[inline]
pub unsafe fn store_word_masked(addr: *mut Word, val: Word, mask: Mask, o: Ordering) {
    if mask == FULL_MASK {
        store_word(addr, val, o);
    } else {
        let old = load_word(addr, Ordering::Relaxed);
        store_word(addr, (old & !mask) | (val & mask), o);
    }
}

/// Merges the masked bytes of `val` over `base`.
#[inline]
pub fn merge_word(base: Word, val: Word, mask: Mask) -> Word {
    (base & !mask) | (val & mask)
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        /// A brief pause, appropriate for the body of a spin loop.
        #[inline]
        pub fn spin64() {
            for _ in 0..64 {
                core::hint::spin_loop();
            }
        }
    } else {
        /// A brief pause, appropriate for the body of a spin loop.
        ///
        /// Platforms without a cheap pause instruction yield instead.
        #[inline]
        pub fn spin64() {
            std::thread::yield_now();
        }
    }
}

lazy_static::lazy_static! {
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// Monotonic nanoseconds since process start. Used only by contention
/// managers to bound backoff sleeps; never used for versioning.
#[inline]
pub fn elapsed_nanos() -> u64 {
    let elapsed = CLOCK_EPOCH.elapsed();
    elapsed.as_secs() * 1_000_000_000 + u64::from(elapsed.subsec_nanos())
}
