//! Algorithm registry and selection.
//!
//! Every runtime registers here. At first use the dispatcher reads the
//! `STM_CONFIG` environment variable and installs the named algorithm
//! (default `NOrec`); afterwards `current()` is a single atomic load plus an
//! indexed fetch. Live switching is possible under quiescence for the
//! algorithms that allow it.

use crate::internal::{
    algs::{self, Algorithm},
    stats, wbmm,
};
use core::sync::atomic::{AtomicUsize, Ordering::{Acquire, Release}};
use parking_lot::Mutex;

/// Algorithm used when `STM_CONFIG` is unset.
const DEFAULT_ALGORITHM: &str = "NOrec";

lazy_static::lazy_static! {
    static ref REGISTRY: Vec<&'static dyn Algorithm> = vec![
        &algs::cgl::CGL,
        &algs::tml::TML,
        &algs::norec::NOREC,
        &algs::norec::NOREC_BACKOFF,
        &algs::norec::NOREC_HOUR,
        &algs::llt::LLT,
        &algs::oreceager::OREC_EAGER,
        &algs::oreceager::OREC_EAGER_BACKOFF,
        &algs::oreceager::OREC_EAGER_HOUR,
        &algs::oreceagerredo::OREC_EAGER_REDO,
        &algs::oreclazy::OREC_LAZY,
        &algs::oreclazy::OREC_LAZY_BACKOFF,
        &algs::oreclazy::OREC_LAZY_HOUR,
        &algs::orecala::OREC_ALA,
        &algs::orecela::OREC_ELA,
        &algs::ctoken::CTOKEN,
        &algs::ctokenturbo::CTOKEN_TURBO,
        &algs::cohorts::COHORTS,
        &algs::cohortseager::COHORTS_EAGER,
        &algs::byteeager::BYTE_EAGER,
        &algs::byteeagerredo::BYTE_EAGER_REDO,
        &algs::byear::BYEAR,
        &algs::byeau::BYEAU,
        &algs::byeau::BYEAU_BACKOFF,
        &algs::byeau::BYEAU_FCM,
        &algs::byeau::BYEAU_HOUR,
        &algs::biteager::BIT_EAGER,
    ];

    static ref SWITCH_LOCK: Mutex<()> = Mutex::new(());
}

/// Sentinel meaning "not yet selected".
const UNSELECTED: usize = usize::max_value();

static CURRENT: AtomicUsize = AtomicUsize::new(UNSELECTED);

/// The names of every registered algorithm.
pub fn algorithm_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|alg| alg.name())
}

fn index_of(name: &str) -> Option<usize> {
    REGISTRY.iter().position(|alg| alg.name() == name)
}

/// Looks up an algorithm by name.
pub fn by_name(name: &str) -> Option<&'static dyn Algorithm> {
    index_of(name).map(|i| REGISTRY[i])
}

#[inline(never)]
#[cold]
fn select_initial() -> usize {
    let _guard = SWITCH_LOCK.lock();
    let current = CURRENT.load(Acquire);
    if current != UNSELECTED {
        return current;
    }

    let requested = std::env::var("STM_CONFIG").unwrap_or_default();
    let index = match index_of(&requested) {
        Some(index) => index,
        None => {
            if !requested.is_empty() {
                eprintln!(
                    "STM_CONFIG names unknown algorithm {:?}; using {}",
                    requested, DEFAULT_ALGORITHM
                );
            }
            index_of(DEFAULT_ALGORITHM).expect("default algorithm not registered")
        }
    };

    REGISTRY[index].on_switch_to();
    CURRENT.store(index, Release);
    index
}

/// The currently installed algorithm.
#[inline]
pub fn current() -> &'static dyn Algorithm {
    let index = CURRENT.load(Acquire);
    if likely!(index != UNSELECTED) {
        REGISTRY[index]
    } else {
        REGISTRY[select_initial()]
    }
}

/// Why a live algorithm switch was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum SwitchError {
    /// No registered algorithm has the requested name.
    UnknownAlgorithm,
    /// A transaction was in flight during the attempt.
    NotQuiescent,
    /// The incoming or outgoing algorithm does not support live switching.
    AdaptivityUnsupported,
}

/// Installs a different algorithm at runtime.
///
/// The caller must ensure no transaction is in flight for the duration of
/// the call; a concurrent begin after the quiescence check races with the
/// switch and the outcome is a torn configuration. The check here turns the
/// common misuse into an error, nothing more.
pub fn set_algorithm(name: &str) -> Result<(), SwitchError> {
    let _guard = SWITCH_LOCK.lock();

    let incoming = index_of(name).ok_or(SwitchError::UnknownAlgorithm)?;

    let outgoing = CURRENT.load(Acquire);
    if outgoing != UNSELECTED {
        if outgoing == incoming {
            return Ok(());
        }
        if !REGISTRY[outgoing].supports_adaptivity() || !REGISTRY[incoming].supports_adaptivity() {
            return Err(SwitchError::AdaptivityUnsupported);
        }
    }

    if !wbmm::all_quiescent() {
        return Err(SwitchError::NotQuiescent);
    }

    REGISTRY[incoming].on_switch_to();
    CURRENT.store(incoming, Release);
    stats::algorithm_switch();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let mut names: Vec<_> = algorithm_names().collect();
        names.sort();
        let len = names.len();
        names.dedup();
        assert_eq!(len, names.len(), "duplicate algorithm name registered");
    }

    #[test]
    fn lookup_by_name() {
        for name in &["CGL", "TML", "NOrec", "LLT", "OrecEager", "ByteEager", "ByEAUFCM"] {
            assert!(by_name(name).is_some(), "{} not registered", name);
        }
        assert!(by_name("NoSuchAlg").is_none());
    }

    #[test]
    fn turbo_capable_algorithms_refuse_switching() {
        for name in &["CTokenTurbo", "Cohorts", "CohortsEager"] {
            assert!(!by_name(name).unwrap().supports_adaptivity());
        }
    }
}
