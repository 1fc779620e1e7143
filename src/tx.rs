//! Functionality for working with transactions.

use core::fmt::{self, Debug, Formatter};
use core::ops::{BitOr, BitOrAssign};

/// Why a transaction stopped executing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Another transaction's activity invalidated this one. Always retried.
    Conflict,
    /// The user cancelled the transaction; its effects are rolled back and
    /// control returns to the caller.
    UserAbort,
    /// The user requested re-execution from the top.
    UserRetry,
    /// An exception-block unwound through the transaction. The protected
    /// range registered with the transaction survives the rollback.
    ExceptionBlock,
    /// An enclosing transaction aborted.
    Outer,
}

/// An error type indicating that the transaction has failed.
///
/// It is typical to route this error back to [`ThreadKey::atomic`] with `?`,
/// where conflicts are retried invisibly; only user-initiated aborts escape
/// to the caller.
///
/// # Notes
///
/// Once a barrier has returned `Error`, every further operation in the same
/// execution of the transaction will keep returning errors until the driver
/// restarts it.
///
/// [`ThreadKey::atomic`]: ../thread_key/struct.ThreadKey.html#method.atomic
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Error {
    reason: AbortReason,
}

impl Debug for Error {
    #[cold]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Error")
            .field("reason", &self.reason)
            .finish()
    }
}

impl Error {
    pub(crate) const CONFLICT: Self = Error {
        reason: AbortReason::Conflict,
    };

    /// Requests re-execution of the transaction from the top.
    pub const RETRY: Self = Error {
        reason: AbortReason::UserRetry,
    };

    /// Cancels the transaction; the driver rolls it back and hands the error
    /// to the caller instead of retrying.
    pub const CANCEL: Self = Error {
        reason: AbortReason::UserAbort,
    };

    pub(crate) const EXCEPTION_BLOCK: Self = Error {
        reason: AbortReason::ExceptionBlock,
    };

    pub(crate) const OUTER: Self = Error {
        reason: AbortReason::Outer,
    };

    #[inline]
    pub fn reason(&self) -> AbortReason {
        self.reason
    }

    /// True for the reasons the driver retries automatically.
    #[inline]
    pub(crate) fn is_retryable(&self) -> bool {
        match self.reason {
            AbortReason::Conflict | AbortReason::UserRetry => true,
            _ => false,
        }
    }
}

macro_rules! bit_set {
    ($(#[$attr:meta])* $name:ident { $($(#[$bit_attr:meta])* $bit:ident = $value:expr;)* }) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Default, PartialEq, Eq)]
        pub struct $name(u32);

        impl $name {
            /// The empty set.
            pub const NONE: Self = $name(0);

            $($(#[$bit_attr])* pub const $bit: Self = $name($value);)*

            #[inline]
            pub fn contains(self, rhs: Self) -> bool {
                self.0 & rhs.0 == rhs.0
            }

            #[inline]
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl Debug for $name {
            fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                let mut list = formatter.debug_list();
                $(
                    if self.contains($name::$bit) {
                        let _ = list.entry(&stringify!($bit));
                    }
                )*
                list.finish()
            }
        }
    };
}

bit_set! {
    /// Flags recognized when a transaction begins.
    BeginFlags {
        /// The caller intends to run instrumented code.
        RUN_INSTRUMENTED = 1 << 0;
        /// The caller intends to run uninstrumented code.
        RUN_UNINSTRUMENTED = 1 << 1;
        /// Live variables must be saved before entering the region.
        SAVE_LIVE_VARIABLES = 1 << 2;
        /// Live variables must be restored when the region restarts.
        RESTORE_LIVE_VARIABLES = 1 << 3;
        /// The region is beginning only to abort itself.
        ABORT_TRANSACTION = 1 << 4;
    }
}

bit_set! {
    /// Actions the caller must take after a transaction begins, as the
    /// bitwise-or of the bits below.
    Actions {
        /// Run the instrumented code path.
        RUN_INSTRUMENTED = 1 << 0;
        /// Run the uninstrumented code path (irrevocable runtimes).
        RUN_UNINSTRUMENTED = 1 << 1;
        /// Save live variables for a possible restart.
        SAVE_LIVE_VARIABLES = 1 << 2;
        /// Restore live variables; the region is re-executing.
        RESTORE_LIVE_VARIABLES = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_reasons() {
        assert!(Error::CONFLICT.is_retryable());
        assert!(Error::RETRY.is_retryable());
        assert!(!Error::CANCEL.is_retryable());
        assert!(!Error::EXCEPTION_BLOCK.is_retryable());
        assert!(!Error::OUTER.is_retryable());
    }

    #[test]
    fn bit_sets_compose() {
        let flags = BeginFlags::RUN_INSTRUMENTED | BeginFlags::SAVE_LIVE_VARIABLES;
        assert!(flags.contains(BeginFlags::RUN_INSTRUMENTED));
        assert!(!flags.contains(BeginFlags::ABORT_TRANSACTION));
        assert!(BeginFlags::NONE.is_empty());

        let actions = Actions::RUN_INSTRUMENTED | Actions::SAVE_LIVE_VARIABLES;
        assert!(actions.contains(Actions::SAVE_LIVE_VARIABLES));
    }
}
