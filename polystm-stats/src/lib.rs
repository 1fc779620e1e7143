//! Statistics collection. Enabled with `--features stats`.

use core::{
    cell::RefCell,
    fmt::{self, Debug, Formatter},
    ops::{Deref, DerefMut},
};
use parking_lot::Mutex;

#[derive(Copy, Clone, Default, Debug)]
struct MinMaxTotal {
    min:   u64,
    max:   u64,
    total: u64,
}

#[doc(hidden)]
#[derive(Default)]
pub struct Size {
    min_max_total: Option<MinMaxTotal>,
    count:         u64,
}

impl Debug for Size {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Size")
            .field("count", &self.count)
            .field("min", &self.min_max_total.map(|x| x.min))
            .field("max", &self.min_max_total.map(|x| x.max))
            .field("total", &self.min_max_total.map(|x| x.total))
            .field(
                "avg",
                &self
                    .min_max_total
                    .map(|x| x.total as f64 / self.count as f64),
            )
            .finish()
    }
}

impl Size {
    fn record(&mut self, size: u64) {
        self.count += 1;
        if let Some(ref mut min_max_total) = &mut self.min_max_total {
            min_max_total.min = min_max_total.min.min(size);
            min_max_total.max = min_max_total.max.max(size);
            min_max_total.total += size;
        } else {
            self.min_max_total = Some(MinMaxTotal {
                min:   size,
                max:   size,
                total: size,
            });
        }
    }

    fn merge(&mut self, rhs: &Self) {
        self.count += rhs.count;
        self.min_max_total = match (self.min_max_total, rhs.min_max_total) {
            (Some(a), Some(b)) => Some(MinMaxTotal {
                min:   a.min.min(b.min),
                max:   a.max.max(b.max),
                total: a.total + b.total,
            }),
            (a, b) => a.or(b),
        };
    }
}

#[doc(hidden)]
#[derive(Default, Debug)]
pub struct Event {
    count: u64,
}

impl Event {
    fn happened(&mut self) {
        self.count += 1
    }

    fn merge(&mut self, rhs: &Self) {
        self.count += rhs.count
    }
}

macro_rules! stats_func {
    ($(#[$attr:meta])* $name:ident: Event) => {
        #[inline]
        $(#[$attr])*
        pub fn $name() {
            if cfg!(feature = "stats") {
                THREAD_STAT.with(move |x| x.get().$name.happened())
            }
        }
    };
    ($(#[$attr:meta])* $name:ident: Size) => {
        #[inline]
        $(#[$attr])*
        pub fn $name(size: usize) {
            if cfg!(feature = "stats") {
                let size = size as u64;
                THREAD_STAT.with(move |x| x.get().$name.record(size))
            }
        }
    };
}

macro_rules! stats {
    ($($(#[$attr:meta])* $names:ident: $kinds:tt),* $(,)*) => {
        /// A collection of runtime statistics.
        #[derive(Default, Debug)]
        pub struct Stats {
            $($(#[$attr])*pub $names: $kinds,)*

            __private: (),
        }

        impl Stats {
            fn merge(&mut self, rhs: &Self) {
                $(self.$names.merge(&rhs.$names));*
            }
        }

        $(stats_func!{$(#[$attr])* $names: $kinds})*
    };
}

stats! {
    /// A transaction that held no write locks committed.
    ro_commit: Event,

    /// A transaction that wrote committed.
    rw_commit: Event,

    /// A transaction aborted due to a conflict detected by a barrier or by
    /// commit time validation.
    conflict: Event,

    /// A visible-reader wait loop timed out and was treated as a conflict.
    timeout_conflict: Event,

    /// The user requested a retry of the transaction.
    user_retry: Event,

    /// A transaction successfully extended its start time instead of
    /// aborting.
    timestamp_extension: Event,

    /// A transaction remotely aborted another transaction.
    remote_kill: Event,

    /// A distressed transaction entered the hourglass and serialized the
    /// system.
    hourglass_entry: Event,

    /// The contention manager slept after an abort.
    backoff: Event,

    /// An ordered writer became the oldest and switched to in-place
    /// writes.
    turbo_entry: Event,

    /// The dispatcher switched algorithms at runtime.
    algorithm_switch: Event,

    /// Read set size when a transaction completed.
    read_set_size: Size,

    /// Write set size at commit of a writing transaction.
    write_set_size: Size,

    /// Value log size for value-based-validation transactions.
    value_log_size: Size,

    /// Undo log size at completion of an in-place writer.
    undo_log_size: Size,

    /// Number of pointers handed back to the OS by one limbo reclamation.
    limbo_reclaimed: Size,
}

impl Stats {
    /// Prints a summary of the stats object.
    pub fn print_summary(&self) {
        println!("{:#?}", self);

        let commits = self.ro_commit.count + self.rw_commit.count;
        println!(
            "{:>12}: {:>12} {:>9}: {:.4}",
            "commits",
            commits,
            "abort avg",
            self.conflict.count as f64 / commits as f64,
        );
    }
}

/// Thread local statistics.
///
/// To reduce overhead of stats tracking, each thread has it's own `Stats` object which is flushed
/// to the global `Stats` object on thread exit or when manually requested.
#[derive(Debug)]
pub struct ThreadStats(RefCell<Stats>);

impl Default for ThreadStats {
    #[inline]
    fn default() -> Self {
        fn force(_: &Mutex<Stats>) {}
        force(&GLOBAL); // initialize global now, else we may get panics on drop because
                        // lazy_static uses thread_locals to initialize it.
        ThreadStats(Default::default())
    }
}

impl Drop for ThreadStats {
    #[inline]
    fn drop(&mut self) {
        self.flush()
    }
}

impl ThreadStats {
    /// Returns the actual statistics object.
    #[inline]
    pub fn get<'a>(&'a self) -> impl DerefMut<Target = Stats> + 'a {
        self.0.borrow_mut()
    }

    /// Flushes the thread stats to the global thread stats object.
    ///
    /// After flushing, `self` is reset.
    #[inline]
    pub fn flush(&self) {
        let mut borrow = self.get();
        GLOBAL.lock().merge(&*borrow);
        *borrow = Default::default()
    }
}

thread_local! {
    static THREAD_STAT: ThreadStats = ThreadStats::default();
}

lazy_static::lazy_static! {
    static ref GLOBAL: Mutex<Stats> = Mutex::default();
}

/// Returns the global stats object, or None if the feature is disabled.
#[inline]
pub fn stats() -> Option<impl Deref<Target = Stats>> {
    if cfg!(feature = "stats") {
        Some(GLOBAL.lock())
    } else {
        None
    }
}

/// Flushes the current thread's stats into the global object.
#[inline]
pub fn flush_thread_stats() {
    if cfg!(feature = "stats") {
        THREAD_STAT.with(|x| x.flush())
    }
}

/// Prints a summary of the global stats object, if the feature is enabled.
pub fn print_summary() {
    if let Some(stats) = stats() {
        stats.print_summary()
    }
}
