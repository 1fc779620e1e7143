//! Runtime statistics. Collection requires the `stats` feature; without it,
//! every probe in the runtimes compiles to nothing and [`stats`] returns
//! `None`.
//!
//! Per-thread commit and abort counters are always maintained on the
//! descriptors regardless of the feature; [`crate::sys_shutdown`] reports
//! them.

pub use polystm_stats::{print_summary, stats, Stats};
