//! Internal façade over the `polystm-stats` crate. Every call compiles to
//! nothing unless the `stats` feature is enabled.

pub use polystm_stats::{
    algorithm_switch, backoff, conflict, hourglass_entry, limbo_reclaimed, read_set_size,
    remote_kill, ro_commit, rw_commit, timeout_conflict, timestamp_extension, turbo_entry,
    undo_log_size, user_retry, value_log_size, write_set_size,
};
