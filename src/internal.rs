#[macro_use]
pub mod optim;

pub mod algs;
pub mod cm;
pub mod descriptor;
pub mod dispatch;
pub mod logs;
pub mod metadata;
pub mod platform;
pub mod spinlock;
pub mod stats;
pub mod wbmm;
pub mod write_set;
