//! Branch weight annotations, usable from stable rust via the `nudge` crate.

macro_rules! unlikely {
    ($e:expr) => {
        nudge::unlikely($e)
    };
}

macro_rules! likely {
    ($e:expr) => {
        nudge::likely($e)
    };
}
