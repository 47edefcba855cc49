//! Offline replay of recorded market snapshots.

pub mod runner;

pub use runner::{parse_date_range, ReplayDriver, ReplayReport};
