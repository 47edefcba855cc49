//! Market acquisition: provider scanning and the snapshot cache.

pub mod cache;
pub mod scanner;

pub use cache::SnapshotCache;
pub use scanner::Scanner;
