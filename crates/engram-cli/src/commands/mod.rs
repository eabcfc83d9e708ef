pub mod compact;
pub mod prune;
pub mod stats;

pub use compact::CompactCommand;
pub use prune::PruneCommand;
pub use stats::StatsCommand;
