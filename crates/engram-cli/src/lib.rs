pub mod commands;
pub mod error;
pub mod output;

pub use commands::{CompactCommand, PruneCommand, StatsCommand};
pub use error::{CliError, CliResult};
pub use output::OutputFormat;
