pub mod commands;
pub mod infrastructure;

pub use commands::InputCommand;
pub use infrastructure::{CliError, LogConfig, Result};
