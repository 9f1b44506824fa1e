pub mod commands;
pub mod output;

pub use commands::{Cli, Commands};
