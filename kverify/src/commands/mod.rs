//! Subcommand implementations.

mod helpers;
mod inspect;
mod verify;

pub use inspect::{print_config, print_env};
pub use verify::{run_command, setup_command, verify};
