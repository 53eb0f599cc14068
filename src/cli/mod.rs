mod commands;

pub use commands::{Cli, Commands, KindArg, PermissionArg};
