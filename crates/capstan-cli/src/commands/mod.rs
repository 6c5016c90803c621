//! CLI subcommand implementations

mod config;
mod deploy;
mod probe;

pub use config::{config_show, load_deploy_config};
pub use deploy::deploy_command;
pub use probe::probe_command;
