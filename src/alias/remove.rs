use std::path::Path;

use anyhow::Result;

use crate::config;
use crate::error::CliError;
use crate::ui::{print_command_status, CommandStatus};

pub fn run(path: &Path, name: &str) -> Result<()> {
    let mut cfg = config::load_file(path)?;
    if cfg.aliases.remove(name).is_none() {
        return Err(CliError::UnknownAlias(name.to_string()).into());
    }
    config::save_file(path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Removed alias '{name}'"));
    Ok(())
}
