use anyhow::Result;
use clap::{Args, Subcommand};

use crate::args::BaseArgs;
use crate::config;

mod add;
mod list;
mod remove;

#[derive(Debug, Clone, Args)]
pub struct AliasArgs {
    #[command(subcommand)]
    command: AliasCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum AliasCommand {
    /// Add a new alias with NAME
    Add {
        /// Name of the alias
        name: String,

        /// URL of the storage server (prompted when omitted)
        #[arg(long)]
        url: Option<String>,

        /// API token (prompted when omitted)
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the list of aliases
    Ls,
    /// Show the configuration of an alias
    Show {
        /// Name of the alias
        name: String,

        /// Print the token unmasked
        #[arg(long)]
        full: bool,
    },
    /// Remove the alias with NAME
    Rm {
        /// Name of the alias
        name: String,
    },
}

pub fn run(base: BaseArgs, args: AliasArgs) -> Result<()> {
    let path = config::resolve_path(base.config.as_deref())?;
    match args.command {
        AliasCommand::Add { name, url, token } => add::run(&path, &name, url, token),
        AliasCommand::Ls => list::run(&path, base.json),
        AliasCommand::Show { name, full } => list::show(&path, &name, full, base.json),
        AliasCommand::Rm { name } => remove::run(&path, &name),
    }
}
