use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod alias;
mod args;
mod config;
mod error;
mod export;
mod interrupt;
mod mirror;
mod storage;
mod transfer;
mod ui;
mod utils;

use crate::args::BaseArgs;

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("RCLI_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "rcli", about = "ReductStore command line tool", version = CLI_VERSION)]
struct Cli {
    #[command(flatten)]
    base: BaseArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage aliases of storage servers
    Alias(alias::AliasArgs),
    /// Export data from a bucket somewhere else
    Export(export::ExportArgs),
    /// Copy data from ALIAS/BUCKET to another ALIAS/BUCKET (deprecated, use `export bucket`)
    Mirror(export::BucketArgs),
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rcli={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.base.verbose);

    let result = match cli.command {
        Commands::Alias(args) => alias::run(cli.base, args),
        Commands::Export(args) => export::run(cli.base, args).await,
        Commands::Mirror(args) => mirror::run(cli.base, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error::error_line(&err));
            eprintln!("Aborted!");
            ExitCode::FAILURE
        }
    }
}
