use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

pub const DEFAULT_PARALLEL: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Path to the config file (default: ~/.reduct-cli/config.toml)
    #[arg(short = 'c', long, env = "RCLI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Number of entries transferred in parallel
    #[arg(
        short = 'p',
        long,
        default_value_t = DEFAULT_PARALLEL,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        global = true
    )]
    pub parallel: usize,

    /// Timeout for requests to the storage in seconds
    #[arg(
        short = 't',
        long,
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub timeout: u64,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl BaseArgs {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
