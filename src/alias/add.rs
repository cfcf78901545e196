use std::io::IsTerminal;
use std::path::Path;

use anyhow::{bail, Result};
use dialoguer::Input;
use reqwest::Url;

use crate::config::{self, Alias};
use crate::error::CliError;
use crate::ui::{print_command_status, CommandStatus};

pub fn run(path: &Path, name: &str, url: Option<String>, token: Option<String>) -> Result<()> {
    let mut cfg = config::load_file(path)?;
    if cfg.aliases.contains_key(name) {
        return Err(CliError::AliasExists(name.to_string()).into());
    }

    let interactive = std::io::stdin().is_terminal();
    let url = match url {
        Some(url) => url,
        None if interactive => Input::new().with_prompt("URL").interact_text()?,
        None => bail!("URL required. Use: rcli alias add {name} --url <URL>"),
    };
    let url = normalize_url(&url)?;
    let token = match token {
        Some(token) => token,
        None if interactive => Input::new()
            .with_prompt("API Token")
            .allow_empty(true)
            .interact_text()?,
        None => String::new(),
    };

    cfg.aliases.insert(name.to_string(), Alias { url, token });
    config::save_file(path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Added alias '{name}'"));
    Ok(())
}

/// Only absolute http(s) URLs can point at a storage server.
fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .map_err(|err| CliError::Config(format!("Invalid URL '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CliError::Config(format!("Invalid URL '{raw}': expected http or https")).into());
    }
    Ok(raw.trim_end_matches('/').to_string())
}
