use std::collections::BTreeMap;
use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// A named storage endpoint with its API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub aliases: BTreeMap<String, Alias>,
}

impl Config {
    pub fn alias(&self, name: &str) -> Result<&Alias> {
        self.aliases
            .get(name)
            .ok_or_else(|| CliError::UnknownAlias(name.to_string()).into())
    }
}

pub fn default_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|path| path.join(".reduct-cli").join("config.toml"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

/// The explicit `--config` path wins over the default location.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_path(),
    }
}

pub fn load_file(path: &Path) -> Result<Config> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e).with_context(|| format!("could not read {}", path.display())),
    };

    toml::from_str(&contents).map_err(|e| {
        CliError::Config(format!("could not parse {}: {}", path.display(), e.message())).into()
    })
}

pub fn save_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let serialized = toml::to_string_pretty(config)?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create {}", temp_path.display()))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    Ok(())
}

/// Look up one alias by name in the config at `path`.
pub fn get_alias(path: &Path, name: &str) -> Result<Alias> {
    load_file(path)?.alias(name).cloned()
}
