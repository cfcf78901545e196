use std::collections::HashSet;

use anyhow::{Context, Result};
use glob::Pattern;

use crate::error::CliError;
use crate::storage::{EntryInfo, Labels};

const WILDCARDS: [char; 3] = ['*', '?', '['];

#[derive(Debug, Clone)]
enum Token {
    Exact(String),
    Glob(Pattern),
}

impl Token {
    fn matches(&self, name: &str) -> bool {
        match self {
            Token::Exact(exact) => exact == name,
            Token::Glob(pattern) => pattern.matches(name),
        }
    }
}

/// Entry names or glob patterns selecting which entries take part in a
/// transfer. An empty selector selects every entry.
#[derive(Debug, Clone, Default)]
pub struct EntrySelector {
    tokens: Vec<Token>,
}

impl EntrySelector {
    /// Parse a comma separated list such as `cam-*,lidar`.
    pub fn parse(value: &str) -> Result<Self> {
        let tokens = value
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                if token.contains(WILDCARDS) {
                    Pattern::new(token)
                        .map(Token::Glob)
                        .with_context(|| format!("invalid entry pattern '{token}'"))
                } else {
                    Ok(Token::Exact(token.to_string()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tokens })
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.is_empty() || self.tokens.iter().any(|token| token.matches(name))
    }

    /// Keep the selected entries in their listing order, each at most once.
    pub fn filter(&self, entries: Vec<EntryInfo>) -> Vec<EntryInfo> {
        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|entry| self.matches(&entry.name) && seen.insert(entry.name.clone()))
            .collect()
    }
}

/// Server side label filters of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    pub include: Labels,
    pub exclude: Labels,
}

impl LabelFilter {
    pub fn parse(include: &str, exclude: &str) -> Result<Self, CliError> {
        Ok(Self {
            include: parse_labels(include)?,
            exclude: parse_labels(exclude)?,
        })
    }
}

/// Parse `key=value,key2=value2`. Each pair splits on its first `=`.
pub fn parse_labels(value: &str) -> Result<Labels, CliError> {
    if value.trim().is_empty() {
        return Ok(Labels::new());
    }

    value
        .split(',')
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| CliError::LabelParse(pair.to_string()))
        })
        .collect()
}
