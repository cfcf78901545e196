use std::fmt;
use std::str::FromStr;

use crate::error::CliError;

/// `ALIAS/BUCKET` as typed on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPath {
    pub alias: String,
    pub bucket: String,
}

impl FromStr for BucketPath {
    type Err = CliError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (alias, bucket) = parse_path(value)?;
        Ok(Self {
            alias: alias.to_string(),
            bucket: bucket.to_string(),
        })
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.alias, self.bucket)
    }
}

/// Split `ALIAS/RESOURCE` into its two non-empty parts.
pub fn parse_path(value: &str) -> Result<(&str, &str), CliError> {
    let mut parts = value.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(alias), Some(resource), None) if !alias.is_empty() && !resource.is_empty() => {
            Ok((alias, resource))
        }
        _ => Err(CliError::MalformedPath(value.to_string())),
    }
}
