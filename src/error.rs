use thiserror::Error;

/// Failures the CLI reports by kind, as `[<Kind>] <message>`.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Path {0} has wrong format. It must be 'ALIAS/BUCKET_NAME'")]
    MalformedPath(String),

    #[error("Failed to parse time '{0}': expected ISO 8601 or a Unix timestamp in microseconds")]
    TimeParse(String),

    #[error("Failed to parse label filter '{0}': expected KEY=VALUE")]
    LabelParse(String),

    #[error("{message}")]
    Remote { status: Option<u16>, message: String },

    #[error("Alias '{0}' doesn't exist")]
    UnknownAlias(String),

    #[error("Alias '{0}' already exists")]
    AliasExists(String),

    #[error("{0}")]
    Config(String),
}

impl CliError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        CliError::Remote {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CliError::MalformedPath(_) => "MalformedPathError",
            CliError::TimeParse(_) => "TimeParseError",
            CliError::LabelParse(_) => "LabelParseError",
            CliError::Remote { .. } => "RemoteRequestError",
            CliError::UnknownAlias(_) | CliError::AliasExists(_) => "AliasError",
            CliError::Config(_) => "ConfigError",
        }
    }

    /// The server refused a write because the record is already there.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CliError::Remote { status: Some(409), .. })
    }
}

/// Render a fatal error as the single line printed before aborting.
pub fn error_line(err: &anyhow::Error) -> String {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<CliError>())
        .map(CliError::kind)
        .unwrap_or("Error");
    format!("[{kind}] {err:#}")
}

pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<CliError>())
        .any(CliError::is_conflict)
}
