use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawltapeError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("{0}")]
    Configuration(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("validation failed for {url}: {cause}")]
    Validation { url: String, cause: String },
    #[error(
        "callback output #{index} ({kind}) does not match the recorded output: {detail}\nFixture path: {}",
        fixture.display()
    )]
    ReplayMismatch {
        fixture: PathBuf,
        index: usize,
        kind: String,
        detail: String,
    },
    #[error(
        "worker attributes {stage} the callback do not match the recorded ones: {detail}\nFixture path: {}",
        fixture.display()
    )]
    AttributeMismatch {
        fixture: PathBuf,
        stage: String,
        detail: String,
    },
    #[error("cannot decode fixture: {0}")]
    Serialization(String),
    #[error("callback error: {0}")]
    Callback(String),
}

impl CrawltapeError {
    pub fn validation(url: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Validation {
            url: url.into(),
            cause: cause.into(),
        }
    }

    /// True for errors that should stop the current command rather than a
    /// single fixture.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::ConfigParse(_) | Self::Cli(_)
        )
    }
}
