use std::path::PathBuf;

use thiserror::Error;

/// Failures that end an invocation with a single explanatory line.
#[derive(Debug, Error)]
pub enum TldrError {
    #[error("An error has occurred downloading the requested page: {0}")]
    Download(String),
    #[error("Downloading pages failed: {0}")]
    Archive(String),
    #[error("File \"{}\" not found.", .0.display())]
    FileMissing(PathBuf),
    #[error("unknown language '{0}'")]
    UnknownLanguage(String),
    #[error("An error has occurred clearing the cache: {0}")]
    CacheClear(String),
}

impl TldrError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Download(_)
            | Self::Archive(_)
            | Self::FileMissing(_)
            | Self::UnknownLanguage(_)
            | Self::CacheClear(_) => 1,
        }
    }

    pub fn download(error: &anyhow::Error) -> Self {
        Self::Download(transport_message(error))
    }

    pub fn archive(error: &anyhow::Error) -> Self {
        Self::Archive(transport_message(error))
    }
}

/// Flattens an error chain into one line, dropping `Error:` tags from each link.
pub fn transport_message(error: &anyhow::Error) -> String {
    error
        .chain()
        .map(|cause| strip_error_prefix(&cause.to_string()).to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

fn strip_error_prefix(message: &str) -> &str {
    message
        .strip_prefix("Error:")
        .map(str::trim_start)
        .unwrap_or(message)
}
