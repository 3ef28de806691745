use std::path::PathBuf;

use thiserror::Error;

pub mod association;
pub mod cli;
pub mod drive;
pub mod logging;
pub mod prompt;
pub mod signal;
pub mod sync;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not a mounted drive: {0}")]
    NotMounted(PathBuf),
    #[error("drive not readable: {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("unrecognized drive metadata on {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },
    #[error("invalid drive record: {0}")]
    InvalidRecord(String),
    #[error("failed to write drive metadata on {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },
    #[error("insufficient space on {path}: {required} bytes required, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },
    #[error("transfer to {path} failed: {reason}")]
    TransferFailure { path: PathBuf, reason: String },
    #[error("more than one master among the drives being edited: {0}")]
    MultipleMasters(String),
    #[error("interrupted")]
    Interrupted,
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    logging::init_logging(cli_args.settings.log_format);
    cli::dispatch(cli_args)
}
