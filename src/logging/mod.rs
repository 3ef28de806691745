//! Diagnostics on stderr, kept apart from the prompts and tables on stdout.

use std::io;

use clap::ValueEnum;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Compact lines for an operator at a terminal.
    #[default]
    Human,
    /// One JSON object per event, for collection by a supervisor.
    Json,
}

impl LogFormat {
    /// Filter used when `RUST_LOG` is unset. A terminal session only hears
    /// about this tool's own progress; JSON consumers get everything at info.
    fn default_directives(self) -> &'static str {
        match self {
            LogFormat::Human => "warn,drivemirror=info",
            LogFormat::Json => "info",
        }
    }
}

/// Install the global subscriber. Only the first call in a process takes
/// effect.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format.default_directives()));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Human => builder.compact().without_time().try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("subscriber already installed");
    }
}
