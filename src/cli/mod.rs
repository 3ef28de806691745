//! Command-line surface: `list`, `associate` and `sync`.

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::{
    drive::{Drive, SystemDrives},
    logging::LogFormat,
    Error, Result,
};

pub mod associate;
pub mod list;
pub mod sync;

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory whose subdirectories are candidate drives (repeatable).
    #[arg(
        long = "mount-root",
        env = "DRIVEMIRROR_MOUNT_ROOTS",
        value_delimiter = ':',
        global = true
    )]
    pub mount_roots: Vec<PathBuf>,

    /// Transfer tool used for dry runs and mirroring.
    #[arg(
        long = "rsync",
        env = "DRIVEMIRROR_RSYNC",
        default_value = "rsync",
        global = true
    )]
    pub rsync: PathBuf,

    /// Log output format.
    #[arg(
        long = "log-format",
        env = "DRIVEMIRROR_LOG_FORMAT",
        value_enum,
        default_value = "human",
        global = true
    )]
    pub log_format: LogFormat,

    /// Mount table consulted for mount-point checks.
    #[arg(
        long = "mount-table",
        env = "DRIVEMIRROR_MOUNT_TABLE",
        hide = true,
        global = true
    )]
    pub mount_table: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mount_roots: Vec::new(),
            rsync: PathBuf::from("rsync"),
            log_format: LogFormat::Human,
            mount_table: None,
        }
    }
}

impl Settings {
    pub fn drive_source(&self) -> SystemDrives {
        let roots = if self.mount_roots.is_empty() {
            SystemDrives::default_roots()
        } else {
            self.mount_roots.clone()
        };
        let source = SystemDrives::new(roots);
        match &self.mount_table {
            Some(table) => source.with_mount_table(table),
            None => source,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    List(list::ListArgs),
    Associate(associate::AssociateArgs),
    Sync(sync::SyncArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub settings: Settings,
    pub command: Command,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            command: Command::None,
        }
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::List(l) => list::execute(&args.settings, l),
        Command::Associate(a) => associate::execute(&args.settings, a),
        Command::Sync(s) => sync::execute(&args.settings, s),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "drivemirror",
    version,
    about = "Mirror a master drive onto backup drives of the same sync group"
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Show mounted drives, their roles and sync groups.
    List(list::ListArgs),
    /// Assign or clear master/backup roles.
    Associate(associate::AssociateArgs),
    /// Mirror every master onto the backups of its group after a space check.
    Sync(sync::SyncArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::List(args)) => Command::List(args),
        Some(Subcommands::Associate(args)) => Command::Associate(args),
        Some(Subcommands::Sync(args)) => Command::Sync(args),
        None => Command::None,
    };

    Ok(CliArgs {
        settings: cli.settings,
        command,
    })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}

/// Keep only drives of `set_id`, plus unassigned ones when `with_free` is set.
pub(crate) fn narrow_to_group(drives: Vec<Drive>, set_id: &str, with_free: bool) -> Result<Vec<Drive>> {
    if !drives.iter().any(|d| d.set_id() == Some(set_id)) {
        return Err(Error::Cli(format!("no mounted drive belongs to group {set_id}")).into());
    }
    Ok(drives
        .into_iter()
        .filter(|d| d.set_id() == Some(set_id) || (with_free && d.set_id().is_none()))
        .collect())
}
