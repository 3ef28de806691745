//! File-transfer collaborator.
//!
//! The mirror itself is delegated to an external tool. The core only needs a
//! non-mutating dry-run diff and an execute call that reports success or
//! failure; [`Rsync`] provides both by shelling out to `rsync`.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, info};

use crate::{drive::METADATA_FILE, Error, Result};

/// Patterns never mirrored in either direction: the drive record itself,
/// desktop trash folders, and the filesystem's lost+found.
pub fn exclusion_set() -> Vec<String> {
    vec![
        format!("/{METADATA_FILE}"),
        format!("/{METADATA_FILE}.tmp"),
        ".[Tt]rash*".to_string(),
        ".TRASH*".to_string(),
        "[Tt]rash".to_string(),
        "/lost+found".to_string(),
    ]
}

/// Dry-run summary of what mirroring `source` onto `dest` would do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub to_add: u64,
    pub to_update: u64,
    pub to_delete: u64,
    /// Bytes the tool reports it would transfer; `None` when it did not say.
    pub total_bytes: Option<u64>,
    /// Source-relative paths of files that would be created.
    pub added: Vec<PathBuf>,
}

impl DiffReport {
    pub fn has_incoming_data(&self) -> bool {
        self.to_add > 0 || self.to_update > 0
    }

    pub fn is_noop(&self) -> bool {
        !self.has_incoming_data() && self.to_delete == 0
    }
}

pub trait TransferEngine {
    /// Compare without touching `dest`.
    fn dry_run_diff(&self, source: &Path, dest: &Path, excludes: &[String]) -> Result<DiffReport>;

    /// Mirror `source` onto `dest`, deleting destination entries that are
    /// absent from the source.
    fn execute(&self, source: &Path, dest: &Path, excludes: &[String]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Rsync {
    binary: PathBuf,
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl Rsync {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `flags` go before the paths; the destination is always last.
    fn command(&self, source: &Path, dest: &Path, excludes: &[String], flags: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("LC_ALL", "C").arg("-a").arg("--delete").args(flags);
        for pattern in excludes {
            cmd.arg(format!("--exclude={pattern}"));
        }
        cmd.arg(dir_arg(source)).arg(dir_arg(dest));
        cmd
    }

    fn spawn_error(&self, err: io::Error) -> anyhow::Error {
        if err.kind() == io::ErrorKind::NotFound {
            Error::Cli(format!(
                "{} not found in PATH; install it or pass --rsync",
                self.binary.display()
            ))
            .into()
        } else {
            Error::Io(err).into()
        }
    }
}

impl TransferEngine for Rsync {
    fn dry_run_diff(&self, source: &Path, dest: &Path, excludes: &[String]) -> Result<DiffReport> {
        let mut cmd = self.command(
            source,
            dest,
            excludes,
            &["--dry-run", "--itemize-changes", "--stats"],
        );
        debug!(?cmd, "running dry-run diff");

        let output = cmd.output().map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::TransferFailure {
                path: dest.to_path_buf(),
                reason: format!(
                    "dry run exited with {:?}: {}",
                    output.status.code(),
                    stderr.trim()
                ),
            }
            .into());
        }

        Ok(parse_itemized(&String::from_utf8_lossy(&output.stdout)))
    }

    fn execute(&self, source: &Path, dest: &Path, excludes: &[String]) -> Result<()> {
        let mut cmd = self.command(source, dest, excludes, &["--info=progress2"]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        info!(source = %source.display(), dest = %dest.display(), "mirroring");

        let status = cmd.status().map_err(|e| self.spawn_error(e))?;
        if !status.success() {
            return Err(Error::TransferFailure {
                path: dest.to_path_buf(),
                reason: format!("{} exited with {:?}", self.binary.display(), status.code()),
            }
            .into());
        }
        Ok(())
    }
}

/// Trailing slash so the tool copies directory contents, not the directory.
fn dir_arg(path: &Path) -> OsString {
    let mut arg = path.as_os_str().to_os_string();
    if !path.as_os_str().to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}

/// Parse `--itemize-changes --stats` output.
pub fn parse_itemized(stdout: &str) -> DiffReport {
    let mut report = DiffReport::default();

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("*deleting") {
            if !rest.trim().is_empty() {
                report.to_delete += 1;
            }
            continue;
        }

        if let Some(value) = line.strip_prefix("Total transferred file size:") {
            report.total_bytes = parse_byte_count(value);
            continue;
        }

        let Some((flags, name)) = line.split_once(' ') else {
            continue;
        };
        // Only regular files sent to the receiver count toward the diff.
        let Some(attrs) = flags.strip_prefix(">f") else {
            continue;
        };
        if !attrs.is_empty() && attrs.chars().all(|c| c == '+') {
            report.to_add += 1;
            report.added.push(PathBuf::from(name.trim_start()));
        } else {
            report.to_update += 1;
        }
    }

    report
}

fn parse_byte_count(value: &str) -> Option<u64> {
    let number = value.split_whitespace().next()?;
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
