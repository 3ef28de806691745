//! Implementation of `drivemirror sync` subcommand.

use clap::Args;
use tracing::info;

use super::{narrow_to_group, Settings};
use crate::{
    drive::{discover, FileRecordStore},
    prompt::{ConsolePrompter, Prompter},
    signal::CancelFlag,
    sync::{
        BackupOutcome, MasterReport, Orchestrator, PassOutcome, Rsync, DiskSpace, SyncOptions,
    },
    Error, Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct SyncArgs {
    /// Only sync this group
    #[arg(long = "group")]
    pub group: Option<String>,

    /// Report space admission for every backup and stop
    #[arg(long = "estimate-only")]
    pub estimate_only: bool,

    /// Answer both confirmations with yes
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

pub fn execute(settings: &Settings, args: SyncArgs) -> Result<()> {
    let cancel = CancelFlag::process()?;
    let source = settings.drive_source();
    let store = FileRecordStore;

    let mut drives = discover(&source, &store)?;
    if let Some(group) = args.group.as_deref() {
        drives = narrow_to_group(drives, group, false)?;
    }
    cancel.check()?;

    let engine = Rsync::new(&settings.rsync);
    let space = DiskSpace;
    let mut prompter = ConsolePrompter::new(args.yes);

    let reports = Orchestrator::new(
        &source,
        &engine,
        &space,
        &mut prompter,
        cancel.clone(),
        SyncOptions {
            estimate_only: args.estimate_only,
        },
    )
    .run(&drives)?;
    cancel.check()?;

    summarize(&mut prompter, &reports)
}

/// Final per-master summary; fails when any backup transfer failed.
pub fn summarize(prompter: &mut dyn Prompter, reports: &[MasterReport]) -> Result<()> {
    if reports.is_empty() {
        prompter.present("No master drive is mounted; nothing to sync.");
        return Ok(());
    }

    let mut first_failure = None;
    for report in reports {
        let headline = match &report.outcome {
            PassOutcome::MasterUnavailable(reason) => format!("master unavailable: {reason}"),
            PassOutcome::NoBackups => "no backups mounted".to_string(),
            PassOutcome::NoneAdmitted => "no backup has enough space".to_string(),
            PassOutcome::EstimateOnly => "estimate only".to_string(),
            PassOutcome::Declined(stage) => format!("declined at {stage:?} confirmation"),
            PassOutcome::Executed => format!(
                "{} synced, {} failed",
                report.synced().count(),
                report.failed().count()
            ),
        };
        prompter.present(&format!("{}: {headline}", report.master.display()));

        for backup in &report.backups {
            let line = match &backup.outcome {
                BackupOutcome::Admitted => "admitted".to_string(),
                BackupOutcome::Denied { shortfall, .. } => {
                    format!("skipped, {shortfall} bytes short")
                }
                BackupOutcome::EstimateFailed(reason) => format!("skipped, {reason}"),
                BackupOutcome::Synced => "synced".to_string(),
                BackupOutcome::Failed(reason) => {
                    if first_failure.is_none() {
                        first_failure = Some((backup.path.clone(), reason.clone()));
                    }
                    format!("FAILED, {reason}")
                }
            };
            prompter.present(&format!("  {}: {line}", backup.path.display()));
        }
    }

    if let Some((path, reason)) = first_failure {
        return Err(Error::TransferFailure { path, reason }.into());
    }
    info!(masters = reports.len(), "sync finished");
    Ok(())
}
