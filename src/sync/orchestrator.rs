//! Sync pass for one master and the backups sharing its group.
//!
//! Per master: estimate every backup, stop if none is admitted, confirm,
//! summarise the admitted set, confirm again, then execute the admitted
//! backups one after another in discovery order. A failing backup never
//! stops its siblings; declining either confirmation stops the pass.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::{
    admission::{estimate, Decision, Estimate, FreeSpace},
    transfer::{exclusion_set, TransferEngine},
};
use crate::{
    drive::{ensure_available, group_by_set_id, Drive, DriveSource, Role},
    prompt::Prompter,
    signal::CancelFlag,
    Result,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Stop after the admission report.
    pub estimate_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Admitted but not (yet) executed.
    Admitted,
    Denied { required: u64, available: u64, shortfall: u64 },
    EstimateFailed(String),
    Synced,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub estimate: Option<Estimate>,
    pub outcome: BackupOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStage {
    Proceed,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    MasterUnavailable(String),
    NoBackups,
    NoneAdmitted,
    EstimateOnly,
    Declined(ConfirmStage),
    Executed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterReport {
    pub master: PathBuf,
    pub set_id: String,
    pub backups: Vec<BackupReport>,
    pub outcome: PassOutcome,
}

impl MasterReport {
    pub fn admitted(&self) -> impl Iterator<Item = &BackupReport> {
        self.backups.iter().filter(|b| {
            b.estimate
                .as_ref()
                .is_some_and(|e| e.decision.is_admit())
        })
    }

    pub fn synced(&self) -> impl Iterator<Item = &BackupReport> {
        self.backups
            .iter()
            .filter(|b| b.outcome == BackupOutcome::Synced)
    }

    pub fn failed(&self) -> impl Iterator<Item = &BackupReport> {
        self.backups
            .iter()
            .filter(|b| matches!(b.outcome, BackupOutcome::Failed(_)))
    }
}

pub struct Orchestrator<'a> {
    source: &'a dyn DriveSource,
    engine: &'a dyn TransferEngine,
    space: &'a dyn FreeSpace,
    prompter: &'a mut dyn Prompter,
    cancel: CancelFlag,
    options: SyncOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn DriveSource,
        engine: &'a dyn TransferEngine,
        space: &'a dyn FreeSpace,
        prompter: &'a mut dyn Prompter,
        cancel: CancelFlag,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            engine,
            space,
            prompter,
            cancel,
            options,
        }
    }

    /// Run one pass per master found in `drives`, in discovery order.
    pub fn run(&mut self, drives: &[Drive]) -> Result<Vec<MasterReport>> {
        let groups = group_by_set_id(drives);
        let mut reports = Vec::new();

        for master in drives.iter().filter(|d| d.role() == Role::Master) {
            let Some(group) = groups
                .iter()
                .find(|g| g.master.as_ref() == Some(master))
            else {
                // Duplicate master of a group; already warned about while grouping.
                continue;
            };
            self.cancel.check()?;
            reports.push(self.sync_master(master, &group.backups)?);
        }

        self.cancel.check()?;
        if reports.is_empty() {
            info!("no master drive found; nothing to sync");
        }
        Ok(reports)
    }

    pub fn sync_master(&mut self, master: &Drive, backups: &[Drive]) -> Result<MasterReport> {
        let set_id = master.set_id().unwrap_or_default().to_string();
        let mut report = MasterReport {
            master: master.path.clone(),
            set_id: set_id.clone(),
            backups: Vec::new(),
            outcome: PassOutcome::NoBackups,
        };

        info!(master = %master.path.display(), %set_id, backups = backups.len(), "starting sync pass");

        if let Err(err) = ensure_available(self.source, &master.path) {
            error!(master = %master.path.display(), error = %err, "master unavailable; skipping group");
            report.outcome = PassOutcome::MasterUnavailable(format!("{err:#}"));
            return Ok(report);
        }

        if backups.is_empty() {
            info!(master = %master.path.display(), "no backups in group");
            return Ok(report);
        }

        for backup in backups {
            self.cancel.check()?;
            report.backups.push(self.estimate_backup(master, backup));
        }

        // An interrupt during the last estimate must not read as "no space".
        self.cancel.check()?;
        if report.admitted().next().is_none() {
            warn!(master = %master.path.display(), "no backup can receive this sync");
            self.prompter
                .present(&format!("No backup of {} can be synced.", master.path.display()));
            report.outcome = PassOutcome::NoneAdmitted;
            return Ok(report);
        }

        self.prompter.present(&admission_table(master, &report.backups));
        self.cancel.check()?;
        if self.options.estimate_only {
            report.outcome = PassOutcome::EstimateOnly;
            return Ok(report);
        }

        let admitted = report.admitted().count();
        let proceed = self.prompter.confirm(&format!(
            "Proceed with syncing {} to {admitted} backup(s)?",
            master.path.display()
        ))?;
        // A signal while blocked on the prompt takes precedence over the answer.
        self.cancel.check()?;
        if !proceed {
            info!(master = %master.path.display(), "sync declined before summary");
            report.outcome = PassOutcome::Declined(ConfirmStage::Proceed);
            return Ok(report);
        }

        self.prompter.present(&diff_summary(&report));
        let execute = self
            .prompter
            .confirm("Execute these changes? Files missing on the master are deleted from the backups.")?;
        self.cancel.check()?;
        if !execute {
            info!(master = %master.path.display(), "sync declined before execution");
            report.outcome = PassOutcome::Declined(ConfirmStage::Execute);
            return Ok(report);
        }

        let excludes = exclusion_set();
        for entry in report.backups.iter_mut() {
            if entry.outcome != BackupOutcome::Admitted {
                continue;
            }
            self.cancel.check()?;
            entry.outcome = match self.execute_backup(master, &entry.path, &excludes) {
                Ok(()) => {
                    info!(backup = %entry.path.display(), "backup synced");
                    BackupOutcome::Synced
                }
                Err(err) => {
                    error!(backup = %entry.path.display(), error = %err, "backup sync failed");
                    BackupOutcome::Failed(format!("{err:#}"))
                }
            };
        }

        // A transfer killed by the terminal's signal shows up as a failure here.
        self.cancel.check()?;
        report.outcome = PassOutcome::Executed;
        Ok(report)
    }

    fn estimate_backup(&self, master: &Drive, backup: &Drive) -> BackupReport {
        let result = ensure_available(self.source, &backup.path)
            .and_then(|_| estimate(self.engine, self.space, master, backup));
        match result {
            Ok(est) => {
                let outcome = match est.decision {
                    Decision::Admit => BackupOutcome::Admitted,
                    Decision::Deny { shortfall } => BackupOutcome::Denied {
                        required: est.required,
                        available: est.available,
                        shortfall,
                    },
                };
                BackupReport {
                    path: backup.path.clone(),
                    estimate: Some(est),
                    outcome,
                }
            }
            Err(err) => {
                error!(backup = %backup.path.display(), error = %err, "estimate failed");
                BackupReport {
                    path: backup.path.clone(),
                    estimate: None,
                    outcome: BackupOutcome::EstimateFailed(format!("{err:#}")),
                }
            }
        }
    }

    fn execute_backup(&self, master: &Drive, backup: &Path, excludes: &[String]) -> Result<()> {
        // Drives may have been unplugged while waiting on the operator.
        ensure_available(self.source, &master.path)?;
        ensure_available(self.source, backup)?;
        self.engine.execute(&master.path, backup, excludes)
    }
}

fn admission_table(master: &Drive, backups: &[BackupReport]) -> String {
    let mut out = format!("Space check for master {}:\n", master.path.display());
    for b in backups {
        let line = match &b.outcome {
            BackupOutcome::Denied {
                required,
                available,
                shortfall,
            } => format!(
                "  DENY   {}  needs {}, has {} (short {})",
                b.path.display(),
                format_bytes(*required),
                format_bytes(*available),
                format_bytes(*shortfall)
            ),
            BackupOutcome::EstimateFailed(reason) => {
                format!("  ERROR  {}  {reason}", b.path.display())
            }
            _ => match &b.estimate {
                Some(est) => format!(
                    "  OK     {}  needs {}, has {}",
                    b.path.display(),
                    format_bytes(est.required),
                    format_bytes(est.available)
                ),
                None => format!("  OK     {}", b.path.display()),
            },
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn diff_summary(report: &MasterReport) -> String {
    let mut out = format!("Pending changes from {}:\n", report.master.display());
    for b in report.admitted() {
        if let Some(est) = &b.estimate {
            out.push_str(&format!(
                "  {}: {} to add, {} to update, {} to delete, {} to transfer\n",
                b.path.display(),
                est.diff.to_add,
                est.diff.to_update,
                est.diff.to_delete,
                format_bytes(est.incoming_bytes)
            ));
        }
    }
    out
}

/// Decimal units, two decimals above bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{value:.2} {unit}")
}
