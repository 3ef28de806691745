//! Implementation of `drivemirror associate` subcommand.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use tracing::info;

use super::{narrow_to_group, Settings};
use crate::{
    association::{AssociationSession, CommitAction, SessionOutcome},
    drive::{discover, FileRecordStore, RecordStore, Role},
    prompt::{ConsolePrompter, Prompter},
    signal::CancelFlag,
    Error, Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct AssociateArgs {
    /// Only edit drives of this sync group (plus unassigned drives)
    #[arg(long = "group")]
    pub group: Option<String>,

    /// Toggle the role of this drive; repeat to toggle several in order.
    /// Without any toggles an interactive editor is started.
    #[arg(long = "toggle")]
    pub toggles: Vec<PathBuf>,

    /// Allow reassigning drives whose metadata is unrecognized
    #[arg(long = "acknowledge-invalid")]
    pub acknowledge_invalid: bool,

    /// Write changes without asking for confirmation
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

pub fn execute(settings: &Settings, args: AssociateArgs) -> Result<()> {
    let cancel = CancelFlag::process()?;
    let source = settings.drive_source();
    let store = FileRecordStore;

    let mut drives = discover(&source, &store)?;
    if let Some(group) = args.group.as_deref() {
        drives = narrow_to_group(drives, group, true)?;
    }
    if drives.is_empty() {
        return Err(Error::Cli("no mounted drives found".into()).into());
    }

    let session = AssociationSession::new(drives)
        .context("pass --group to edit one sync group at a time")?;
    let mut prompter = ConsolePrompter::new(args.yes);
    let outcome = run_session(session, &args, &mut prompter, &store, &cancel)?;
    report(&mut prompter, outcome)
}

/// Apply toggles (from arguments or the operator), confirm, and commit.
pub fn run_session(
    mut session: AssociationSession,
    args: &AssociateArgs,
    prompter: &mut dyn Prompter,
    store: &dyn RecordStore,
    cancel: &CancelFlag,
) -> Result<SessionOutcome> {
    if args.toggles.is_empty() {
        let confirmed = edit_interactively(&mut session, args, prompter, cancel)?;
        cancel.check()?;
        if !confirmed {
            return Ok(session.cancel());
        }
    } else {
        for path in &args.toggles {
            let index = position_of(&session, path)?;
            if session.needs_acknowledgement(index) && args.acknowledge_invalid {
                session.acknowledge_invalid(index)?;
            }
            let role = session.toggle(index)?;
            info!(drive = %path.display(), %role, "role toggled");
        }
    }

    if !session.has_changes() {
        prompter.present("No changes to write.");
        return Ok(session.commit(store));
    }

    prompter.present(&render_changes(&session));
    cancel.check()?;
    let write = prompter.confirm("Write these changes?")?;
    cancel.check()?;
    if !write {
        return Ok(session.cancel());
    }
    Ok(session.commit(store))
}

/// Returns `false` when the operator quits.
fn edit_interactively(
    session: &mut AssociationSession,
    args: &AssociateArgs,
    prompter: &mut dyn Prompter,
    cancel: &CancelFlag,
) -> Result<bool> {
    loop {
        cancel.check()?;
        prompter.present(&render_session(session));
        let Some(line) = prompter.ask("Drive number to toggle, [c]onfirm or [q]uit: ")? else {
            return Ok(false);
        };

        match line.trim() {
            "q" | "quit" => return Ok(false),
            "c" | "confirm" => return Ok(true),
            input => {
                let index = match input.parse::<usize>() {
                    Ok(n) if (1..=session.len()).contains(&n) => n - 1,
                    _ => {
                        prompter.present(&format!("Unknown choice {input:?}."));
                        continue;
                    }
                };
                if session.needs_acknowledgement(index) {
                    let drive = &session.drives()[index];
                    let question = format!(
                        "{} holds unrecognized metadata ({}). Overwrite it?",
                        drive.path.display(),
                        drive.invalid_reason().unwrap_or_default()
                    );
                    // --yes never stands in for this acknowledgement.
                    let allowed = args.acknowledge_invalid || (!args.yes && prompter.confirm(&question)?);
                    if !allowed {
                        prompter.present("Left untouched; use --acknowledge-invalid to reassign it.");
                        continue;
                    }
                    session.acknowledge_invalid(index)?;
                }
                if let Err(err) = session.toggle(index) {
                    prompter.present(&format!("{err:#}"));
                }
            }
        }
    }
}

fn position_of(session: &AssociationSession, path: &Path) -> Result<usize> {
    let wanted = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let index = session
        .drives()
        .iter()
        .position(|d| {
            d.path == path || d.path.canonicalize().map(|p| p == wanted).unwrap_or(false)
        })
        .ok_or_else(|| Error::Cli(format!("not a discovered drive: {}", path.display())))?;
    Ok(index)
}

fn role_cell(role: Role) -> String {
    format!("[{role}]")
}

/// Numbered list of drives with committed and pending roles.
pub fn render_session(session: &AssociationSession) -> String {
    let mut out = String::new();
    for (i, (drive, pending)) in session.drives().iter().zip(session.pending()).enumerate() {
        let committed = if drive.is_invalid() {
            "[invalid]".to_string()
        } else {
            role_cell(drive.role())
        };
        let marker = if *pending != drive.role() { "*" } else { " " };
        out.push_str(&format!(
            "{:>3}{marker} {:<12} -> {:<12} {}",
            i + 1,
            committed,
            role_cell(*pending),
            drive.path.display()
        ));
        if let Some(set_id) = drive.set_id() {
            out.push_str(&format!("  [{set_id}]"));
        }
        if let Some(group) = session.foreign_group(i) {
            out.push_str(&format!("  (!) stays in group {group}"));
        }
        out.push('\n');
    }
    out
}

/// Summary shown before writing, naming every group a change touches.
pub fn render_changes(session: &AssociationSession) -> String {
    let standing = session.standing_group();
    let mut out = String::from("Pending changes:\n");
    for change in session.changes() {
        let drive = &session.drives()[change.index];
        out.push_str(&format!(
            "  {}: {} -> {}",
            change.path.display(),
            change.from,
            change.to
        ));
        if let Some(set_id) = drive.set_id() {
            out.push_str(&format!("  [{set_id}]"));
            if change.to == Role::Unassigned && Some(set_id) != standing {
                out.push_str(&format!("  (!) record of group {set_id} will be removed"));
            }
        }
        out.push('\n');
    }
    for (i, drive) in session.drives().iter().enumerate() {
        if let Some(group) = session.foreign_group(i) {
            out.push_str(&format!(
                "  {} stays a backup of group {group}; toggle the master to regroup it.\n",
                drive.path.display()
            ));
        }
    }
    if session.master_changed() {
        out.push_str("A new group identifier will be issued to the master and all its backups.\n");
    }
    out
}

fn report(prompter: &mut dyn Prompter, outcome: SessionOutcome) -> Result<()> {
    let report = match outcome {
        SessionOutcome::Cancelled => {
            prompter.present("Cancelled; no drive was modified.");
            return Ok(());
        }
        SessionOutcome::Committed(report) => report,
    };

    for entry in &report.entries {
        let action = match &entry.action {
            CommitAction::Assign { role, set_id } => format!("{role} of {set_id}"),
            CommitAction::Clear => "unassigned".to_string(),
        };
        let status = match &entry.result {
            Ok(()) => "ok".to_string(),
            Err(reason) => format!("FAILED: {reason}"),
        };
        prompter.present(&format!("  {} -> {action}: {status}", entry.path.display()));
    }

    let failed = report.failures().count();
    if failed > 0 {
        return Err(Error::Cli(format!(
            "{failed} of {} drive(s) could not be updated; earlier writes were kept",
            report.entries.len()
        ))
        .into());
    }
    Ok(())
}
