//! Role assignment sessions.
//!
//! An [`AssociationSession`] snapshots the discovered drives, lets the
//! operator toggle proposed roles in memory, and persists the differences
//! one drive at a time on commit. There is no cross-drive transaction: a
//! failed write is reported and the remaining drives are still attempted.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::{
    drive::{new_set_id, Drive, RecordStore, Role},
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct AssociationSession {
    drives: Vec<Drive>,
    pending: Vec<Role>,
    acknowledged: Vec<bool>,
}

/// One proposed role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub index: usize,
    pub path: PathBuf,
    pub from: Role,
    pub to: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    Assign { role: Role, set_id: String },
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub path: PathBuf,
    pub action: CommitAction,
    /// `Err` carries the failure message for this drive only.
    pub result: std::result::Result<(), String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub entries: Vec<CommitEntry>,
    /// Group identifier minted by this commit, if a master changed.
    pub minted_set_id: Option<String>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommitEntry> {
        self.entries.iter().filter(|e| e.result.is_err())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Committed(CommitReport),
    Cancelled,
}

impl AssociationSession {
    /// Start a session over `drives`, with every pending role equal to the
    /// committed one. At most one of them may currently be a master.
    pub fn new(drives: Vec<Drive>) -> Result<Self> {
        let masters: Vec<String> = drives
            .iter()
            .filter(|d| d.role() == Role::Master)
            .map(|d| d.path.display().to_string())
            .collect();
        if masters.len() > 1 {
            return Err(Error::MultipleMasters(masters.join(", ")).into());
        }

        let pending = drives.iter().map(Drive::role).collect();
        let acknowledged = vec![false; drives.len()];
        Ok(Self {
            drives,
            pending,
            acknowledged,
        })
    }

    pub fn drives(&self) -> &[Drive] {
        &self.drives
    }

    pub fn pending(&self) -> &[Role] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// Index of the slot currently proposed as master.
    pub fn pending_master(&self) -> Option<usize> {
        self.pending.iter().position(|r| *r == Role::Master)
    }

    /// Allow a slot holding unrecognized metadata to be reassigned.
    pub fn acknowledge_invalid(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.acknowledged[index] = true;
        Ok(())
    }

    pub fn needs_acknowledgement(&self, index: usize) -> bool {
        self.drives
            .get(index)
            .is_some_and(|d| d.is_invalid() && !self.acknowledged[index])
    }

    /// Advance one slot through `unassigned -> master|backup -> unassigned`.
    ///
    /// A slot becomes master only while no other slot is pending master.
    /// Leaving master drops every pending backup back to unassigned.
    pub fn toggle(&mut self, index: usize) -> Result<Role> {
        self.check_index(index)?;
        if self.needs_acknowledgement(index) {
            let drive = &self.drives[index];
            return Err(Error::InvalidMetadata {
                path: drive.path.clone(),
                reason: drive.invalid_reason().unwrap_or_default().to_string(),
            }
            .into());
        }

        let next = match self.pending[index] {
            Role::Unassigned if self.pending_master().is_none() => Role::Master,
            Role::Unassigned => Role::Backup,
            Role::Master => {
                for role in self.pending.iter_mut() {
                    if *role == Role::Backup {
                        *role = Role::Unassigned;
                    }
                }
                Role::Unassigned
            }
            Role::Backup => Role::Unassigned,
        };
        self.pending[index] = next;
        Ok(next)
    }

    /// Group of the committed master in this session, if any.
    pub fn standing_group(&self) -> Option<&str> {
        self.drives
            .iter()
            .find(|d| d.role() == Role::Master)
            .and_then(Drive::set_id)
    }

    /// True when some slot becomes master that was not one before; commit
    /// then issues a fresh group id to the master and every pending backup.
    pub fn master_changed(&self) -> bool {
        self.drives
            .iter()
            .zip(&self.pending)
            .any(|(drive, pending)| *pending == Role::Master && drive.role() != Role::Master)
    }

    /// The group a pending backup keeps although it is listed under this
    /// session's master. Such a slot is left untouched on commit unless the
    /// master changes.
    pub fn foreign_group(&self, index: usize) -> Option<&str> {
        let drive = self.drives.get(index)?;
        if self.pending[index] != Role::Backup || self.master_changed() {
            return None;
        }
        let own = drive.set_id()?;
        let master_group = self
            .pending_master()
            .and_then(|i| self.drives[i].set_id());
        (master_group != Some(own)).then_some(own)
    }

    pub fn has_changes(&self) -> bool {
        self.drives
            .iter()
            .zip(&self.pending)
            .any(|(drive, pending)| drive.role() != *pending)
    }

    pub fn changes(&self) -> Vec<PendingChange> {
        self.drives
            .iter()
            .zip(&self.pending)
            .enumerate()
            .filter(|(_, (drive, pending))| drive.role() != **pending)
            .map(|(index, (drive, pending))| PendingChange {
                index,
                path: drive.path.clone(),
                from: drive.role(),
                to: *pending,
            })
            .collect()
    }

    /// Discard the session without touching any drive.
    pub fn cancel(self) -> SessionOutcome {
        info!("association cancelled; no changes written");
        SessionOutcome::Cancelled
    }

    /// Persist pending roles. Each drive is written independently; earlier
    /// successes are kept when a later write fails.
    pub fn commit(self, store: &dyn RecordStore) -> SessionOutcome {
        let mut report = CommitReport::default();
        if !self.has_changes() {
            info!("no pending changes; nothing to commit");
            return SessionOutcome::Committed(report);
        }

        let master_changed = self.master_changed();

        // A master transition regenerates the identifier for the whole group;
        // otherwise new backups join the standing master's group.
        let group_id = if master_changed {
            let id = new_set_id();
            report.minted_set_id = Some(id.clone());
            Some(id)
        } else {
            self.pending_master()
                .and_then(|i| self.drives[i].set_id())
                .map(str::to_string)
        };

        for (drive, pending) in self.drives.iter().zip(&self.pending) {
            let changed = drive.role() != *pending;
            let rewrite_backup = master_changed && *pending == Role::Backup;
            if !changed && !rewrite_backup {
                continue;
            }

            let entry = match (*pending, group_id.as_deref()) {
                (Role::Unassigned, _) => CommitEntry {
                    path: drive.path.clone(),
                    action: CommitAction::Clear,
                    result: store.remove(&drive.path).map_err(|e| format!("{e:#}")),
                },
                (role, Some(set_id)) => CommitEntry {
                    path: drive.path.clone(),
                    action: CommitAction::Assign {
                        role,
                        set_id: set_id.to_string(),
                    },
                    result: store
                        .write(&drive.path, set_id, role)
                        .map(|_| ())
                        .map_err(|e| format!("{e:#}")),
                },
                (role, None) => CommitEntry {
                    path: drive.path.clone(),
                    action: CommitAction::Assign {
                        role,
                        set_id: String::new(),
                    },
                    result: Err("no master to take a group identifier from".into()),
                },
            };

            match &entry.result {
                Ok(()) => info!(
                    path = %entry.path.display(),
                    action = ?entry.action,
                    "drive metadata updated"
                ),
                Err(reason) => error!(
                    path = %entry.path.display(),
                    action = ?entry.action,
                    %reason,
                    "drive metadata update failed"
                ),
            }
            report.entries.push(entry);
        }

        if !report.all_succeeded() {
            warn!(
                failed = report.failures().count(),
                total = report.entries.len(),
                "commit partially applied; successful writes were kept"
            );
        }
        SessionOutcome::Committed(report)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.drives.len() {
            return Err(Error::Cli(format!("no drive at position {}", index + 1)).into());
        }
        Ok(())
    }
}
