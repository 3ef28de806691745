//! Pre-flight space admission for a master/backup pair.
//!
//! Never mutates either drive: it only asks the transfer tool for a dry-run
//! diff and the backup's filesystem for its free space.

use std::{fs, path::Path};

use sysinfo::Disks;
use tracing::{debug, info, warn};

use super::transfer::{exclusion_set, DiffReport, TransferEngine};
use crate::{drive::Drive, Error, Result};

/// Headroom added on top of the bytes the diff says will be transferred.
pub const SAFETY_MARGIN_PERCENT: u64 = 10;

pub trait FreeSpace {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Free space of the mounted filesystem holding a path, as reported by
/// `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSpace;

impl FreeSpace for DiskSpace {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let target = path.canonicalize().map_err(|err| Error::Unreadable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space()));

        containing_mount(&target, mounts).ok_or_else(|| {
            Error::Unreadable {
                path: path.to_path_buf(),
                reason: "no mounted filesystem reports free space for this path".into(),
            }
            .into()
        })
    }
}

/// Free space of the deepest mount point containing `target`.
fn containing_mount<'a>(
    target: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64)>,
) -> Option<u64> {
    mounts
        .filter(|(mount_point, _)| target.starts_with(mount_point))
        .max_by_key(|(mount_point, _)| mount_point.components().count())
        .map(|(_, available)| available)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny { shortfall: u64 },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Everything the operator needs to judge one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimate {
    pub diff: DiffReport,
    /// Bytes expected to land on the backup before the safety margin.
    pub incoming_bytes: u64,
    pub required: u64,
    pub available: u64,
    pub decision: Decision,
}

/// `floor(total * 1.10)`, computed in integers.
pub fn required_bytes(total: u64) -> u64 {
    let scaled = u128::from(total) * u128::from(100 + SAFETY_MARGIN_PERCENT) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub fn decide(required: u64, available: u64) -> Decision {
    if available >= required {
        Decision::Admit
    } else {
        Decision::Deny {
            shortfall: required - available,
        }
    }
}

/// Bytes a sync would bring onto the backup.
///
/// Zero when nothing is added or updated. When the tool gives no usable
/// total, only the on-disk sizes of newly added source files are summed;
/// updated and deleted files are not estimated.
pub fn incoming_bytes(diff: &DiffReport, source: &Path) -> u64 {
    if !diff.has_incoming_data() {
        return 0;
    }
    match diff.total_bytes {
        Some(total) if total > 0 => total,
        _ => {
            debug!(
                source = %source.display(),
                files = diff.added.len(),
                "transfer size unavailable; summing added files"
            );
            diff.added
                .iter()
                .filter_map(|rel| match fs::metadata(source.join(rel)) {
                    Ok(meta) => Some(meta.len()),
                    Err(err) => {
                        debug!(file = %rel.display(), error = %err, "cannot size added file");
                        None
                    }
                })
                .sum()
        }
    }
}

/// Decide whether `backup` can receive a mirror of `master`.
pub fn estimate(
    engine: &dyn TransferEngine,
    space: &dyn FreeSpace,
    master: &Drive,
    backup: &Drive,
) -> Result<Estimate> {
    let diff = engine.dry_run_diff(&master.path, &backup.path, &exclusion_set())?;
    let incoming = incoming_bytes(&diff, &master.path);
    let required = if incoming == 0 { 0 } else { required_bytes(incoming) };

    let available = match space.available_bytes(&backup.path) {
        Ok(bytes) => bytes,
        // Nothing incoming is admitted no matter what the filesystem says.
        Err(err) if required == 0 => {
            warn!(path = %backup.path.display(), error = %err, "free space unknown");
            0
        }
        Err(err) => return Err(err),
    };

    let decision = decide(required, available);
    match decision {
        Decision::Admit => info!(
            backup = %backup.path.display(),
            add = diff.to_add,
            update = diff.to_update,
            delete = diff.to_delete,
            required,
            available,
            "backup admitted"
        ),
        Decision::Deny { shortfall } => warn!(
            backup = %backup.path.display(),
            required,
            available,
            shortfall,
            "insufficient space; backup excluded from this sync"
        ),
    }

    Ok(Estimate {
        diff,
        incoming_bytes: incoming,
        required,
        available,
        decision,
    })
}

impl Estimate {
    /// Typed error describing a denial, for operator-facing reports.
    pub fn denial(&self, backup: &Path) -> Option<Error> {
        match self.decision {
            Decision::Admit => None,
            Decision::Deny { .. } => Some(Error::InsufficientSpace {
                path: backup.to_path_buf(),
                required: self.required,
                available: self.available,
            }),
        }
    }
}
