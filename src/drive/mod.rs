//! Drive domain model.
//!
//! A drive is identified by its mount path; its role and sync group are only
//! ever read from the metadata record stored on the drive itself.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod metadata;
pub mod registry;

pub use metadata::{new_set_id, FileRecordStore, Record, RecordLookup, RecordStore, METADATA_FILE};
pub use registry::{
    discover, discover_strict, ensure_available, group_by_set_id, DriveSource, SyncGroup,
    SystemDrives,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unassigned,
    Master,
    Backup,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unassigned => "unassigned",
            Role::Master => "master",
            Role::Backup => "backup",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a drive's metadata record says about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// No record on the drive.
    Unassigned,
    /// A record exists but failed validation. Never treated as reusable space.
    Invalid(String),
    Assigned(Record),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub path: PathBuf,
    pub association: Association,
}

impl Drive {
    pub fn new(path: impl Into<PathBuf>, association: Association) -> Self {
        Self {
            path: path.into(),
            association,
        }
    }

    pub fn unassigned(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Association::Unassigned)
    }

    pub fn assigned(path: impl Into<PathBuf>, record: Record) -> Self {
        Self::new(path, Association::Assigned(record))
    }

    /// Committed role. Invalid records read as unassigned here; check
    /// [`Drive::invalid_reason`] before acting on that.
    pub fn role(&self) -> Role {
        match &self.association {
            Association::Assigned(record) => record.role,
            Association::Unassigned | Association::Invalid(_) => Role::Unassigned,
        }
    }

    pub fn set_id(&self) -> Option<&str> {
        match &self.association {
            Association::Assigned(record) => Some(record.set_id.as_str()),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match &self.association {
            Association::Assigned(record) => Some(record.timestamp),
            _ => None,
        }
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.association {
            Association::Invalid(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid_reason().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Short display name (the last path component).
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
