//! Per-drive association record.
//!
//! One JSON file at the root of every associated drive. Reads always go
//! through [`Record::parse`]; nothing outside the three known fields is
//! accepted, and a record that does not validate is reported as
//! [`RecordLookup::Invalid`] instead of being mistaken for "no record".

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::Role;
use crate::{Error, Result};

pub const METADATA_FILE: &str = ".drivemirror.json";
const METADATA_TMP_FILE: &str = ".drivemirror.json.tmp";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Record {
    pub set_id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of reading a drive's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    Found(Record),
    NotFound,
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    set_id: Option<String>,
    role: Option<String>,
    timestamp: Option<String>,
}

impl Record {
    pub fn new(set_id: impl Into<String>, role: Role) -> Result<Self> {
        let set_id = set_id.into();
        validate_set_id(&set_id).map_err(Error::InvalidRecord)?;
        if role == Role::Unassigned {
            return Err(Error::InvalidRecord("unassigned drives carry no record".into()).into());
        }
        Ok(Self {
            set_id,
            role,
            timestamp: Utc::now(),
        })
    }

    /// Strictly parse a serialized record. The error string explains why the
    /// content was rejected.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let raw: RawRecord =
            serde_json::from_slice(bytes).map_err(|e| format!("unparseable record: {e}"))?;

        let set_id = non_empty(raw.set_id, "set_id")?;
        validate_set_id(&set_id)?;

        let role = match non_empty(raw.role, "role")?.as_str() {
            "master" => Role::Master,
            "backup" => Role::Backup,
            other => return Err(format!("unrecognized role {other:?}")),
        };

        let timestamp = non_empty(raw.timestamp, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| format!("bad timestamp {timestamp:?}: {e}"))?
            .with_timezone(&Utc);

        Ok(Self {
            set_id,
            role,
            timestamp,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Storage seam for drive records, so association commits can be exercised
/// against failing media.
pub trait RecordStore {
    fn read(&self, root: &Path) -> Result<RecordLookup>;
    /// Overwrite the record on `root` with a freshly timestamped one.
    fn write(&self, root: &Path, set_id: &str, role: Role) -> Result<Record>;
    /// Delete the record; absent records are not an error.
    fn remove(&self, root: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileRecordStore;

impl FileRecordStore {
    pub fn record_path(root: &Path) -> PathBuf {
        root.join(METADATA_FILE)
    }
}

impl RecordStore for FileRecordStore {
    fn read(&self, root: &Path) -> Result<RecordLookup> {
        let path = Self::record_path(root);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RecordLookup::NotFound),
            Err(err) => {
                return Err(Error::Unreadable {
                    path: path.clone(),
                    reason: err.to_string(),
                }
                .into())
            }
        };

        Ok(match Record::parse(&bytes) {
            Ok(record) => RecordLookup::Found(record),
            Err(reason) => {
                debug!(path = %path.display(), %reason, "record failed validation");
                RecordLookup::Invalid(reason)
            }
        })
    }

    fn write(&self, root: &Path, set_id: &str, role: Role) -> Result<Record> {
        let record = Record::new(set_id, role).map_err(|err| Error::WriteFailure {
            path: root.to_path_buf(),
            reason: format!("{err:#}"),
        })?;
        let data = record.to_bytes()?;
        let tmp = root.join(METADATA_TMP_FILE);
        let target = Self::record_path(root);

        let write_failure = |err: io::Error| Error::WriteFailure {
            path: root.to_path_buf(),
            reason: err.to_string(),
        };

        if let Err(err) = fs::write(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(write_failure(err).into());
        }
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(write_failure(err).into());
        }
        debug!(path = %target.display(), role = %record.role, set_id = %record.set_id, "record written");
        Ok(record)
    }

    fn remove(&self, root: &Path) -> Result<()> {
        match fs::remove_file(Self::record_path(root)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::WriteFailure {
                path: root.to_path_buf(),
                reason: err.to_string(),
            }
            .into()),
        }
    }
}

/// Mint a new sync-group identifier.
pub fn new_set_id() -> String {
    Uuid::new_v4().to_string()
}

fn non_empty(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(format!("missing {field}")),
    }
}

fn validate_set_id(set_id: &str) -> std::result::Result<(), String> {
    if set_id.trim().is_empty() {
        return Err("missing set_id".into());
    }
    if set_id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(format!("malformed set_id {set_id:?}"));
    }
    Ok(())
}
