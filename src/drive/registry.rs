//! Drive discovery and grouping.
//!
//! Candidate paths come from a [`DriveSource`]; every candidate must be a
//! live mount point that can be listed before its record is consulted.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use super::{Association, Drive, RecordLookup, RecordStore, Role};
use crate::{Error, Result};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Where candidate drives come from and how to tell whether they are mounted.
pub trait DriveSource {
    fn candidates(&self) -> Result<Vec<PathBuf>>;
    fn is_mounted(&self, path: &Path) -> bool;
}

/// Removable media under conventional mount roots, checked against the
/// kernel mount table.
#[derive(Debug, Clone)]
pub struct SystemDrives {
    roots: Vec<PathBuf>,
    mount_table: PathBuf,
}

impl SystemDrives {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Read mount points from an alternative mount table (same format as
    /// `/proc/mounts`).
    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    pub fn default_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Ok(user) = std::env::var("USER") {
            if !user.is_empty() {
                roots.push(PathBuf::from("/media").join(&user));
                roots.push(PathBuf::from("/run/media").join(&user));
            }
        }
        roots.push(PathBuf::from("/media"));
        roots.push(PathBuf::from("/mnt"));
        roots
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn mount_points(&self) -> Vec<PathBuf> {
        match fs::read_to_string(&self.mount_table) {
            Ok(contents) => parse_mount_points(&contents),
            Err(err) => {
                warn!(table = %self.mount_table.display(), error = %err, "cannot read mount table");
                Vec::new()
            }
        }
    }
}

impl DriveSource for SystemDrives {
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for root in &self.roots {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(root = %root.display(), error = %err, "skipping mount root");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                // Per-user roots live inside shared roots; they are not drives.
                if path.is_dir() && !self.roots.contains(&path) {
                    out.push(path);
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn is_mounted(&self, path: &Path) -> bool {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.mount_points()
            .iter()
            .any(|p| p == path || p == &canonical)
    }
}

/// Extract mount targets from `/proc/mounts` content, decoding the octal
/// escapes the kernel uses for whitespace and backslashes.
pub fn parse_mount_points(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|p| PathBuf::from(unescape_mount_path(p)))
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Confirm that `path` is a mounted, listable drive right now.
pub fn ensure_available(source: &dyn DriveSource, path: &Path) -> Result<()> {
    if !source.is_mounted(path) {
        return Err(Error::NotMounted(path.to_path_buf()).into());
    }
    fs::read_dir(path).map_err(|err| Error::Unreadable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    Ok(())
}

/// Resolve every candidate into a [`Drive`]. Unmounted or unreadable
/// candidates are dropped with a warning.
pub fn discover(source: &dyn DriveSource, store: &dyn RecordStore) -> Result<Vec<Drive>> {
    let mut drives = Vec::new();
    for path in source.candidates()? {
        match resolve(source, store, &path) {
            Ok(drive) => drives.push(drive),
            Err(err) => warn!(path = %path.display(), error = %err, "drive excluded"),
        }
    }
    debug!(count = drives.len(), "drive discovery finished");
    Ok(drives)
}

/// Like [`discover`] for an explicit list of paths, but any path that is not
/// a usable drive is an error.
pub fn discover_strict(
    source: &dyn DriveSource,
    store: &dyn RecordStore,
    paths: &[PathBuf],
) -> Result<Vec<Drive>> {
    paths
        .iter()
        .map(|path| resolve(source, store, path))
        .collect()
}

fn resolve(source: &dyn DriveSource, store: &dyn RecordStore, path: &Path) -> Result<Drive> {
    ensure_available(source, path)?;
    let association = match store.read(path)? {
        RecordLookup::Found(record) => Association::Assigned(record),
        RecordLookup::NotFound => Association::Unassigned,
        RecordLookup::Invalid(reason) => {
            warn!(
                path = %path.display(),
                %reason,
                "unrecognized drive metadata; drive shown as unassigned and will not be overwritten without acknowledgement"
            );
            Association::Invalid(reason)
        }
    };
    Ok(Drive::new(path, association))
}

/// Drives sharing one group identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroup {
    pub set_id: String,
    pub master: Option<Drive>,
    pub backups: Vec<Drive>,
}

/// Group validated, assigned drives by set id. Groups are returned in the
/// order their first member was discovered; members keep discovery order.
pub fn group_by_set_id(drives: &[Drive]) -> Vec<SyncGroup> {
    let mut groups: Vec<SyncGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for drive in drives {
        let Some(set_id) = drive.set_id() else {
            continue;
        };
        let slot = *index.entry(set_id).or_insert_with(|| {
            groups.push(SyncGroup {
                set_id: set_id.to_string(),
                master: None,
                backups: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];

        match drive.role() {
            Role::Master if group.master.is_none() => group.master = Some(drive.clone()),
            Role::Master => warn!(
                path = %drive.path.display(),
                set_id,
                "second master in sync group ignored"
            ),
            Role::Backup => group.backups.push(drive.clone()),
            Role::Unassigned => {}
        }
    }

    groups
}
