//! Committing association sessions against real and failing drive stores.

use std::{
    cell::RefCell,
    collections::HashSet,
    path::{Path, PathBuf},
};

use drivemirror::{
    association::{AssociationSession, CommitAction, SessionOutcome},
    drive::{Drive, FileRecordStore, Record, RecordLookup, RecordStore, Role},
    Error, Result,
};
use tempfile::tempdir;

/// Wraps the file store, counting calls and failing writes to chosen drives.
#[derive(Default)]
struct FlakyStore {
    read_only: HashSet<PathBuf>,
    calls: RefCell<Vec<String>>,
}

impl RecordStore for FlakyStore {
    fn read(&self, root: &Path) -> Result<RecordLookup> {
        FileRecordStore.read(root)
    }

    fn write(&self, root: &Path, set_id: &str, role: Role) -> Result<Record> {
        self.calls
            .borrow_mut()
            .push(format!("write {} {role}", root.display()));
        if self.read_only.contains(root) {
            return Err(Error::WriteFailure {
                path: root.to_path_buf(),
                reason: "Read-only file system".into(),
            }
            .into());
        }
        FileRecordStore.write(root, set_id, role)
    }

    fn remove(&self, root: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("remove {}", root.display()));
        FileRecordStore.remove(root)
    }
}

fn committed(outcome: SessionOutcome) -> drivemirror::association::CommitReport {
    match outcome {
        SessionOutcome::Committed(report) => report,
        SessionOutcome::Cancelled => panic!("session was cancelled"),
    }
}

fn record_on(path: &Path) -> Record {
    match FileRecordStore.read(path).unwrap() {
        RecordLookup::Found(record) => record,
        other => panic!("expected a record on {}, got {other:?}", path.display()),
    }
}

#[test]
fn new_pair_shares_a_fresh_group() -> Result<()> {
    let x = tempdir()?;
    let y = tempdir()?;
    let mut session = AssociationSession::new(vec![
        Drive::unassigned(x.path()),
        Drive::unassigned(y.path()),
    ])?;

    assert_eq!(Role::Master, session.toggle(0)?);
    assert_eq!(Role::Backup, session.toggle(1)?);
    let report = committed(session.commit(&FileRecordStore));
    assert!(report.all_succeeded());

    let master = record_on(x.path());
    let backup = record_on(y.path());
    assert_eq!(Role::Master, master.role);
    assert_eq!(Role::Backup, backup.role);
    assert_eq!(master.set_id, backup.set_id);
    assert_eq!(report.minted_set_id.as_deref(), Some(master.set_id.as_str()));
    Ok(())
}

#[test]
fn unchanged_session_writes_nothing() -> Result<()> {
    let a = tempdir()?;
    let store = FlakyStore::default();
    store.write(a.path(), "g", Role::Master)?;
    store.calls.borrow_mut().clear();

    let drives = vec![
        Drive::assigned(a.path(), record_on(a.path())),
        Drive::unassigned("/nonexistent/drive"),
    ];
    let mut session = AssociationSession::new(drives)?;
    session.toggle(1)?;
    session.toggle(1)?;
    assert!(!session.has_changes());

    let report = committed(session.commit(&store));
    assert!(report.is_empty());
    assert!(store.calls.borrow().is_empty());
    Ok(())
}

#[test]
fn failed_write_is_reported_without_rollback() -> Result<()> {
    let a = tempdir()?;
    let b = tempdir()?;
    let store = FlakyStore {
        read_only: HashSet::from([b.path().to_path_buf()]),
        ..Default::default()
    };

    let mut session = AssociationSession::new(vec![
        Drive::unassigned(a.path()),
        Drive::unassigned(b.path()),
    ])?;
    session.toggle(0)?;
    session.toggle(1)?;
    let report = committed(session.commit(&store));

    assert_eq!(2, report.entries.len());
    assert!(report.entries[0].result.is_ok());
    assert!(report.entries[1]
        .result
        .as_ref()
        .unwrap_err()
        .contains("Read-only"));
    assert_eq!(1, report.failures().count());

    // A keeps its new record; B has none. Each was attempted exactly once.
    assert_eq!(Role::Master, record_on(a.path()).role);
    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(b.path())?);
    assert_eq!(2, store.calls.borrow().len());
    Ok(())
}

#[test]
fn replacing_the_master_regenerates_the_whole_group() -> Result<()> {
    let old_master = tempdir()?;
    let backup = tempdir()?;
    let new_master = tempdir()?;
    FileRecordStore.write(old_master.path(), "old-group", Role::Master)?;
    FileRecordStore.write(backup.path(), "old-group", Role::Backup)?;

    let drives = vec![
        Drive::assigned(old_master.path(), record_on(old_master.path())),
        Drive::assigned(backup.path(), record_on(backup.path())),
        Drive::unassigned(new_master.path()),
    ];
    let mut session = AssociationSession::new(drives)?;

    // Dropping the master drops its backup too; rebuild around the new one.
    session.toggle(0)?;
    assert_eq!(Role::Master, session.toggle(2)?);
    assert_eq!(Role::Backup, session.toggle(1)?);
    let report = committed(session.commit(&FileRecordStore));
    assert!(report.all_succeeded());

    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(old_master.path())?);
    let m = record_on(new_master.path());
    let b = record_on(backup.path());
    assert_eq!(m.set_id, b.set_id);
    assert_ne!("old-group", m.set_id);
    Ok(())
}

#[test]
fn new_backup_joins_standing_master_group() -> Result<()> {
    let master = tempdir()?;
    let extra = tempdir()?;
    FileRecordStore.write(master.path(), "standing", Role::Master)?;

    let mut session = AssociationSession::new(vec![
        Drive::assigned(master.path(), record_on(master.path())),
        Drive::unassigned(extra.path()),
    ])?;
    assert_eq!(Role::Backup, session.toggle(1)?);
    let report = committed(session.commit(&FileRecordStore));

    assert_eq!(None, report.minted_set_id);
    assert_eq!(
        CommitAction::Assign {
            role: Role::Backup,
            set_id: "standing".into()
        },
        report.entries[0].action
    );
    assert_eq!("standing", record_on(extra.path()).set_id);
    Ok(())
}

#[test]
fn cascade_commit_removes_group_records() -> Result<()> {
    let master = tempdir()?;
    let backup = tempdir()?;
    FileRecordStore.write(master.path(), "g", Role::Master)?;
    FileRecordStore.write(backup.path(), "g", Role::Backup)?;

    let mut session = AssociationSession::new(vec![
        Drive::assigned(master.path(), record_on(master.path())),
        Drive::assigned(backup.path(), record_on(backup.path())),
    ])?;
    session.toggle(0)?;
    let report = committed(session.commit(&FileRecordStore));

    assert!(report
        .entries
        .iter()
        .all(|e| e.action == CommitAction::Clear && e.result.is_ok()));
    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(master.path())?);
    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(backup.path())?);
    Ok(())
}

#[test]
fn cancel_writes_nothing() -> Result<()> {
    let a = tempdir()?;
    let mut session = AssociationSession::new(vec![Drive::unassigned(a.path())])?;
    session.toggle(0)?;
    assert_eq!(SessionOutcome::Cancelled, session.cancel());
    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(a.path())?);
    Ok(())
}
