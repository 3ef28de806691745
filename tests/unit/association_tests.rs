use drivemirror::{
    association::AssociationSession,
    drive::{Association, Drive, Record, Role},
    Error,
};

fn free(n: usize) -> Vec<Drive> {
    (0..n)
        .map(|i| Drive::unassigned(format!("/media/d{i}")))
        .collect()
}

fn assigned(path: &str, set_id: &str, role: Role) -> Drive {
    Drive::assigned(path, Record::new(set_id, role).unwrap())
}

#[test]
fn first_toggle_proposes_master_then_backups() -> drivemirror::Result<()> {
    let mut session = AssociationSession::new(free(3))?;

    assert_eq!(Role::Master, session.toggle(0)?);
    assert_eq!(Role::Backup, session.toggle(1)?);
    assert_eq!(Role::Backup, session.toggle(2)?);
    assert_eq!(Some(0), session.pending_master());

    // Backup cycles straight back to unassigned.
    assert_eq!(Role::Unassigned, session.toggle(2)?);
    assert_eq!(vec![Role::Master, Role::Backup, Role::Unassigned], session.pending());
    Ok(())
}

#[test]
fn leaving_master_cascades_every_pending_backup() -> drivemirror::Result<()> {
    let drives = vec![
        assigned("/media/m", "g", Role::Master),
        assigned("/media/b1", "g", Role::Backup),
        Drive::unassigned("/media/new"),
    ];
    let mut session = AssociationSession::new(drives)?;
    session.toggle(2)?;
    assert_eq!(Role::Backup, session.pending()[2]);

    assert_eq!(Role::Unassigned, session.toggle(0)?);
    assert!(session.pending().iter().all(|r| *r == Role::Unassigned));
    assert_eq!(None, session.pending_master());

    // With the master gone the next toggle may claim it.
    assert_eq!(Role::Master, session.toggle(1)?);
    Ok(())
}

#[test]
fn master_stays_exclusive_under_any_toggle_sequence() -> drivemirror::Result<()> {
    let mut session = AssociationSession::new(free(5))?;
    // Deterministic pseudo-random walk over the slots.
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    for _ in 0..2_000 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let index = (state % 5) as usize;

        let was_master = session.pending()[index] == Role::Master;
        session.toggle(index)?;

        let masters = session.pending().iter().filter(|r| **r == Role::Master).count();
        assert!(masters <= 1, "two masters pending: {:?}", session.pending());
        if was_master {
            assert!(!session.pending().contains(&Role::Backup));
        }
        if session.pending().contains(&Role::Backup) {
            assert_eq!(1, masters);
        }
    }
    Ok(())
}

#[test]
fn has_changes_tracks_difference_from_committed_roles() -> drivemirror::Result<()> {
    let mut session = AssociationSession::new(free(2))?;
    assert!(!session.has_changes());

    session.toggle(0)?;
    assert!(session.has_changes());
    assert_eq!(1, session.changes().len());

    session.toggle(0)?;
    assert!(!session.has_changes());
    Ok(())
}

#[test]
fn invalid_metadata_blocks_toggle_until_acknowledged() -> drivemirror::Result<()> {
    let drives = vec![Drive::new(
        "/media/odd",
        Association::Invalid("unrecognized role \"owner\"".into()),
    )];
    let mut session = AssociationSession::new(drives)?;
    assert_eq!(Role::Unassigned, session.pending()[0]);

    let err = session.toggle(0).expect_err("must refuse silent overwrite");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::InvalidMetadata { .. })
    ));
    assert!(!session.has_changes());

    session.acknowledge_invalid(0)?;
    assert_eq!(Role::Master, session.toggle(0)?);
    Ok(())
}

#[test]
fn refuses_sessions_with_two_committed_masters() {
    let drives = vec![
        assigned("/media/a", "g1", Role::Master),
        assigned("/media/b", "g2", Role::Master),
    ];
    let err = AssociationSession::new(drives).expect_err("two masters");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MultipleMasters(_))
    ));
}

#[test]
fn out_of_range_toggle_is_rejected() -> drivemirror::Result<()> {
    let mut session = AssociationSession::new(free(1))?;
    assert!(session.toggle(3).is_err());
    Ok(())
}

#[test]
fn backup_of_another_group_is_flagged_until_regrouped() -> drivemirror::Result<()> {
    let drives = vec![
        assigned("/media/m", "g", Role::Master),
        assigned("/media/mine", "g", Role::Backup),
        assigned("/media/theirs", "other", Role::Backup),
    ];
    let mut session = AssociationSession::new(drives)?;
    assert_eq!(Some("g"), session.standing_group());
    assert_eq!(None, session.foreign_group(1));
    assert_eq!(Some("other"), session.foreign_group(2));

    // Off and on again is no change at all, so it stays in its own group.
    session.toggle(2)?;
    session.toggle(2)?;
    assert!(!session.has_changes());
    assert_eq!(Some("other"), session.foreign_group(2));

    // Dropping the master cascades across groups...
    session.toggle(0)?;
    assert_eq!(Role::Unassigned, session.pending()[2]);
    assert_eq!(None, session.foreign_group(2));

    // ...and a new master regroups every pending backup.
    assert_eq!(Role::Master, session.toggle(1)?);
    assert_eq!(Role::Backup, session.toggle(2)?);
    assert!(session.master_changed());
    assert_eq!(None, session.foreign_group(2));
    Ok(())
}
