//! CLI contract tests for drivemirror argument handling and exit paths.

use std::{
    fs,
    path::{Path, PathBuf},
};

use drivemirror::{
    cli::list::render,
    drive::{Association, Drive, FileRecordStore, Record, RecordLookup, RecordStore, Role, METADATA_FILE},
    Error,
};
use tempfile::{tempdir, TempDir};

/// A fake media root with every listed drive mounted.
struct Media {
    scratch: TempDir,
    root: PathBuf,
    table: PathBuf,
}

impl Media {
    fn new(names: &[&str]) -> Self {
        let scratch = tempdir().unwrap();
        let root = scratch.path().join("media");
        let mut table = String::new();
        for name in names {
            let drive = root.join(name);
            fs::create_dir_all(&drive).unwrap();
            table.push_str(&format!("/dev/sdx1 {} ext4 rw 0 0\n", drive.display()));
        }
        let table_path = scratch.path().join("mounts");
        fs::write(&table_path, table).unwrap();
        Self {
            scratch,
            root,
            table: table_path,
        }
    }

    fn drive(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn run(&self, args: &[&str]) -> drivemirror::Result<()> {
        let mut argv = vec![
            "drivemirror".to_string(),
            "--mount-root".to_string(),
            self.root.display().to_string(),
            "--mount-table".to_string(),
            self.table.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        drivemirror::run(argv)
    }
}

fn record(path: &Path) -> drivemirror::drive::Record {
    match FileRecordStore.read(path).unwrap() {
        RecordLookup::Found(record) => record,
        other => panic!("expected record on {}, got {other:?}", path.display()),
    }
}

fn error_of(err: &anyhow::Error) -> &Error {
    err.downcast_ref::<Error>()
        .unwrap_or_else(|| panic!("unexpected error type: {err:?}"))
}

#[test]
fn command_definition_is_consistent() {
    drivemirror::cli::clap_command().debug_assert();
}

#[test]
fn list_succeeds_with_and_without_drives() {
    let empty = Media::new(&[]);
    empty.run(&["list"]).expect("empty list");

    let media = Media::new(&["ALPHA", "BRAVO"]);
    media.run(&["list", "--json"]).expect("json list");
}

#[test]
fn list_shows_invalid_record_as_unassigned_with_warning() {
    let drives = vec![
        Drive::assigned("/media/m", Record::new("g", Role::Master).unwrap()),
        Drive::new(
            "/media/odd",
            Association::Invalid("unrecognized role \"owner\"".into()),
        ),
    ];
    let out = render(&drives);

    let odd = out
        .lines()
        .position(|l| l.contains("/media/odd"))
        .expect("invalid drive listed");
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines[odd].contains("unassigned (!)"), "{out}");
    assert!(lines[odd + 1].contains("warning: unrecognized metadata"));
    assert!(lines[odd + 1].contains("owner"));
    assert!(out.contains("group g: m -> <no backups>"));

    // The same drive through the command; its record is left as found.
    let media = Media::new(&["ODD"]);
    fs::write(media.drive("ODD").join(METADATA_FILE), b"role=owner").unwrap();
    media.run(&["list"]).expect("list with invalid record");
    assert_eq!(
        b"role=owner".to_vec(),
        fs::read(media.drive("ODD").join(METADATA_FILE)).unwrap()
    );
}

#[test]
fn list_of_unmounted_drive_fails() {
    let media = Media::new(&["ALPHA"]);
    let elsewhere = media.scratch.path().join("not-a-drive");
    fs::create_dir_all(&elsewhere).unwrap();

    let err = media
        .run(&["list", "--drive", elsewhere.to_str().unwrap()])
        .expect_err("unmounted drive must fail");
    assert!(matches!(error_of(&err), Error::NotMounted(_)));
}

#[test]
fn associate_toggles_write_one_group() {
    let media = Media::new(&["ALPHA", "BRAVO", "CHARLIE"]);
    let (a, b, c) = (media.drive("ALPHA"), media.drive("BRAVO"), media.drive("CHARLIE"));

    media
        .run(&[
            "associate",
            "--toggle",
            a.to_str().unwrap(),
            "--toggle",
            b.to_str().unwrap(),
            "--yes",
        ])
        .expect("associate");

    let master = record(&a);
    let backup = record(&b);
    assert_eq!(Role::Master, master.role);
    assert_eq!(Role::Backup, backup.role);
    assert_eq!(master.set_id, backup.set_id);
    assert_eq!(RecordLookup::NotFound, FileRecordStore.read(&c).unwrap());

    // A later run can add C to the same group by name.
    media
        .run(&[
            "associate",
            "--group",
            master.set_id.as_str(),
            "--toggle",
            c.to_str().unwrap(),
            "--yes",
        ])
        .expect("join group");
    assert_eq!(master.set_id, record(&c).set_id);
    assert_eq!(master.set_id, record(&a).set_id);
}

#[test]
fn associate_refuses_invalid_metadata_without_acknowledgement() {
    let media = Media::new(&["ODD"]);
    let odd = media.drive("ODD");
    fs::write(odd.join(METADATA_FILE), b"{\"role\":\"owner\"}").unwrap();

    let err = media
        .run(&["associate", "--toggle", odd.to_str().unwrap(), "--yes"])
        .expect_err("invalid metadata must not be overwritten");
    assert!(matches!(error_of(&err), Error::InvalidMetadata { .. }));
    assert_eq!(
        b"{\"role\":\"owner\"}".to_vec(),
        fs::read(odd.join(METADATA_FILE)).unwrap()
    );

    media
        .run(&[
            "associate",
            "--toggle",
            odd.to_str().unwrap(),
            "--acknowledge-invalid",
            "--yes",
        ])
        .expect("acknowledged overwrite");
    assert_eq!(Role::Master, record(&odd).role);
}

#[test]
fn associate_unknown_toggle_path_is_a_cli_error() {
    let media = Media::new(&["ALPHA"]);
    let err = media
        .run(&["associate", "--toggle", "/nowhere", "--yes"])
        .expect_err("unknown drive");
    assert!(matches!(error_of(&err), Error::Cli(_)));
}

#[test]
fn sync_unknown_group_is_a_cli_error() {
    let media = Media::new(&["ALPHA"]);
    let err = media
        .run(&["sync", "--group", "no-such-group", "--yes"])
        .expect_err("unknown group");
    assert!(matches!(
        error_of(&err),
        Error::Cli(msg) if msg.contains("no-such-group")
    ));
}

#[test]
fn sync_without_masters_does_nothing() {
    let media = Media::new(&["ALPHA"]);
    media
        .run(&["sync", "--estimate-only"])
        .expect("nothing to sync");
    assert!(!media.drive("ALPHA").join(METADATA_FILE).exists());
}
