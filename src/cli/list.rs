//! Implementation of `drivemirror list` subcommand.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use super::Settings;
use crate::{
    drive::{discover, discover_strict, group_by_set_id, Drive, FileRecordStore, Role},
    Result,
};

#[derive(Debug, Clone, Args, Default)]
pub struct ListArgs {
    /// Only inspect these drives; each must be a mounted, readable drive
    #[arg(long = "drive")]
    pub drives: Vec<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct DriveView {
    path: PathBuf,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_metadata: Option<String>,
}

impl From<&Drive> for DriveView {
    fn from(drive: &Drive) -> Self {
        Self {
            path: drive.path.clone(),
            role: drive.role(),
            set_id: drive.set_id().map(str::to_string),
            last_modified: drive.last_modified(),
            invalid_metadata: drive.invalid_reason().map(str::to_string),
        }
    }
}

pub fn execute(settings: &Settings, args: ListArgs) -> Result<()> {
    let source = settings.drive_source();
    let store = FileRecordStore;
    let drives = if args.drives.is_empty() {
        discover(&source, &store)?
    } else {
        discover_strict(&source, &store, &args.drives)?
    };

    if args.json {
        let views: Vec<DriveView> = drives.iter().map(DriveView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    print!("{}", render(&drives));
    Ok(())
}

/// Table of drives followed by the groups they form.
pub fn render(drives: &[Drive]) -> String {
    if drives.is_empty() {
        return "No mounted drives found.\n".to_string();
    }

    let mut out = String::new();
    for (i, drive) in drives.iter().enumerate() {
        let role = match drive.invalid_reason() {
            Some(_) => "unassigned (!)".to_string(),
            None => drive.role().to_string(),
        };
        out.push_str(&format!("{:>3}  {:<16} {}", i + 1, role, drive.path.display()));
        if let Some(set_id) = drive.set_id() {
            out.push_str(&format!("  [{set_id}]"));
        }
        if let Some(ts) = drive.last_modified() {
            out.push_str(&format!("  {}", ts.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        out.push('\n');
        if let Some(reason) = drive.invalid_reason() {
            out.push_str(&format!("     warning: unrecognized metadata ({reason})\n"));
        }
    }

    let groups = group_by_set_id(drives);
    if !groups.is_empty() {
        out.push('\n');
    }
    for group in groups {
        let master = group
            .master
            .as_ref()
            .map(Drive::label)
            .unwrap_or_else(|| "<no master mounted>".into());
        let backups: Vec<String> = group.backups.iter().map(Drive::label).collect();
        out.push_str(&format!(
            "group {}: {} -> {}\n",
            group.set_id,
            master,
            if backups.is_empty() {
                "<no backups>".to_string()
            } else {
                backups.join(", ")
            }
        ));
    }
    out
}
