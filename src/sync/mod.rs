//! Mirroring a master onto its backups: transfer tool seam, space
//! admission, and the confirmation-gated sync pass.

pub mod admission;
pub mod orchestrator;
pub mod transfer;

pub use admission::{estimate, Decision, DiskSpace, Estimate, FreeSpace};
pub use orchestrator::{
    BackupOutcome, BackupReport, ConfirmStage, MasterReport, Orchestrator, PassOutcome, SyncOptions,
};
pub use transfer::{exclusion_set, DiffReport, Rsync, TransferEngine};
