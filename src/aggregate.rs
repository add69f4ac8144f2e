//! Folder aggregation shared by the download and upload orchestrators.
//!
//! A folder job's status, progress, size, and speed are never written from
//! engine reports; they are derived here from the folder's children on every
//! reconciliation pass. Both domains map their children into
//! [`ChildSnapshot`] values and apply the same derivation, so the folder
//! rules cannot drift between downloads and uploads.

use crate::types::eta_secs;

/// Domain-neutral view of a child job's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildState {
    /// Terminal success
    Complete,
    /// Terminal failure
    Failed,
    /// Paused by the user
    Paused,
    /// Transferring right now (contributes speed)
    Active,
    /// Accepted but not yet transferring (waiting / pending / hashing)
    Queued,
}

/// Per-child input to folder derivation
#[derive(Clone, Copy, Debug)]
pub struct ChildSnapshot {
    /// Mapped state
    pub state: ChildState,
    /// Size in bytes (0 when unknown)
    pub size: u64,
    /// Progress percentage, 0–100
    pub progress: f64,
    /// Instantaneous speed in bytes/sec
    pub speed: u64,
}

/// Resolved folder-level status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderOutcome {
    /// All children resolved, none failed
    Complete,
    /// All children resolved, at least one failed
    Error,
    /// Some children paused and none actively transferring
    Paused,
    /// Anything else
    Active,
}

/// Derived folder aggregate
#[derive(Clone, Debug, PartialEq)]
pub struct FolderRollup {
    /// Children in terminal success
    pub completed_files: u32,
    /// Children in terminal failure
    pub failed_files: u32,
    /// Sum of child sizes
    pub size: u64,
    /// Weighted progress percentage (completed children count fully,
    /// in-progress children by their own fraction)
    pub progress: f64,
    /// Sum of actively transferring children's speeds
    pub speed: u64,
    /// Estimated seconds to completion, absent when stalled
    pub eta: Option<i64>,
    /// Folder status per the priority rules
    pub outcome: FolderOutcome,
}

/// Derive a folder's aggregate fields from its children.
///
/// `total_files` is the count fixed at enumeration time; the folder
/// resolves to a terminal state only once that many children have resolved.
/// Rows for failed submissions (stub children) count toward `failed`.
pub fn derive_folder(children: &[ChildSnapshot], total_files: u32) -> FolderRollup {
    let completed = children
        .iter()
        .filter(|c| c.state == ChildState::Complete)
        .count() as u32;
    let failed = children
        .iter()
        .filter(|c| c.state == ChildState::Failed)
        .count() as u32;
    let paused = children
        .iter()
        .filter(|c| c.state == ChildState::Paused)
        .count() as u32;
    let active = children
        .iter()
        .filter(|c| c.state == ChildState::Active)
        .count() as u32;

    let size: u64 = children.iter().map(|c| c.size).sum();
    let completed_bytes: f64 = children
        .iter()
        .map(|c| match c.state {
            ChildState::Complete => c.size as f64,
            _ => c.size as f64 * c.progress / 100.0,
        })
        .sum();
    let speed: u64 = children
        .iter()
        .filter(|c| c.state == ChildState::Active)
        .map(|c| c.speed)
        .sum();

    let progress = if size > 0 {
        ((completed_bytes / size as f64) * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    let outcome = if total_files > 0 && completed + failed >= total_files {
        if failed > 0 {
            FolderOutcome::Error
        } else {
            FolderOutcome::Complete
        }
    } else if paused > 0 && active == 0 {
        FolderOutcome::Paused
    } else {
        FolderOutcome::Active
    };

    let eta = if outcome == FolderOutcome::Active {
        eta_secs(size, completed_bytes as u64, speed)
    } else {
        None
    };

    FolderRollup {
        completed_files: completed,
        failed_files: failed,
        size,
        progress,
        speed: if outcome == FolderOutcome::Active {
            speed
        } else {
            0
        },
        eta,
        outcome,
    }
}
