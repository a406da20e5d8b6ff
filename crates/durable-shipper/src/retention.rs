//! Checkpoint placement and buffer file deletion planning.
//!
//! Planning is kept free of I/O so the reader can apply a plan and tests can
//! inspect one directly.

use crate::checkpoint::Checkpoint;
use std::path::PathBuf;

/// Outcome of a planning step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Checkpoint to move to, or `None` to stay where we are.
    pub checkpoint: Option<Checkpoint>,
    /// Files scheduled for deletion, oldest first.
    pub delete: Vec<PathBuf>,
}

/// Index of the oldest file inside the retained window.
pub fn window_start(file_count: usize, retained: Option<usize>) -> usize {
    match retained {
        Some(keep) if file_count > keep => file_count - keep,
        _ => 0,
    }
}

/// Derive a checkpoint when none is stored (or the stored one is stale).
///
/// Starts at the oldest retained file; everything older is scheduled for
/// deletion.
pub fn plan_fresh(files: &[PathBuf], retained: Option<usize>) -> RetentionPlan {
    if files.is_empty() {
        return RetentionPlan::default();
    }

    let start = window_start(files.len(), retained);
    RetentionPlan {
        checkpoint: Some(Checkpoint::start_of(&files[start])),
        delete: files[..start].to_vec(),
    }
}

/// Decide where an idle reader goes next.
///
/// - A checkpoint naming a file absent from `files` restarts at the oldest
///   retained file.
/// - A checkpoint behind the retained window is relocated to its oldest file.
/// - Otherwise the reader rolls to the lexically-next file once `is_settled`
///   confirms the current file stopped growing.
///
/// Files older than the new position are scheduled for deletion, except the
/// file the checkpoint referenced when the step began. The newest file is
/// never scheduled.
pub fn plan_advance<F>(
    files: &[PathBuf],
    current: &Checkpoint,
    retained: Option<usize>,
    is_settled: F,
) -> RetentionPlan
where
    F: FnOnce(&Checkpoint) -> bool,
{
    if files.is_empty() {
        return RetentionPlan::default();
    }

    let start = window_start(files.len(), retained);

    let Some(index) = files.iter().position(|file| *file == current.file) else {
        return RetentionPlan {
            checkpoint: Some(Checkpoint::start_of(&files[start])),
            delete: files[..start].to_vec(),
        };
    };

    let target = if index < start {
        start
    } else if index + 1 < files.len() && is_settled(current) {
        index + 1
    } else {
        index
    };

    let checkpoint = (target != index).then(|| Checkpoint::start_of(&files[target]));
    let delete = files[..target]
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, file)| file.clone())
        .collect();

    RetentionPlan { checkpoint, delete }
}
