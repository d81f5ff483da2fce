//! Background file jobs.
//!
//! A [`FileJob`] walks a [`FileSet`](stowage_file_ops::FileSet) on its own
//! thread while pollers read its progress. [`ArchiveJob`] packs the set into
//! one archive through a [`DestinationWriter`](stowage_archive::DestinationWriter),
//! asking a [`DecisionProvider`] when something goes wrong.

mod archive_job;
mod decision;
mod engine;
mod handle;
mod job;

#[cfg(test)]
mod testing;

pub use archive_job::ArchiveJob;
pub use decision::{
    ChannelDecisionProvider, DecisionAction, DecisionKind, DecisionProvider, DecisionRequest,
    DecisionResponse, PendingDecision, decision_channel,
};
pub use engine::{InputStream, JobContext, JobEngine, JobSource};
pub use handle::JobHandle;
pub use job::{FileJob, JobOutcome, run};

/// Errors from running jobs.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("cannot spawn job thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("job thread panicked: {0}")]
    Panicked(String),

    #[error("job was already joined")]
    AlreadyJoined,
}
