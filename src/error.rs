use futures::task::SpawnError;
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type accepted from job bodies.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by [`DeferredJob`](crate::DeferredJob) operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// `start` was called on a job that has already been started.
    #[error("job has already been started")]
    AlreadyStarted,
    /// `join` was called before the job was started.
    #[error("job has not been started yet")]
    NotStarted,
    /// The execution context refused the submission.
    #[error("error submitting job to the executor: {0}")]
    Spawn(#[from] SpawnError),
    /// The job finished with a captured failure, replayed here.
    #[error(transparent)]
    Failure(#[from] JobFailure),
}

impl JobError {
    /// True if this error reports a cancelled job.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Failure(JobFailure::Cancelled))
    }
}

/// The failure half of a recorded job outcome.
///
/// Stored once by the executing task and replayed by reference to every
/// `join` caller, so cloning never re-runs anything.
#[derive(Error, Debug, Clone)]
pub enum JobFailure {
    /// The job was cancelled before its body completed.
    #[error("job was cancelled")]
    Cancelled,
    /// The body failed with a domain error.
    #[error(transparent)]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),
}

/// A body panic, captured so the executing task never unwinds into the
/// substrate.
#[derive(Debug)]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> PanicError {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_string()
        };
        PanicError { message }
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job panicked: {}", self.message)
    }
}

impl StdError for PanicError {}
