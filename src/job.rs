use crate::error::{BoxError, JobError, JobFailure, PanicError};
use crate::scope::{ExecutionContext, Scope, ScopeState};
use futures::channel::oneshot;
use futures::future::{
    AbortHandle, AbortRegistration, Abortable, Aborted, BoxFuture, FutureExt, Shared, TryFutureExt,
};
use futures::task::FutureObj;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, debug_span};
use tracing_futures::Instrument;

/// Jobs are numbered in construction order; the id tags the job's log span.
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);

/// Whether a job is submitted inside its constructor or by an explicit
/// [`DeferredJob::start`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    Eager,
    Lazy,
}

/// The recorded result of one job execution.
type Outcome<T> = Result<T, JobFailure>;

/// Everything `start` hands off to the wrapper task. Present exactly while
/// the job is unstarted.
struct Unstarted<T> {
    body: BoxFuture<'static, Result<T, BoxError>>,
    completion_tx: oneshot::Sender<()>,
    registration: AbortRegistration,
}

/// A handle to one deferred computation.
///
/// The body is submitted to an execution context either eagerly (inside the
/// constructor) or when [`start`](DeferredJob::start) is called. Whatever the
/// body does — return a value, fail, get cancelled, panic — is captured as
/// the job's single outcome and replayed to every [`join`](DeferredJob::join)
/// caller. A failure is only ever observed through `join`; a caller that
/// never joins never sees it. Cancellation is the one exception: a cancelled
/// job also re-raises the cancellation into its [`Scope`] so siblings receive
/// the signal.
///
/// Dropping the handle does **not** cancel the job; it only discards the
/// ability to observe its outcome.
pub struct DeferredJob<T> {
    id: u64,
    context: ExecutionContext,
    scope: Arc<ScopeState>,
    start_mode: Start,
    started: AtomicBool,
    consumed: AtomicBool,
    unstarted: Mutex<Option<Unstarted<T>>>,
    outcome: Arc<Mutex<Option<Outcome<T>>>>,
    completion: Shared<oneshot::Receiver<()>>,
    abort: AbortHandle,
}

impl<T: Send + 'static> DeferredJob<T> {
    /// Creates a job running `body` on `context` under `scope`.
    ///
    /// With [`Start::Eager`] the body is submitted before `new` returns, so
    /// submission errors surface here; with [`Start::Lazy`] nothing runs
    /// until [`start`](DeferredJob::start).
    pub fn new<F, E>(
        scope: &Scope,
        context: ExecutionContext,
        body: F,
        start_mode: Start,
    ) -> Result<DeferredJob<T>, JobError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let (completion_tx, completion_rx) = oneshot::channel();
        let (abort, registration) = AbortHandle::new_pair();
        let job = DeferredJob {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            context,
            scope: scope.state(),
            start_mode,
            started: AtomicBool::new(false),
            consumed: AtomicBool::new(false),
            unstarted: Mutex::new(Some(Unstarted {
                body: body.map_err(Into::into).boxed(),
                completion_tx,
                registration,
            })),
            outcome: Arc::new(Mutex::new(None)),
            completion: completion_rx.shared(),
            abort,
        };
        if job.start_mode == Start::Eager {
            job.start()?;
        }
        Ok(job)
    }

    /// Submits the body for execution. May only be called once per job.
    ///
    /// The `started` flag flips over exactly one compare-and-swap, so when
    /// two callers race, one submits and the other gets
    /// [`JobError::AlreadyStarted`]. An eager job is started by its
    /// constructor; calling `start` on it again is the same usage error.
    pub fn start(&self) -> Result<(), JobError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JobError::AlreadyStarted);
        }
        let Unstarted {
            body,
            completion_tx,
            registration,
        } = self
            .unstarted
            .lock()
            .unwrap()
            .take()
            .expect("started flag was clear but the body is gone");

        let outcome = self.outcome.clone();
        let scope = self.scope.clone();
        // Cancellation cuts in at the body's next suspension point; panics
        // are contained so the executing task never unwinds into the
        // substrate.
        let guarded = Abortable::new(AssertUnwindSafe(body).catch_unwind(), registration);
        let wrapper = async move {
            let recorded: Outcome<T> = match guarded.await {
                Err(Aborted) => Err(JobFailure::Cancelled),
                Ok(Err(panic)) => Err(JobFailure::Failed(Arc::new(PanicError::from_payload(
                    panic.as_ref(),
                )))),
                Ok(Ok(Err(error))) => Err(JobFailure::Failed(Arc::from(error))),
                Ok(Ok(Ok(value))) => Ok(value),
            };
            let cancelled = matches!(recorded, Err(JobFailure::Cancelled));
            debug!(ok = recorded.is_ok(), cancelled, "job finished");
            *outcome.lock().unwrap() = Some(recorded);
            if cancelled {
                // Cancellation is the one failure that escapes the capture
                // boundary: the scope must observe it so siblings get the
                // signal. Domain errors stay recorded until someone joins.
                scope.cancel();
            }
            let _ = completion_tx.send(());
        };

        debug!(id = self.id, "submitting job");
        self.scope.adopt(self.abort.clone());
        let task = FutureObj::from(wrapper.instrument(debug_span!("deferred_job", id = self.id)).boxed());
        self.context.spawn_obj(task)?;
        Ok(())
    }

    /// Requests cooperative cancellation of the running body.
    ///
    /// A no-op before the job is started (cancellation is not queued for a
    /// later start) and after it has completed. Idempotent; completion is
    /// asynchronous relative to this call.
    pub fn cancel(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        if self.is_completed() {
            return;
        }
        debug!(id = self.id, "requesting job cancellation");
        self.abort.abort();
    }

    /// Whether the job has finished, by success, failure, or cancellation.
    /// False for a job that was never started.
    pub fn is_completed(&self) -> bool {
        self.outcome.lock().unwrap().is_some()
    }

    /// Whether the job has been submitted for execution.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The start mode fixed at construction.
    pub fn start_mode(&self) -> Start {
        self.start_mode
    }

    /// The job's submission number, as used in its log span.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspends until the job's outcome is available, then returns the
    /// success value or replays the captured failure.
    ///
    /// The first caller waits on the completion signal and marks the job
    /// consumed; later and concurrent callers observe the identical recorded
    /// outcome without re-joining or re-running anything, which is why `T`
    /// must be `Clone` here. Fails with [`JobError::NotStarted`] if the job
    /// has not been started — including when a racing `start` has not yet
    /// flipped the started flag; that race is defined, never lost: a join
    /// either errors out immediately or waits for the submitted task.
    pub async fn join(&self) -> Result<T, JobError>
    where
        T: Clone,
    {
        if !self.consumed.load(Ordering::Acquire) {
            if !self.started.load(Ordering::Acquire) {
                return Err(JobError::NotStarted);
            }
            let _ = self.completion.clone().await;
            self.consumed.store(true, Ordering::Release);
        }
        let outcome = self.outcome.lock().unwrap();
        match &*outcome {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(failure)) => Err(JobError::Failure(failure.clone())),
            // The completion sender was dropped without a send: the executor
            // discarded the task before it could finish.
            None => Err(JobError::Failure(JobFailure::Cancelled)),
        }
    }
}

impl<T> fmt::Debug for DeferredJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredJob")
            .field("id", &self.id)
            .field("start_mode", &self.start_mode)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("completed", &self.outcome.lock().unwrap().is_some())
            .finish()
    }
}

impl Scope {
    /// Submits `body` as an eagerly started job on this scope's default
    /// context. The "fire now, check later" entry point: any failure stays
    /// captured in the returned handle until it is joined.
    pub fn safe_async<T, F, E>(&self, body: F) -> Result<DeferredJob<T>, JobError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        DeferredJob::new(self, self.context(), body, Start::Eager)
    }

    /// Like [`safe_async`](Scope::safe_async), but the job stays idle until
    /// [`DeferredJob::start`] is called.
    pub fn safe_async_lazy<T, F, E>(&self, body: F) -> Result<DeferredJob<T>, JobError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        DeferredJob::new(self, self.context(), body, Start::Lazy)
    }
}
