use futures::future::AbortHandle;
use futures::task::Spawn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Handle to the dispatcher a job body runs on.
///
/// Opaque to the core: it is only ever passed through to the substrate's
/// submission capability. Any executor implementing [`Spawn`] works, e.g.
/// `futures::executor::ThreadPool`.
pub type ExecutionContext = Arc<dyn Spawn + Send + Sync>;

/// The scheduling scope a [`DeferredJob`](crate::DeferredJob) belongs to.
///
/// A scope bundles the default execution context with the structured
/// cancellation linkage between its jobs: every job started under a scope
/// registers its cancellation handle here, and a job that ends up cancelled
/// re-raises the cancellation into the scope, which cancels its remaining
/// siblings. Cancellation of a scope is monotonic; a cancelled scope never
/// runs new work.
///
/// Cloning a `Scope` produces another handle to the same scope, not a child
/// scope.
#[derive(Clone)]
pub struct Scope {
    context: ExecutionContext,
    state: Arc<ScopeState>,
}

/// Cancellation linkage shared between a scope and its jobs.
pub(crate) struct ScopeState {
    cancelled: AtomicBool,
    children: Mutex<Vec<AbortHandle>>,
}

impl Scope {
    /// Creates a scope that submits work to `spawner` by default.
    pub fn new<S>(spawner: S) -> Scope
    where
        S: Spawn + Send + Sync + 'static,
    {
        Scope {
            context: Arc::new(spawner),
            state: Arc::new(ScopeState {
                cancelled: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The scope's default execution context.
    pub fn context(&self) -> ExecutionContext {
        self.context.clone()
    }

    /// Requests cooperative cancellation of every job started under this
    /// scope, current and future. Idempotent.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Whether this scope has been cancelled, either directly or by a
    /// cancelled child re-raising into it.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub(crate) fn state(&self) -> Arc<ScopeState> {
        self.state.clone()
    }
}

impl ScopeState {
    /// Registers a started job's abort handle with the scope.
    ///
    /// If the scope is already cancelled the handle is aborted on the spot,
    /// so the job completes cancelled on its first poll.
    pub(crate) fn adopt(&self, handle: AbortHandle) {
        let mut children = self.children.lock().unwrap();
        if self.cancelled.load(Ordering::Acquire) {
            handle.abort();
        }
        children.push(handle);
    }

    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Holding the lock while aborting orders this against concurrent
        // adopt() calls: a child registered after the flag flips is aborted
        // by adopt itself.
        let children = self.children.lock().unwrap();
        debug!("cancelling scope with {} registered jobs", children.len());
        for child in children.iter() {
            child.abort();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
