//! Deferred job handles for futures-based executors.
//!
//! A [`DeferredJob`] wraps one unit of asynchronous work submitted to an
//! external executor. Failures raised while the body runs do not crash the
//! producing task; they are captured as the job's single outcome and only
//! surface when someone calls [`DeferredJob::join`]. Cancellation is kept
//! distinct from ordinary failure: a cancelled job records a cancellation
//! outcome *and* re-raises the signal into its [`Scope`], so structured
//! cancellation keeps propagating to sibling jobs.
//!
//! The crate does not schedule anything itself. Any executor implementing
//! [`futures::task::Spawn`] serves as the substrate:
//!
//! ```
//! use futures::executor::ThreadPool;
//! use safe_async::Scope;
//!
//! let scope = Scope::new(ThreadPool::new().unwrap());
//! let job = scope
//!     .safe_async(async { Ok::<_, std::convert::Infallible>("Hello 1") })
//!     .unwrap();
//! let greeting = futures::executor::block_on(job.join()).unwrap();
//! assert_eq!(greeting, "Hello 1");
//! ```

mod error;
mod job;
mod scope;

pub use error::{BoxError, JobError, JobFailure, PanicError};
pub use job::{DeferredJob, Start};
pub use scope::{ExecutionContext, Scope};
