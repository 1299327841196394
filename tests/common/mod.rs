//! Deterministic single-threaded executor for driving jobs in tests.
//!
//! Channel-driven: spawned tasks sit in a ready queue, and wakers push their
//! task back onto the queue, so a test advances the world by draining the
//! queue and can observe every intermediate state in between.

use futures::future::{BoxFuture, FutureExt};
use futures::task::{waker_ref, ArcWake, FutureObj, Spawn, SpawnError};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::task::Context;

// Plenty for tests; sync_channel just needs a bound.
const MAX_QUEUED_TASKS: usize = 10_000;

pub fn tick_executor() -> (TickExecutor, TickSpawner) {
    let (task_sender, ready_queue) = sync_channel(MAX_QUEUED_TASKS);
    (
        TickExecutor { ready_queue },
        TickSpawner {
            task_sender: Mutex::new(task_sender),
        },
    )
}

pub struct TickExecutor {
    ready_queue: Receiver<Arc<TickTask>>,
}

impl TickExecutor {
    /// Polls ready tasks until the queue drains. Returns false once every
    /// spawner handle is gone.
    pub fn run_until_idle(&self) -> bool {
        loop {
            match self.ready_queue.try_recv() {
                Ok(task) => {
                    let mut future_slot = task.future.lock().unwrap();
                    if let Some(mut future) = future_slot.take() {
                        let waker = waker_ref(&task);
                        let context = &mut Context::from_waker(&*waker);
                        if future.as_mut().poll(context).is_pending() {
                            *future_slot = Some(future);
                        }
                    }
                }
                Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }
}

pub struct TickSpawner {
    task_sender: Mutex<SyncSender<Arc<TickTask>>>,
}

/// A future that reschedules itself onto the ready queue when woken.
struct TickTask {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    task_sender: SyncSender<Arc<TickTask>>,
}

impl ArcWake for TickTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let cloned = arc_self.clone();
        // The executor may already be gone when a straggler waker fires.
        let _ = arc_self.task_sender.send(cloned);
    }
}

impl Spawn for TickSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        let sender = self.task_sender.lock().unwrap();
        let task = Arc::new(TickTask {
            future: Mutex::new(Some(future.boxed())),
            task_sender: sender.clone(),
        });
        sender.send(task).map_err(|_| SpawnError::shutdown())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
