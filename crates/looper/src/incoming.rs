//! Incoming task queue (the loop's mailbox)
//!
//! Any thread may post into an [`IncomingTaskQueue`]. The owning loop takes
//! the whole staged batch at once with [`IncomingTaskQueue::take_all`].
//!
//! A single mutex guards the staged tasks, the sequence counter and the
//! delegate. It is held only to push or swap the list; the wake request to
//! the delegate is made after the lock is released.
//!
//! Once the delegate is cleared, posts are still accepted but nothing will
//! ever drain them again. They stay in the queue until it is dropped.

use crate::clock::{Clock, MonotonicClock};
use crate::error::LoopError;
use crate::runner::TaskRunner;
use crate::task::{Closure, PendingTask, TargetTime};
use crate::wake::WakeSignal;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Receiver of wake-up requests from an incoming queue
pub trait DrainDelegate: Send + Sync {
    /// Ask the owner to drain the queue soon. Called without the queue lock held.
    fn schedule_drain(&self);
}

impl DrainDelegate for WakeSignal {
    fn schedule_drain(&self) {
        self.signal();
    }
}

/// State behind the queue lock
struct Incoming {
    /// Staged tasks in post order
    tasks: Vec<PendingTask>,
    /// Sequence number for the next post
    next_sequence: u64,
    /// Non-owning link to the loop that drains this queue
    delegate: Option<Weak<dyn DrainDelegate>>,
    /// Thread that runs drained tasks, while attached
    owner: Option<ThreadId>,
    /// Set once a delegate has been cleared
    detached: bool,
}

/// Thread-safe staging area for tasks bound for one message loop
pub struct IncomingTaskQueue {
    inner: Mutex<Incoming>,
    /// Used to resolve delayed posts into target times
    clock: Arc<dyn Clock>,
}

impl IncomingTaskQueue {
    /// Create an empty queue using the monotonic clock
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(MonotonicClock))
    }

    /// Create an empty queue that resolves delays against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Incoming {
                tasks: Vec::new(),
                next_sequence: 0,
                delegate: None,
                owner: None,
                detached: false,
            }),
            clock,
        })
    }

    /// Stage `work` to run at `target_time`.
    ///
    /// The sequence number is assigned under the lock, so tasks with equal
    /// target times run in the order their posts acquired it.
    pub fn post(&self, work: Closure, target_time: TargetTime) {
        let delegate = {
            let mut inner = self.inner.lock();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.tasks.push(PendingTask::new(work, target_time, sequence));
            if inner.delegate.is_none() && inner.detached {
                tracing::debug!(sequence, "task posted to a detached incoming queue");
            }
            inner.delegate.clone()
        };

        if let Some(delegate) = delegate.and_then(|weak| weak.upgrade()) {
            delegate.schedule_drain();
        }
    }

    /// Take every staged task, in post order, leaving the queue empty
    pub fn take_all(&self) -> Vec<PendingTask> {
        std::mem::take(&mut self.inner.lock().tasks)
    }

    /// Attach the loop that drains this queue.
    ///
    /// Fails if another loop is already attached.
    pub fn init_delegate(&self, delegate: &Arc<dyn DrainDelegate>) -> Result<(), LoopError> {
        let mut inner = self.inner.lock();
        if inner.delegate.is_some() {
            return Err(LoopError::DelegateAttached);
        }
        inner.delegate = Some(Arc::downgrade(delegate));
        inner.owner = Some(thread::current().id());
        inner.detached = false;
        Ok(())
    }

    /// Detach the loop. Later posts are kept but never drained.
    pub fn clear_delegate(&self) {
        let mut inner = self.inner.lock();
        inner.delegate = None;
        inner.owner = None;
        inner.detached = true;
    }

    /// Whether a loop is currently attached
    pub fn has_delegate(&self) -> bool {
        self.inner.lock().delegate.is_some()
    }

    /// Number of staged tasks
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }
}

impl TaskRunner for IncomingTaskQueue {
    fn post_task(&self, work: Closure) {
        self.post(work, TargetTime::Immediate);
    }

    fn post_task_for_time(&self, work: Closure, target_time: Instant) {
        self.post(work, TargetTime::At(target_time));
    }

    fn post_delayed_task(&self, work: Closure, delay: Duration) {
        self.post(work, TargetTime::At(self.clock.now() + delay));
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        self.inner.lock().owner == Some(thread::current().id())
    }
}

impl fmt::Debug for IncomingTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("IncomingTaskQueue")
            .field("staged", &inner.tasks.len())
            .field("next_sequence", &inner.next_sequence)
            .field("attached", &inner.delegate.is_some())
            .finish()
    }
}
