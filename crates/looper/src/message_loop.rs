//! Per-thread message loop
//!
//! A [`MessageLoop`] runs posted tasks on the thread that created it, in
//! `(target_time, sequence)` order. Other threads hand it work through its
//! [`IncomingTaskQueue`]; the loop drains that queue into a local heap, runs
//! everything that is due, then sleeps on its [`WakeSignal`] until the next
//! target time or until a new post wakes it.
//!
//! When it falls behind, the loop does not read the clock before every task.
//! It caches the last reading in `recent_time` and only reads the clock again
//! once the earliest task is later than the cached value, so a backlog of
//! overdue delayed tasks costs one clock read rather than one per task.

use crate::clock::Clock;
use crate::config::LoopConfig;
use crate::error::{fatal, LoopError};
use crate::incoming::{DrainDelegate, IncomingTaskQueue};
use crate::registry;
use crate::task::{PendingTask, TargetTime};
use crate::wake::WakeSignal;
use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Loop state shared by the owner and its handles. Only touched on the
/// owning thread.
pub(crate) struct LoopInner {
    /// Mailbox other threads post into
    incoming: Arc<IncomingTaskQueue>,

    /// Wakes the loop when a post arrives
    event: Arc<WakeSignal>,

    /// Drained tasks, earliest first
    queue: RefCell<BinaryHeap<PendingTask>>,

    /// Last clock reading (Immediate = never read)
    recent_time: Cell<TargetTime>,

    /// Inside `run` or `run_until_idle`
    is_running: Cell<bool>,

    /// `quit_now` was called during the current run
    should_quit: Cell<bool>,

    /// The owning `MessageLoop` has been dropped
    destroyed: Cell<bool>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Label for log events
    label: Option<String>,
}

impl LoopInner {
    /// Build loop state without registering or attaching it
    pub(crate) fn new(config: LoopConfig) -> Rc<Self> {
        let incoming = config
            .incoming
            .unwrap_or_else(|| IncomingTaskQueue::with_clock(config.clock.clone()));

        Rc::new(Self {
            incoming,
            event: Arc::new(WakeSignal::new()),
            queue: RefCell::new(BinaryHeap::new()),
            recent_time: Cell::new(TargetTime::Immediate),
            is_running: Cell::new(false),
            should_quit: Cell::new(false),
            destroyed: Cell::new(false),
            clock: config.clock,
            label: config.label,
        })
    }

    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// Mark the loop running, rejecting nested runs
    fn enter(&self) -> RunScope<'_> {
        if self.destroyed.get() {
            fatal(LoopError::Destroyed);
        }
        if self.is_running.get() {
            fatal(LoopError::NestedRun);
        }
        debug_assert!(!self.should_quit.get());
        self.is_running.set(true);
        RunScope { inner: self }
    }

    fn run(&self) {
        let _scope = self.enter();
        tracing::debug!(label = self.label(), "message loop running");

        loop {
            let next_run_time = self.run_ready_tasks();
            if self.should_quit.get() {
                break;
            }

            match next_run_time {
                None => self.event.wait(),
                Some(at) => {
                    let now = self.clock.now();
                    if at > now {
                        self.event.wait_timeout(at - now);
                    }
                }
            }
            tracing::trace!(label = self.label(), "message loop woke");
        }

        tracing::debug!(label = self.label(), "message loop quit");
    }

    fn run_until_idle(&self) {
        let _scope = self.enter();
        loop {
            self.run_ready_tasks();
            if self.should_quit.get() || self.incoming.is_empty() {
                break;
            }
        }
    }

    fn quit_now(&self) {
        if !self.is_running.get() {
            fatal(LoopError::NotRunning);
        }
        self.should_quit.set(true);
    }

    /// Run every due task.
    ///
    /// Returns the target time of the earliest task that is not due yet, or
    /// `None` when the queue is empty (or a quit was requested).
    fn run_ready_tasks(&self) -> Option<Instant> {
        debug_assert!(!self.should_quit.get());
        self.reload_queue();

        while !self.should_quit.get() {
            let task = {
                let mut queue = self.queue.borrow_mut();
                let next_run_time = queue.peek()?.target_time();
                if next_run_time > self.recent_time.get() {
                    let now = TargetTime::At(self.clock.now());
                    self.recent_time.set(now);
                    if next_run_time > now {
                        return next_run_time.deadline();
                    }
                }
                queue.pop()
            };

            // The heap borrow is released before the work runs
            if let Some(task) = task {
                task.run();
            }
        }

        None
    }

    /// Move everything staged in the mailbox into the heap
    fn reload_queue(&self) {
        let batch = self.incoming.take_all();
        if batch.is_empty() {
            return;
        }
        tracing::trace!(label = self.label(), count = batch.len(), "drained incoming tasks");
        self.queue.borrow_mut().extend(batch);
    }

    /// Drop every queued task without running it, in the order they would
    /// have run. Returns how many were dropped.
    fn discard_all(&self) -> usize {
        let mut discarded = 0;
        loop {
            let task = self.queue.borrow_mut().pop();
            match task {
                Some(task) => {
                    drop(task);
                    discarded += 1;
                }
                None => return discarded,
            }
        }
    }
}

/// Resets the run flags when a run ends, including by unwinding out of a task
struct RunScope<'a> {
    inner: &'a LoopInner,
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        self.inner.should_quit.set(false);
        debug_assert!(self.inner.is_running.get());
        self.inner.is_running.set(false);
    }
}

/// Handle to a message loop on the current thread
///
/// Returned by [`MessageLoop::current`]. Handles cannot leave the loop's
/// thread; use [`LoopHandle::task_runner`] to reach the loop from elsewhere.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Rc<LoopInner>,
}

impl LoopHandle {
    /// Run tasks until [`LoopHandle::quit_now`] is called.
    ///
    /// Panics if the loop is already running, or if its `MessageLoop` has
    /// been dropped. A panic raised by a task propagates out of this call and
    /// leaves the loop idle and reusable.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Run every task that is due, without sleeping, then return.
    ///
    /// Keeps going while tasks keep landing in the incoming queue. Same entry
    /// rules as [`LoopHandle::run`].
    pub fn run_until_idle(&self) {
        self.inner.run_until_idle();
    }

    /// Ask the running loop to stop.
    ///
    /// The task that is currently executing finishes; no further task starts
    /// and the loop does not sleep again. Panics if the loop is not running.
    pub fn quit_now(&self) {
        self.inner.quit_now();
    }

    /// Post a task that stops this loop when it runs
    pub fn post_quit_task(&self) {
        post_quit_task(&self.inner.incoming);
    }

    /// Queue used to post work to this loop from any thread
    pub fn task_runner(&self) -> Arc<IncomingTaskQueue> {
        self.inner.incoming.clone()
    }

    /// Whether the loop is inside `run` or `run_until_idle`
    pub fn is_running(&self) -> bool {
        self.inner.is_running.get()
    }

    /// Number of drained tasks waiting for their target time
    pub fn queued_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("label", &self.inner.label)
            .field("is_running", &self.inner.is_running.get())
            .field("queued", &self.inner.queue.borrow().len())
            .finish()
    }
}

/// Post a task to `incoming` that quits whichever loop runs it
pub(crate) fn post_quit_task(incoming: &IncomingTaskQueue) {
    incoming.post(
        Box::new(|| {
            if let Some(current) = MessageLoop::current() {
                current.quit_now();
            }
        }),
        TargetTime::Immediate,
    );
}

/// The message loop owned by the current thread
///
/// At most one exists per thread. Dropping it detaches the incoming queue and
/// discards every task that has not run yet, without running it.
pub struct MessageLoop {
    handle: LoopHandle,
}

impl MessageLoop {
    /// Create a loop with a fresh incoming queue.
    ///
    /// Panics if the thread already has a loop.
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    /// Create a loop that drains an existing incoming queue.
    ///
    /// Tasks already posted to `incoming` run on the first call to `run`.
    pub fn with_incoming(incoming: Arc<IncomingTaskQueue>) -> Self {
        Self::with_config(LoopConfig::default().with_incoming(incoming))
    }

    /// Create a loop from `config`. Panics on any usage violation.
    pub fn with_config(config: LoopConfig) -> Self {
        Self::try_with_config(config).unwrap_or_else(|err| fatal(err))
    }

    /// Create a loop with a fresh incoming queue, reporting violations
    pub fn try_new() -> Result<Self, LoopError> {
        Self::try_with_config(LoopConfig::default())
    }

    /// Create a loop from `config`, reporting violations
    pub fn try_with_config(config: LoopConfig) -> Result<Self, LoopError> {
        let inner = LoopInner::new(config);
        registry::register(&inner)?;

        let delegate: Arc<dyn DrainDelegate> = inner.event.clone();
        if let Err(err) = inner.incoming.init_delegate(&delegate) {
            registry::deregister(&inner)?;
            return Err(err);
        }

        Ok(Self {
            handle: LoopHandle { inner },
        })
    }

    /// The loop registered on the calling thread, if any
    pub fn current() -> Option<LoopHandle> {
        registry::current().map(|inner| LoopHandle { inner })
    }

    /// A cloneable handle to this loop
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MessageLoop {
    type Target = LoopHandle;

    fn deref(&self) -> &LoopHandle {
        &self.handle
    }
}

impl fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageLoop").field(&self.handle).finish()
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        let inner = &self.handle.inner;
        let unwinding = std::thread::panicking();

        if !unwinding {
            if !registry::is_current(inner) {
                fatal(LoopError::WrongThread);
            }
            if inner.is_running.get() {
                fatal(LoopError::DestroyedWhileRunning);
            }
        }

        // Stop wake requests first, then pick up anything still in flight
        inner.incoming.clear_delegate();
        inner.reload_queue();

        let discarded = inner.discard_all();
        inner.destroyed.set(true);

        if registry::deregister(inner).is_err() && !unwinding {
            fatal(LoopError::WrongThread);
        }
        tracing::debug!(label = inner.label(), discarded, "message loop destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TaskRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Monotonic clock that counts its reads
    #[derive(Default)]
    struct CountingClock {
        reads: AtomicUsize,
    }

    impl Clock for CountingClock {
        fn now(&self) -> Instant {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Instant::now()
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> crate::task::Closure) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |marker: u32| -> crate::task::Closure {
            let sink = sink.clone();
            Box::new(move || sink.lock().unwrap().push(marker))
        };
        (log, make)
    }

    #[test]
    fn test_run_ready_tasks_returns_none_when_empty() {
        let message_loop = MessageLoop::new();
        assert_eq!(message_loop.inner.run_ready_tasks(), None);
    }

    #[test]
    fn test_run_ready_tasks_returns_next_deadline() {
        let message_loop = MessageLoop::new();
        let (log, task) = recorder();
        let runner = message_loop.task_runner();
        let later = Instant::now() + Duration::from_secs(60);

        runner.post_task(task(1));
        runner.post_task_for_time(task(2), later);

        assert_eq!(message_loop.inner.run_ready_tasks(), Some(later));
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(message_loop.queued_tasks(), 1);
    }

    #[test]
    fn test_immediate_tasks_skip_clock_reads() {
        let clock = Arc::new(CountingClock::default());
        let message_loop =
            MessageLoop::with_config(LoopConfig::default().with_clock(clock.clone()));
        let (log, task) = recorder();

        for marker in 0..10 {
            message_loop.task_runner().post_task(task(marker));
        }
        message_loop.run_until_idle();

        assert_eq!(log.lock().unwrap().len(), 10);
        assert_eq!(clock.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_overdue_backlog_reads_clock_once() {
        let clock = Arc::new(CountingClock::default());
        let message_loop =
            MessageLoop::with_config(LoopConfig::default().with_clock(clock.clone()));
        let (log, task) = recorder();
        let runner = message_loop.task_runner();

        let base = Instant::now();
        for marker in 0..50 {
            runner.post_task_for_time(
                task(marker),
                base - Duration::from_millis(1) + Duration::from_micros(marker as u64),
            );
        }
        // All targets are at or before `base`, which precedes the first clock read
        message_loop.run_until_idle();

        assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<u32>>());
        assert_eq!(clock.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_quit_stops_remaining_batch() {
        let message_loop = MessageLoop::new();
        let (log, task) = recorder();
        let runner = message_loop.task_runner();

        runner.post_task(task(1));
        message_loop.post_quit_task();
        runner.post_task(task(2));

        message_loop.run();
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(!message_loop.is_running());
        assert_eq!(message_loop.queued_tasks(), 1);
    }

    #[test]
    fn test_destroy_discards_in_execution_order() {
        struct DropMarker(u32, Arc<Mutex<Vec<u32>>>);
        impl Drop for DropMarker {
            fn drop(&mut self) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let dropped = Arc::new(Mutex::new(Vec::new()));
        let ran = Arc::new(AtomicUsize::new(0));
        let message_loop = MessageLoop::new();
        let runner = message_loop.task_runner();
        let base = Instant::now();

        for (marker, offset) in [(3u32, 30u64), (1, 10), (2, 20)] {
            let guard = DropMarker(marker, dropped.clone());
            let ran = ran.clone();
            runner.post_task_for_time(
                Box::new(move || {
                    let _guard = &guard;
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
                base + Duration::from_secs(offset),
            );
        }

        drop(message_loop);
        assert_eq!(*dropped.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!runner.has_delegate());
    }

    #[test]
    fn test_handle_reports_running_state() {
        let message_loop = MessageLoop::new();
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();

        message_loop.task_runner().post_task(Box::new(move || {
            let current = MessageLoop::current().unwrap();
            *sink.lock().unwrap() = Some(current.is_running());
        }));
        message_loop.run_until_idle();

        assert_eq!(*observed.lock().unwrap(), Some(true));
        assert!(!message_loop.is_running());
    }

    #[test]
    #[should_panic(expected = "message loop has been destroyed")]
    fn test_run_after_destroy_is_fatal() {
        let message_loop = MessageLoop::new();
        let handle = message_loop.handle();
        drop(message_loop);
        handle.run();
    }
}
