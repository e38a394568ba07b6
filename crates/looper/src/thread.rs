//! Dedicated thread running a message loop

use crate::config::LoopConfig;
use crate::error::LoopError;
use crate::incoming::IncomingTaskQueue;
use crate::message_loop::{post_quit_task, MessageLoop};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A named OS thread that owns a message loop
///
/// The incoming queue is created before the thread starts, so work can be
/// posted right away; it runs once the loop is up. Dropping a `LoopThread`
/// stops and joins it.
pub struct LoopThread {
    /// Thread name
    name: String,

    /// Queue drained by the thread's loop
    task_runner: Arc<IncomingTaskQueue>,

    /// Thread handle (None once joined)
    handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Start a loop thread with default configuration
    pub fn spawn(name: impl Into<String>) -> Result<Self, LoopError> {
        Self::spawn_with_config(name, LoopConfig::default())
    }

    /// Start a loop thread built from `config`
    pub fn spawn_with_config(
        name: impl Into<String>,
        mut config: LoopConfig,
    ) -> Result<Self, LoopError> {
        let name = name.into();
        let task_runner = config
            .incoming
            .clone()
            .unwrap_or_else(|| IncomingTaskQueue::with_clock(config.clock.clone()));
        config.incoming = Some(task_runner.clone());
        if config.label.is_none() {
            config.label = Some(name.clone());
        }

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let message_loop = MessageLoop::with_config(config);
            message_loop.run();
        })?;
        tracing::debug!(name = %name, "message loop thread started");

        Ok(Self {
            name,
            task_runner,
            handle: Some(handle),
        })
    }

    /// Get the thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue used to post work to the thread's loop
    pub fn task_runner(&self) -> Arc<IncomingTaskQueue> {
        self.task_runner.clone()
    }

    /// Stop the loop and wait for the thread to exit
    pub fn join(mut self) -> Result<(), LoopError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), LoopError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        post_quit_task(&self.task_runner);
        handle
            .join()
            .map_err(|_| LoopError::ThreadPanicked(self.name.clone()))?;
        tracing::debug!(name = %self.name, "message loop thread stopped");
        Ok(())
    }
}

impl fmt::Debug for LoopThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopThread")
            .field("name", &self.name)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "message loop thread did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TaskRunner;
    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn test_runs_posted_work_on_named_thread() {
        let loop_thread = LoopThread::spawn("looper-test").unwrap();
        let (tx, rx) = channel::bounded(1);

        loop_thread.task_runner().post_task(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(name.as_deref(), Some("looper-test"));
        loop_thread.join().unwrap();
    }

    #[test]
    fn test_runs_tasks_on_current_thread_from_inside() {
        let loop_thread = LoopThread::spawn("looper-affinity").unwrap();
        let runner = loop_thread.task_runner();
        let (tx, rx) = channel::bounded(1);

        let inner_runner = runner.clone();
        runner.post_task(Box::new(move || {
            tx.send(inner_runner.runs_tasks_on_current_thread()).unwrap();
        }));

        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        assert!(!runner.runs_tasks_on_current_thread());
        loop_thread.join().unwrap();
    }

    #[test]
    fn test_join_reports_task_panic() {
        let loop_thread = LoopThread::spawn("looper-panics").unwrap();
        loop_thread
            .task_runner()
            .post_task(Box::new(|| panic!("task failed")));

        assert!(matches!(
            loop_thread.join(),
            Err(LoopError::ThreadPanicked(name)) if name == "looper-panics"
        ));
    }

    #[test]
    fn test_drop_stops_thread() {
        let loop_thread = LoopThread::spawn("looper-drop").unwrap();
        let runner = loop_thread.task_runner();
        drop(loop_thread);

        // The loop is gone, so the queue is detached
        assert!(!runner.has_delegate());
    }
}
