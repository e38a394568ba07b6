//! Posting interface shared by everything that accepts tasks

use crate::task::Closure;
use std::time::{Duration, Instant};

/// Something that accepts work to run on a message loop
///
/// Implementations must be callable from any thread.
pub trait TaskRunner: Send + Sync {
    /// Post work to run as soon as possible
    fn post_task(&self, work: Closure);

    /// Post work to run at or after `target_time`
    fn post_task_for_time(&self, work: Closure, target_time: Instant);

    /// Post work to run once `delay` has elapsed
    fn post_delayed_task(&self, work: Closure, delay: Duration);

    /// Whether the calling thread is the one that runs posted tasks
    fn runs_tasks_on_current_thread(&self) -> bool;
}
