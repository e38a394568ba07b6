//! Pending tasks and their execution order
//!
//! A [`PendingTask`] is stamped once, when it is posted, with a target time
//! and a sequence number. The pair `(target_time, sequence)` is a total order:
//! earlier targets first, and among equal targets, the one posted first.

use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

/// Unit of work run by a message loop
pub type Closure = Box<dyn FnOnce() + Send + 'static>;

/// When a task becomes eligible to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetTime {
    /// As soon as possible; orders before every real time
    Immediate,
    /// At or after this instant
    At(Instant),
}

impl TargetTime {
    /// The deadline, or `None` for [`TargetTime::Immediate`]
    pub fn deadline(self) -> Option<Instant> {
        match self {
            TargetTime::Immediate => None,
            TargetTime::At(at) => Some(at),
        }
    }
}

impl From<Instant> for TargetTime {
    fn from(at: Instant) -> Self {
        TargetTime::At(at)
    }
}

/// A posted task waiting to run
pub struct PendingTask {
    /// The work, consumed by `run`
    work: Closure,
    /// Earliest time the work may run
    target_time: TargetTime,
    /// Post order, unique per incoming queue
    sequence: u64,
}

impl PendingTask {
    /// Stamp a piece of work with its target time and sequence number
    pub fn new(work: Closure, target_time: TargetTime, sequence: u64) -> Self {
        Self {
            work,
            target_time,
            sequence,
        }
    }

    /// Get the target time
    pub fn target_time(&self) -> TargetTime {
        self.target_time
    }

    /// Get the sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run the work, consuming the task
    pub fn run(self) {
        (self.work)()
    }

    fn key(&self) -> (TargetTime, u64) {
        (self.target_time, self.sequence)
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("target_time", &self.target_time)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// Reverse ordering for min-heap (earliest key first out of a BinaryHeap)
impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingTask {}
