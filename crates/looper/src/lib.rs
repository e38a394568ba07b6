//! Looper: per-thread cooperative task loop
//!
//! A [`MessageLoop`] executes immediate and delayed tasks on the single
//! thread that owns it, while any thread may post new work through the
//! loop's [`IncomingTaskQueue`].
//!
//! - **Ordering**: tasks run by target time, then by post order
//! - **Mailbox**: posts are staged under one short lock and drained in batches
//! - **Sleeping**: the loop blocks on a [`WakeSignal`] until the next target
//!   time or a new post, never polling
//! - **Teardown**: dropping a loop discards pending tasks without running them
//!
//! # Example
//!
//! ```rust,ignore
//! use looper::{MessageLoop, TaskRunner};
//!
//! let message_loop = MessageLoop::new();
//! let runner = message_loop.task_runner();
//!
//! std::thread::spawn(move || {
//!     runner.post_task(Box::new(|| println!("hello from the loop")));
//!     runner.post_task(Box::new(|| MessageLoop::current().unwrap().quit_now()));
//! });
//!
//! message_loop.run();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod clock;
pub mod config;
pub mod error;
pub mod incoming;
pub mod message_loop;
pub mod registry;
pub mod runner;
pub mod task;
pub mod thread;
pub mod wake;

pub use clock::{Clock, MonotonicClock};
pub use config::LoopConfig;
pub use error::LoopError;
pub use incoming::{DrainDelegate, IncomingTaskQueue};
pub use message_loop::{LoopHandle, MessageLoop};
pub use runner::TaskRunner;
pub use task::{Closure, PendingTask, TargetTime};
pub use thread::LoopThread;
pub use wake::WakeSignal;
