//! Errors raised by message loop usage violations

/// Errors that can occur when driving a message loop
///
/// Most of these describe programming errors. The public entry points treat
/// them as fatal (see [`fatal`]); only construction and thread spawning hand
/// them back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A second loop was constructed on a thread that already has one
    #[error("at most one message loop per thread")]
    AlreadyRegistered,

    /// `run` was called on a loop that is already running
    #[error("cannot run a nested message loop")]
    NestedRun,

    /// `quit_now` was called on a loop that is not running
    #[error("cannot quit a message loop that is not running")]
    NotRunning,

    /// The loop was torn down on a thread other than its owner
    #[error("message loops must be destroyed on their own threads")]
    WrongThread,

    /// The loop was torn down from inside one of its own tasks
    #[error("cannot destroy a message loop while it is running")]
    DestroyedWhileRunning,

    /// A handle was used after its loop was destroyed
    #[error("message loop has been destroyed")]
    Destroyed,

    /// An incoming queue was handed to a second loop
    #[error("incoming task queue is already attached to a message loop")]
    DelegateAttached,

    /// The OS refused to spawn a loop thread
    #[error("failed to spawn message loop thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A loop thread unwound instead of returning
    #[error("message loop thread '{0}' panicked")]
    ThreadPanicked(String),
}

/// Report a usage violation and abort the current thread.
///
/// Violations leave the scheduling state inconsistent, so there is nothing
/// to return to.
#[cold]
#[track_caller]
pub(crate) fn fatal(err: LoopError) -> ! {
    tracing::error!(error = %err, "message loop usage violation");
    panic!("{}", err)
}
