//! Per-thread loop registry
//!
//! Each thread has at most one registered message loop. A loop registers
//! itself when it is constructed and deregisters when it is destroyed; the
//! registry only holds a weak link, so it never keeps a loop alive.

use crate::error::LoopError;
use crate::message_loop::LoopInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

thread_local! {
    static CURRENT: RefCell<Option<Weak<LoopInner>>> = const { RefCell::new(None) };
}

/// Register `inner` as the calling thread's loop
pub(crate) fn register(inner: &Rc<LoopInner>) -> Result<(), LoopError> {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        if current.is_some() {
            return Err(LoopError::AlreadyRegistered);
        }
        *current = Some(Rc::downgrade(inner));
        Ok(())
    })
}

/// Remove `inner` from the calling thread's slot.
///
/// Fails if `inner` is not the loop registered on this thread.
pub(crate) fn deregister(inner: &Rc<LoopInner>) -> Result<(), LoopError> {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        match current.as_ref() {
            Some(registered) if registered.as_ptr() == Rc::as_ptr(inner) => {
                *current = None;
                Ok(())
            }
            _ => Err(LoopError::WrongThread),
        }
    })
}

/// Whether `inner` is the loop registered on the calling thread
pub(crate) fn is_current(inner: &LoopInner) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|registered| std::ptr::eq(registered.as_ptr(), inner))
    })
}

/// The loop registered on the calling thread, if any
pub(crate) fn current() -> Option<Rc<LoopInner>> {
    CURRENT.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
}

/// Whether the calling thread has a registered message loop
pub fn has_current() -> bool {
    current().is_some()
}
