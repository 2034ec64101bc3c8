//! CPU-GPU synchronization for frames in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether the GPU has retired the work a [`Fence`] guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// Submitted work may still be running.
    Unsignaled,
    /// Every submission guarded by the fence has completed.
    Signaled,
}

/// Completion flag of one queue's last submission in a frame.
///
/// The executor hands one fence per queue to the backend with the last
/// submission of a frame, and waits on them before the frame slot is reused.
/// Clones share the same state, so the backend can keep one and signal it
/// when the queue retires the work.
///
/// # Example
///
/// ```
/// use redlilium_framegraph::{Fence, FenceStatus};
///
/// let fence = Fence::new_unsignaled();
/// let backend_copy = fence.clone();
/// backend_copy.signal();
/// assert_eq!(fence.status(), FenceStatus::Signaled);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fence {
    done: Arc<AtomicBool>,
}

impl Fence {
    /// A fence whose work is still pending.
    pub fn new_unsignaled() -> Self {
        Self::with_state(false)
    }

    /// A fence that is already complete, for slots with nothing in flight.
    pub fn new_signaled() -> Self {
        Self::with_state(true)
    }

    fn with_state(done: bool) -> Self {
        Self {
            done: Arc::new(AtomicBool::new(done)),
        }
    }

    pub fn status(&self) -> FenceStatus {
        match self.done.load(Ordering::Acquire) {
            true => FenceStatus::Signaled,
            false => FenceStatus::Unsignaled,
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(self.status(), FenceStatus::Signaled)
    }

    /// Block until the backend signals the fence.
    pub fn wait(&self) {
        self.spin_until(None);
    }

    /// Block until the fence is signalled or `timeout` passes.
    ///
    /// Returns whether the fence was signalled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.spin_until(Some(Instant::now() + timeout))
    }

    fn spin_until(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.done.load(Ordering::Acquire) {
                return true;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            std::thread::yield_now();
        }
    }

    /// Mark the fence pending again. Only valid once its work has completed.
    pub fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Signal the fence. Called by backends once the fenced work is complete.
    pub fn signal(&self) {
        self.done.store(true, Ordering::Release);
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);
