//! FIFO queue of one-shot wake handles for the cooperative facade.
//!
//! Each blocked caller parks on its own [`AsyncWake`]; the queue enforces
//! head-of-line discipline: the handle at the front belongs to the caller
//! currently permitted to drive the data path, everyone behind it stays
//! suspended. There is deliberately no broadcast: handing the head slot to
//! exactly one successor is what keeps completion order FIFO.
//!
//! The mutex only guards the deque itself and is never held across an
//! await point.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::wake::AsyncWake;

#[derive(Debug, Default)]
pub(crate) struct WaiterQueue {
    inner: Mutex<VecDeque<Arc<AsyncWake>>>,
}

impl WaiterQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `cond` and returns its position (0 = head), or `None` if
    /// `gate` reports false.
    ///
    /// `gate` is evaluated *inside* the lock. Because close drains the
    /// queue under the same lock after flipping the open flag, a caller
    /// either enters the queue before the drain (and will be signalled by
    /// it) or observes the gate closed and never enters. No entry can slip
    /// in after the drain and wait forever.
    pub(crate) fn enqueue_if(
        &self,
        cond: Arc<AsyncWake>,
        gate: impl FnOnce() -> bool,
    ) -> Option<usize> {
        let mut queue = self.inner.lock().expect("waiter queue poisoned");
        if !gate() {
            return None;
        }
        queue.push_back(cond);
        Some(queue.len() - 1)
    }

    /// Removes `cond` from the head and wakes the next waiter, if any.
    ///
    /// If `cond` is no longer at the front — close drained the queue while
    /// the owner was finishing — this is a no-op; close has already woken
    /// everyone.
    pub(crate) fn finish_head(&self, cond: &Arc<AsyncWake>) {
        let mut queue = self.inner.lock().expect("waiter queue poisoned");
        if queue.front().is_some_and(|front| Arc::ptr_eq(front, cond)) {
            queue.pop_front();
            if let Some(next) = queue.front() {
                next.signal();
            }
        }
    }

    /// Removes every waiter, signalling each exactly once.
    pub(crate) fn drain_and_signal_all(&self) {
        let mut queue = self.inner.lock().expect("waiter queue poisoned");
        while let Some(cond) = queue.pop_front() {
            cond.signal();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("waiter queue poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_fifo() {
        let queue = WaiterQueue::new();
        let a = Arc::new(AsyncWake::new());
        let b = Arc::new(AsyncWake::new());

        assert_eq!(queue.enqueue_if(Arc::clone(&a), || true), Some(0));
        assert_eq!(queue.enqueue_if(Arc::clone(&b), || true), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn gate_rejects_without_enqueueing() {
        let queue = WaiterQueue::new();
        let a = Arc::new(AsyncWake::new());
        assert_eq!(queue.enqueue_if(Arc::clone(&a), || false), None);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn finish_head_wakes_the_successor() {
        let queue = WaiterQueue::new();
        let a = Arc::new(AsyncWake::new());
        let b = Arc::new(AsyncWake::new());
        queue.enqueue_if(Arc::clone(&a), || true);
        queue.enqueue_if(Arc::clone(&b), || true);

        queue.finish_head(&a);
        assert_eq!(queue.len(), 1);
        assert!(b.take(), "successor must be signalled");
    }

    #[test]
    fn finish_head_after_drain_is_a_no_op() {
        let queue = WaiterQueue::new();
        let a = Arc::new(AsyncWake::new());
        let b = Arc::new(AsyncWake::new());
        queue.enqueue_if(Arc::clone(&a), || true);
        queue.enqueue_if(Arc::clone(&b), || true);

        queue.drain_and_signal_all();
        assert!(a.take());
        assert!(b.take());

        // The old head finishing late must not disturb an empty queue.
        queue.finish_head(&a);
        assert_eq!(queue.len(), 0);
    }
}
