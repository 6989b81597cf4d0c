//! Cross-thread wake primitive for bridging foreign threads into async tasks.
//!
//! [`AsyncWake`] is the one wake object shared by both cores of this crate:
//! the lock-free ring owns one so a foreign (e.g. realtime-callback) thread
//! can poke the cooperative side, and the blocking facade uses fresh one-shot
//! instances as queue conditions.
//!
//! # Protocol
//!
//! A signal is latched in an atomic flag, so `signal()` before `wait()` is
//! never lost. The wait future uses the check → register → re-check sequence:
//! if the flag flips while the waker is being registered, either the second
//! check observes it or the signaller wakes the registered waker. Spurious
//! completions are permitted by every caller in this crate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

/// A latching, cross-thread wake handle with a single async waiter slot.
///
/// `signal()` may be called from any OS thread, including one outside any
/// async runtime. At most one task should `wait()` at a time: the waker slot
/// holds a single waker, and a second concurrent waiter would silently
/// displace the first.
#[derive(Debug, Default)]
pub struct AsyncWake {
    signaled: AtomicBool,
    waker: AtomicWaker,
}

impl AsyncWake {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Latches the signal and wakes the registered waiter, if any.
    ///
    /// Wait-free and allocation-free; safe from signal handlers is *not*
    /// claimed, but any ordinary thread may call this.
    #[inline]
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Consumes a pending signal without suspending.
    ///
    /// Returns `true` if a signal was latched.
    #[inline]
    pub fn take(&self) -> bool {
        self.signaled.swap(false, Ordering::AcqRel)
    }

    /// Waits until the next (or an already-latched) signal.
    ///
    /// Completing consumes the latched signal.
    #[inline]
    pub fn wait(&self) -> Wait<'_> {
        Wait { wake: self }
    }
}

/// Future returned by [`AsyncWake::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a> {
    wake: &'a AsyncWake,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.wake.signaled.swap(false, Ordering::AcqRel) {
            return Poll::Ready(());
        }

        self.wake.waker.register(cx.waker());

        // Re-check after registering: a signal that raced the registration
        // is either visible here or will wake the waker we just installed.
        if self.wake.signaled.swap(false, Ordering::AcqRel) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
