//! Frame-granular cooperative ring over the lock-free SPSC core.
//!
//! [`FrameRing`] presents a traditional read/write surface for interleaved
//! multi-channel streams: callers ask for whole frames, and with the
//! default BLOCK policies an operation suspends until its full request is
//! satisfied or the ring is closed. Concurrent callers on the same side
//! are serialized through a FIFO [`WaiterQueue`]; only the queue head ever
//! touches the data path, which is what upholds the SPSC contract of the
//! inner [`Ring`] (at most one active producer and one active consumer at
//! any instant).
//!
//! # Suspension points
//!
//! A call suspends in exactly two places: waiting for its turn at the
//! head of its side's queue, and waiting on the shared data notify
//! between partial data-path progress. Everything else is non-suspending.
//!
//! # Close
//!
//! `close` flips the open flag, closes the inner ring, signals the data
//! notify and drains both waiter queues, signalling every parked caller.
//! Each of them observes `open == false` on its next check and returns
//! its partial count. A caller woken into a closed ring must not pop the
//! queue — close already did.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::blocking::waiters::WaiterQueue;
use crate::frame::{Sample, deinterleave, interleave};
use crate::spsc::ring::Ring;
use crate::trace::{debug, trace};
use crate::wake::AsyncWake;

/// Behavior of a write that does not fit the free space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Suspend until every requested frame has been written.
    #[default]
    Block,
    /// Write what fits and return the short count, never suspending.
    Truncate,
    /// Drop the oldest buffered frames so the new ones fit; a request at
    /// or above capacity replaces the whole buffer with its trailing
    /// frames. Always reports the full request as written.
    ///
    /// This policy advances the consumer counter from the writer, which
    /// is only sound while both sides run on the cooperative scheduler.
    /// Do not combine it with a foreign consumer on the raw pointers.
    Overwrite,
}

/// Behavior of a read that finds too little data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Underflow {
    /// Suspend until every requested frame has been read.
    #[default]
    Block,
    /// Read what is available (possibly nothing) and return the short
    /// count, never suspending.
    Truncate,
    /// Read what is available, fill the remainder of the destination
    /// with silence (`T::default()`), and report the full request.
    Pad,
}

/// Caller-supplied buffer or matrix has the wrong shape.
///
/// Raised before any effect on ring state; a shape error never consumes
/// a queue slot or moves data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// The flat buffer is too short for the requested frame count.
    #[error("buffer holds {got} samples but {need} are needed for the requested frames")]
    ShortBuffer { got: u64, need: u64 },
    /// A planar matrix does not have one row per channel.
    #[error("expected {expected} channel rows, got {got}")]
    ChannelMismatch { expected: usize, got: usize },
    /// Planar rows disagree about the frame count.
    #[error("channel rows have unequal lengths")]
    RaggedRows,
}

/// Shared wake pair for "some data or space changed".
///
/// One logical notify with one waker slot per side: at most one reader
/// (the head of the reader queue) waits on `data`, at most one writer on
/// `space`, so a single-slot wake per side cannot lose anyone.
#[derive(Debug, Default)]
struct DataNotify {
    /// Woken when new data arrives; the blocked reader head parks here.
    data: AsyncWake,
    /// Woken when space is released; the blocked writer head parks here.
    space: AsyncWake,
}

impl DataNotify {
    fn notify_all(&self) {
        self.data.signal();
        self.space.signal();
    }
}

/// A fixed-capacity ring of interleaved multi-channel frames with queued,
/// cancelable, frame-granular operations.
///
/// Reads and writes are `async fn`s usable from any executor; the ring
/// itself is runtime-agnostic. Share it between tasks with [`Arc`].
///
/// # Example
///
/// ```
/// use ringflow::FrameRing;
///
/// futures::executor::block_on(async {
///     let ring = FrameRing::<i32>::new(2, 8);
///
///     // 5 interleaved stereo frames.
///     let n = ring.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).await;
///     assert_eq!(n, 5);
///
///     let out = ring.read_planar(5).await;
///     assert_eq!(out, vec![vec![1, 3, 5, 7, 9], vec![2, 4, 6, 8, 10]]);
/// });
/// ```
pub struct FrameRing<T: Sample> {
    /// Frame transport: one ring item is one frame of `nchannels` samples.
    inner: Ring<T>,

    nchannels: usize,

    /// FIFO of suspended readers; only the head drives `consume`.
    readers: WaiterQueue,

    /// FIFO of suspended writers; only the head drives `produce`.
    writers: WaiterQueue,

    notify: DataNotify,

    /// True from construction until `close`; never flips back.
    open: AtomicBool,

    overflow: Overflow,
    underflow: Underflow,
}

impl<T: Sample> FrameRing<T> {
    /// Creates a ring of at least `frames` frames of `nchannels`
    /// interleaved samples, blocking on both overflow and underflow.
    ///
    /// The actual capacity is the next power of two ≥ `frames`.
    ///
    /// # Panics
    ///
    /// Panics if `nchannels == 0`.
    #[must_use]
    pub fn new(nchannels: usize, frames: u64) -> Self {
        Self::with_policies(nchannels, frames, Overflow::default(), Underflow::default())
    }

    /// Creates a ring with explicit overflow/underflow policies.
    ///
    /// The close-cancellation guarantees are stated against the default
    /// BLOCK/BLOCK configuration; the other policies never suspend on
    /// data availability and so are cancelled only while queued.
    #[must_use]
    pub fn with_policies(
        nchannels: usize,
        frames: u64,
        overflow: Overflow,
        underflow: Underflow,
    ) -> Self {
        assert!(nchannels > 0, "frame ring needs at least one channel");
        let inner = Ring::with_stride(frames, nchannels);
        debug!(
            nchannels,
            frames = inner.capacity(),
            ?overflow,
            ?underflow,
            "frame ring created"
        );
        Self {
            inner,
            nchannels,
            readers: WaiterQueue::new(),
            writers: WaiterQueue::new(),
            notify: DataNotify::default(),
            open: AtomicBool::new(true),
            overflow,
            underflow,
        }
    }

    /// Number of channels per frame.
    #[inline]
    #[must_use]
    pub const fn nchannels(&self) -> usize {
        self.nchannels
    }

    /// Capacity in frames (a power of two).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.inner.capacity()
    }

    /// Frames currently buffered.
    #[inline]
    #[must_use]
    pub fn readable_frames(&self) -> u64 {
        self.inner.readable()
    }

    /// Frames that could be written without waiting.
    #[inline]
    #[must_use]
    pub fn writable_frames(&self) -> u64 {
        self.inner.writable()
    }

    /// Whether the ring accepts new operations.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Closes the ring, cancelling every queued and in-flight operation.
    ///
    /// Each suspended caller wakes, observes the closed state, and
    /// returns the frames it had transferred so far. Idempotent: only
    /// the first call has any effect.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("frame ring closing");
        self.inner.close();
        self.notify.notify_all();
        self.writers.drain_and_signal_all();
        self.readers.drain_and_signal_all();
    }

    /// Writes `nframes` frames from the interleaved `data`.
    ///
    /// `data` must hold at least `nframes * nchannels` samples; extra
    /// samples are ignored. Returns the frames actually written, which is
    /// less than `nframes` only if the ring was closed mid-operation (or
    /// under the TRUNCATE policy).
    ///
    /// Suspends while other writers are ahead in the queue and, under
    /// BLOCK, while the ring is full.
    pub async fn write_frames(&self, data: &[T], nframes: u64) -> Result<u64, ShapeError> {
        let need = self.flat_len(nframes)?;
        if (data.len() as u64) < need {
            return Err(ShapeError::ShortBuffer {
                got: data.len() as u64,
                need,
            });
        }
        Ok(self.drive_write(&data[..need as usize], nframes).await)
    }

    /// Writes a flat interleaved buffer, inferring the frame count as
    /// `data.len() / nchannels`. Trailing samples short of a whole frame
    /// are ignored.
    pub async fn write(&self, data: &[T]) -> u64 {
        let nframes = (data.len() / self.nchannels) as u64;
        let need = nframes as usize * self.nchannels;
        self.drive_write(&data[..need], nframes).await
    }

    /// Writes a planar matrix: one row per channel, rows of equal length.
    ///
    /// The rows are interleaved into a scratch buffer and written as
    /// `row_len` frames.
    pub async fn write_planar(&self, channels: &[&[T]]) -> Result<u64, ShapeError> {
        if channels.len() != self.nchannels {
            return Err(ShapeError::ChannelMismatch {
                expected: self.nchannels,
                got: channels.len(),
            });
        }
        let nframes = channels[0].len();
        if channels.iter().any(|row| row.len() != nframes) {
            return Err(ShapeError::RaggedRows);
        }
        let mut scratch = Vec::new();
        interleave(channels, &mut scratch);
        Ok(self.drive_write(&scratch, nframes as u64).await)
    }

    /// Reads `nframes` frames into the interleaved `dst`.
    ///
    /// `dst` must hold at least `nframes * nchannels` samples. Returns
    /// the frames actually read; a short count means the ring was closed
    /// mid-operation (or a non-BLOCK underflow policy applied).
    pub async fn read_frames(&self, dst: &mut [T], nframes: u64) -> Result<u64, ShapeError> {
        let need = self.flat_len(nframes)?;
        if (dst.len() as u64) < need {
            return Err(ShapeError::ShortBuffer {
                got: dst.len() as u64,
                need,
            });
        }
        Ok(self.drive_read(&mut dst[..need as usize], nframes).await)
    }

    /// Reads `nframes` frames into a freshly allocated planar matrix of
    /// `nchannels` rows.
    ///
    /// Rows are truncated to the frames actually read, so a close during
    /// the read is observable as rows shorter than requested.
    pub async fn read_planar(&self, nframes: u64) -> Vec<Vec<T>> {
        let need = nframes as usize * self.nchannels;
        let mut flat = vec![T::default(); need];
        let read = self.drive_read(&mut flat, nframes).await;
        flat.truncate(read as usize * self.nchannels);
        deinterleave(&flat, self.nchannels)
    }

    /// Samples needed for `nframes` frames, or an error if the product
    /// cannot be represented.
    fn flat_len(&self, nframes: u64) -> Result<u64, ShapeError> {
        nframes
            .checked_mul(self.nchannels as u64)
            .ok_or(ShapeError::ShortBuffer {
                got: 0,
                need: u64::MAX,
            })
    }

    /// Enqueues on `queue` and suspends until this caller is the head.
    ///
    /// Returns the caller's one-shot handle, or `None` if the ring is (or
    /// became) closed — in which case close has already removed the entry
    /// and the caller must return without touching the queue.
    async fn wait_for_turn(&self, queue: &WaiterQueue) -> Option<Arc<AsyncWake>> {
        let cond = Arc::new(AsyncWake::new());
        let pos = queue.enqueue_if(Arc::clone(&cond), || self.is_open())?;
        if pos > 0 {
            trace!(pos, "waiting for queue turn");
            cond.wait().await;
            if !self.is_open() {
                return None;
            }
        }
        Some(cond)
    }

    /// Completes an operation: wake the opposite side (and any foreign
    /// waiter on the inner ring), then hand the head slot to the next
    /// queued caller.
    fn finalize(&self, queue: &WaiterQueue, cond: &Arc<AsyncWake>) {
        self.notify.notify_all();
        self.inner.signal();
        queue.finish_head(cond);
    }

    async fn drive_write(&self, data: &[T], nframes: u64) -> u64 {
        let Some(cond) = self.wait_for_turn(&self.writers).await else {
            return 0;
        };

        let mut written = 0u64;
        loop {
            if !self.is_open() {
                // Cancelled: close drained the queue, so no pop here.
                trace!(written, "write cancelled by close");
                return written;
            }
            if written < nframes {
                let from = written as usize * self.nchannels;
                // SAFETY: head-of-queue discipline makes this task the
                // ring's only producer for the duration of the call.
                let n = unsafe { self.inner.produce(&data[from..]) };
                written += n;
                if n > 0 && written < nframes {
                    // Partial progress is data a blocked reader may be
                    // waiting for.
                    self.notify.data.signal();
                    self.inner.signal();
                }
            }
            if written == nframes {
                break;
            }
            match self.overflow {
                Overflow::Block => self.notify.space.wait().await,
                Overflow::Truncate => break,
                Overflow::Overwrite => {
                    let from = written as usize * self.nchannels;
                    self.overwrite_remainder(&data[from..], nframes - written);
                    written = nframes;
                    break;
                }
            }
        }

        self.finalize(&self.writers, &cond);
        written
    }

    async fn drive_read(&self, dst: &mut [T], nframes: u64) -> u64 {
        let Some(cond) = self.wait_for_turn(&self.readers).await else {
            return 0;
        };

        let mut read = 0u64;
        loop {
            if !self.is_open() {
                // Cancelled: close drained the queue, so no pop here.
                trace!(read, "read cancelled by close");
                return read;
            }
            if read < nframes {
                let from = read as usize * self.nchannels;
                // SAFETY: head-of-queue discipline makes this task the
                // ring's only consumer for the duration of the call.
                let n = unsafe { self.inner.consume(&mut dst[from..]) };
                read += n;
                if n > 0 && read < nframes {
                    // Partial progress is space a blocked writer may be
                    // waiting for.
                    self.notify.space.signal();
                    self.inner.signal();
                }
            }
            if read == nframes {
                break;
            }
            match self.underflow {
                Underflow::Block => self.notify.data.wait().await,
                Underflow::Truncate => break,
                Underflow::Pad => {
                    let from = read as usize * self.nchannels;
                    dst[from..].fill(T::default());
                    read = nframes;
                    break;
                }
            }
        }

        self.finalize(&self.readers, &cond);
        read
    }

    /// OVERWRITE tail: makes room by discarding the oldest frames, then
    /// writes the remainder of the request in full.
    fn overwrite_remainder(&self, rest: &[T], nframes: u64) {
        let capacity = self.inner.capacity();
        // SAFETY: this policy is restricted to fully-cooperative rings
        // (see `Overflow::Overwrite`), so the head writer may briefly act
        // as the consumer: no other task is in either role right now.
        unsafe {
            if nframes >= capacity {
                // Nothing already buffered can survive; keep only the
                // trailing `capacity` frames of the input.
                self.inner.discard(self.inner.readable());
                let tail = (nframes - capacity) as usize * self.nchannels;
                let n = self.inner.produce(&rest[tail..]);
                debug_assert_eq!(n, capacity);
            } else {
                let shortfall = nframes.saturating_sub(self.inner.writable());
                if shortfall > 0 {
                    self.inner.discard(shortfall);
                }
                let n = self.inner.produce(rest);
                debug_assert_eq!(n, nframes);
            }
        }
    }
}
