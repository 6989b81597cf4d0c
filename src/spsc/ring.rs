//! Core lock-free SPSC ring buffer algorithm.
//!
//! This module provides the wait-free transport underneath both public
//! surfaces of the crate: the [`Producer`](crate::spsc::Producer) /
//! [`Consumer`](crate::spsc::Consumer) pair for thread-to-thread streaming,
//! and the frame-granular [`FrameRing`](crate::blocking::FrameRing) facade.
//!
//! # Algorithm
//!
//! The ring holds `capacity` items (`capacity` a power of two), each item
//! being `stride` contiguous values of `T`. Two monotonically increasing
//! 64-bit counters track progress:
//!
//! - `nwritten`: total items ever produced. Mutated only by the producer.
//! - `nread`: total items ever consumed. Mutated only by the consumer.
//!
//! Buffer positions are derived by masking (`counter & (capacity - 1)`);
//! the counters themselves never wrap in practice (a sub-exabyte lifetime
//! at any realistic rate). `readable = nwritten - nread` and
//! `writable = capacity - readable` hold at every instant.
//!
//! Bulk copies cross the end of the buffer as at most two spans.
//!
//! # Memory ordering
//!
//! The producer publishes data *before* its counter: slot writes happen
//! before the `Release` store of `nwritten`. The consumer loads `nwritten`
//! with `Acquire` before touching slot data. The same contract applies
//! symmetrically to `nread`, which is what licenses the producer to reuse
//! released slots. Each side reads its own counter with `Relaxed`.
//!
//! # Safety
//!
//! The data-path methods are `unsafe` because they require the caller to
//! uphold the SPSC invariant: exactly one producer and one consumer, with
//! no concurrent access to either role.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::wake::AsyncWake;

/// Role marker: Fields with this role are owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: Fields with this role are owned exclusively by the consumer.
pub struct ConsumerRole;

/// Role marker: Buffer slots whose ownership transfers via the SPSC protocol.
pub struct SlotRole;

/// Interior-mutable cell with a role marker for nominal type safety.
///
/// The `Role` parameter doesn't affect runtime behavior; it makes different
/// logical "kinds" of cells into distinct types at compile time.
#[repr(transparent)]
pub struct SpscCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> SpscCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub const fn get(&self) -> &UnsafeCell<T> {
        &self.0
    }
}

// SAFETY: SpscCell is Sync because the SPSC protocol guarantees that each
// cell is accessed from exactly one role at a time. The atomic counters with
// Release/Acquire ordering provide the synchronization barrier between the
// producer's writes and the consumer's reads.
unsafe impl<T: Send, Role> Sync for SpscCell<T, Role> {}
unsafe impl<T: Send, Role> Send for SpscCell<T, Role> {}

/// Cache cell owned exclusively by the producer.
pub type ProducerCache<T> = SpscCell<T, ProducerRole>;

/// Cache cell owned exclusively by the consumer.
pub type ConsumerCache<T> = SpscCell<T, ConsumerRole>;

/// Buffer slot cell with ownership governed by the SPSC protocol.
pub type SlotCell<T> = SpscCell<T, SlotRole>;

/// Producer-side state: written-item counter and a cached copy of `nread`.
#[repr(C)]
#[repr(align(64))]
struct ProducerState {
    /// Total items produced. Owned by producer, read by consumer.
    nwritten: AtomicU64,

    /// Cached copy of `nread`, refreshed only when the ring looks full.
    /// Avoids an acquire load of the consumer's counter on every call.
    cached_nread: ProducerCache<u64>,
}

impl ProducerState {
    const fn new() -> Self {
        Self {
            nwritten: AtomicU64::new(0),
            cached_nread: ProducerCache::new(0),
        }
    }
}

/// Consumer-side state: read-item counter and a cached copy of `nwritten`.
#[repr(C)]
#[repr(align(64))]
struct ConsumerState {
    /// Total items consumed. Owned by consumer, read by producer.
    nread: AtomicU64,

    /// Cached copy of `nwritten`, refreshed only when the ring looks empty.
    cached_nwritten: ConsumerCache<u64>,
}

impl ConsumerState {
    const fn new() -> Self {
        Self {
            nread: AtomicU64::new(0),
            cached_nwritten: ConsumerCache::new(0),
        }
    }
}

/// Raw pieces of a ring, for callers outside the cooperative runtime.
///
/// A foreign caller (for example a realtime audio callback hosted in
/// another language) may drive one SPSC side directly through these
/// pointers, provided it follows the same ordering contract as the methods
/// on [`Ring`]: publish data before the `Release` counter store,
/// `Acquire`-load the peer counter before touching data. The foreign side
/// can call [`Ring::signal`] to notify a cooperative waiter.
///
/// The pointers are valid until the owning [`Ring`] is dropped. `close`
/// does not invalidate them; it only tells cooperative waiters to stop.
#[derive(Debug, Clone, Copy)]
pub struct RawParts<T> {
    /// Base of the element array, `capacity * stride` values of `T` long.
    pub data: *mut T,
    /// Ring capacity in items (a power of two).
    pub capacity: u64,
    /// Number of `T` values per item.
    pub stride: usize,
    /// Total-items-produced counter.
    pub nwritten: *const AtomicU64,
    /// Total-items-consumed counter.
    pub nread: *const AtomicU64,
}

/// The wait-free SPSC ring.
///
/// Construction allocates once; after that the data path performs no
/// allocation, locking, or syscalls, which makes it callable from a
/// realtime thread. See the module docs for the protocol and the `unsafe`
/// contract of [`produce`](Ring::produce) / [`consume`](Ring::consume).
#[repr(C)]
pub struct Ring<T> {
    /// Producer state on its own cache line.
    producer: ProducerState,

    /// Consumer state on its own cache line.
    consumer: ConsumerState,

    /// Items in the ring, always a power of two.
    capacity: u64,

    /// `capacity - 1`, for position masking.
    mask: u64,

    /// `T` values per item.
    stride: usize,

    /// Set once by `close`; read by cooperative waiters.
    closed: AtomicBool,

    /// Wake handle: signalled on every non-zero produce/consume and on
    /// close; signalable from any thread.
    wake: AsyncWake,

    /// Element storage, `capacity * stride` values long. Boxed so the
    /// address stays stable however the `Ring` value itself is moved
    /// before raw parts are handed out.
    buf: Box<[SlotCell<MaybeUninit<T>>]>,
}

// SAFETY: Ring is Send/Sync because all shared mutation is mediated by
// atomics and the SPSC role protocol documented on the unsafe methods.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates a ring of at least `capacity_hint` single-value items.
    ///
    /// The actual capacity is the next power of two ≥ `capacity_hint`
    /// (minimum 1). Never fails after allocation.
    #[must_use]
    pub fn new(capacity_hint: u64) -> Self {
        Self::with_stride(capacity_hint, 1)
    }

    /// Creates a ring of at least `capacity_hint` items of `stride`
    /// contiguous `T` values each.
    ///
    /// This is how the frame facade gets frame-sized items: capacity is
    /// counted and masked in frames while storage and copies move
    /// `stride` samples per frame.
    ///
    /// # Panics
    ///
    /// Panics if `stride == 0` or the element array would overflow `usize`.
    #[must_use]
    pub fn with_stride(capacity_hint: u64, stride: usize) -> Self {
        assert!(stride > 0, "stride must be at least 1");
        let capacity = capacity_hint.max(1).next_power_of_two();
        let len = usize::try_from(capacity)
            .ok()
            .and_then(|c| c.checked_mul(stride))
            .expect("ring allocation exceeds address space");

        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || SlotCell::new(MaybeUninit::uninit()));

        Self {
            producer: ProducerState::new(),
            consumer: ConsumerState::new(),
            capacity,
            mask: capacity - 1,
            stride,
            closed: AtomicBool::new(false),
            wake: AsyncWake::new(),
            buf: slots.into_boxed_slice(),
        }
    }

    /// Ring capacity in items.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// `T` values per item.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Items currently readable.
    ///
    /// Observable from either side: the value is a lower bound for the
    /// consumer (more data may arrive at any moment) and an upper bound
    /// for the producer (more space may be released at any moment).
    #[inline]
    #[must_use]
    pub fn readable(&self) -> u64 {
        // nread is loaded first so the subtraction can never underflow:
        // nread only grows and never passes nwritten.
        let nread = self.consumer.nread.load(Ordering::Acquire);
        let nwritten = self.producer.nwritten.load(Ordering::Acquire);
        nwritten.wrapping_sub(nread)
    }

    /// Items currently writable.
    #[inline]
    #[must_use]
    pub fn writable(&self) -> u64 {
        self.capacity - self.readable()
    }

    /// Base of the element array as a `T` pointer.
    #[inline]
    fn data_ptr(&self) -> *mut T {
        // SlotCell is repr(transparent) over UnsafeCell<MaybeUninit<T>>,
        // both of which have the layout of T, so the slice base doubles
        // as a raw T array.
        self.buf.as_ptr() as *mut T
    }

    /// Copies up to `src.len() / stride` items into the ring.
    ///
    /// Returns the number of items actually written, limited by the free
    /// space observed; zero when the ring is full. Signals the wake
    /// handle exactly once per non-zero write.
    ///
    /// # Safety
    ///
    /// Caller must be the ring's only producer, with no concurrent
    /// `produce` or producer-side raw access.
    pub unsafe fn produce(&self, src: &[T]) -> u64
    where
        T: Copy,
    {
        let want = (src.len() / self.stride) as u64;
        if want == 0 {
            return 0;
        }

        let nwritten = self.producer.nwritten.load(Ordering::Relaxed);

        // SAFETY: Producer role owns cached_nread.
        let mut cached_nread = unsafe { *self.producer.cached_nread.get().get() };
        let mut free = self.capacity - nwritten.wrapping_sub(cached_nread);

        if free < want {
            // Refresh from the consumer's counter (acquire pairs with its
            // release store, so released slots are really free again).
            cached_nread = self.consumer.nread.load(Ordering::Acquire);
            // SAFETY: Producer role owns cached_nread.
            unsafe {
                *self.producer.cached_nread.get().get() = cached_nread;
            }
            free = self.capacity - nwritten.wrapping_sub(cached_nread);
        }

        let n = want.min(free);
        if n == 0 {
            return 0;
        }

        let pos = nwritten & self.mask;
        let first = n.min(self.capacity - pos);
        let second = n - first;

        // SAFETY: The producer owns items [nwritten, nwritten + n):
        // - nwritten hasn't been published yet (store happens below)
        // - the free-space check guarantees the consumer isn't reading them
        // - pos < capacity by masking, so both spans are in bounds
        unsafe {
            let base = self.data_ptr();
            ptr::copy_nonoverlapping(
                src.as_ptr(),
                base.add(pos as usize * self.stride),
                first as usize * self.stride,
            );
            if second > 0 {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(first as usize * self.stride),
                    base,
                    second as usize * self.stride,
                );
            }
        }

        // Publish data before the counter (release pairs with the
        // consumer's acquire load of nwritten).
        self.producer
            .nwritten
            .store(nwritten.wrapping_add(n), Ordering::Release);
        self.wake.signal();

        n
    }

    /// Copies up to `dst.len() / stride` items out of the ring.
    ///
    /// Returns the number of items actually read; zero when the ring is
    /// empty. Signals the wake handle exactly once per non-zero read.
    ///
    /// # Safety
    ///
    /// Caller must be the ring's only consumer, with no concurrent
    /// `consume`, `discard`, or consumer-side raw access.
    pub unsafe fn consume(&self, dst: &mut [T]) -> u64
    where
        T: Copy,
    {
        let want = (dst.len() / self.stride) as u64;
        if want == 0 {
            return 0;
        }

        let nread = self.consumer.nread.load(Ordering::Relaxed);

        // SAFETY: Consumer role owns cached_nwritten.
        let mut cached_nwritten = unsafe { *self.consumer.cached_nwritten.get().get() };
        let mut avail = cached_nwritten.wrapping_sub(nread);

        if avail < want {
            // Acquire pairs with the producer's release store, making the
            // published slot data visible.
            cached_nwritten = self.producer.nwritten.load(Ordering::Acquire);
            // SAFETY: Consumer role owns cached_nwritten.
            unsafe {
                *self.consumer.cached_nwritten.get().get() = cached_nwritten;
            }
            avail = cached_nwritten.wrapping_sub(nread);
        }

        let n = want.min(avail);
        if n == 0 {
            return 0;
        }

        let pos = nread & self.mask;
        let first = n.min(self.capacity - pos);
        let second = n - first;

        // SAFETY: The consumer owns items [nread, nread + n):
        // - the availability check guarantees the producer published them
        // - nread hasn't been republished yet, so the producer won't
        //   overwrite them until the store below
        // - pos < capacity by masking, so both spans are in bounds
        unsafe {
            let base = self.data_ptr();
            ptr::copy_nonoverlapping(
                base.add(pos as usize * self.stride),
                dst.as_mut_ptr(),
                first as usize * self.stride,
            );
            if second > 0 {
                ptr::copy_nonoverlapping(
                    base,
                    dst.as_mut_ptr().add(first as usize * self.stride),
                    second as usize * self.stride,
                );
            }
        }

        // Release the slots back to the producer.
        self.consumer
            .nread
            .store(nread.wrapping_add(n), Ordering::Release);
        self.wake.signal();

        n
    }

    /// Drops up to `nitems` readable items without copying them out.
    ///
    /// Returns the number of items discarded. This is a consumer-side
    /// operation; the OVERWRITE facade policy uses it to make room.
    ///
    /// # Safety
    ///
    /// Same contract as [`consume`](Ring::consume): the caller must hold
    /// the consumer role for the duration of the call.
    pub unsafe fn discard(&self, nitems: u64) -> u64 {
        let nread = self.consumer.nread.load(Ordering::Relaxed);
        let nwritten = self.producer.nwritten.load(Ordering::Acquire);
        let n = nitems.min(nwritten.wrapping_sub(nread));
        if n > 0 {
            self.consumer
                .nread
                .store(nread.wrapping_add(n), Ordering::Release);
            self.wake.signal();
        }
        n
    }

    /// Suspends until any produce, consume, or [`signal`](Ring::signal)
    /// since the last wait, or immediately once the ring is closed.
    ///
    /// Spurious completions are permitted. At most one task may wait at a
    /// time; the wake handle holds a single waiter.
    pub async fn wait(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.wake.wait().await;
    }

    /// Wakes a pending [`wait`](Ring::wait).
    ///
    /// Safe to call from any thread, including outside any async runtime;
    /// this is the hook the raw-pointer contract gives foreign callers.
    #[inline]
    pub fn signal(&self) {
        self.wake.signal();
    }

    /// Marks the ring closed and wakes any pending waiter.
    ///
    /// Close is a cooperative-shutdown flag, not a memory fence: the
    /// buffer and counters stay valid (and pinned) until the ring is
    /// dropped. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.signal();
    }

    /// Whether [`close`](Ring::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Raw pointers for a foreign SPSC peer. See [`RawParts`].
    #[must_use]
    pub fn raw_parts(&self) -> RawParts<T> {
        RawParts {
            data: self.data_ptr(),
            capacity: self.capacity,
            stride: self.stride,
            nwritten: &self.producer.nwritten,
            nread: &self.consumer.nread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(Ring::<u8>::new(0).capacity(), 1);
        assert_eq!(Ring::<u8>::new(1).capacity(), 1);
        assert_eq!(Ring::<u8>::new(5).capacity(), 8);
        assert_eq!(Ring::<u8>::new(8).capacity(), 8);
        assert_eq!(Ring::<u8>::new(9).capacity(), 16);
    }

    #[test]
    fn readable_plus_writable_is_capacity() {
        let ring = Ring::<u32>::new(8);
        assert_eq!(ring.readable() + ring.writable(), 8);

        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            assert_eq!(ring.produce(&[1, 2, 3]), 3);
        }
        assert_eq!(ring.readable(), 3);
        assert_eq!(ring.readable() + ring.writable(), 8);

        let mut out = [0u32; 2];
        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            assert_eq!(ring.consume(&mut out), 2);
        }
        assert_eq!(out, [1, 2]);
        assert_eq!(ring.readable() + ring.writable(), 8);
    }

    #[test]
    fn produce_is_limited_by_free_space() {
        let ring = Ring::<u32>::new(4);
        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            assert_eq!(ring.produce(&[1, 2, 3, 4, 5, 6]), 4);
            assert_eq!(ring.produce(&[7]), 0);

            let mut out = [0u32; 4];
            assert_eq!(ring.consume(&mut out), 4);
            assert_eq!(out, [1, 2, 3, 4]);
            assert_eq!(ring.consume(&mut out), 0);
        }
    }

    #[test]
    fn wrapping_copy_preserves_fifo_order() {
        let ring = Ring::<u32>::new(4);
        let mut out = [0u32; 4];
        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            // Offset the position so the next bulk ops straddle the end.
            assert_eq!(ring.produce(&[10, 11, 12]), 3);
            assert_eq!(ring.consume(&mut out[..3]), 3);
            assert_eq!(&out[..3], &[10, 11, 12]);

            // pos = 3: a 4-item write wraps as spans of 1 + 3.
            assert_eq!(ring.produce(&[20, 21, 22, 23]), 4);
            assert_eq!(ring.consume(&mut out), 4);
            assert_eq!(out, [20, 21, 22, 23]);
        }
    }

    #[test]
    fn stride_moves_whole_items() {
        // 2 values per item, capacity rounded up to 4 items.
        let ring = Ring::<i16>::with_stride(3, 2);
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.stride(), 2);

        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            // 5 values = 2 whole items; the dangling value is ignored.
            assert_eq!(ring.produce(&[1, 2, 3, 4, 5]), 2);
            assert_eq!(ring.readable(), 2);

            let mut out = [0i16; 6];
            assert_eq!(ring.consume(&mut out), 2);
            assert_eq!(&out[..4], &[1, 2, 3, 4]);
        }
    }

    #[test]
    fn discard_releases_space() {
        let ring = Ring::<u8>::new(4);
        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            assert_eq!(ring.produce(&[1, 2, 3, 4]), 4);
            assert_eq!(ring.discard(3), 3);
            assert_eq!(ring.readable(), 1);
            assert_eq!(ring.discard(9), 1);
            assert_eq!(ring.discard(1), 0);
        }
    }

    #[test]
    fn close_is_idempotent_and_unblocks_wait() {
        let ring = Ring::<u8>::new(1);
        assert!(!ring.is_closed());
        ring.close();
        ring.close();
        assert!(ring.is_closed());
        // Must not hang.
        futures::executor::block_on(ring.wait());
        futures::executor::block_on(ring.wait());
    }

    #[test]
    fn produce_signals_the_wake_handle() {
        let ring = Ring::<u8>::new(4);
        // SAFETY: a single-threaded test holds both roles.
        unsafe {
            assert_eq!(ring.produce(&[1]), 1);
        }
        // The latched signal completes wait() without further help.
        futures::executor::block_on(ring.wait());
    }

    #[test]
    fn raw_parts_track_the_counters() {
        let ring = Ring::<u32>::new(8);
        let parts = ring.raw_parts();
        assert_eq!(parts.capacity, 8);
        assert_eq!(parts.stride, 1);

        // SAFETY: a single-threaded test holds both roles, and the parts
        // don't outlive the ring.
        unsafe {
            assert_eq!(ring.produce(&[7, 8]), 2);
            assert_eq!((*parts.nwritten).load(Ordering::Acquire), 2);
            assert_eq!((*parts.nread).load(Ordering::Acquire), 0);
            assert_eq!(*parts.data, 7);
        }
    }
}
