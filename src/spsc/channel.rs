//! Safe SPSC ends over a shared [`Ring`] for thread-to-thread streaming.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (single producer per ring)
//! - [`Consumer`] - Read end (single consumer per ring)
//! - Lock-free, wait-free bulk transfers: no mutexes or syscalls in the
//!   hot path
//!
//! # Example
//!
//! ```
//! use ringflow::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024);
//!
//! // Producer thread
//! assert_eq!(producer.write(&[1, 2, 3]), 3);
//!
//! // Consumer thread
//! let mut out = [0u64; 3];
//! assert_eq!(consumer.read(&mut out), 3);
//! assert_eq!(out, [1, 2, 3]);
//! ```
//!
//! Both ends are `Send` but not `Sync`: ownership of a side can move to
//! another thread, but a side can never be driven from two threads at
//! once, which is what makes the unchecked calls into [`Ring`] sound.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::spsc::ring::{RawParts, Ring};

/// Timeout specification for the spin-waiting helpers.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl Timeout {
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(Instant::now() + d),
        }
    }
}

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the ring.
///
/// Only one producer should exist per ring. `Producer` is [`Send`] but
/// **not** [`Sync`]: it can move to another thread, but `&Producer`
/// cannot be shared, so two threads can never write concurrently.
pub struct Producer<T: Copy + Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the ring.
///
/// Only one consumer should exist per ring. See [`Producer`] for the
/// thread-safety scheme (same semantics apply).
pub struct Consumer<T: Copy + Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates an SPSC channel of at least `capacity_hint` elements.
///
/// Returns a `(Producer, Consumer)` pair sharing one [`Ring`]; the actual
/// capacity is rounded up to a power of two.
#[must_use]
pub fn channel<T: Copy + Send>(capacity_hint: u64) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(Ring::new(capacity_hint));

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Copy + Send> Producer<T> {
    /// Writes up to `src.len()` elements (wait-free).
    ///
    /// Returns the count actually written, limited by free space; zero
    /// when the ring is full.
    #[inline]
    pub fn write(&self, src: &[T]) -> u64 {
        // SAFETY: Producer is !Sync and never cloned, so this thread is
        // the ring's only producer.
        unsafe { self.ring.produce(src) }
    }

    /// Spins until all of `src` is written, the timeout expires, or the
    /// ring is closed. Returns the count actually written.
    pub fn write_all_spin(&self, src: &[T], timeout: Timeout) -> u64 {
        let deadline = timeout.deadline();
        let mut written = 0usize;
        while written < src.len() {
            let n = self.write(&src[written..]) as usize;
            written += n;
            if written == src.len() || self.ring.is_closed() {
                break;
            }
            if n == 0 {
                if let Some(dl) = deadline
                    && Instant::now() > dl
                {
                    break;
                }
                std::hint::spin_loop();
            }
        }
        written as u64
    }

    /// Elements currently writable (an upper bound may be stale low).
    #[inline]
    #[must_use]
    pub fn writable(&self) -> u64 {
        self.ring.writable()
    }

    /// Suspends until the consumer makes progress or someone signals.
    pub async fn wait(&self) {
        self.ring.wait().await;
    }

    /// Wakes the peer's pending `wait`, from any thread.
    #[inline]
    pub fn signal(&self) {
        self.ring.signal();
    }

    /// Closes the shared ring. See [`Ring::close`].
    pub fn close(&self) {
        self.ring.close();
    }

    /// Whether the shared ring is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    /// Raw pointers for a foreign peer. See [`RawParts`].
    #[must_use]
    pub fn raw_parts(&self) -> RawParts<T> {
        self.ring.raw_parts()
    }
}

impl<T: Copy + Send> Consumer<T> {
    /// Reads up to `dst.len()` elements (wait-free).
    ///
    /// Returns the count actually read; zero when the ring is empty.
    #[inline]
    pub fn read(&self, dst: &mut [T]) -> u64 {
        // SAFETY: Consumer is !Sync and never cloned, so this thread is
        // the ring's only consumer.
        unsafe { self.ring.consume(dst) }
    }

    /// Spins until `dst` is filled, the timeout expires, or the ring is
    /// closed with no data left. Returns the count actually read.
    pub fn read_exact_spin(&self, dst: &mut [T], timeout: Timeout) -> u64 {
        let deadline = timeout.deadline();
        let mut read = 0usize;
        while read < dst.len() {
            let n = self.read(&mut dst[read..]) as usize;
            read += n;
            if read == dst.len() {
                break;
            }
            if n == 0 {
                if self.ring.is_closed() && self.ring.readable() == 0 {
                    break;
                }
                if let Some(dl) = deadline
                    && Instant::now() > dl
                {
                    break;
                }
                std::hint::spin_loop();
            }
        }
        read as u64
    }

    /// Elements currently readable (a lower bound may be stale low).
    #[inline]
    #[must_use]
    pub fn readable(&self) -> u64 {
        self.ring.readable()
    }

    /// Suspends until the producer makes progress or someone signals.
    pub async fn wait(&self) {
        self.ring.wait().await;
    }

    /// Wakes the peer's pending `wait`, from any thread.
    #[inline]
    pub fn signal(&self) {
        self.ring.signal();
    }

    /// Closes the shared ring. See [`Ring::close`].
    pub fn close(&self) {
        self.ring.close();
    }

    /// Whether the shared ring is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    /// Raw pointers for a foreign peer. See [`RawParts`].
    #[must_use]
    pub fn raw_parts(&self) -> RawParts<T> {
        self.ring.raw_parts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let (producer, consumer) = channel::<u64>(8);

        assert_eq!(producer.write(&[42]), 1);
        let mut out = [0u64; 1];
        assert_eq!(consumer.read(&mut out), 1);
        assert_eq!(out, [42]);
        assert_eq!(consumer.read(&mut out), 0);
    }

    #[test]
    fn short_write_when_full() {
        let (producer, consumer) = channel::<u64>(4);

        assert_eq!(producer.write(&[0, 1, 2, 3]), 4);
        assert_eq!(producer.write(&[99]), 0);

        let mut out = [0u64; 1];
        assert_eq!(consumer.read(&mut out), 1);
        assert_eq!(producer.write(&[4]), 1);
        assert_eq!(producer.write(&[1000]), 0);
    }

    #[test]
    fn interleaved_operations() {
        let (producer, consumer) = channel::<u64>(8);
        let mut out = [0u64; 2];

        assert_eq!(producer.write(&[1, 2]), 2);
        assert_eq!(consumer.read(&mut out[..1]), 1);
        assert_eq!(producer.write(&[3]), 1);
        assert_eq!(consumer.read(&mut out), 2);
        assert_eq!(out, [2, 3]);
    }

    #[test]
    fn send_producer_to_thread() {
        let (producer, consumer) = channel::<u64>(16);

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                assert_eq!(producer.write(&[i]), 1);
            }
        });
        handle.join().unwrap();

        let mut out = [0u64; 10];
        assert_eq!(consumer.read(&mut out), 10);
        for (i, &v) in out.iter().enumerate() {
            assert_eq!(v, i as u64);
        }
    }

    #[test]
    fn concurrent_write_read_preserves_fifo() {
        let (producer, consumer) = channel::<u64>(64);
        let count = 10_000u64;

        let producer_handle = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < count {
                let n = producer.write(&[next]);
                if n == 1 {
                    next += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            let mut buf = [0u64; 32];
            while (received.len() as u64) < count {
                let n = consumer.read(&mut buf) as usize;
                if n == 0 {
                    std::hint::spin_loop();
                    continue;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }

    #[test]
    fn spin_read_times_out_on_empty_ring() {
        let (_producer, consumer) = channel::<u8>(4);
        let mut out = [0u8; 2];
        let n = consumer.read_exact_spin(&mut out, Duration::from_millis(5).into());
        assert_eq!(n, 0);
    }

    #[test]
    fn spin_write_stops_at_close() {
        let (producer, consumer) = channel::<u8>(2);
        assert_eq!(producer.write(&[1, 2]), 2);
        consumer.close();
        let n = producer.write_all_spin(&[3, 4], Timeout::Infinite);
        assert_eq!(n, 0);
    }

    #[test]
    fn spin_read_drains_before_honoring_close() {
        let (producer, consumer) = channel::<u8>(4);
        assert_eq!(producer.write(&[7, 8]), 2);
        producer.close();

        let mut out = [0u8; 4];
        let n = consumer.read_exact_spin(&mut out, Timeout::Infinite);
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[7, 8]);
    }
}
