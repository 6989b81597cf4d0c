//! Fixed-capacity SPSC ring buffers for interleaved multi-channel
//! streaming, with a realtime-safe lock-free core and a queued,
//! cancelable async facade.
//!
//! # Overview
//!
//! Two layers, sharing one transport:
//!
//! - [`spsc`] - the wait-free data path. [`spsc::Ring`] moves items
//!   between exactly one producer and one consumer without locks,
//!   allocation, or syscalls, so one side may live on a realtime audio
//!   thread. A [`spsc::channel`] pair gives safe thread-to-thread ends,
//!   and [`spsc::RawParts`] exposes the buffer and counters to foreign
//!   callers under the documented ordering contract.
//! - [`blocking`] - the cooperative facade. [`FrameRing`] reads and
//!   writes whole interleaved frames, serializes concurrent callers per
//!   side through FIFO queues, optionally blocks until a request is
//!   fully satisfied, and cancels everything cleanly on `close`.
//!
//! # Example
//!
//! ```
//! use ringflow::FrameRing;
//!
//! futures::executor::block_on(async {
//!     // Stereo ring holding 8 frames.
//!     let ring = FrameRing::<i32>::new(2, 8);
//!
//!     ring.write_planar(&[&[1, 3, 5][..], &[2, 4, 6][..]])
//!         .await
//!         .unwrap();
//!
//!     let mut out = [0i32; 6];
//!     ring.read_frames(&mut out, 3).await.unwrap();
//!     assert_eq!(out, [1, 2, 3, 4, 5, 6]);
//! });
//! ```

pub mod blocking;
pub mod frame;
pub mod spsc;
pub mod wake;

mod trace;

pub use blocking::{FrameRing, Overflow, ShapeError, Underflow};
pub use frame::Sample;
pub use trace::init_tracing;
pub use wake::AsyncWake;
