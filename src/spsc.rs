//! Core SPSC (Single-Producer Single-Consumer) transport primitives.
//!
//! This module contains the wait-free ring buffer shared by both layers of
//! the crate:
//! - [`ring`] - The lock-free algorithm, unsafe role-based API, raw parts
//! - [`channel`] - Safe `(Producer, Consumer)` ends for thread-to-thread use
//!
//! The frame-granular cooperative facade lives in [`crate::blocking`].

pub mod channel;
pub mod ring;

pub use channel::{Consumer, Producer, Timeout, channel};
pub use ring::{RawParts, Ring};
