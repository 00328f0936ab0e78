//! `galena-ring`: lock-free ring buffer with multi-consumer barriers.
//!
//! This crate provides the queue primitive used by every stage of the
//! gateway pipeline: a fixed-capacity, power-of-two ring where publishers
//! claim monotonically increasing 64-bit sequences and registered consumers
//! gate slot reuse with per-consumer barrier cursors.
//!
//! # Core Components
//!
//! - [`RingBuffer`]: the shared buffer (multi-producer capable)
//! - [`ConsumerHandle`]: opaque barrier registration returned by
//!   [`RingBuffer::register_consumer`]
//!
//! Blocking operations spin; their `try_` twins return immediately.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ claim/commit  ┌───────────────────────┐ wait_for/release ┌──────────┐
//! │ producers  │ ────────────► │ RingBuffer<T, N, P>   │ ◄─────────────── │ consumers│
//! │ (many)     │               │  cursor / claim /     │                  │ (≤ P)    │
//! └────────────┘               │  barrier table        │                  └──────────┘
//!                              └───────────────────────┘
//! ```
//!
//! A slot for sequence `s` may be rewritten by a publisher only once every
//! registered consumer has released a sequence `>= s` in a previous lap.
//! All waits are spin-yield loops; there are no condition variables.

mod buffer;
mod ring;

pub use buffer::{ConsumerHandle, RingBuffer, RingError};
pub use ring::seq_to_index;
