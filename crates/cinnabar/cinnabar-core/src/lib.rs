//! `cinnabar-core`: the FIX gateway engine.
//!
//! Two halves around a TCP socket pair:
//!
//! - [`Pusher`]: thread-safe outbound path. Applications enqueue partial
//!   messages; a writer thread completes the frames in place (header,
//!   sequence number, checksum), journals them, and emits them in batched
//!   vectored writes.
//! - [`Popper`]: inbound path. A reader thread streams raw bytes, a
//!   splitter thread extracts and validates frames, journals them,
//!   enforces the incoming sequence, answers `ResendRequest`s, and routes
//!   session vs. application traffic onto separate queues.
//!
//! Both halves share one journal database per session, which is what makes
//! gap recovery work across restarts.

pub mod assembler;
mod clock;
pub mod popper;
pub mod pusher;
mod resend;
pub mod slot;
pub mod splitter;

pub use galena_msg::{FixVersion, Ttl};
pub use popper::{AppMessage, AppPopper, PopError, Popper, SessionPopper};
pub use pusher::{PushError, Pusher, PusherStats, ResendError, SessionPusher, StartError};
