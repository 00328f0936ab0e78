//! `galena-msg`: the FIX message model shared by both pipeline directions.
//!
//! Everything here operates on raw byte slices of FIX frames; nothing
//! allocates on the scan path. The crate knows:
//!
//! - the supported protocol versions and their `SendingTime` precision
//!   ([`FixVersion`])
//! - the mod-256 checksum and its 3-digit wire rendering ([`checksum`])
//! - decimal codecs for tags, sequence numbers, and length values ([`num`])
//! - the per-version `tag → type` tables and the data-tag subset
//!   ([`TypeTables`])
//! - message-type classification via a compact u32 key ([`msg_type`])
//! - a stateful field iterator over validated frames ([`FixMessageRx`])
//! - a field appender producing partial messages ready for the outbound
//!   framer ([`FixMessageTx`])

pub mod checksum;
pub mod msg_type;
pub mod num;
mod rx;
mod sending_time;
mod tx;
mod types;
mod version;

pub use msg_type::{MsgType, SessionTypeSet, type_key};
pub use rx::{Field, FieldCursor, FixMessageRx, RxError};
pub use sending_time::format_sending_time;
pub use tx::{Exposed, FixMessageTx, Ttl, TxError};
pub use types::{FixType, TypeTables};
pub use version::FixVersion;

/// Maximum stored message-type length, including the NUL byte that
/// terminates it inside outbound queue slots.
pub const MSG_TYPE_MAX: usize = 16;
