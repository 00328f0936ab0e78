//! Field appender producing partial messages for the outbound path.
//!
//! A partial message starts with the field separator and ends with
//! `<SEP>10=`; the framer later prepends the standard header fields and
//! fills in the checksum. Tag 35 is captured as the slot message type
//! rather than serialized into the body, and a message cannot be exposed
//! until both a type and a `SendingTime` (tag 52) have been appended.

use crate::MSG_TYPE_MAX;
use crate::num::{digit_count, write_uint};

/// Per-message time-to-live, relative to the moment of the push. The
/// outbound path turns it into an absolute expiry; a message past its
/// expiry is gap-filled instead of resent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ttl {
    pub secs: u64,
    pub usecs: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TxError {
    #[error("message type value is empty, oversized, or not ASCII")]
    BadMsgType,
}

/// A finished partial message, borrowed from the appender. Valid until the
/// next `append_field` call, which recycles the buffer.
#[derive(Debug)]
pub struct Exposed<'a> {
    pub ttl: Ttl,
    pub msg_type: &'a str,
    pub bytes: &'a [u8],
}

pub struct FixMessageTx {
    soh: u8,
    buf: Vec<u8>,
    msg_type: [u8; MSG_TYPE_MAX],
    msg_type_len: usize,
    ttl: Ttl,
    sending_time_appended: bool,
    exposed: bool,
}

impl FixMessageTx {
    pub fn new(soh: u8) -> Self {
        Self {
            soh,
            buf: vec![soh],
            msg_type: [0; MSG_TYPE_MAX],
            msg_type_len: 0,
            ttl: Ttl::default(),
            sending_time_appended: false,
            exposed: false,
        }
    }

    /// Sets the TTL reported by the next [`expose`](Self::expose).
    pub fn set_ttl(&mut self, ttl: Ttl) {
        self.ttl = ttl;
    }

    /// Appends `<tag>=<value><SEP>`, except tag 35 which is captured as the
    /// message type. Appending after an expose starts a fresh message.
    pub fn append_field(&mut self, tag: u32, value: &[u8]) -> Result<(), TxError> {
        if self.exposed {
            // recycle the buffer, keep the leading separator
            self.buf.truncate(1);
            self.msg_type_len = 0;
            self.sending_time_appended = false;
            self.exposed = false;
        }

        if tag == 35 {
            if value.is_empty() || value.len() >= MSG_TYPE_MAX || !value.is_ascii() {
                return Err(TxError::BadMsgType);
            }
            self.msg_type[..value.len()].copy_from_slice(value);
            self.msg_type_len = value.len();
            return Ok(());
        }
        if tag == 52 {
            self.sending_time_appended = true;
        }

        let mut scratch = [0u8; 10];
        let tag_len = write_uint(&mut scratch, tag as u64);
        debug_assert_eq!(tag_len, digit_count(tag as u64));
        self.buf.extend_from_slice(&scratch[..tag_len]);
        self.buf.push(b'=');
        self.buf.extend_from_slice(value);
        self.buf.push(self.soh);
        Ok(())
    }

    /// Finishes the message by tacking on `10=` and hands out the bytes.
    ///
    /// Returns `None` when no message type or no SendingTime has been
    /// appended yet; a well-formed FIX message requires both.
    pub fn expose(&mut self) -> Option<Exposed<'_>> {
        if self.msg_type_len == 0 || !self.sending_time_appended || self.exposed {
            return None;
        }
        self.buf.extend_from_slice(b"10=");
        self.exposed = true;
        // msg_type bytes were validated as ASCII in append_field
        let msg_type =
            unsafe { std::str::from_utf8_unchecked(&self.msg_type[..self.msg_type_len]) };
        Some(Exposed {
            ttl: self.ttl,
            msg_type,
            bytes: &self.buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_partial_with_leading_sep_and_checksum_stub() {
        let mut tx = FixMessageTx::new(b'|');
        tx.append_field(35, b"2").unwrap();
        tx.append_field(52, b"20121105-23:24:37").unwrap();
        tx.append_field(7, b"2").unwrap();
        tx.append_field(16, b"0").unwrap();

        let out = tx.expose().expect("type and sending time present");
        assert_eq!(out.msg_type, "2");
        assert_eq!(out.bytes, b"|52=20121105-23:24:37|7=2|16=0|10=");
    }

    #[test]
    fn expose_requires_type_and_sending_time() {
        let mut tx = FixMessageTx::new(b'|');
        tx.append_field(58, b"hello").unwrap();
        assert!(tx.expose().is_none());

        tx.append_field(35, b"3").unwrap();
        assert!(tx.expose().is_none());

        tx.append_field(52, b"20240101-00:00:00.000").unwrap();
        assert!(tx.expose().is_some());
    }

    #[test]
    fn buffer_recycles_after_expose() {
        let mut tx = FixMessageTx::new(b'|');
        tx.set_ttl(Ttl { secs: 30, usecs: 0 });
        tx.append_field(35, b"3").unwrap();
        tx.append_field(52, b"20240101-00:00:00.000").unwrap();
        tx.append_field(45, b"9").unwrap();
        let first = tx.expose().unwrap().bytes.to_vec();
        assert!(first.ends_with(b"|10="));

        // a new message starts clean
        tx.append_field(35, b"2").unwrap();
        tx.append_field(52, b"20240101-00:00:01.000").unwrap();
        tx.append_field(7, b"4").unwrap();
        let second = tx.expose().unwrap();
        assert_eq!(second.bytes, b"|52=20240101-00:00:01.000|7=4|10=");
        assert_eq!(second.ttl, Ttl { secs: 30, usecs: 0 });
    }

    #[test]
    fn rejects_bad_message_types() {
        let mut tx = FixMessageTx::new(b'|');
        assert_eq!(tx.append_field(35, b""), Err(TxError::BadMsgType));
        assert_eq!(
            tx.append_field(35, b"WAYTOOLONGFORTYPE"),
            Err(TxError::BadMsgType)
        );
        assert_eq!(tx.append_field(35, &[0xff]), Err(TxError::BadMsgType));
    }
}
