//! In-place frame completion.
//!
//! A staged buffer holds the partial message at `HEAD_RESERVED`, beginning
//! with the separator and ending with `<SEP>10=`. Completion prepends
//! `8=<ver><SEP>9=<body_len><SEP>35=<type><SEP>34=<seq>` right-aligned so
//! its last byte lands immediately before the payload, then writes the
//! three checksum digits and the final separator into the tail
//! reservation. Nothing moves; one contiguous frame falls out.

use crate::slot::{HEAD_RESERVED, TAIL_RESERVED};
use galena_msg::checksum::{checksum_digits, fix_checksum};
use galena_msg::num::{digit_count, write_uint};
use std::ops::Range;

/// The prefilled `8=<ver><SEP>9=` start bytes of every outgoing frame for
/// one session, plus the separator in use.
pub struct FrameHeader {
    start_bytes: Vec<u8>,
    soh: u8,
}

impl FrameHeader {
    pub fn new(begin_string: &str, soh: u8) -> Self {
        let mut start_bytes = Vec::with_capacity(begin_string.len() + 6);
        start_bytes.extend_from_slice(b"8=");
        start_bytes.extend_from_slice(begin_string.as_bytes());
        start_bytes.push(soh);
        start_bytes.extend_from_slice(b"9=");
        Self { start_bytes, soh }
    }

    #[inline]
    pub fn soh(&self) -> u8 {
        self.soh
    }

    /// As matched by the inbound scanner: `8=<ver><SEP>9=`.
    #[inline]
    pub fn start_bytes(&self) -> &[u8] {
        &self.start_bytes
    }

    /// Completes the frame for `seq` inside `buf` and returns the range of
    /// the finished frame bytes.
    ///
    /// `payload_len` is the partial-message length staged at
    /// `HEAD_RESERVED`. The partial must begin with the separator and end
    /// with `<SEP>10=`; both are staged-in by the push paths.
    pub fn complete_frame(
        &self,
        buf: &mut [u8],
        payload_len: usize,
        msg_type: &str,
        seq: u64,
    ) -> Range<usize> {
        let seq_digits = digit_count(seq);

        // BodyLength counts from after its own separator through the byte
        // before "10=". The partial's trailing "10=" is excluded, hence -3.
        let body_len = 3 + msg_type.len() + 1 + 3 + seq_digits + payload_len - 3;
        let body_len_digits = digit_count(body_len as u64);

        let prefix_len = self.start_bytes.len()
            + body_len_digits
            + 1
            + 3
            + msg_type.len()
            + 1
            + 3
            + seq_digits;
        debug_assert!(prefix_len <= HEAD_RESERVED, "header does not fit the reservation");

        let start = HEAD_RESERVED - prefix_len;
        let mut at = start;
        buf[at..at + self.start_bytes.len()].copy_from_slice(&self.start_bytes);
        at += self.start_bytes.len();
        at += write_uint(&mut buf[at..], body_len as u64);
        buf[at] = self.soh;
        at += 1;
        buf[at..at + 3].copy_from_slice(b"35=");
        at += 3;
        buf[at..at + msg_type.len()].copy_from_slice(msg_type.as_bytes());
        at += msg_type.len();
        buf[at] = self.soh;
        at += 1;
        buf[at..at + 3].copy_from_slice(b"34=");
        at += 3;
        at += write_uint(&mut buf[at..], seq);
        debug_assert_eq!(at, HEAD_RESERVED);

        // Checksum covers the prefix and the payload up to (excluding) the
        // partial's trailing "10=".
        let covered = prefix_len + payload_len - 3;
        let sum = fix_checksum(&buf[start..start + covered]);
        let tail = HEAD_RESERVED + payload_len;
        buf[tail..tail + 3].copy_from_slice(&checksum_digits(sum));
        buf[tail + 3] = self.soh;

        start..tail + TAIL_RESERVED
    }
}
