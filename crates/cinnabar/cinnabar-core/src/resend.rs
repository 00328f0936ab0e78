//! On-wire rewriting for the resend path.
//!
//! A resent message keeps its original sequence number and must announce
//! itself as a possible duplicate: `43=Y` (PossDupFlag) is spliced in, tag
//! 52 (SendingTime) is refreshed, and the original SendingTime is carried
//! in tag 122 (OrigSendingTime). A sent message whose TTL has expired is
//! not resent at all; a `SequenceReset` in gap-fill mode (`35=4`, `123=Y`)
//! takes its place on the wire.

use chrono::Utc;
use galena_msg::num::{digit_count, write_uint};
use galena_msg::{FixVersion, format_sending_time};

/// Rewrites a journaled partial message for resending.
///
/// Input and output are both partials: leading separator, trailing
/// `<SEP>10=`. The rewrite scans for the `<SEP>52=` byte pattern only; a
/// data field that happens to contain that pattern would be rewritten
/// wrongly, a hazard shared with every in-place splice on this format.
pub fn rewrite_for_resend(partial: &[u8], soh: u8, version: FixVersion) -> Vec<u8> {
    let pattern = [soh, b'5', b'2', b'='];
    let sending_time_at = partial
        .windows(pattern.len())
        .position(|w| w == pattern);

    let mut out = Vec::with_capacity(partial.len() + 64);
    out.push(soh);
    out.extend_from_slice(b"43=Y");

    let Some(p) = sending_time_at else {
        // No SendingTime to refresh; just flag the duplicate.
        out.extend_from_slice(partial);
        return out;
    };

    let value_start = p + pattern.len();
    let value_end = value_start
        + partial[value_start..]
            .iter()
            .position(|&b| b == soh)
            .unwrap_or(partial.len() - value_start);
    let original = &partial[value_start..value_end];

    // fields up to and including "52="
    out.extend_from_slice(&partial[..value_start]);
    out.extend_from_slice(format_sending_time(version, Utc::now()).as_bytes());
    // the rest of the body, through the separator before "10="
    out.extend_from_slice(&partial[value_end..partial.len() - 3]);
    out.extend_from_slice(b"122=");
    out.extend_from_slice(original);
    out.push(soh);
    out.extend_from_slice(b"10=");
    out
}

/// Builds the partial body of a `SequenceReset`-gap-fill standing in for
/// the expired message `seq`: `|123=Y|36=<seq+1>|52=<now>|10=`.
pub fn gap_fill_partial(soh: u8, version: FixVersion, seq: u64) -> Vec<u8> {
    let next = seq + 1;
    let mut out = Vec::with_capacity(48 + digit_count(next));
    out.push(soh);
    out.extend_from_slice(b"123=Y");
    out.push(soh);
    out.extend_from_slice(b"36=");
    let mut digits = [0u8; 20];
    let n = write_uint(&mut digits, next);
    out.extend_from_slice(&digits[..n]);
    out.push(soh);
    out.extend_from_slice(b"52=");
    out.extend_from_slice(format_sending_time(version, Utc::now()).as_bytes());
    out.push(soh);
    out.extend_from_slice(b"10=");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splices_poss_dup_and_orig_sending_time() {
        let partial = b"|49=A|52=20120101-00:00:00|56=B|10=";
        let out = rewrite_for_resend(partial, b'|', FixVersion::Fix41);
        let s = String::from_utf8(out).unwrap();

        assert!(s.starts_with("|43=Y|49=A|52="), "{s}");
        assert!(s.ends_with("|56=B|122=20120101-00:00:00|10="), "{s}");
        // refreshed SendingTime has the 4.1 second-precision shape
        let rest = &s["|43=Y|49=A|52=".len()..];
        let new_time = &rest[..rest.find('|').unwrap()];
        assert_eq!(new_time.len(), "YYYYMMDD-HH:MM:SS".len());
    }

    #[test]
    fn message_without_sending_time_only_gets_flagged() {
        let partial = b"|49=A|56=B|10=";
        let out = rewrite_for_resend(partial, b'|', FixVersion::Fix44);
        assert_eq!(out, b"|43=Y|49=A|56=B|10=");
    }

    #[test]
    fn gap_fill_names_the_next_sequence() {
        let out = gap_fill_partial(b'|', FixVersion::Fix44, 41);
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("|123=Y|36=42|52="), "{s}");
        assert!(s.ends_with("|10="), "{s}");
    }
}
