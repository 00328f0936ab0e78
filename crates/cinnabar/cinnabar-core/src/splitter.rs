//! Incremental frame extraction from the inbound byte stream.
//!
//! The scanner is a three-state machine fed arbitrary chunk boundaries:
//!
//! ```text
//! FindingBeginString ──"8=<ver><SEP>9=" matched, digit seen──► FindingBodyLength
//!        ▲                                                          │
//!        │ bad digits / zero length / allocation failure            │ <SEP> after digits
//!        │◄─────────────────────────────────────────────────────────▼
//!        └──────────────── frame complete ◄──────────────── CopyingBody
//! ```
//!
//! A frame under assembly is prefixed with the begin-string bytes and the
//! body-length digits (both already consumed by the match), then filled
//! with `body_length + 1 + 7` streamed bytes: the separator after the
//! BodyLength field, the body, and the checksum field. Anything that does
//! not parse restarts the match; the sequence checker upstream turns lost
//! frames into resend requests.

use galena_msg::num::parse_length_value;

enum ScanState {
    FindingBeginString,
    FindingBodyLength,
    CopyingBody,
}

/// Longest run of body-length digits accepted; a 64-bit length never has
/// more.
const LENGTH_DIGITS_MAX: usize = 20;

pub struct FrameScanner {
    /// `8=<ver><SEP>9=`, as emitted on this session's frames.
    prefix: Vec<u8>,
    soh: u8,
    state: ScanState,
    /// Prefix bytes matched so far.
    matched: usize,
    /// Accumulated body-length digits.
    length_digits: Vec<u8>,
    /// Bytes still to stream into `pending` for the current frame.
    bytes_left: usize,
    /// The frame under assembly.
    pending: Vec<u8>,
}

impl FrameScanner {
    pub fn new(prefix: &[u8], soh: u8) -> Self {
        Self {
            prefix: prefix.to_vec(),
            soh,
            state: ScanState::FindingBeginString,
            matched: 0,
            length_digits: Vec::with_capacity(LENGTH_DIGITS_MAX),
            bytes_left: 0,
            pending: Vec::new(),
        }
    }

    fn restart(&mut self) {
        self.state = ScanState::FindingBeginString;
        self.matched = 0;
        self.length_digits.clear();
    }

    /// Feeds one chunk. `on_frame` fires once per completed frame with the
    /// assembled bytes; the callback may `mem::take` the buffer (handing a
    /// replacement allocation back by swapping) or copy out of it.
    pub fn consume(&mut self, chunk: &[u8], mut on_frame: impl FnMut(&mut Vec<u8>)) {
        let mut k = 0usize;
        while k < chunk.len() {
            match self.state {
                ScanState::FindingBeginString => {
                    let b = chunk[k];
                    if self.matched < self.prefix.len() && self.prefix[self.matched] == b {
                        self.matched += 1;
                        k += 1;
                    } else if self.matched == self.prefix.len() && b.is_ascii_digit() {
                        // full prefix behind us, the digit belongs to the
                        // body length: reprocess it in the next state
                        self.matched = 0;
                        self.length_digits.clear();
                        self.state = ScanState::FindingBodyLength;
                    } else {
                        // mismatch; the byte may itself restart the match
                        self.matched = usize::from(b == self.prefix[0]);
                        k += 1;
                    }
                }
                ScanState::FindingBodyLength => {
                    let b = chunk[k];
                    if b == self.soh {
                        // do not consume: the separator is the first byte
                        // of the copied region
                        if !self.begin_copying() {
                            self.restart();
                            k += 1; // skip the separator, the frame is lost anyway
                        }
                    } else if b.is_ascii_digit() && self.length_digits.len() < LENGTH_DIGITS_MAX {
                        self.length_digits.push(b);
                        k += 1;
                    } else {
                        self.restart();
                        k += 1;
                    }
                }
                ScanState::CopyingBody => {
                    let avail = chunk.len() - k;
                    if avail >= self.bytes_left {
                        self.pending.extend_from_slice(&chunk[k..k + self.bytes_left]);
                        k += self.bytes_left;
                        self.bytes_left = 0;
                        on_frame(&mut self.pending);
                        self.pending.clear();
                        self.restart();
                    } else {
                        self.pending.extend_from_slice(&chunk[k..]);
                        self.bytes_left -= avail;
                        k = chunk.len();
                    }
                }
            }
        }
    }

    /// Parses the accumulated digits and stages the frame prefix. Returns
    /// `false` when the length is unusable or the buffer cannot grow.
    fn begin_copying(&mut self) -> bool {
        let mut digits = std::mem::take(&mut self.length_digits);
        digits.push(self.soh);
        let parsed = parse_length_value(&digits, self.soh);
        digits.pop();
        self.length_digits = digits;
        let Some(body_length) = parsed else {
            return false;
        };
        if body_length == 0 || body_length > usize::MAX as u64 / 2 {
            return false;
        }

        // separator after the BodyLength field + body + checksum field
        let to_copy = body_length as usize + 1 + 7;
        let total = self.prefix.len() + self.length_digits.len() + to_copy;
        self.pending.clear();
        if self.pending.try_reserve(total).is_err() {
            return false;
        }
        self.pending.extend_from_slice(&self.prefix);
        self.pending.extend_from_slice(&self.length_digits);
        self.bytes_left = to_copy;
        self.state = ScanState::CopyingBody;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_msg::checksum::fix_checksum;

    const SOH: u8 = 0x01;

    fn prefix() -> Vec<u8> {
        b"8=FIX.4.4\x019=".to_vec()
    }

    fn make_frame(body_fields: &str) -> Vec<u8> {
        let body = body_fields.replace('|', "\x01");
        let mut f = Vec::new();
        f.extend_from_slice(b"8=FIX.4.4\x019=");
        // body_fields: "35=0|34=1|...|" (ends with |); BodyLength counts
        // from after the 9= separator through the byte before 10=
        f.extend_from_slice(body.len().to_string().as_bytes());
        f.push(SOH);
        f.extend_from_slice(body.as_bytes());
        // checksum covers everything before the "10=" tag itself
        let sum = fix_checksum(&f);
        f.extend_from_slice(b"10=");
        f.extend_from_slice(format!("{sum:03}").as_bytes());
        f.push(SOH);
        f
    }

    fn scan_all(scanner: &mut FrameScanner, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for chunk in chunks {
            scanner.consume(chunk, |f| frames.push(f.clone()));
        }
        frames
    }

    #[test]
    fn extracts_a_whole_frame_from_one_chunk() {
        let frame = make_frame("35=0|34=1|49=A|56=B|");
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        let got = scan_all(&mut scanner, &[&frame]);
        assert_eq!(got, vec![frame]);
    }

    #[test]
    fn reassembles_across_arbitrary_chunk_boundaries() {
        let frame = make_frame("35=D|34=9|55=MSFT|44=31.25|");
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        for split in 1..frame.len() - 1 {
            let (a, b) = frame.split_at(split);
            let got = scan_all(&mut scanner, &[a, b]);
            assert_eq!(got, vec![frame.clone()], "split at {split}");
        }
    }

    #[test]
    fn extracts_back_to_back_frames() {
        let f1 = make_frame("35=0|34=1|");
        let f2 = make_frame("35=1|34=2|112=ping|");
        let mut stream = f1.clone();
        stream.extend_from_slice(&f2);
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        let got = scan_all(&mut scanner, &[&stream]);
        assert_eq!(got, vec![f1, f2]);
    }

    #[test]
    fn skips_garbage_between_frames() {
        let frame = make_frame("35=0|34=1|");
        let mut stream = b"noise 8=FIX.4.2\x01 more noise ".to_vec();
        stream.extend_from_slice(&frame);
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        let got = scan_all(&mut scanner, &[&stream]);
        assert_eq!(got, vec![frame]);
    }

    #[test]
    fn zero_or_malformed_body_length_restarts() {
        let good = make_frame("35=0|34=1|");
        let mut stream = b"8=FIX.4.4\x019=0\x01".to_vec(); // zero length
        stream.extend_from_slice(b"8=FIX.4.4\x019=12x\x01"); // non-digit
        stream.extend_from_slice(&good);
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        let got = scan_all(&mut scanner, &[&stream]);
        assert_eq!(got, vec![good]);
    }

    #[test]
    fn prefix_restart_inside_a_partial_match() {
        // "8=FIX.4.4" twice: the first partial match is abandoned, the
        // second one carries the real frame
        let frame = make_frame("35=0|34=1|");
        let mut stream = b"8=FIX.8=FIX".to_vec();
        stream.extend_from_slice(&frame);
        let mut scanner = FrameScanner::new(&prefix(), SOH);
        let got = scan_all(&mut scanner, &[&stream]);
        assert_eq!(got, vec![frame]);
    }
}
