//! `galena-journal`: the per-session message journal.
//!
//! Both pipeline directions persist through this crate: the sink writer
//! stores every partial message it frames (keyed by outgoing sequence
//! number) and the splitter stores every accepted complete message (keyed
//! by incoming sequence number). On startup the journal supplies the last
//! sequence numbers of a previous run, and on a `ResendRequest` it supplies
//! the sent partials for re-emission, with entries whose expiry has passed
//! reduced to gap-fill placeholders.
//!
//! The store is SQLite. WAL mode is requested for crash durability; when
//! the filesystem cannot support it the journal stays in the default
//! journal mode and keeps working.

use galena_msg::Ttl;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const CREATE_RECV_TABLE: &str = "CREATE TABLE IF NOT EXISTS RECV_MESSAGES (
    seqnum INTEGER PRIMARY KEY,
    timestamp_seconds INTEGER,
    timestamp_microseconds INTEGER,
    msg BLOB)";

const CREATE_SENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS SENT_MESSAGES (
    seqnum INTEGER PRIMARY KEY,
    timestamp_seconds INTEGER,
    timestamp_microseconds INTEGER,
    ttl_seconds INTEGER,
    ttl_useconds INTEGER,
    msg_type TEXT,
    partial_msg_length INTEGER,
    partial_msg BLOB)";

const INSERT_RECV: &str = "INSERT OR REPLACE INTO RECV_MESSAGES
    (seqnum, timestamp_seconds, timestamp_microseconds, msg)
    VALUES (?1, ?2, ?3, ?4)";

const INSERT_SENT: &str = "INSERT OR REPLACE INTO SENT_MESSAGES
    (seqnum, timestamp_seconds, timestamp_microseconds,
     ttl_seconds, ttl_useconds, msg_type, partial_msg_length, partial_msg)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const SELECT_MAX_RECV: &str = "SELECT MAX(seqnum) FROM RECV_MESSAGES";
const SELECT_MAX_SENT: &str = "SELECT MAX(seqnum) FROM SENT_MESSAGES";

const SELECT_SENT_RANGE: &str = "SELECT seqnum, ttl_seconds, ttl_useconds,
    msg_type, partial_msg_length, partial_msg
    FROM SENT_MESSAGES WHERE seqnum >= ?1 AND seqnum <= ?2 ORDER BY seqnum";

/// Extra capacity reserved on returned partials so the resend path can
/// splice in `43=Y<SEP>` without reallocating.
const RESEND_RESERVE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal database error")]
    Db(#[from] rusqlite::Error),
    #[error("journal busy, close retries exhausted")]
    CloseBusy,
}

/// One row of the sent table, prepared for resending.
///
/// An expired entry carries empty `bytes`; the resend path emits a
/// sequence-reset gap-fill for it instead of the original payload.
#[derive(Debug)]
pub struct SentMessage {
    pub seq: u64,
    pub msg_type: String,
    pub ttl_remaining: Ttl,
    pub bytes: Vec<u8>,
}

impl SentMessage {
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An open journal connection bound to one database file.
pub struct MsgJournal {
    conn: Connection,
}

impl MsgJournal {
    /// Opens (creating if needed) the journal at `path`.
    ///
    /// Creates both tables and requests WAL mode. A refused WAL pragma is
    /// logged and tolerated.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let conn = Connection::open(path)?;
        // the pragma reports the mode actually in effect
        let mode: Result<String, _> =
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0));
        match mode {
            Ok(m) if m.eq_ignore_ascii_case("wal") => {}
            Ok(m) => warn!(
                "could not enable WAL on {path}, running in {m} mode",
                path = path.display()
            ),
            Err(e) => warn!("could not enable WAL on {path}: {e}", path = path.display()),
        }
        conn.execute(CREATE_RECV_TABLE, [])?;
        conn.execute(CREATE_SENT_TABLE, [])?;
        Ok(Self { conn })
    }

    /// Closes the connection, retrying on SQLITE_BUSY up to five times with
    /// one-second pauses (a WAL checkpoint may still be flushing).
    pub fn close(self) -> Result<(), JournalError> {
        let mut conn = self.conn;
        for _ in 0..5 {
            match conn.close() {
                Ok(()) => return Ok(()),
                Err((back, e)) => {
                    warn!("journal close busy: {e}");
                    conn = back;
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
        Err(JournalError::CloseBusy)
    }

    /// Upserts a sent partial message under its outgoing sequence number.
    /// `expiry` is the absolute wall-clock expiry computed at push time.
    pub fn store_sent(
        &self,
        seq: u64,
        expiry: Ttl,
        msg_type: &str,
        partial: &[u8],
    ) -> Result<(), JournalError> {
        let (now_s, now_us) = wall_now();
        self.conn.prepare_cached(INSERT_SENT)?.execute(params![
            seq as i64,
            now_s,
            now_us,
            expiry.secs as i64,
            expiry.usecs as i64,
            msg_type,
            partial.len() as i64,
            partial,
        ])?;
        Ok(())
    }

    /// Upserts a received complete message under its incoming sequence
    /// number.
    pub fn store_recv(&self, seq: u64, msg: &[u8]) -> Result<(), JournalError> {
        let (now_s, now_us) = wall_now();
        self.conn
            .prepare_cached(INSERT_RECV)?
            .execute(params![seq as i64, now_s, now_us, msg])?;
        Ok(())
    }

    /// Highest sent sequence number, 0 when the table is empty.
    pub fn latest_sent_seq(&self) -> Result<u64, JournalError> {
        self.max_seq(SELECT_MAX_SENT)
    }

    /// Highest received sequence number, 0 when the table is empty.
    pub fn latest_recv_seq(&self) -> Result<u64, JournalError> {
        self.max_seq(SELECT_MAX_RECV)
    }

    fn max_seq(&self, sql: &str) -> Result<u64, JournalError> {
        let max: Option<i64> = self
            .conn
            .prepare_cached(sql)?
            .query_row([], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) as u64)
    }

    /// Sent messages in `[start, end]`; `end == 0` means open-ended.
    ///
    /// Rows past their expiry come back as placeholders with empty bytes.
    /// Live rows get `RESEND_RESERVE` spare capacity for the in-place
    /// insertion of the PossDupFlag field on resend.
    pub fn sent_range(&self, start: u64, end: u64) -> Result<Vec<SentMessage>, JournalError> {
        let upper = if end == 0 { i64::MAX } else { end as i64 };
        let mut stmt = self.conn.prepare_cached(SELECT_SENT_RANGE)?;
        let rows = stmt.query_map(params![start as i64, upper], |row| {
            let seq: i64 = row.get(0)?;
            let expiry_s: i64 = row.get(1)?;
            let expiry_us: i64 = row.get(2)?;
            let msg_type: String = row.get(3)?;
            let length: i64 = row.get(4)?;
            let blob: Vec<u8> = row.get(5)?;
            Ok((seq, expiry_s, expiry_us, msg_type, length, blob))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, expiry_s, expiry_us, msg_type, length, blob) = row?;
            let remaining = ttl_remaining(expiry_s as u64, expiry_us as u64);
            if remaining == Ttl::default() {
                out.push(SentMessage {
                    seq: seq as u64,
                    msg_type: String::new(),
                    ttl_remaining: remaining,
                    bytes: Vec::new(),
                });
                continue;
            }
            let mut bytes = Vec::with_capacity(length as usize + RESEND_RESERVE);
            bytes.extend_from_slice(&blob[..length as usize]);
            out.push(SentMessage {
                seq: seq as u64,
                msg_type,
                ttl_remaining: remaining,
                bytes,
            });
        }
        Ok(out)
    }
}

/// Current wall clock as (seconds, microseconds) since the epoch.
fn wall_now() -> (i64, i64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (now.as_secs() as i64, now.subsec_micros() as i64)
}

/// Time left until the absolute expiry `(secs, usecs)`; zero when passed.
fn ttl_remaining(expiry_s: u64, expiry_us: u64) -> Ttl {
    let (now_s, now_us) = wall_now();
    let expiry = expiry_s as i128 * 1_000_000 + expiry_us as i128;
    let now = now_s as i128 * 1_000_000 + now_us as i128;
    let left = expiry - now;
    if left <= 0 {
        Ttl::default()
    } else {
        Ttl {
            secs: (left / 1_000_000) as u64,
            usecs: (left % 1_000_000) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_future() -> Ttl {
        let (s, _) = wall_now();
        Ttl {
            secs: s as u64 + 3600,
            usecs: 0,
        }
    }

    #[test]
    fn empty_journal_reports_zero_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let j = MsgJournal::open(&dir.path().join("session.db")).unwrap();
        assert_eq!(j.latest_sent_seq().unwrap(), 0);
        assert_eq!(j.latest_recv_seq().unwrap(), 0);
        j.close().unwrap();
    }

    #[test]
    fn sequences_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");

        let j = MsgJournal::open(&path).unwrap();
        j.store_sent(1, far_future(), "D", b"\x0155=MSFT\x0110=").unwrap();
        j.store_sent(2, far_future(), "D", b"\x0155=AAPL\x0110=").unwrap();
        j.store_recv(7, b"8=FIX.4.4\x01...").unwrap();
        j.close().unwrap();

        let j = MsgJournal::open(&path).unwrap();
        assert_eq!(j.latest_sent_seq().unwrap(), 2);
        assert_eq!(j.latest_recv_seq().unwrap(), 7);
        j.close().unwrap();
    }

    #[test]
    fn upsert_replaces_on_sequence_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let j = MsgJournal::open(&dir.path().join("session.db")).unwrap();
        j.store_sent(5, far_future(), "D", b"first").unwrap();
        j.store_sent(5, far_future(), "8", b"second").unwrap();

        let rows = j.sent_range(5, 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].msg_type, "8");
        assert_eq!(rows[0].bytes, b"second");
        j.close().unwrap();
    }

    #[test]
    fn open_ended_range_and_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let j = MsgJournal::open(&dir.path().join("session.db")).unwrap();
        for seq in 1..=4u64 {
            j.store_sent(seq, far_future(), "D", b"\x0158=x\x0110=").unwrap();
        }

        let rows = j.sent_range(2, 0).unwrap();
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), [2, 3, 4]);
        for r in &rows {
            assert!(!r.is_expired());
            assert!(r.bytes.capacity() >= r.bytes.len() + RESEND_RESERVE);
        }
        j.close().unwrap();
    }

    #[test]
    fn expired_entries_become_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let j = MsgJournal::open(&dir.path().join("session.db")).unwrap();

        // expiry in the past
        j.store_sent(1, Ttl { secs: 1, usecs: 0 }, "D", b"\x0158=x\x0110=")
            .unwrap();
        j.store_sent(2, far_future(), "D", b"\x0158=y\x0110=").unwrap();

        let rows = j.sent_range(1, 2).unwrap();
        assert!(rows[0].is_expired());
        assert_eq!(rows[0].ttl_remaining, Ttl::default());
        assert!(!rows[1].is_expired());
        assert_eq!(rows[1].bytes, b"\x0158=y\x0110=");
        j.close().unwrap();
    }
}
