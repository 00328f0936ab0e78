//! Outbound path: thread-safe enqueue of partial messages, in-place frame
//! completion, journaling, and batched vectored writes to the sink socket.
//!
//! Four lanes feed one writer thread, drained in strict priority order:
//! fast (inline slots) → oversize (heap slots) → session → resend. The
//! order is size-based prioritization by design; a large message can be
//! starved behind sustained small traffic, which the stats counters make
//! visible to operators.

use crate::assembler::FrameHeader;
use crate::clock::expiry_after;
use crate::resend::{gap_fill_partial, rewrite_for_resend};
use crate::slot::{
    FAST_LANE_LEN, FAST_SLOT_BUF, FrameSlot, HeapSlot, OVERSIZE_LANE_LEN, RESEND_LANE_LEN,
    ResendSlot, SESSION_OUT_LEN, SESSION_SLOT_BUF,
};
use galena_journal::{JournalError, MsgJournal};
use galena_msg::{FixVersion, MSG_TYPE_MAX, Ttl};
use galena_ring::{ConsumerHandle, RingBuffer};
use std::collections::TryReserveError;
use std::io::{self, IoSlice, Write};
use std::marker::PhantomData;
use std::net::TcpStream;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

pub type FastRing = RingBuffer<FrameSlot<FAST_SLOT_BUF>, FAST_LANE_LEN, 1>;
pub type OversizeRing = RingBuffer<HeapSlot, OVERSIZE_LANE_LEN, 1>;
pub type SessionOutRing = RingBuffer<FrameSlot<SESSION_SLOT_BUF>, SESSION_OUT_LEN, 1>;
pub type ResendRing = RingBuffer<ResendSlot, RESEND_LANE_LEN, 1>;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The message type does not fit a slot (EINVAL in spirit).
    #[error("message type is empty or exceeds {} bytes", MSG_TYPE_MAX - 1)]
    BadMsgType,
    /// A session message larger than the session slot budget (EINVAL).
    #[error("session message exceeds the session slot budget")]
    SessionOversize,
    /// Growing an oversize slot failed (ENOMEM).
    #[error("could not grow an oversize slot")]
    OutOfMemory(#[from] TryReserveError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResendError {
    #[error("pusher has no journal configured yet")]
    NotStarted,
    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("already started; stop first to change settings")]
    AlreadyStarted,
}

/// Writer-side counters. `oversize_starved_passes` counts drain passes
/// where the oversize lane had frames waiting while the fast lane was
/// serviced first, which is the observable face of the priority inversion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PusherStats {
    pub fast_frames: u64,
    pub oversize_frames: u64,
    pub session_frames: u64,
    pub resend_frames: u64,
    pub oversize_starved_passes: u64,
}

#[derive(Default)]
struct StatsCells {
    fast_frames: AtomicU64,
    oversize_frames: AtomicU64,
    session_frames: AtomicU64,
    resend_frames: AtomicU64,
    oversize_starved_passes: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> PusherStats {
        PusherStats {
            fast_frames: self.fast_frames.load(Ordering::Relaxed),
            oversize_frames: self.oversize_frames.load(Ordering::Relaxed),
            session_frames: self.session_frames.load(Ordering::Relaxed),
            resend_frames: self.resend_frames.load(Ordering::Relaxed),
            oversize_starved_passes: self.oversize_starved_passes.load(Ordering::Relaxed),
        }
    }
}

struct PusherSettings {
    journal_path: PathBuf,
    version: FixVersion,
    sink: TcpStream,
}

pub(crate) struct PusherShared {
    soh: u8,
    fast: FastRing,
    oversize: OversizeRing,
    session: SessionOutRing,
    resend: ResendRing,
    /// Writer idles (journal closed) while set.
    pause: AtomicBool,
    /// Writer thread exits when set.
    shutdown: AtomicBool,
    /// Writer is out of the idle state.
    writer_running: AtomicBool,
    db_open: AtomicBool,
    /// errno of the write error that stopped the writer, 0 when healthy.
    error: AtomicI32,
    settings: Mutex<Option<PusherSettings>>,
    stats: StatsCells,
}

impl PusherShared {
    fn push_common(&self, ttl: Ttl, data: &[u8], msg_type: &str) -> Result<(), PushError> {
        if msg_type.is_empty() || msg_type.len() >= MSG_TYPE_MAX {
            return Err(PushError::BadMsgType);
        }
        let expiry = expiry_after(ttl);
        if data.len() <= FrameSlot::<FAST_SLOT_BUF>::MAX_PAYLOAD {
            let seq = self.fast.acquire_publisher_slot();
            // claimed sequence grants exclusive slot access until commit
            let slot = unsafe { self.fast.acquire_entry(seq) };
            slot.stage(data, msg_type, expiry);
            self.fast.commit_publisher_slot(seq);
            Ok(())
        } else {
            let seq = self.oversize.acquire_publisher_slot();
            let slot = unsafe { self.oversize.acquire_entry(seq) };
            let staged = slot.stage(data, msg_type, expiry);
            match staged {
                Ok(true) => {
                    self.oversize.commit_publisher_slot(seq);
                    Ok(())
                }
                Ok(false) => {
                    // type length was validated above
                    slot.clear();
                    self.oversize.commit_publisher_slot(seq);
                    Err(PushError::BadMsgType)
                }
                Err(e) => {
                    // a claimed slot must still be committed or the lane
                    // wedges; an empty payload tells the writer to skip it
                    slot.clear();
                    self.oversize.commit_publisher_slot(seq);
                    Err(PushError::OutOfMemory(e))
                }
            }
        }
    }

    fn session_push_common(&self, ttl: Ttl, data: &[u8], msg_type: &str) -> Result<(), PushError> {
        if msg_type.is_empty() || msg_type.len() >= MSG_TYPE_MAX {
            return Err(PushError::BadMsgType);
        }
        if data.len() > FrameSlot::<SESSION_SLOT_BUF>::MAX_PAYLOAD {
            return Err(PushError::SessionOversize);
        }
        let expiry = expiry_after(ttl);
        let seq = self.session.acquire_publisher_slot();
        let slot = unsafe { self.session.acquire_entry(seq) };
        slot.stage(data, msg_type, expiry);
        self.session.commit_publisher_slot(seq);
        Ok(())
    }

    fn resend_common(&self, start: u64, end: u64) -> Result<(), ResendError> {
        let (path, version, soh) = {
            let guard = self.settings.lock().expect("pusher settings lock poisoned");
            match guard.as_ref() {
                Some(s) => (s.journal_path.clone(), s.version, self.soh),
                None => return Err(ResendError::NotStarted),
            }
        };
        // The writer thread owns the primary journal connection; resends
        // read through a connection of their own.
        let journal = MsgJournal::open(&path)?;
        let rows = journal.sent_range(start, end)?;
        if let Err(e) = journal.close() {
            warn!("resend journal close failed: {e}");
        }

        for row in rows {
            let seq = self.resend.acquire_publisher_slot();
            let slot = unsafe { self.resend.acquire_entry(seq) };
            slot.seq = row.seq;
            let staged = if row.is_expired() {
                let partial = gap_fill_partial(soh, version, row.seq);
                slot.slot.stage(&partial, "4", Ttl::default())
            } else {
                let partial = rewrite_for_resend(&row.bytes, soh, version);
                slot.slot.stage(&partial, &row.msg_type, row.ttl_remaining)
            };
            match staged {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!("dropping unresendable entry for seq {seq}", seq = row.seq);
                    slot.slot.clear();
                }
            }
            self.resend.commit_publisher_slot(seq);
        }
        Ok(())
    }
}

/// Single-thread handle for the session lane. `Send` but not `Sync`, and
/// never cloned: exactly one thread may push session messages.
pub struct SessionPusher {
    shared: Arc<PusherShared>,
    _single_thread: PhantomData<std::cell::Cell<()>>,
}

impl SessionPusher {
    /// Pushes a partial session message onto the session lane.
    /// Oversize session messages fail outright; there is no heap fallback.
    pub fn session_push(&mut self, ttl: Ttl, data: &[u8], msg_type: &str) -> Result<(), PushError> {
        self.shared.session_push_common(ttl, data, msg_type)
    }

    /// Same contract as [`Pusher::push`], for callers that only hold the
    /// session handle.
    pub fn push(&self, ttl: Ttl, data: &[u8], msg_type: &str) -> Result<(), PushError> {
        self.shared.push_common(ttl, data, msg_type)
    }

    /// Same contract as [`Pusher::resend`].
    pub fn resend(&self, start: u64, end: u64) -> Result<(), ResendError> {
        self.shared.resend_common(start, end)
    }
}

/// The outbound façade. One writer thread lives for the life of the value,
/// idling while stopped.
pub struct Pusher {
    shared: Arc<PusherShared>,
    writer: Option<JoinHandle<()>>,
    started: bool,
    session_handle_taken: bool,
}

impl Pusher {
    /// Creates the lanes and spawns the (paused) writer thread. `soh` is
    /// the field separator, `0x01` in production.
    pub fn new(soh: u8) -> Self {
        let shared = Arc::new(PusherShared {
            soh,
            fast: RingBuffer::new(|_| FrameSlot::new()),
            oversize: RingBuffer::new(|_| HeapSlot::new()),
            session: RingBuffer::new(|_| FrameSlot::new()),
            resend: RingBuffer::new(|_| ResendSlot::new()),
            pause: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            writer_running: AtomicBool::new(false),
            db_open: AtomicBool::new(false),
            error: AtomicI32::new(0),
            settings: Mutex::new(None),
            stats: StatsCells::default(),
        });
        let writer = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("fix-sink-writer".into())
                .spawn(move || writer_loop(shared))
                .expect("could not spawn sink writer thread")
        };
        Self {
            shared,
            writer: Some(writer),
            started: false,
            session_handle_taken: false,
        }
    }

    /// Thread-safe enqueue of a partial message. Payloads within the fast
    /// slot budget go on the fast lane, larger ones on the oversize lane.
    pub fn push(&self, ttl: Ttl, data: &[u8], msg_type: &str) -> Result<(), PushError> {
        self.shared.push_common(ttl, data, msg_type)
    }

    /// Hands out the session-lane handle. The first caller gets it; the
    /// session lane has exactly one producer by contract.
    pub fn session_handle(&mut self) -> Option<SessionPusher> {
        if self.session_handle_taken {
            return None;
        }
        self.session_handle_taken = true;
        Some(SessionPusher {
            shared: Arc::clone(&self.shared),
            _single_thread: PhantomData,
        })
    }

    /// Re-injects previously sent messages `[start, end]` (`end == 0`
    /// meaning "through the highest") onto the resend lane. Expired
    /// entries are replaced by sequence-reset gap-fills.
    pub fn resend(&self, start: u64, end: u64) -> Result<(), ResendError> {
        self.shared.resend_common(start, end)
    }

    /// Sets the journal path, FIX version, and sink socket, then unpauses
    /// the writer. Settings may only change while stopped.
    pub fn start(
        &mut self,
        journal_path: impl Into<PathBuf>,
        version: FixVersion,
        sink: TcpStream,
    ) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        *self.shared.settings.lock().expect("pusher settings lock poisoned") =
            Some(PusherSettings {
                journal_path: journal_path.into(),
                version,
                sink,
            });
        self.shared.error.store(0, Ordering::Relaxed);
        self.shared.pause.store(false, Ordering::Release);
        self.started = true;
        Ok(())
    }

    /// Pauses the writer and waits for it to close the journal. Idempotent.
    pub fn stop(&mut self) {
        self.shared.pause.store(true, Ordering::Release);
        while self.shared.writer_running.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        self.started = false;
    }

    /// errno recorded by the writer thread, 0 when healthy.
    pub fn last_error(&self) -> i32 {
        self.shared.error.load(Ordering::Acquire)
    }

    /// Whether the writer currently holds its journal connection open.
    pub fn journal_open(&self) -> bool {
        self.shared.db_open.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PusherStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for Pusher {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.pause.store(true, Ordering::Release);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Anything the writer can complete into a frame.
trait OutboundSlot {
    fn expiry(&self) -> Ttl;
    fn msg_type_bytes(&self) -> ([u8; MSG_TYPE_MAX], usize);
    fn payload_len(&self) -> usize;
    fn framing_buf(&mut self) -> (&mut [u8], usize);
    fn frame_range(&self, range: Range<usize>) -> &[u8];
}

impl<const BUF: usize> OutboundSlot for FrameSlot<BUF> {
    fn expiry(&self) -> Ttl {
        FrameSlot::expiry(self)
    }
    fn msg_type_bytes(&self) -> ([u8; MSG_TYPE_MAX], usize) {
        let s = self.msg_type();
        let mut out = [0u8; MSG_TYPE_MAX];
        out[..s.len()].copy_from_slice(s.as_bytes());
        (out, s.len())
    }
    fn payload_len(&self) -> usize {
        FrameSlot::payload_len(self)
    }
    fn framing_buf(&mut self) -> (&mut [u8], usize) {
        FrameSlot::framing_buf(self)
    }
    fn frame_range(&self, range: Range<usize>) -> &[u8] {
        &self.full_buf()[range]
    }
}

impl OutboundSlot for HeapSlot {
    fn expiry(&self) -> Ttl {
        HeapSlot::expiry(self)
    }
    fn msg_type_bytes(&self) -> ([u8; MSG_TYPE_MAX], usize) {
        let s = self.msg_type();
        let mut out = [0u8; MSG_TYPE_MAX];
        out[..s.len()].copy_from_slice(s.as_bytes());
        (out, s.len())
    }
    fn payload_len(&self) -> usize {
        HeapSlot::payload_len(self)
    }
    fn framing_buf(&mut self) -> (&mut [u8], usize) {
        HeapSlot::framing_buf(self)
    }
    fn frame_range(&self, range: Range<usize>) -> &[u8] {
        &self.full_buf()[range]
    }
}

/// Writes every staged IoSlice fully, retrying transient errors in place
/// and advancing the cursor across short writes.
fn writev_all(sink: &mut TcpStream, iov: &mut Vec<IoSlice<'_>>) -> io::Result<()> {
    let mut slices = iov.as_mut_slice();
    while !slices.is_empty() {
        match sink.write_vectored(slices) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ));
            }
            Ok(n) => IoSlice::advance_slices(&mut slices, n),
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    iov.clear();
    Ok(())
}

struct LaneCursor {
    handle: ConsumerHandle,
    next: u64,
}

/// Drains one lane: frames every committed slot, journals it, and emits
/// the batch through `writev`. Returns the number of frames sent.
#[allow(clippy::too_many_arguments)]
fn drain_lane<S, const N: usize, const P: usize>(
    ring: &RingBuffer<S, N, P>,
    cursor: &mut LaneCursor,
    out_seq: &mut u64,
    header: &FrameHeader,
    journal: &MsgJournal,
    sink: &mut TcpStream,
    iov_max: usize,
) -> io::Result<u64>
where
    S: OutboundSlot,
{
    let Some(committed) = ring.try_wait_for(cursor.next) else {
        return Ok(0);
    };
    let mut frames = 0u64;
    let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(iov_max.min(64));
    for s in cursor.next..=committed {
        // sole consumer of the lane, sequence not yet released
        let slot = unsafe { ring.acquire_entry(s) };
        if slot.payload_len() == 0 {
            continue; // push path staged nothing here (allocation failure)
        }
        *out_seq += 1;
        let (mt, mt_len) = slot.msg_type_bytes();
        // staged from &str
        let msg_type = unsafe { std::str::from_utf8_unchecked(&mt[..mt_len]) };
        let expiry = slot.expiry();
        let (buf, payload_len) = slot.framing_buf();
        let range = header.complete_frame(buf, payload_len, msg_type, *out_seq);

        let partial_start = crate::slot::HEAD_RESERVED;
        if let Err(e) = journal.store_sent(
            *out_seq,
            expiry,
            msg_type,
            &buf[partial_start..partial_start + payload_len],
        ) {
            // steady-state journal failures are logged, not fatal
            warn!("sent-journal insert failed for seq {seq}: {e}", seq = *out_seq);
        }

        let frame = unsafe { ring.show_entry(s) }.frame_range(range);
        iov.push(IoSlice::new(frame));
        frames += 1;
        if iov.len() == iov_max {
            writev_all(sink, &mut iov)?;
        }
    }
    writev_all(sink, &mut iov)?;
    ring.release_entry(&cursor.handle, committed);
    cursor.next = committed + 1;
    Ok(frames)
}

/// Drains the resend lane. Resent frames keep their original sequence
/// numbers and are not re-journaled.
fn drain_resend(
    ring: &ResendRing,
    cursor: &mut LaneCursor,
    header: &FrameHeader,
    sink: &mut TcpStream,
    iov_max: usize,
) -> io::Result<u64> {
    let Some(committed) = ring.try_wait_for(cursor.next) else {
        return Ok(0);
    };
    let mut frames = 0u64;
    let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(iov_max.min(64));
    for s in cursor.next..=committed {
        let slot = unsafe { ring.acquire_entry(s) };
        if slot.slot.payload_len() == 0 {
            continue;
        }
        let original_seq = slot.seq;
        let (mt, mt_len) = slot.slot.msg_type_bytes();
        let msg_type = unsafe { std::str::from_utf8_unchecked(&mt[..mt_len]) };
        let (buf, payload_len) = slot.slot.framing_buf();
        let range = header.complete_frame(buf, payload_len, msg_type, original_seq);

        let frame = unsafe { ring.show_entry(s) }.slot.frame_range(range);
        iov.push(IoSlice::new(frame));
        frames += 1;
        if iov.len() == iov_max {
            writev_all(sink, &mut iov)?;
        }
    }
    writev_all(sink, &mut iov)?;
    ring.release_entry(&cursor.handle, committed);
    cursor.next = committed + 1;
    Ok(frames)
}

fn writer_loop(shared: Arc<PusherShared>) {
    let register = |ring_name: &str, r: Result<(ConsumerHandle, u64), galena_ring::RingError>| {
        let (handle, start) = r.expect(ring_name);
        LaneCursor {
            handle,
            next: start + 1,
        }
    };
    let mut fast = register("fast lane barrier", shared.fast.register_consumer());
    let mut oversize = register("oversize lane barrier", shared.oversize.register_consumer());
    let mut session = register("session lane barrier", shared.session.register_consumer());
    let mut resend = register("resend lane barrier", shared.resend.register_consumer());

    let iov_max = {
        let v = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
        if v > 0 { v as usize } else { 1024 }
    };

    'outer: loop {
        shared.writer_running.store(false, Ordering::Release);
        while shared.pause.load(Ordering::Acquire) {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            std::thread::yield_now();
        }
        shared.writer_running.store(true, Ordering::Release);

        let (journal_path, version, sink) = {
            let guard = shared.settings.lock().expect("pusher settings lock poisoned");
            match guard.as_ref() {
                Some(s) => (s.journal_path.clone(), s.version, s.sink.try_clone()),
                None => {
                    std::thread::yield_now();
                    continue 'outer;
                }
            }
        };
        let mut sink = match sink {
            Ok(s) => s,
            Err(e) => {
                error!("could not clone sink socket: {e}");
                shared
                    .error
                    .store(e.raw_os_error().unwrap_or(libc::EIO), Ordering::Release);
                shared.pause.store(true, Ordering::Release);
                continue 'outer;
            }
        };
        let header = FrameHeader::new(version.as_str(), shared.soh);

        // Startup journal failures abort: framing without a journal would
        // silently forfeit gap recovery.
        let journal = match MsgJournal::open(&journal_path) {
            Ok(j) => j,
            Err(e) => {
                error!(
                    "could not open sent journal at {path}: {e}",
                    path = journal_path.display()
                );
                std::process::abort();
            }
        };
        let mut out_seq = match journal.latest_sent_seq() {
            Ok(s) => s,
            Err(e) => {
                error!("could not read latest sent sequence: {e}");
                std::process::abort();
            }
        };
        shared.db_open.store(true, Ordering::Release);
        debug!(
            "sink writer running, last outgoing seq {out_seq}, version {v}",
            v = version.as_str()
        );

        let run_error: Option<io::Error> = loop {
            if shared.shutdown.load(Ordering::Acquire) || shared.pause.load(Ordering::Relaxed) {
                break None;
            }

            let oversize_pending = shared.oversize.try_wait_for(oversize.next).is_some();
            let sent = (|| -> io::Result<(u64, u64, u64, u64)> {
                let f = drain_lane(
                    &shared.fast, &mut fast, &mut out_seq, &header, &journal, &mut sink, iov_max,
                )?;
                let o = drain_lane(
                    &shared.oversize,
                    &mut oversize,
                    &mut out_seq,
                    &header,
                    &journal,
                    &mut sink,
                    iov_max,
                )?;
                let c = drain_lane(
                    &shared.session,
                    &mut session,
                    &mut out_seq,
                    &header,
                    &journal,
                    &mut sink,
                    iov_max,
                )?;
                let r = drain_resend(&shared.resend, &mut resend, &header, &mut sink, iov_max)?;
                Ok((f, o, c, r))
            })();

            match sent {
                Ok((f, o, c, r)) => {
                    let stats = &shared.stats;
                    stats.fast_frames.fetch_add(f, Ordering::Relaxed);
                    stats.oversize_frames.fetch_add(o, Ordering::Relaxed);
                    stats.session_frames.fetch_add(c, Ordering::Relaxed);
                    stats.resend_frames.fetch_add(r, Ordering::Relaxed);
                    if oversize_pending && f > 0 {
                        stats.oversize_starved_passes.fetch_add(1, Ordering::Relaxed);
                    }
                    if f + o + c + r == 0 {
                        std::thread::yield_now();
                    }
                }
                Err(e) => break Some(e),
            }
        };

        shared.db_open.store(false, Ordering::Release);
        if let Err(e) = journal.close() {
            warn!("sent journal close failed: {e}");
        }
        if let Some(e) = run_error {
            error!("sink writer stopping on write error: {e}");
            shared
                .error
                .store(e.raw_os_error().unwrap_or(libc::EIO), Ordering::Release);
            shared.pause.store(true, Ordering::Release);
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}
