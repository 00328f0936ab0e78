//! Inbound path: socket reader, frame splitter, and the pop APIs.
//!
//! The reader thread appends raw byte chunks to the raw ring. The splitter
//! thread scans them into frames, verifies checksum and sequence, persists
//! accepted messages, answers `ResendRequest`s, and routes everything onto
//! the application ring (heap envelopes, ownership moves to the popping
//! caller) or the session ring (inline slots, borrowed in place).
//!
//! The application ring supports two mutually exclusive consumption modes:
//! shared owned pops (mutex-serialized, each message delivered exactly
//! once) or registered poppers (lock-free private cursors, every consumer
//! sees every message as an owned copy). The first style used wins; mixing
//! them would let an owned pop steal a buffer out from under a registered
//! reader.

use crate::pusher::{SessionPusher, StartError};
use crate::slot::{
    APP_CONSUMERS, APP_LANE_LEN, ChunkSlot, Envelope, RAW_LANE_LEN, SESSION_IN_LEN, SessionSlot,
};
use crate::splitter::FrameScanner;
use galena_journal::MsgJournal;
use galena_msg::checksum::{checksum_digits, fix_checksum};
use galena_msg::{
    FixMessageRx, FixMessageTx, FixVersion, MsgType, SessionTypeSet, format_sending_time,
    type_key,
};
use galena_ring::{ConsumerHandle, RingBuffer, RingError};
use std::io::Read;
use std::marker::PhantomData;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type RawRing = RingBuffer<ChunkSlot, RAW_LANE_LEN, 1>;
pub type AppRing = RingBuffer<Envelope, APP_LANE_LEN, APP_CONSUMERS>;
pub type SessionInRing = RingBuffer<SessionSlot, SESSION_IN_LEN, 1>;

/// One application message, owned by the caller.
#[derive(Debug)]
pub struct AppMessage {
    /// Offset of the first byte of the MsgType value inside `data`.
    pub msgtype_offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PopError {
    #[error("application queue is being consumed by registered poppers")]
    BroadcastMode,
    #[error("application queue is being consumed by owned pops")]
    OwnedMode,
    #[error(transparent)]
    Ring(#[from] RingError),
}

const MODE_UNSET: u8 = 0;
const MODE_OWNED: u8 = 1;
const MODE_BROADCAST: u8 = 2;

struct PopperSettings {
    journal_path: PathBuf,
    version: FixVersion,
    source: TcpStream,
    /// Parked here while the splitter is idle so a restart can reuse it.
    pusher: Option<SessionPusher>,
}

struct SharedPopCursor {
    handle: Option<ConsumerHandle>,
    next: u64,
}

pub(crate) struct PopperShared {
    soh: u8,
    raw: RawRing,
    app: AppRing,
    session: SessionInRing,
    pause: AtomicBool,
    shutdown: AtomicBool,
    reader_running: AtomicBool,
    splitter_running: AtomicBool,
    db_open: AtomicBool,
    peer_closed: AtomicBool,
    error: AtomicI32,
    /// Last accepted incoming sequence number.
    expected_seq: AtomicU64,
    app_mode: AtomicU8,
    app_pop: Mutex<SharedPopCursor>,
    settings: Mutex<Option<PopperSettings>>,
}

/// The inbound façade. The reader and splitter threads live for the life
/// of the value, idling while stopped.
pub struct Popper {
    shared: Arc<PopperShared>,
    reader: Option<JoinHandle<()>>,
    splitter: Option<JoinHandle<()>>,
    session_popper: Option<SessionPopper>,
    started: bool,
}

impl Popper {
    pub fn new(soh: u8) -> Self {
        let shared = Arc::new(PopperShared {
            soh,
            raw: RingBuffer::new(|_| ChunkSlot::new()),
            app: RingBuffer::new(|_| Envelope::new()),
            session: RingBuffer::new(|_| SessionSlot::new()),
            pause: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            reader_running: AtomicBool::new(false),
            splitter_running: AtomicBool::new(false),
            db_open: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
            error: AtomicI32::new(0),
            expected_seq: AtomicU64::new(0),
            app_mode: AtomicU8::new(MODE_UNSET),
            app_pop: Mutex::new(SharedPopCursor {
                handle: None,
                next: 1,
            }),
            settings: Mutex::new(None),
        });

        // The shared owned-pop cursor exists from the start so the first
        // pop observes every message ever published, not just late ones.
        {
            let (handle, start) = shared
                .app
                .register_consumer()
                .expect("application queue barrier");
            let mut guard = shared.app_pop.lock().expect("app pop lock poisoned");
            guard.handle = Some(handle);
            guard.next = start + 1;
        }

        // The session queue consumer exists from the start so the splitter
        // is gated even before the application attaches.
        let session_popper = {
            let (handle, start) = shared
                .session
                .register_consumer()
                .expect("session queue barrier");
            Some(SessionPopper {
                shared: Arc::clone(&shared),
                handle,
                next: start + 1,
                held: None,
                _single_thread: PhantomData,
            })
        };

        let reader = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("fix-source-reader".into())
                .spawn(move || reader_loop(shared))
                .expect("could not spawn source reader thread")
        };
        let splitter = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("fix-splitter".into())
                .spawn(move || splitter_loop(shared))
                .expect("could not spawn splitter thread")
        };

        Self {
            shared,
            reader: Some(reader),
            splitter: Some(splitter),
            session_popper,
            started: false,
        }
    }

    /// Binds the source socket (1 s receive timeout), the journal, the
    /// version, and the pusher used for automatic responses, then unpauses
    /// both threads. Settings may only change while stopped.
    pub fn start(
        &mut self,
        journal_path: impl Into<PathBuf>,
        version: FixVersion,
        pusher: SessionPusher,
        source: TcpStream,
    ) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        if let Err(e) = source.set_read_timeout(Some(Duration::from_secs(1))) {
            warn!("could not set source receive timeout: {e}");
        }
        *self.shared.settings.lock().expect("popper settings lock poisoned") =
            Some(PopperSettings {
                journal_path: journal_path.into(),
                version,
                source,
                pusher: Some(pusher),
            });
        self.shared.error.store(0, Ordering::Relaxed);
        self.shared.peer_closed.store(false, Ordering::Relaxed);
        self.shared.pause.store(false, Ordering::Release);
        self.started = true;
        Ok(())
    }

    /// Pauses both threads and waits for them to go idle. The wait is a
    /// spin-yield with no deadline: a reader blocked in a receive clears
    /// within its 1 s socket timeout, but a wedged splitter (for example
    /// one blocked publishing into a full, unconsumed queue) can hold
    /// `stop` indefinitely.
    pub fn stop(&mut self) {
        self.shared.pause.store(true, Ordering::Release);
        while self.shared.reader_running.load(Ordering::Acquire)
            || self.shared.splitter_running.load(Ordering::Acquire)
        {
            std::thread::yield_now();
        }
        self.started = false;
    }

    /// Blocking owned pop: hands out the next application message, each
    /// message delivered to exactly one caller.
    pub fn pop(&self) -> Result<AppMessage, PopError> {
        loop {
            if let Some(msg) = self.try_pop()? {
                return Ok(msg);
            }
            std::thread::yield_now();
        }
    }

    /// Non-blocking owned pop.
    pub fn try_pop(&self) -> Result<Option<AppMessage>, PopError> {
        self.claim_mode(MODE_OWNED).map_err(|_| PopError::BroadcastMode)?;
        let mut guard = self.shared.app_pop.lock().expect("app pop lock poisoned");
        if self.shared.app.try_wait_for(guard.next).is_none() {
            return Ok(None);
        }
        let seq = guard.next;
        // the shared cursor owns [next, committed]; nobody else touches it
        let slot = unsafe { self.shared.app.acquire_entry(seq) };
        let msgtype_offset = slot.msgtype_offset;
        let data = slot.data.take();
        let handle = guard
            .handle
            .as_ref()
            .expect("owned-mode cursor registered at construction");
        self.shared.app.release_entry(handle, seq);
        guard.next = seq + 1;
        debug_assert!(data.is_some(), "published envelope had no buffer");
        Ok(data.map(|data| AppMessage {
            msgtype_offset,
            data,
        }))
    }

    /// Owned pop with a deadline, for callers that must observe shutdown.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<AppMessage>, PopError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.try_pop()? {
                return Ok(Some(msg));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::yield_now();
        }
    }

    /// Registers a lock-free popper with a private cursor. Every
    /// registered popper sees every message published after registration,
    /// as an owned copy.
    pub fn register_popper(&self) -> Result<AppPopper, PopError> {
        self.claim_mode(MODE_BROADCAST).map_err(|_| PopError::OwnedMode)?;
        // retire the construction-time owned cursor: it will never advance
        // in broadcast mode and would gate the queue forever
        {
            let mut guard = self.shared.app_pop.lock().expect("app pop lock poisoned");
            if let Some(handle) = guard.handle.take() {
                self.shared.app.unregister(handle);
            }
        }
        let (handle, start) = self.shared.app.register_consumer()?;
        Ok(AppPopper {
            shared: Arc::clone(&self.shared),
            handle: Some(handle),
            next: start + 1,
        })
    }

    fn claim_mode(&self, want: u8) -> Result<(), ()> {
        match self.shared.app_mode.compare_exchange(
            MODE_UNSET,
            want,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) if current == want => Ok(()),
            Err(_) => Err(()),
        }
    }

    /// Hands out the session-queue handle. The first caller gets it; the
    /// session queue has exactly one consumer by contract.
    pub fn session_handle(&mut self) -> Option<SessionPopper> {
        self.session_popper.take()
    }

    /// Last accepted incoming sequence number.
    pub fn expected_incoming(&self) -> u64 {
        self.shared.expected_seq.load(Ordering::Acquire)
    }

    /// True once the peer has closed the connection.
    pub fn peer_closed(&self) -> bool {
        self.shared.peer_closed.load(Ordering::Acquire)
    }

    /// errno recorded by the reader thread, 0 when healthy.
    pub fn last_error(&self) -> i32 {
        self.shared.error.load(Ordering::Acquire)
    }

    /// Whether the splitter currently holds its journal connection open.
    pub fn journal_open(&self) -> bool {
        self.shared.db_open.load(Ordering::Acquire)
    }
}

impl Drop for Popper {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.pause.store(true, Ordering::Release);
        for t in [self.reader.take(), self.splitter.take()].into_iter().flatten() {
            let _ = t.join();
        }
    }
}

/// Lock-free registered consumer of the application queue.
pub struct AppPopper {
    shared: Arc<PopperShared>,
    handle: Option<ConsumerHandle>,
    next: u64,
}

impl AppPopper {
    /// Collects every currently available message into `out` (disruptor
    /// batching). Returns the number appended.
    pub fn pop_batch(&mut self, out: &mut Vec<AppMessage>) -> usize {
        let Some(handle) = self.handle.as_ref() else {
            return 0;
        };
        let Some(committed) = self.shared.app.try_wait_for(self.next) else {
            return 0;
        };
        let mut appended = 0;
        for seq in self.next..=committed {
            // broadcast mode: nobody takes the buffer, reads don't race
            let slot = unsafe { self.shared.app.show_entry(seq) };
            if let Some(data) = slot.data.as_ref() {
                out.push(AppMessage {
                    msgtype_offset: slot.msgtype_offset,
                    data: data.clone(),
                });
                appended += 1;
            }
            self.shared.app.release_entry(handle, seq);
        }
        self.next = committed + 1;
        appended
    }
}

impl Drop for AppPopper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.app.unregister(handle);
        }
    }
}

/// Single-thread consumer of the session queue. Returned messages are
/// borrowed from the slot: mutate freely, never keep them past the next
/// pop (the previous slot is released on the following call).
pub struct SessionPopper {
    shared: Arc<PopperShared>,
    handle: ConsumerHandle,
    next: u64,
    held: Option<u64>,
    _single_thread: PhantomData<std::cell::Cell<()>>,
}

impl SessionPopper {
    /// Whether a session message is waiting. Lets callers poll for
    /// readiness without tying up the borrow a pop hands out.
    pub fn has_pending(&self) -> bool {
        self.shared.session.try_wait_for(self.next).is_some()
    }

    /// Non-blocking session pop.
    pub fn try_session_pop(&mut self) -> Option<(u32, &mut [u8])> {
        self.shared.session.try_wait_for(self.next)?;
        Some(self.take_next())
    }

    /// Blocking session pop.
    pub fn session_pop(&mut self) -> (u32, &mut [u8]) {
        self.shared.session.wait_for(self.next);
        self.take_next()
    }

    fn take_next(&mut self) -> (u32, &mut [u8]) {
        if let Some(prev) = self.held.take() {
            self.shared.session.release_entry(&self.handle, prev);
        }
        let seq = self.next;
        self.next = seq + 1;
        self.held = Some(seq);
        // sole consumer, sequence not yet released
        let slot = unsafe { self.shared.session.acquire_entry(seq) };
        (slot.msgtype_offset, &mut slot.bytes[..slot.len as usize])
    }
}

impl Drop for SessionPopper {
    fn drop(&mut self) {
        if let Some(prev) = self.held.take() {
            self.shared.session.release_entry(&self.handle, prev);
        }
    }
}

// ─── reader thread ──────────────────────────────────────────────────────────

fn reader_loop(shared: Arc<PopperShared>) {
    'outer: loop {
        shared.reader_running.store(false, Ordering::Release);
        while shared.pause.load(Ordering::Acquire) {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            std::thread::yield_now();
        }
        shared.reader_running.store(true, Ordering::Release);

        let source = {
            let guard = shared.settings.lock().expect("popper settings lock poisoned");
            match guard.as_ref() {
                Some(s) => s.source.try_clone(),
                None => {
                    std::thread::yield_now();
                    continue 'outer;
                }
            }
        };
        let mut source = match source {
            Ok(s) => s,
            Err(e) => {
                error!("could not clone source socket: {e}");
                shared
                    .error
                    .store(e.raw_os_error().unwrap_or(libc::EIO), Ordering::Release);
                shared.pause.store(true, Ordering::Release);
                continue 'outer;
            }
        };

        'receive: loop {
            if shared.pause.load(Ordering::Relaxed) || shared.shutdown.load(Ordering::Acquire) {
                continue 'outer;
            }
            // claim before reading so a timeout retries into the same slot
            let seq = loop {
                match shared.raw.try_acquire_publisher_slot() {
                    Some(seq) => break seq,
                    None => {
                        if shared.pause.load(Ordering::Relaxed)
                            || shared.shutdown.load(Ordering::Acquire)
                        {
                            continue 'outer;
                        }
                        std::thread::yield_now();
                    }
                }
            };
            let slot = unsafe { shared.raw.acquire_entry(seq) };
            loop {
                match source.read(&mut slot.bytes) {
                    Ok(0) => {
                        info!("source peer closed the connection");
                        slot.len = 0;
                        shared.raw.commit_publisher_slot(seq);
                        shared.peer_closed.store(true, Ordering::Release);
                        // idle until the controller tears the session down
                        loop {
                            if shared.pause.load(Ordering::Relaxed)
                                || shared.shutdown.load(Ordering::Acquire)
                            {
                                continue 'outer;
                            }
                            std::thread::yield_now();
                        }
                    }
                    Ok(n) => {
                        slot.len = n as u32;
                        shared.raw.commit_publisher_slot(seq);
                        continue 'receive;
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock
                                | std::io::ErrorKind::TimedOut
                                | std::io::ErrorKind::Interrupted
                        ) =>
                    {
                        if shared.pause.load(Ordering::Relaxed)
                            || shared.shutdown.load(Ordering::Acquire)
                        {
                            slot.len = 0;
                            shared.raw.commit_publisher_slot(seq);
                            continue 'outer;
                        }
                    }
                    Err(e) => {
                        error!("source read failed: {e}");
                        shared
                            .error
                            .store(e.raw_os_error().unwrap_or(libc::EIO), Ordering::Release);
                        slot.len = 0;
                        shared.raw.commit_publisher_slot(seq);
                        shared.peer_closed.store(true, Ordering::Release);
                        loop {
                            if shared.pause.load(Ordering::Relaxed)
                                || shared.shutdown.load(Ordering::Acquire)
                            {
                                continue 'outer;
                            }
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }
    }
}

// ─── splitter thread ────────────────────────────────────────────────────────

struct Router<'a> {
    shared: &'a PopperShared,
    journal: &'a MsgJournal,
    rx: FixMessageRx,
    session_types: SessionTypeSet,
    pusher: SessionPusher,
    resend_tx: FixMessageTx,
    reject_tx: FixMessageTx,
    version: FixVersion,
    prefix_len: usize,
    expected: u64,
}

impl Router<'_> {
    /// Full validation pipeline for one assembled frame, spec'd order:
    /// checksum, sequence, message type, classification, routing.
    fn route(&mut self, frame: &mut Vec<u8>) {
        let total = frame.len();
        if total < self.prefix_len + 9 {
            return; // cannot even hold an empty body plus checksum
        }

        // 1. checksum over everything before "10=NNN<SEP>"
        let sum = fix_checksum(&frame[..total - 7]);
        if frame[total - 4..total - 1] != checksum_digits(sum) {
            debug!("dropping frame with bad checksum");
            return; // silent: the gap will surface via sequence checking
        }

        // 2. sequence number must be exactly expected + 1
        let seq = find_seq_num(frame, self.shared.soh);
        if seq != self.expected + 1 {
            warn!(
                "wrong sequence number received: {seq} - expected: {want}",
                want = self.expected + 1
            );
            self.send_resend_request();
            return;
        }

        // 3. locate the MsgType value
        let mut i = self.prefix_len;
        while i < total && frame[i].is_ascii_digit() {
            i += 1;
        }
        let msgtype_offset = i + 4; // <SEP>35=
        if msgtype_offset >= total - 7 || frame[msgtype_offset] == self.shared.soh {
            // the frame was correctly sequenced, only its type is unusable
            self.accept(seq);
            warn!("malformed message type value");
            self.send_reject(seq, "malformed message type value");
            return;
        }
        let type_end = msgtype_offset
            + frame[msgtype_offset..]
                .iter()
                .position(|&b| b == self.shared.soh)
                .unwrap_or(0);
        let key = type_key(&frame[msgtype_offset..type_end]);
        let classified = key.map(MsgType::from_key).unwrap_or(MsgType::Application);
        let is_session = key.map(|k| self.session_types.contains(k)).unwrap_or(false);

        // 4. route
        if !is_session {
            self.accept(seq);
            if let Err(e) = self.journal.store_recv(seq, frame) {
                warn!("recv-journal insert failed for seq {seq}: {e}");
            }
            let claim = self.shared.app.acquire_publisher_slot();
            let slot = unsafe { self.shared.app.acquire_entry(claim) };
            let recycled = slot.data.take().map_or_else(Vec::new, |mut v| {
                v.clear();
                v
            });
            slot.msgtype_offset = msgtype_offset as u32;
            slot.data = Some(std::mem::replace(frame, recycled));
            self.shared.app.commit_publisher_slot(claim);
        } else if classified == MsgType::ResendRequest {
            self.accept(seq);
            self.serve_resend_request(frame, msgtype_offset as u32, seq);
        } else {
            if total > SessionSlot::MAX_MSG {
                warn!("oversized session message, dropping without accepting");
                return;
            }
            self.accept(seq);
            if let Err(e) = self.journal.store_recv(seq, frame) {
                warn!("recv-journal insert failed for seq {seq}: {e}");
            }
            let claim = self.shared.session.acquire_publisher_slot();
            let slot = unsafe { self.shared.session.acquire_entry(claim) };
            slot.len = total as u32;
            slot.msgtype_offset = msgtype_offset as u32;
            slot.bytes[..total].copy_from_slice(frame);
            self.shared.session.commit_publisher_slot(claim);
        }
    }

    fn accept(&mut self, seq: u64) {
        self.expected = seq;
        self.shared.expected_seq.store(seq, Ordering::Release);
    }

    /// Answers an incoming ResendRequest by replaying `[7, 16]` from the
    /// sent journal.
    fn serve_resend_request(&mut self, frame: &[u8], msgtype_offset: u32, seq: u64) {
        let mut begin: Option<u64> = None;
        let mut end: Option<u64> = None;
        let mut cursor = self.rx.imprint(msgtype_offset, frame);
        loop {
            match cursor.next_field() {
                Ok(Some(field)) => {
                    if field.tag == 7 {
                        begin = parse_decimal(field.value);
                    } else if field.tag == 16 {
                        end = parse_decimal(field.value);
                    }
                    if begin.is_some() && end.is_some() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("invalid ResendRequest received: {e}");
                    self.send_reject(seq, "invalid ResendRequest field");
                    return;
                }
            }
        }
        let (Some(begin), Some(end)) = (begin, end) else {
            warn!("invalid resend request");
            self.send_reject(
                seq,
                "invalid resend request - missing one or both of tag 7 or tag 16",
            );
            return;
        };
        if let Err(e) = self.pusher.resend(begin, end) {
            warn!("could not resend [{begin}, {end}]: {e}");
        }
    }

    /// Emits `35=2` asking for everything from the first missing sequence
    /// onward (`16=0` meaning "through infinity").
    fn send_resend_request(&mut self) {
        let first_missing = (self.expected + 1).to_string();
        let now = format_sending_time(self.version, chrono::Utc::now());
        let tx = &mut self.resend_tx;
        let ok = tx.append_field(35, b"2").is_ok()
            && tx.append_field(7, first_missing.as_bytes()).is_ok()
            && tx.append_field(16, b"0").is_ok()
            && tx.append_field(52, now.as_bytes()).is_ok();
        if !ok {
            warn!("could not build resend request");
            return;
        }
        if let Some(msg) = self.resend_tx.expose()
            && let Err(e) = self.pusher.session_push(msg.ttl, msg.bytes, msg.msg_type)
        {
            warn!("could not push resend request: {e}");
        }
    }

    /// Emits a session-level `35=3` with the offending sequence in tag 45
    /// and the reason in tag 58.
    fn send_reject(&mut self, ref_seq: u64, reason: &str) {
        let seq_str = ref_seq.to_string();
        let now = format_sending_time(self.version, chrono::Utc::now());
        let tx = &mut self.reject_tx;
        let ok = tx.append_field(35, b"3").is_ok()
            && tx.append_field(45, seq_str.as_bytes()).is_ok()
            && tx.append_field(58, reason.as_bytes()).is_ok()
            && tx.append_field(52, now.as_bytes()).is_ok();
        if !ok {
            warn!("could not build session-level reject");
            return;
        }
        if let Some(msg) = self.reject_tx.expose()
            && let Err(e) = self.pusher.session_push(msg.ttl, msg.bytes, msg.msg_type)
        {
            warn!("could not push session-level reject: {e}");
        }
    }
}

/// Scans for `<SEP>34=` and parses the digits behind it. Returns 0 when
/// absent or malformed, which can never match an expected sequence.
fn find_seq_num(frame: &[u8], soh: u8) -> u64 {
    let pattern = [soh, b'3', b'4', b'='];
    let Some(p) = frame.windows(4).position(|w| w == pattern) else {
        return 0;
    };
    let mut v: u64 = 0;
    let mut any = false;
    for &b in &frame[p + 4..] {
        if b == soh {
            break;
        }
        if !b.is_ascii_digit() {
            return 0;
        }
        v = match v.checked_mul(10).and_then(|v| v.checked_add((b - b'0') as u64)) {
            Some(v) => v,
            None => return 0,
        };
        any = true;
    }
    if any { v } else { 0 }
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut v: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(v)
}

fn splitter_loop(shared: Arc<PopperShared>) {
    let (raw_handle, raw_start) = shared
        .raw
        .register_consumer()
        .expect("raw queue barrier");
    let mut raw_next = raw_start + 1;

    'outer: loop {
        shared.splitter_running.store(false, Ordering::Release);
        while shared.pause.load(Ordering::Acquire) {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            std::thread::yield_now();
        }
        shared.splitter_running.store(true, Ordering::Release);

        let (journal_path, version, pusher) = {
            let mut guard = shared.settings.lock().expect("popper settings lock poisoned");
            match guard.as_mut() {
                Some(s) => (s.journal_path.clone(), s.version, s.pusher.take()),
                None => {
                    std::thread::yield_now();
                    continue 'outer;
                }
            }
        };
        let Some(pusher) = pusher else {
            std::thread::yield_now();
            continue 'outer;
        };

        // Startup journal failures abort: accepting frames without a
        // journal would break gap recovery for the peer.
        let journal = match MsgJournal::open(&journal_path) {
            Ok(j) => j,
            Err(e) => {
                error!(
                    "could not open recv journal at {path}: {e}",
                    path = journal_path.display()
                );
                std::process::abort();
            }
        };
        let expected = match journal.latest_recv_seq() {
            Ok(s) => s,
            Err(e) => {
                error!("could not read latest received sequence: {e}");
                std::process::abort();
            }
        };
        shared.db_open.store(true, Ordering::Release);
        shared.expected_seq.store(expected, Ordering::Release);
        debug!("splitter running, last incoming seq {expected}");

        let header = crate::assembler::FrameHeader::new(version.as_str(), shared.soh);
        let mut scanner = FrameScanner::new(header.start_bytes(), shared.soh);
        let mut router = Router {
            shared: &shared,
            journal: &journal,
            rx: FixMessageRx::new(version, shared.soh),
            session_types: SessionTypeSet::new(),
            pusher,
            resend_tx: FixMessageTx::new(shared.soh),
            reject_tx: FixMessageTx::new(shared.soh),
            version,
            prefix_len: header.start_bytes().len(),
            expected,
        };

        while !shared.pause.load(Ordering::Relaxed) && !shared.shutdown.load(Ordering::Acquire) {
            let Some(committed) = shared.raw.try_wait_for(raw_next) else {
                std::thread::yield_now();
                continue;
            };
            for seq in raw_next..=committed {
                let chunk = unsafe { shared.raw.show_entry(seq) };
                let filled = chunk.filled();
                scanner.consume(filled, |frame| router.route(frame));
                // release per entry so very long messages spanning more
                // chunks than the queue holds cannot deadlock the reader
                shared.raw.release_entry(&raw_handle, seq);
                raw_next = seq + 1;
            }
        }

        // park the pusher handle for the next start()
        let Router { pusher, .. } = router;
        if let Some(s) = shared
            .settings
            .lock()
            .expect("popper settings lock poisoned")
            .as_mut()
        {
            s.pusher = Some(pusher);
        }
        shared.db_open.store(false, Ordering::Release);
        if let Err(e) = journal.close() {
            warn!("recv journal close failed: {e}");
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}
