//! Redo-log engine core.
//!
//! This module implements the write-ahead-logging substrate of the
//! storage manager:
//! - An in-memory log buffer staging block-framed record bytes
//! - The monotonic LSN stream (framing overhead consumes LSNs too)
//! - A ring of fixed-size log files per group
//! - The write-and-flush protocol serializing concurrent writers
//! - Checkpointing that bounds crash-recovery replay
//!
//! Producers append under the log mutex through an RAII guard:
//!
//! ```ignore
//! let mut record = engine.reserve_and_open(len)?;
//! record.append(&bytes);
//! let lsn = record.close();
//! engine.write_up_to(lsn, true)?;
//! ```

pub mod block;
mod buffer;
mod checkpoint;
pub mod checksum;
pub mod group;
mod margins;
mod shutdown;
mod writer;

pub use checkpoint::{CheckpointRecord, CheckpointSlot, CHECKPOINT_MARKER_SIZE};
pub use margins::AgeThresholds;
pub use shutdown::ShutdownState;

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::config::LogConfig;
use crate::error::{LogError, Result};
use crate::io::{LogSpace, NoTablespaces, Tablespaces};
use crate::pool::{BufferPool, CleanPool, NoRecovery, QuiescedServer, RecoveryHook, ServerHooks};
use buffer::LogBuffer;
use group::LogGroup;

/// Log sequence number: a byte position in the logical log stream.
pub type Lsn = u64;

/// Reserved LSN meaning "no LSN".
pub const LSN_NONE: Lsn = 0;

/// Largest representable LSN.
pub const LSN_MAX: Lsn = u64::MAX;

/// First LSN of the log stream; one block's worth above zero so that
/// every record has a nonzero start LSN.
pub const LSN_START: Lsn = 8192;

/// Size of a log block on disk.
pub const BLOCK_SIZE: usize = 512;

/// Size of the block header.
pub const BLOCK_HDR_SIZE: usize = 12;

/// Size of the block trailer (checksum).
pub const BLOCK_TRL_SIZE: usize = 4;

/// Size of the fixed header region at the start of every log file.
pub const FILE_HDR_SIZE: u64 = 2048;

/// Bound on retry-with-yield loops before giving up.
const RETRY_LIMIT: usize = 50;

/// Manual-reset event: reset before a flush I/O, set on completion.
/// Waiters park on it without holding the log mutex.
pub(crate) struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    fn new(set: bool) -> Self {
        Self {
            state: Mutex::new(set),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        drop(state);
        self.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.state.lock() = false;
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.state.lock()
    }

    pub(crate) fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }
}

/// Mutable engine state guarded by the coarse log mutex.
pub(crate) struct LogInner {
    /// Current end of the log stream.
    pub(crate) lsn: Lsn,
    /// The in-memory log buffer.
    pub(crate) buf: LogBuffer,
    /// Whether a buffer reallocation is in progress.
    pub(crate) is_extending: bool,
    /// Highest LSN whose bytes have been submitted to I/O.
    pub(crate) write_lsn: Lsn,
    /// Highest LSN whose bytes are durable on disk.
    pub(crate) flushed_to_disk_lsn: Lsn,
    /// Target LSN of the flush currently in flight.
    pub(crate) current_flush_lsn: Lsn,
    /// Number of flushes in flight; at most one per group.
    pub(crate) n_pending_flushes: usize,
    /// Set when the governor should look at ages and buffer fill.
    pub(crate) check_flush_or_checkpoint: bool,
    /// Log groups in insertion order.
    pub(crate) groups: Vec<LogGroup>,
    /// Capacity of the smallest group; zero until a group exists.
    pub(crate) log_group_capacity: u64,
    /// Age thresholds derived from the smallest group capacity.
    pub(crate) ages: AgeThresholds,
    /// LSN of the latest completed checkpoint.
    pub(crate) last_checkpoint_lsn: Lsn,
    /// LSN of the checkpoint currently being written.
    pub(crate) next_checkpoint_lsn: Lsn,
    /// Number the next checkpoint will carry.
    pub(crate) next_checkpoint_no: u64,
    /// Checkpoint record writes in flight.
    pub(crate) n_pending_checkpoint_writes: usize,
    /// Log I/Os done over the engine lifetime.
    pub(crate) n_log_ios: u64,
    /// Snapshot of `n_log_ios` at the last stats printout.
    pub(crate) n_log_ios_old: u64,
    /// Time of the last stats printout.
    pub(crate) last_printout_time: Instant,
    /// Last time the capacity error was reported, for rate limiting.
    pub(crate) last_capacity_warning: Option<Instant>,
}

impl LogInner {
    /// Oldest dirty-page LSN, or the current LSN when the pool is
    /// clean. The log always contains headers and marker records, so a
    /// clean pool pins the checkpoint to the log end.
    pub(crate) fn oldest_modification_or_lsn(&self, pool: &dyn BufferPool) -> Lsn {
        let lsn = pool.oldest_modification_lsn();
        if lsn == LSN_NONE {
            self.lsn
        } else {
            lsn
        }
    }
}

/// Snapshot of engine counters, in the spirit of the buffer pool's
/// stats struct.
#[derive(Debug, Clone)]
pub struct LogStats {
    /// Current end of the log stream.
    pub lsn: Lsn,
    /// Highest LSN submitted to I/O.
    pub write_lsn: Lsn,
    /// Highest durable LSN.
    pub flushed_to_disk_lsn: Lsn,
    /// LSN of the latest completed checkpoint.
    pub last_checkpoint_lsn: Lsn,
    /// Number the next checkpoint will carry.
    pub next_checkpoint_no: u64,
    /// `lsn - last_checkpoint_lsn`.
    pub checkpoint_age: u64,
    /// Buffer fill level in bytes.
    pub buf_free: usize,
    /// Buffer size in bytes.
    pub buf_size: usize,
    /// Flushes in flight.
    pub n_pending_flushes: usize,
    /// Checkpoint writes in flight.
    pub n_pending_checkpoint_writes: usize,
    /// Log I/Os done so far.
    pub n_log_ios: u64,
    /// Whether the governor has been asked to look at ages and buffer
    /// fill.
    pub check_flush_or_checkpoint: bool,
}

/// The redo-log engine.
///
/// Process-wide singleton state of the log subsystem: create one with
/// [`LogEngine::init`], share it behind an `Arc`, and drive it to a
/// clean state with the shutdown drain before dropping.
pub struct LogEngine {
    pub(crate) config: LogConfig,
    pub(crate) inner: Mutex<LogInner>,
    /// Dirty-read mirror of `write_lsn` for the lock-free fast path.
    pub(crate) write_lsn_hint: AtomicU64,
    /// Reset before a flush I/O, set on completion.
    pub(crate) flush_event: Event,
    /// Held exclusive while a checkpoint write is in flight; `sync`
    /// checkpoint callers take it shared to wait for completion.
    pub(crate) checkpoint_lock: RwLock<()>,
    /// Serializes attach-to-flush-list operations of the buffer pool so
    /// that flush-list order matches LSN order.
    flush_order_mutex: Mutex<()>,
    shutdown_state: AtomicU8,
    /// LSN up to which the changed-page tracker has parsed the log.
    tracked_lsn: AtomicU64,
    tracking_enabled: AtomicBool,
    /// LSN recorded at engine start, checked against the shutdown LSN.
    pub(crate) startup_lsn: Lsn,
    pub(crate) shutdown_lsn: AtomicU64,
    pub(crate) pool: Arc<dyn BufferPool>,
    pub(crate) recovery: Arc<dyn RecoveryHook>,
    pub(crate) tablespaces: Arc<dyn Tablespaces>,
    pub(crate) server: Arc<dyn ServerHooks>,
}

impl LogEngine {
    /// Initializes the log system with no groups attached.
    ///
    /// The LSN stream starts one block header into `LSN_START`, so the
    /// first record opens at `LSN_START + 12`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init(config: LogConfig) -> Result<Self> {
        config.validate()?;

        let startup_lsn = LSN_START + BLOCK_HDR_SIZE as Lsn;
        let inner = LogInner {
            lsn: startup_lsn,
            buf: LogBuffer::new(config.buf_size, config.page_size, LSN_START),
            is_extending: false,
            write_lsn: LSN_START,
            flushed_to_disk_lsn: LSN_START,
            current_flush_lsn: LSN_NONE,
            n_pending_flushes: 0,
            check_flush_or_checkpoint: true,
            groups: Vec::new(),
            log_group_capacity: 0,
            ages: AgeThresholds::disabled(),
            last_checkpoint_lsn: LSN_START,
            next_checkpoint_lsn: LSN_NONE,
            next_checkpoint_no: 0,
            n_pending_checkpoint_writes: 0,
            n_log_ios: 0,
            n_log_ios_old: 0,
            last_printout_time: Instant::now(),
            last_capacity_warning: None,
        };

        let tracking_enabled = config.track_changed_pages;
        Ok(Self {
            config,
            inner: Mutex::new(inner),
            write_lsn_hint: AtomicU64::new(LSN_START),
            flush_event: Event::new(true),
            checkpoint_lock: RwLock::new(()),
            flush_order_mutex: Mutex::new(()),
            shutdown_state: AtomicU8::new(ShutdownState::None as u8),
            tracked_lsn: AtomicU64::new(if tracking_enabled { startup_lsn } else { LSN_NONE }),
            tracking_enabled: AtomicBool::new(tracking_enabled),
            startup_lsn,
            shutdown_lsn: AtomicU64::new(LSN_NONE),
            pool: Arc::new(CleanPool),
            recovery: Arc::new(NoRecovery),
            tablespaces: Arc::new(NoTablespaces),
            server: Arc::new(QuiescedServer),
        })
    }

    /// Attaches a buffer pool collaborator.
    #[must_use]
    pub fn with_buffer_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Attaches a recovery collaborator.
    #[must_use]
    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryHook>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Attaches a tablespace collaborator.
    #[must_use]
    pub fn with_tablespaces(mut self, tablespaces: Arc<dyn Tablespaces>) -> Self {
        self.tablespaces = tablespaces;
        self
    }

    /// Attaches server quiescence hooks used by the shutdown drain.
    #[must_use]
    pub fn with_server_hooks(mut self, server: Arc<dyn ServerHooks>) -> Self {
        self.server = server;
        self
    }

    /// Creates a log group backed by a ring of `n_files` files of
    /// `file_size` bytes each, and recomputes the age thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::GroupTooSmall`] if the smallest group cannot
    /// accommodate the reserved thread headroom, or an I/O error if the
    /// files cannot be created.
    pub fn group_init(
        &self,
        id: u32,
        n_files: u32,
        file_size: u64,
        space_id: u32,
        archive_space_id: u32,
    ) -> Result<()> {
        if n_files == 0 {
            return Err(LogError::InvalidConfig(
                "a log group needs at least one file".into(),
            ));
        }
        if file_size <= FILE_HDR_SIZE || file_size % BLOCK_SIZE as u64 != 0 {
            return Err(LogError::InvalidConfig(format!(
                "log file size {file_size} must be a multiple of {BLOCK_SIZE} \
                 larger than the file header"
            )));
        }

        let dir = self.config.dir.join(format!("space{space_id}"));
        let space = Arc::new(LogSpace::open(&dir, n_files, file_size)?);

        tracing::debug!(
            group = id,
            n_files,
            file_size,
            space_id,
            archive_space_id,
            "log group initialized"
        );

        let mut inner = self.inner.lock();
        inner
            .groups
            .push(LogGroup::new(id, n_files, file_size, space_id, LSN_START, space));
        self.calc_max_ages(&mut inner)
    }

    /// Opens the log for appending, returning a guard that holds the
    /// log mutex until closed.
    ///
    /// Retries with yields while the buffer is being extended or full;
    /// the returned start LSN is only handed out once the full
    /// reservation fits under current constraints.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::CapacityExceeded`] when the checkpoint age
    /// has reached the group capacity, or
    /// [`LogError::RetryExhausted`] when the wait loops made no
    /// progress.
    pub fn reserve_and_open(&self, len: usize) -> Result<LogWriteGuard<'_>> {
        if self.config.read_only {
            return Err(LogError::ReadOnly);
        }

        let mut count = 0;
        let mut tcount = 0;
        let mut inner = self.inner.lock();

        loop {
            if inner.is_extending {
                // Wait for the reallocation to finish.
                drop(inner);
                std::thread::sleep(Duration::from_micros(100));
                count += 1;
                if count >= RETRY_LIMIT {
                    return Err(LogError::RetryExhausted("log buffer extension"));
                }
                inner = self.inner.lock();
                continue;
            }

            // Upper limit for the space the record may take in the
            // buffer, framing and write-ahead padding included.
            let upper_limit =
                buffer::WRITE_MARGIN + self.config.write_ahead_size + (5 * len) / 4;

            if inner.buf.buf_free + upper_limit > inner.buf.buf_size {
                let needs_extension = upper_limit > inner.buf.buf_size;
                drop(inner);

                if needs_extension {
                    // No amount of flushing makes this record fit.
                    self.buffer_extend(upper_limit)?;
                } else {
                    self.buffer_sync_in_background(false)?;
                }

                count += 1;
                if count >= RETRY_LIMIT {
                    return Err(LogError::RetryExhausted("log buffer free space"));
                }
                inner = self.inner.lock();
                continue;
            }

            let age = inner.lsn - inner.last_checkpoint_lsn;
            if inner.log_group_capacity > 0 && age >= inner.log_group_capacity {
                self.report_capacity_error(&mut inner, age);
                let capacity = inner.log_group_capacity;
                return Err(LogError::CapacityExceeded { age, capacity });
            }

            if self.check_tracking_margin(&inner, upper_limit as u64)
                && tcount + count < RETRY_LIMIT
            {
                // The write would overrun untracked log. Bounded: past
                // the limit we proceed anyway, as the log may be about
                // to overflow with or without tracking.
                tcount += 1;
                drop(inner);
                std::thread::sleep(Duration::from_millis(10));
                inner = self.inner.lock();
                continue;
            }

            let start_lsn = inner.lsn;
            return Ok(LogWriteGuard {
                engine: self,
                inner,
                start_lsn,
            });
        }
    }

    /// Extends the log buffer to hold at least `len` bytes.
    ///
    /// Waits for concurrent extensions and drains the buffer to its
    /// tail block before reallocating.
    ///
    /// # Errors
    ///
    /// Returns an error if draining the buffer fails.
    pub fn buffer_extend(&self, len: usize) -> Result<()> {
        let mut inner = self.inner.lock();

        while inner.is_extending {
            // Another thread is already extending.
            drop(inner);
            self.buffer_flush_to_disk()?;
            inner = self.inner.lock();

            if inner.buf.buf_size > len {
                // Already extended enough by the others.
                return Ok(());
            }
        }

        if len >= inner.buf.buf_size / 2 {
            tracing::warn!(
                len,
                buf_size = inner.buf.buf_size,
                "log record is too large for the log buffer, extending it"
            );
        }

        inner.is_extending = true;

        while !inner.buf.drained_to_tail_block() {
            // The buffer still holds complete blocks to write.
            drop(inner);
            self.buffer_flush_to_disk()?;
            inner = self.inner.lock();
        }

        let page_size = self.config.page_size;
        // The buffer stays block-aligned across reallocations.
        let new_size = ((len / page_size + 1) * page_size).next_multiple_of(BLOCK_SIZE);
        if new_size > inner.buf.buf_size {
            inner.buf.extend_to(new_size, page_size);
        }
        inner.is_extending = false;
        let buf_size = inner.buf.buf_size;
        drop(inner);

        tracing::info!(buf_size, "log buffer size extended");
        Ok(())
    }

    /// Peeks the current LSN without blocking.
    ///
    /// Returns `None` if the log mutex could not be taken immediately.
    #[must_use]
    pub fn peek_lsn(&self) -> Option<Lsn> {
        self.inner.try_lock().map(|inner| inner.lsn)
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> LogStats {
        let inner = self.inner.lock();
        LogStats {
            lsn: inner.lsn,
            write_lsn: inner.write_lsn,
            flushed_to_disk_lsn: inner.flushed_to_disk_lsn,
            last_checkpoint_lsn: inner.last_checkpoint_lsn,
            next_checkpoint_no: inner.next_checkpoint_no,
            checkpoint_age: inner.lsn - inner.last_checkpoint_lsn,
            buf_free: inner.buf.buf_free,
            buf_size: inner.buf.buf_size,
            n_pending_flushes: inner.n_pending_flushes,
            n_pending_checkpoint_writes: inner.n_pending_checkpoint_writes,
            n_log_ios: inner.n_log_ios,
            check_flush_or_checkpoint: inner.check_flush_or_checkpoint,
        }
    }

    /// Prints engine info and per-second I/O averages to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn print<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        let oldest = inner.oldest_modification_or_lsn(self.pool.as_ref());

        writeln!(writer, "Log sequence number {}", inner.lsn)?;
        writeln!(writer, "Log flushed up to   {}", inner.flushed_to_disk_lsn)?;
        writeln!(writer, "Pages flushed up to {oldest}")?;
        writeln!(writer, "Last checkpoint at  {}", inner.last_checkpoint_lsn)?;

        writeln!(writer, "Max checkpoint age    {}", inner.ages.max_checkpoint_age)?;
        writeln!(
            writer,
            "Checkpoint age target {}",
            inner.ages.max_checkpoint_age_async
        )?;
        writeln!(writer, "Modified age          {}", inner.lsn - oldest)?;
        writeln!(
            writer,
            "Checkpoint age        {}",
            inner.lsn - inner.last_checkpoint_lsn
        )?;

        let elapsed = inner.last_printout_time.elapsed().as_secs_f64().max(1.0);
        writeln!(
            writer,
            "{} pending log flushes, {} pending chkp writes",
            inner.n_pending_flushes, inner.n_pending_checkpoint_writes
        )?;
        writeln!(
            writer,
            "{} log i/o's done, {:.2} log i/o's/second",
            inner.n_log_ios,
            (inner.n_log_ios - inner.n_log_ios_old) as f64 / elapsed
        )?;

        if self.tracking_enabled() {
            writeln!(writer, "Log tracking enabled")?;
            writeln!(writer, "Log tracked up to   {}", self.tracked_lsn())?;
            writeln!(
                writer,
                "Max tracked LSN age {}",
                inner.ages.max_checkpoint_age
            )?;
        }

        inner.n_log_ios_old = inner.n_log_ios;
        inner.last_printout_time = Instant::now();
        Ok(())
    }

    /// Resets the window used for per-second I/O averages.
    pub fn refresh_stats(&self) {
        let mut inner = self.inner.lock();
        inner.n_log_ios_old = inner.n_log_ios;
        inner.last_printout_time = Instant::now();
    }

    /// The mutex the buffer pool holds while linking a dirtied page to
    /// its flush list, so that list order matches LSN order.
    #[must_use]
    pub fn flush_order_mutex(&self) -> &Mutex<()> {
        &self.flush_order_mutex
    }

    /// Current cooperative shutdown state.
    #[must_use]
    pub fn shutdown_state(&self) -> ShutdownState {
        ShutdownState::from(self.shutdown_state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_shutdown_state(&self, state: ShutdownState) {
        self.shutdown_state.store(state as u8, Ordering::Relaxed);
    }

    /// Records the LSN up to which the changed-page tracker has parsed
    /// the log.
    pub fn set_tracked_lsn(&self, lsn: Lsn) {
        self.tracked_lsn.store(lsn, Ordering::Relaxed);
    }

    /// LSN up to which the changed-page tracker has parsed the log.
    #[must_use]
    pub fn tracked_lsn(&self) -> Lsn {
        self.tracked_lsn.load(Ordering::Relaxed)
    }

    /// Whether changed-page tracking is currently active.
    #[must_use]
    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled.load(Ordering::Relaxed)
    }

    /// Closes the log groups and their files.
    ///
    /// The backing memory is released when the engine is dropped.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.groups.clear();
    }

    /// Whether writing `lsn_advance` more bytes would overrun log that
    /// the changed-page tracker has not parsed yet.
    pub(crate) fn check_tracking_margin(&self, inner: &LogInner, lsn_advance: u64) -> bool {
        if !self.tracking_enabled() {
            return false;
        }
        let tracked = self.tracked_lsn();
        if tracked == LSN_NONE {
            return false;
        }

        // The overwrite would happen at the group capacity; the
        // checkpoint age threshold leaves an extra safety margin.
        let tracked_age = inner.lsn - tracked;
        tracked_age + lsn_advance > inner.ages.max_checkpoint_age
    }

    /// Emits the capacity-exceeded error log at most every 15 seconds.
    pub(crate) fn report_capacity_error(&self, inner: &mut LogInner, age: u64) {
        let now = Instant::now();
        let due = inner
            .last_capacity_warning
            .map_or(true, |at| now.duration_since(at) > Duration::from_secs(15));

        if due {
            inner.last_capacity_warning = Some(now);
            tracing::error!(
                age,
                capacity = inner.log_group_capacity,
                "the age of the last checkpoint exceeds the log group capacity"
            );
        }
    }

    /// Finishes an append: records the first-record-group offset,
    /// requests governor attention when the buffer or the ages crossed
    /// their thresholds, and returns the end LSN.
    fn close_log(&self, inner: &mut LogInner) -> Lsn {
        let lsn = inner.lsn;

        let buf_free = inner.buf.buf_free;
        let tail = inner.buf.block_at_mut(buf_free);
        if block::first_rec_group(tail) == 0 {
            // This record group was the first to start in a freshly
            // initialized block.
            let data_len = block::data_len(tail);
            block::set_first_rec_group(tail, data_len);
        }

        if inner.buf.buf_free > inner.buf.max_buf_free {
            inner.check_flush_or_checkpoint = true;
        }

        if self.tracking_enabled() {
            let tracked = self.tracked_lsn();
            if inner.log_group_capacity > 0
                && tracked != LSN_NONE
                && lsn - tracked >= inner.log_group_capacity
            {
                tracing::error!(
                    tracked_lsn = tracked,
                    "the age of the oldest untracked record exceeds the log \
                     group capacity; disabling changed-page tracking"
                );
                self.tracking_enabled.store(false, Ordering::Relaxed);
            }
        }

        let checkpoint_age = lsn - inner.last_checkpoint_lsn;
        if inner.log_group_capacity > 0 && checkpoint_age >= inner.log_group_capacity {
            self.report_capacity_error(inner, checkpoint_age);
        }

        if checkpoint_age <= inner.ages.max_modified_age_sync {
            return lsn;
        }

        let oldest = self.pool.oldest_modification_lsn();
        if oldest == LSN_NONE
            || lsn - oldest > inner.ages.max_modified_age_sync
            || checkpoint_age > inner.ages.max_checkpoint_age_async
        {
            inner.check_flush_or_checkpoint = true;
        }

        lsn
    }
}

/// RAII handle for one open log append, holding the log mutex.
///
/// The guard keeps other producers out until [`close`](Self::close);
/// every successful reserve/close pair observes a strictly monotonic
/// LSN range.
pub struct LogWriteGuard<'a> {
    engine: &'a LogEngine,
    inner: MutexGuard<'a, LogInner>,
    start_lsn: Lsn,
}

impl LogWriteGuard<'_> {
    /// Start LSN of this record.
    #[must_use]
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// Appends record bytes to the log buffer, advancing the LSN by
    /// the payload plus any block framing that became fixed.
    pub fn append(&mut self, bytes: &[u8]) {
        let inner = &mut *self.inner;
        inner.lsn = inner.buf.append_bytes(bytes, inner.lsn, inner.next_checkpoint_no);
    }

    /// Closes the append and releases the log mutex, returning the end
    /// LSN of the record.
    #[must_use]
    pub fn close(mut self) -> Lsn {
        self.engine.close_log(&mut self.inner)
    }
}
