//! Engine configuration and server knobs.

use std::path::PathBuf;

use crate::log::checksum::ChecksumAlgorithm;
use crate::log::BLOCK_SIZE;

/// How log writes reach stable storage.
///
/// Mirrors the flush-method knob of the surrounding server: some methods
/// make every write durable by themselves, others require an explicit
/// fsync after the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMethod {
    /// Buffered writes followed by fsync.
    Fsync,
    /// Files opened with O_DSYNC: every write is durable on return.
    ODsync,
    /// Direct I/O for data files; the log still needs fsync.
    ODirect,
    /// fsync only the log, not data files.
    LittleSync,
    /// Never fsync. Durability is left to the operating system.
    NoSync,
    /// Direct I/O for both data and log files; writes are durable.
    AllODirect,
    /// Direct I/O without the trailing fsync on data files.
    ODirectNoFsync,
}

impl FlushMethod {
    /// Whether a plain write is already durable, making the explicit
    /// flush after a log write redundant.
    #[must_use]
    pub fn write_implies_durability(self) -> bool {
        matches!(self, FlushMethod::ODsync | FlushMethod::AllODirect)
    }

    /// Whether the log files need an explicit fsync after writing.
    #[must_use]
    pub fn needs_log_flush(self) -> bool {
        !matches!(
            self,
            FlushMethod::ODsync | FlushMethod::AllODirect | FlushMethod::NoSync
        )
    }

    /// Whether data files are flushed when a checkpoint starts and when
    /// a checkpoint write completes.
    #[must_use]
    pub fn flushes_data_files(self) -> bool {
        !matches!(self, FlushMethod::NoSync | FlushMethod::AllODirect)
    }
}

/// Foreground preflush strategy used when the modified age grows past
/// the synchronous threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundPreflush {
    /// Ask the buffer pool to flush up to the target and wait.
    SyncPreflush,
    /// Back off with randomized sleeps while the page cleaner advances
    /// the oldest modification.
    ExpBackoff,
}

/// Configuration of the log engine.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory under which the log file rings are created.
    pub dir: PathBuf,
    /// Size of the in-memory log buffer in bytes.
    pub buf_size: usize,
    /// Page size of the storage manager the engine serves. The age
    /// governor headroom scales with it.
    pub page_size: usize,
    /// Number of concurrent server threads to reserve log headroom for.
    pub thread_concurrency: usize,
    /// Device-preferred write granularity; log writes are padded with
    /// zeroed bytes up to this boundary.
    pub write_ahead_size: usize,
    /// How writes reach stable storage.
    pub flush_method: FlushMethod,
    /// Block checksum strategy stamped on outgoing blocks.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Foreground preflush strategy.
    pub foreground_preflush: ForegroundPreflush,
    /// Whether a changed-page tracker follows the log.
    pub track_changed_pages: bool,
    /// Refuse all mutating operations.
    pub read_only: bool,
}

impl LogConfig {
    /// Creates a configuration with defaults rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            buf_size: 2 * 1024 * 1024,
            page_size: 4096,
            thread_concurrency: 0,
            write_ahead_size: 8192,
            flush_method: FlushMethod::Fsync,
            checksum_algorithm: ChecksumAlgorithm::Folded,
            foreground_preflush: ForegroundPreflush::SyncPreflush,
            track_changed_pages: false,
            read_only: false,
        }
    }

    /// Validates buffer and write-ahead geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is smaller than 16 blocks or
    /// 4 pages, or if the write-ahead size is not a power of two.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::LogError;

        if self.buf_size < 16 * BLOCK_SIZE {
            return Err(LogError::InvalidConfig(format!(
                "log buffer size {} is smaller than 16 blocks",
                self.buf_size
            )));
        }
        if self.buf_size < 4 * self.page_size {
            return Err(LogError::InvalidConfig(format!(
                "log buffer size {} is smaller than 4 pages",
                self.buf_size
            )));
        }
        if self.buf_size % BLOCK_SIZE != 0 {
            return Err(LogError::InvalidConfig(format!(
                "log buffer size {} is not a multiple of the block size",
                self.buf_size
            )));
        }
        if !self.write_ahead_size.is_power_of_two() {
            return Err(LogError::InvalidConfig(format!(
                "write-ahead size {} is not a power of two",
                self.write_ahead_size
            )));
        }
        Ok(())
    }
}
