//! redolog - redo-log engine for a page-oriented storage manager.
//!
//! Durable, ordered, append-only recording of physical page
//! modifications to a ring of fixed-size log files, with checkpointing
//! that bounds the amount of log replayed after a crash. The engine is
//! the write-ahead-logging substrate the transaction manager, buffer
//! pool and page flusher build on; record contents are opaque bytes to
//! it.

pub mod config;
pub mod error;
pub mod io;
pub mod log;
pub mod pool;

pub use config::{FlushMethod, ForegroundPreflush, LogConfig};
pub use error::{LogError, Result};
pub use io::{IoCompletion, LogSpace, NoTablespaces, Tablespaces};
pub use log::checksum::ChecksumAlgorithm;
pub use log::{
    CheckpointRecord, CheckpointSlot, LogEngine, LogStats, LogWriteGuard, Lsn, ShutdownState,
    BLOCK_HDR_SIZE, BLOCK_SIZE, BLOCK_TRL_SIZE, CHECKPOINT_MARKER_SIZE, FILE_HDR_SIZE, LSN_MAX,
    LSN_NONE, LSN_START,
};
pub use pool::{BufferPool, CleanPool, NoRecovery, QuiescedServer, RecoveryHook, ServerHooks};
