//! Collaborator traits: buffer pool, recovery, and server state.
//!
//! The log engine never walks buffer pool internals. It asks for the
//! oldest dirty LSN, requests list flushes up to a target, and checks
//! quiescence at shutdown. The default implementations model an always
//! clean, quiesced server so the engine can run standalone.

use crate::log::Lsn;

/// Buffer pool as seen from the log engine.
pub trait BufferPool: Send + Sync {
    /// LSN of the oldest modification of any dirty page, or 0 if the
    /// pool is clean.
    fn oldest_modification_lsn(&self) -> Lsn;

    /// Flushes dirty pages whose oldest modification is below
    /// `upto_lsn`, at most `limit_pages` of them.
    ///
    /// Returns false if a flush batch of the same kind was already
    /// running, along with the number of pages flushed.
    fn flush_lists(&self, limit_pages: usize, upto_lsn: Lsn) -> (bool, usize);

    /// Waits for the currently running flush batch to end.
    fn wait_batch_end(&self);

    /// Whether a flush-list batch is currently in progress.
    fn flush_list_in_progress(&self) -> bool {
        false
    }

    /// Whether a background page cleaner thread is active.
    fn page_cleaner_active(&self) -> bool {
        false
    }

    /// Whether every page has been flushed and freed (shutdown check).
    fn all_freed(&self) -> bool;

    /// Number of buffer page I/Os still outstanding.
    fn pending_io(&self) -> usize;
}

/// A buffer pool with no dirty pages, used when the log engine runs
/// without a pool attached.
pub struct CleanPool;

impl BufferPool for CleanPool {
    fn oldest_modification_lsn(&self) -> Lsn {
        0
    }

    fn flush_lists(&self, _limit_pages: usize, _upto_lsn: Lsn) -> (bool, usize) {
        (true, 0)
    }

    fn wait_batch_end(&self) {}

    fn all_freed(&self) -> bool {
        true
    }

    fn pending_io(&self) -> usize {
        0
    }
}

/// Recovery subsystem as seen from the log engine.
pub trait RecoveryHook: Send + Sync {
    /// Whether crash recovery is currently running.
    fn recovery_on(&self) -> bool {
        false
    }

    /// Applies the log records collected so far to their pages.
    ///
    /// Invoked at checkpoint start while recovery is active, so the
    /// page modification LSNs are accurate before the oldest dirty LSN
    /// is read.
    fn apply_hashed_log_recs(&self, _all: bool) {}
}

/// Recovery hook for a cleanly started engine.
pub struct NoRecovery;

impl RecoveryHook for NoRecovery {}

/// Server-side quiescence checks consulted by the shutdown drain.
pub trait ServerHooks: Send + Sync {
    /// Name of a background monitor thread that is still running, if
    /// any.
    fn active_background_thread(&self) -> Option<&'static str> {
        None
    }

    /// Number of active transactions; PREPARED transactions do not
    /// count.
    fn active_transactions(&self) -> usize {
        0
    }

    /// Whether master, worker and purge threads are suspended.
    fn workers_suspended(&self) -> bool {
        true
    }
}

/// Server hooks describing an already quiet server.
pub struct QuiescedServer;

impl ServerHooks for QuiescedServer {}
