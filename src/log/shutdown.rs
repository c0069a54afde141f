//! Shutdown drain.
//!
//! Makes a final checkpoint at the latest LSN and marks the files
//! clean, so the next startup knows no recovery is needed. The engine
//! only proceeds once the server around it is quiet; the checks loop
//! with 100 ms sleeps until everything has drained.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::log::{LogEngine, Lsn, LSN_MAX};

/// Cooperative shutdown phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    /// Normal operation.
    None = 0,
    /// Background activity is being wound down.
    Cleanup = 1,
    /// The buffer pool is flushing; only the page cleaner may run.
    FlushPhase = 2,
    /// Files are being closed.
    LastPhase = 3,
}

impl From<u8> for ShutdownState {
    fn from(value: u8) -> Self {
        match value {
            1 => ShutdownState::Cleanup,
            2 => ShutdownState::FlushPhase,
            3 => ShutdownState::LastPhase,
            _ => ShutdownState::None,
        }
    }
}

impl LogEngine {
    /// Empties the log and marks the files clean at shutdown.
    ///
    /// Waits for the server to go quiet, then writes a final checkpoint
    /// at the latest LSN, flushes everything, stamps the flushed LSN
    /// into the data files and closes them. With `very_fast` set, only
    /// the log buffer is flushed: the next startup will run crash
    /// recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush, checkpoint or file operation fails.
    pub fn logs_empty_and_mark_files_at_shutdown(&self, very_fast: bool) -> Result<()> {
        tracing::info!("starting shutdown");

        // The algorithm below only works if the server is idle.
        self.set_shutdown_state(ShutdownState::Cleanup);
        let mut count: u32 = 0;

        loop {
            std::thread::sleep(Duration::from_millis(100));
            count += 1;

            if let Some(thread_name) = self.server.active_background_thread() {
                if count > 600 {
                    tracing::info!(
                        thread = thread_name,
                        "waiting for background thread to exit"
                    );
                    count = 0;
                }
                continue;
            }

            // Even the fastest shutdown waits out active transactions;
            // only PREPARED ones may remain.
            let total_trx = self.server.active_transactions();
            if total_trx > 0 {
                if count > 600 {
                    tracing::info!(total_trx, "waiting for active transactions to finish");
                    count = 0;
                }
                continue;
            }

            if !self.server.workers_suspended() {
                if count > 600 {
                    tracing::info!("waiting for worker threads to be suspended");
                    count = 0;
                }
                continue;
            }

            // From here only the page cleaner may be active; let it
            // finish flushing the buffer pool.
            self.set_shutdown_state(ShutdownState::FlushPhase);
            while self.pool.page_cleaner_active() {
                count += 1;
                std::thread::sleep(Duration::from_millis(100));
                if count > 600 {
                    tracing::info!("waiting for the page cleaner to finish flushing");
                    count = 0;
                }
            }

            let (n_checkpoint, n_flush) = {
                let inner = self.inner.lock();
                (inner.n_pending_checkpoint_writes, inner.n_pending_flushes)
            };
            if n_checkpoint != 0 || n_flush != 0 {
                if count > 600 {
                    tracing::info!(
                        pending_checkpoint_writes = n_checkpoint,
                        pending_flushes = n_flush,
                        "waiting for pending log writes"
                    );
                    count = 0;
                }
                continue;
            }

            let pending_io = self.pool.pending_io();
            if pending_io > 0 {
                if count > 600 {
                    tracing::info!(pending_io, "waiting for buffer page I/Os to complete");
                    count = 0;
                }
                continue;
            }

            if very_fast {
                if !self.config.read_only {
                    tracing::info!(
                        "very fast shutdown: flushing only the log buffer; the \
                         next startup will run crash recovery"
                    );

                    // Committed transactions survive a crash recovery as
                    // long as the log itself is durable. The data files
                    // keep their stamps untouched so startup can tell
                    // the shutdown was not clean.
                    self.buffer_flush_to_disk()?;

                    if self.server.active_background_thread().is_some() {
                        tracing::warn!("a background thread woke up during shutdown");
                        continue;
                    }
                }

                self.set_shutdown_state(ShutdownState::LastPhase);
                let lsn = self.inner.lock().lsn;
                self.shutdown_lsn.store(lsn, Ordering::Relaxed);
                self.tablespaces.close_all()?;
                return Ok(());
            }

            if !self.config.read_only {
                self.make_checkpoint_at(LSN_MAX, true)?;
            }

            let (lsn, last_checkpoint_lsn) = {
                let inner = self.inner.lock();
                (inner.lsn, inner.last_checkpoint_lsn)
            };
            debug_assert!(lsn >= last_checkpoint_lsn);

            let tracker_caught_up =
                !self.tracking_enabled() || self.tracked_lsn() == last_checkpoint_lsn;
            if lsn != last_checkpoint_lsn || !tracker_caught_up {
                continue;
            }

            if self.server.active_background_thread().is_some() {
                tracing::warn!("a background thread woke up during shutdown");
                continue;
            }

            if !self.config.read_only {
                self.tablespaces.flush_data_files()?;
                self.tablespaces.flush_log_files()?;

                let spaces: Vec<_> = {
                    let inner = self.inner.lock();
                    inner.groups.iter().map(|g| g.space.clone()).collect()
                };
                for space in spaces {
                    space.flush()?;
                }
            }

            // Stamping the flushed LSN bypasses the buffer pool, so the
            // pool must be completely flushed by now.
            if !self.pool.all_freed() {
                if count > 600 {
                    tracing::info!("waiting for dirty buffer pages to be flushed");
                    count = 0;
                }
                continue;
            }

            self.set_shutdown_state(ShutdownState::LastPhase);

            let final_lsn = self.inner.lock().lsn;
            debug_assert_eq!(final_lsn, lsn);

            if lsn < self.startup_lsn {
                tracing::error!(
                    shutdown_lsn = lsn,
                    startup_lsn = self.startup_lsn,
                    "log sequence number at shutdown is lower than at startup"
                );
            }
            self.shutdown_lsn.store(lsn, Ordering::Relaxed);

            if !self.config.read_only {
                self.tablespaces.write_flushed_lsn(lsn)?;
            }
            self.tablespaces.close_all()?;

            tracing::info!(shutdown_lsn = lsn, "shutdown complete");
            return Ok(());
        }
    }

    /// LSN recorded when the shutdown drain finished, or 0 if it has
    /// not run.
    #[must_use]
    pub fn shutdown_lsn(&self) -> Lsn {
        self.shutdown_lsn.load(Ordering::Relaxed)
    }
}
