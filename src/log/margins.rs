//! Age and margin governor.
//!
//! Two bounded ages gate progress: the modified age (distance to the
//! oldest dirty page) and the checkpoint age (distance to the last
//! checkpoint). The thresholds derive once from the smallest group
//! capacity; crossing them triggers preflush or checkpointing, either
//! synchronously or in the background.

use std::time::Duration;

use rand::Rng;

use crate::config::ForegroundPreflush;
use crate::error::{LogError, Result};
use crate::log::{LogEngine, LogInner, Lsn, LSN_MAX, LSN_NONE};

/// Ratio controlling synchronous preflushing of modified pages.
const PREFLUSH_RATIO_SYNC: u64 = 16;

/// The asynchronous preflush ratio; smaller than the synchronous one.
const PREFLUSH_RATIO_ASYNC: u64 = 8;

/// Ratio controlling asynchronous checkpointing.
const CHECKPOINT_RATIO_ASYNC: u64 = 32;

/// Age thresholds derived from the smallest group capacity.
#[derive(Debug, Clone, Copy)]
pub struct AgeThresholds {
    /// Modified age above which an asynchronous preflush is requested.
    pub max_modified_age_async: u64,
    /// Modified age above which producers preflush synchronously.
    pub max_modified_age_sync: u64,
    /// Checkpoint age above which a background checkpoint starts.
    pub max_checkpoint_age_async: u64,
    /// Checkpoint age that forces a synchronous checkpoint.
    pub max_checkpoint_age: u64,
}

impl AgeThresholds {
    /// Thresholds that never trigger, used before any group exists.
    #[must_use]
    pub(crate) fn disabled() -> Self {
        Self {
            max_modified_age_async: LSN_MAX,
            max_modified_age_sync: LSN_MAX,
            max_checkpoint_age_async: LSN_MAX,
            max_checkpoint_age: LSN_MAX,
        }
    }

    /// Computes the thresholds for the smallest group capacity.
    ///
    /// Every server thread gets free space reserved in the smallest
    /// group for the log entries of a single query step; running out
    /// of log space is a serious error that requires a restart.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::GroupTooSmall`] if the usable capacity after
    /// the reservation is not more than half the group.
    pub fn compute(
        smallest_capacity: u64,
        page_size: usize,
        thread_concurrency: usize,
    ) -> Result<Self> {
        let reserve_per_thread = 4 * page_size as u64;
        let extra = 8 * page_size as u64;
        let reserved = reserve_per_thread * (10 + thread_concurrency as u64) + extra;

        let usable = smallest_capacity
            .saturating_sub(reserved)
            .saturating_sub(smallest_capacity / 10);
        if usable <= smallest_capacity / 2 {
            return Err(LogError::GroupTooSmall {
                needed: reserved,
                capacity: smallest_capacity,
            });
        }

        // Still some extra safety on top of the reservation.
        let margin = usable - usable / 10;

        Ok(Self {
            max_modified_age_async: margin - margin / PREFLUSH_RATIO_ASYNC,
            max_modified_age_sync: margin - margin / PREFLUSH_RATIO_SYNC,
            max_checkpoint_age_async: margin - margin / CHECKPOINT_RATIO_ASYNC,
            max_checkpoint_age: margin,
        })
    }
}

impl LogEngine {
    /// Recomputes the age thresholds from the smallest group.
    pub(crate) fn calc_max_ages(&self, inner: &mut LogInner) -> Result<()> {
        let smallest_capacity = inner
            .groups
            .iter()
            .map(super::group::LogGroup::capacity)
            .min()
            .ok_or_else(|| LogError::InvalidConfig("no log groups".into()))?;

        match AgeThresholds::compute(
            smallest_capacity,
            self.config.page_size,
            self.config.thread_concurrency,
        ) {
            Ok(ages) => {
                inner.log_group_capacity = smallest_capacity;
                inner.ages = ages;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    capacity = smallest_capacity,
                    thread_concurrency = self.config.thread_concurrency,
                    "cannot continue operation: the log files are too small \
                     for the configured thread concurrency; lower it or \
                     enlarge the log files"
                );
                Err(e)
            }
        }
    }

    /// Establishes a big enough margin of free space in the log buffer
    /// and the log groups that a new log entry can be catenated without
    /// an immediate flush or checkpoint.
    ///
    /// May only be called by a thread owning no log synchronization
    /// objects.
    ///
    /// # Errors
    ///
    /// Returns an error if a triggered write or checkpoint fails.
    pub fn check_margins(&self) -> Result<()> {
        loop {
            self.flush_margin()?;
            self.checkpoint_margin()?;

            {
                let inner = self.inner.lock();
                if self.check_tracking_margin(&inner, 0) {
                    drop(inner);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            }

            if !self.inner.lock().check_flush_or_checkpoint {
                return Ok(());
            }
        }
    }

    /// Starts a background write when the buffer fill has crossed the
    /// flush threshold.
    fn flush_margin(&self) -> Result<()> {
        let lsn = {
            let inner = self.inner.lock();
            if inner.buf.buf_free > inner.buf.max_buf_free {
                Some(inner.lsn)
            } else {
                None
            }
        };

        if let Some(lsn) = lsn {
            // We can write during a flush.
            self.write_up_to(lsn, false)?;
        }
        Ok(())
    }

    /// Preflushes and checkpoints as the ages demand.
    fn checkpoint_margin(&self) -> Result<()> {
        loop {
            let mut advance = 0u64;

            let mut inner = self.inner.lock();
            if !inner.check_flush_or_checkpoint {
                return Ok(());
            }

            let oldest_lsn = inner.oldest_modification_or_lsn(self.pool.as_ref());
            let age = inner.lsn - oldest_lsn;

            if age > inner.ages.max_modified_age_sync {
                // A flush is urgent: do a synchronous preflush.
                advance = 2 * (age - inner.ages.max_modified_age_sync);
            }

            let checkpoint_age = inner.lsn - inner.last_checkpoint_lsn;

            let (do_checkpoint, checkpoint_sync) =
                if checkpoint_age > inner.ages.max_checkpoint_age {
                    // A checkpoint is urgent: do it synchronously.
                    (true, true)
                } else if checkpoint_age > inner.ages.max_checkpoint_age_async {
                    inner.check_flush_or_checkpoint = false;
                    (true, false)
                } else {
                    inner.check_flush_or_checkpoint = false;
                    (false, false)
                };
            drop(inner);

            if advance != 0 {
                let new_oldest = oldest_lsn + advance;
                let success = self.preflush_pool_modified_pages(new_oldest)?;

                if !success {
                    // Another thread was flushing at the same time;
                    // have the governor look again.
                    self.inner.lock().check_flush_or_checkpoint = true;
                    continue;
                }
            }

            if do_checkpoint {
                self.checkpoint(checkpoint_sync, false)?;
                if checkpoint_sync {
                    continue;
                }
            }

            return Ok(());
        }
    }

    /// Advances the oldest modification LSN in the buffer pool to at
    /// least `new_oldest`.
    ///
    /// Returns false if a flush batch of the same type was already
    /// running, meaning this thread could not start the batch itself.
    ///
    /// # Errors
    ///
    /// Currently infallible, but kept fallible for collaborators whose
    /// flushing can fail.
    pub(crate) fn preflush_pool_modified_pages(&self, new_oldest: Lsn) -> Result<bool> {
        if self.recovery.recovery_on() {
            // Apply all collected log records to their pages first:
            // otherwise the modification LSNs in the pool understate
            // how far the disk pages lag, and a checkpoint computed
            // from the pool alone would be wrong.
            self.recovery.apply_hashed_log_recs(true);
        }

        if !self.pool.page_cleaner_active()
            || self.config.foreground_preflush == ForegroundPreflush::SyncPreflush
            || new_oldest == LSN_MAX
        {
            let (success, n_pages) = self.pool.flush_lists(usize::MAX, new_oldest);
            self.pool.wait_batch_end();

            if !success {
                tracing::debug!(new_oldest, "preflush found a flush batch running");
            } else if n_pages > 0 {
                tracing::debug!(new_oldest, n_pages, "preflushed modified pages");
            }
            return Ok(success);
        }

        // Exponential backoff behind the page cleaner.
        let mut current_oldest = self.pool.oldest_modification_lsn();
        let mut i = 0u32;

        while current_oldest < new_oldest && current_oldest != LSN_NONE {
            while !self.pool.flush_list_in_progress() {
                // No cleaner batch running; back off until one starts.
                let ceiling = 1u64 << i;
                let sleep_us = rand::thread_rng().gen_range(0..ceiling);
                std::thread::sleep(Duration::from_micros(sleep_us));
                i = (i + 1) % 16;
            }
            self.pool.wait_batch_end();

            current_oldest = self.pool.oldest_modification_lsn();
        }

        Ok(current_oldest >= new_oldest || current_oldest == LSN_NONE)
    }
}
