//! Writer/flusher: drains the log buffer to the group files and
//! coordinates the at-most-one in-flight flush.

use std::sync::atomic::Ordering;

use parking_lot::MutexGuard;

use crate::config::FlushMethod;
use crate::error::{LogError, Result};
use crate::log::buffer::{align_down, align_up};
use crate::log::{block, LogEngine, LogInner, Lsn, BLOCK_SIZE};

pub(crate) fn lsn_align_down(lsn: Lsn) -> Lsn {
    lsn & !(BLOCK_SIZE as Lsn - 1)
}

pub(crate) fn lsn_align_up(lsn: Lsn) -> Lsn {
    (lsn + BLOCK_SIZE as Lsn - 1) & !(BLOCK_SIZE as Lsn - 1)
}

impl LogEngine {
    /// Ensures the log has been written to the files up to `lsn`, and
    /// flushed to disk as well when `flush_to_disk` is set.
    ///
    /// Starts a new write, or waits on an already running flush that
    /// covers the request. Every caller returns only once the request
    /// is satisfied; only one of them performs the I/O.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, in read-only mode, or when the
    /// wait loop makes no progress.
    pub fn write_up_to(&self, lsn: Lsn, flush_to_disk: bool) -> Result<()> {
        if self.config.read_only {
            return Err(LogError::ReadOnly);
        }
        if self.recovery.recovery_on() {
            // Recovery still owns the log files; no writes allowed yet.
            return Ok(());
        }

        let mut loop_count = 0;
        loop {
            loop_count += 1;
            if loop_count > 128 {
                return Err(LogError::RetryExhausted("log write"));
            }

            // Dirty read of write_lsn. Flush requests always take the
            // mutex: its contention arbitrates fsync bandwidth between
            // log and data files.
            if !flush_to_disk && self.write_lsn_hint.load(Ordering::Acquire) >= lsn {
                return Ok(());
            }

            let inner = self.inner.lock();

            let limit_lsn = if flush_to_disk {
                inner.flushed_to_disk_lsn
            } else {
                inner.write_lsn
            };
            if limit_lsn >= lsn {
                return Ok(());
            }

            if flush_to_disk
                && (inner.n_pending_flushes > 0 || !self.flush_event.is_set())
            {
                // Figure out if the running flush will do the job for
                // us.
                let work_done = inner.current_flush_lsn >= lsn;
                drop(inner);

                self.flush_event.wait();

                if work_done {
                    return Ok(());
                }
                continue;
            }

            if !flush_to_disk && inner.buf.buf_free == inner.buf.buf_next_to_write {
                // Nothing to write and no flush to disk requested.
                return Ok(());
            }

            return self.write_buf(inner, flush_to_disk);
        }
    }

    /// Does a synchronous flush of the log buffer to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn buffer_flush_to_disk(&self) -> Result<()> {
        let lsn = self.inner.lock().lsn;
        self.write_up_to(lsn, true)
    }

    /// Writes the log buffer to the files, optionally flushing, unless
    /// a running flush already covers the current LSN.
    ///
    /// Meant for background callers that want to push the buffer out
    /// without a specific durability target.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn buffer_sync_in_background(&self, flush: bool) -> Result<()> {
        let lsn = {
            let inner = self.inner.lock();
            if flush
                && inner.n_pending_flushes > 0
                && inner.current_flush_lsn >= inner.lsn
            {
                // The running write + flush covers enough.
                return Ok(());
            }
            inner.lsn
        };

        self.write_up_to(lsn, flush)
    }

    /// Performs the write (and flush) while holding the log mutex for
    /// the write part; the fsync happens after the mutex is released.
    fn write_buf(
        &self,
        mut inner: MutexGuard<'_, LogInner>,
        flush_to_disk: bool,
    ) -> Result<()> {
        if inner.groups.is_empty() {
            return Err(LogError::InvalidConfig(
                "cannot write the log without a log group".into(),
            ));
        }

        tracing::debug!(
            from = inner.write_lsn,
            to = inner.lsn,
            flush = flush_to_disk,
            "log buffer write"
        );

        if flush_to_disk {
            inner.n_pending_flushes += 1;
            inner.current_flush_lsn = inner.lsn;
            self.flush_event.reset();
        }

        if let Err(e) = self.write_groups(&mut inner) {
            if flush_to_disk {
                inner.n_pending_flushes -= 1;
            }
            drop(inner);
            self.flush_event.set();
            return Err(e);
        }

        let current_flush_lsn = inner.current_flush_lsn;
        let spaces: Vec<_> = inner.groups.iter().map(|g| g.space.clone()).collect();
        drop(inner);

        if !flush_to_disk {
            // Only a write was requested.
            return Ok(());
        }

        // This thread owns the single in-flight flush from here on.
        let do_flush = self.config.flush_method != FlushMethod::ODsync;
        if do_flush {
            if self.config.flush_method.needs_log_flush() {
                for space in &spaces {
                    if let Err(e) = space.flush() {
                        self.inner.lock().n_pending_flushes -= 1;
                        self.flush_event.set();
                        return Err(e);
                    }
                }
            }
            let mut inner = self.inner.lock();
            inner.flushed_to_disk_lsn = current_flush_lsn;
            inner.n_pending_flushes -= 1;
        } else {
            self.inner.lock().n_pending_flushes -= 1;
        }

        self.flush_event.set();
        Ok(())
    }

    /// Reads the block-aligned window covering `[start_lsn, end_lsn)`
    /// back from the first group's files.
    ///
    /// The returned bytes are whole blocks; strip the framing with
    /// [`block::strip_framing`] to recover record payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if no group exists or a read fails.
    pub fn read_log_seg(&self, start_lsn: Lsn, end_lsn: Lsn) -> Result<Vec<u8>> {
        let start = lsn_align_down(start_lsn);
        let end = lsn_align_up(end_lsn);
        let mut buf = vec![0u8; (end - start) as usize];

        let mut inner = self.inner.lock();
        let group = inner.groups.first().ok_or_else(|| {
            LogError::InvalidConfig("cannot read the log without a log group".into())
        })?;
        group.read_log_seg(&mut buf, start, end)?;
        inner.n_log_ios += 1;

        Ok(buf)
    }

    /// Submits the block-aligned drain window to every group and
    /// updates the write cursors, all under the log mutex.
    fn write_groups(&self, inner: &mut LogInner) -> Result<()> {
        let inner = &mut *inner;

        let start_offset = inner.buf.buf_next_to_write;
        let end_offset = inner.buf.buf_free;
        let area_start = align_down(start_offset);
        let area_end = align_up(end_offset);
        debug_assert!(area_end > area_start);

        block::set_flush_bit(
            &mut inner.buf.buf[area_start..area_start + BLOCK_SIZE],
            true,
        );
        block::set_checkpoint_no(
            &mut inner.buf.buf[area_end - BLOCK_SIZE..area_end],
            inner.next_checkpoint_no,
        );

        // Pad the tail with zeroed bytes up to the write-ahead
        // granularity the device prefers.
        let write_ahead = self.config.write_ahead_size;
        let mut pad_size = 0usize;
        if write_ahead > BLOCK_SIZE {
            let end_group_offset = inner.groups[0].calc_lsn_offset(lsn_align_up(inner.lsn));
            let end_offset_in_unit = (end_group_offset % write_ahead as u64) as usize;

            if end_offset_in_unit > 0 && (area_end - area_start) > end_offset_in_unit {
                // The first block of the unit was initialized after the
                // last write; pad this write once.
                pad_size = write_ahead - end_offset_in_unit;
                if area_end + pad_size > inner.buf.buf_size {
                    pad_size = inner.buf.buf_size - area_end;
                }
                inner.buf.buf[area_end..area_end + pad_size].fill(0);
            }
        }

        let start_lsn = lsn_align_down(inner.write_lsn);
        let new_data_offset = start_offset - area_start;
        let algorithm = self.config.checksum_algorithm;

        let area = &mut inner.buf.buf[area_start..area_end + pad_size];
        let mut n_ios = 0;
        for group in &inner.groups {
            n_ios += group.write_buf(area, start_lsn, new_data_offset, algorithm)?;
        }
        inner.n_log_ios += n_ios as u64;

        inner.buf.write_end_offset = inner.buf.buf_free;

        let anchor = inner.write_lsn;
        for group in &mut inner.groups {
            group.set_fields(anchor);
        }

        inner.write_lsn = inner.lsn;
        self.write_lsn_hint.store(inner.lsn, Ordering::Release);
        inner.buf.complete_write();

        if self.config.flush_method.write_implies_durability() {
            // The OS did not buffer the log file at all, so what was
            // written is already on disk.
            inner.flushed_to_disk_lsn = inner.write_lsn;
        }

        Ok(())
    }
}
