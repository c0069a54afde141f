//! Checkpoint engine.
//!
//! A checkpoint is a durable statement that all pages modified by log
//! below its LSN are either on disk or in the buffer pool flush lists.
//! Records alternate between two fixed slots in the first file header
//! of each group, so a crash mid-write always leaves at least one valid
//! record; recovery starts from the valid record with the larger
//! number.

use parking_lot::MutexGuard;

use crate::error::{LogError, Result};
use crate::io::IoCompletion;
use crate::log::checksum::fold_bytes;
use crate::log::shutdown::ShutdownState;
use crate::log::{block, LogEngine, LogInner, Lsn, BLOCK_SIZE, LSN_MAX};

/// Offset of the first checkpoint slot in the first file of a group.
const CHECKPOINT_1_OFFSET: u64 = 512;
/// Offset of the second checkpoint slot.
const CHECKPOINT_2_OFFSET: u64 = 1536;

/// Size of the checkpoint marker record written into the log stream:
/// a tag byte plus the checkpoint LSN.
pub const CHECKPOINT_MARKER_SIZE: usize = 9;

/// Tag byte of the checkpoint marker record.
const CHECKPOINT_MARKER_TAG: u8 = 0xCA;

// Field offsets within a checkpoint record.
const CKPT_NO: usize = 0;
const CKPT_LSN: usize = 8;
const CKPT_OFFSET_LOW32: usize = 16;
const CKPT_OFFSET_HIGH32: usize = 20;
const CKPT_LOG_BUF_SIZE: usize = 24;
const CKPT_ARCHIVED_LSN: usize = 28;
const CKPT_GROUP_ARRAY: usize = 36;
/// Slots in the per-group table; one per possible group id.
const MAX_GROUPS: usize = 32;
const CKPT_CHECKSUM_1: usize = CKPT_GROUP_ARRAY + 8 * MAX_GROUPS;
const CKPT_CHECKSUM_2: usize = CKPT_CHECKSUM_1 + 4;
/// Total size of a checkpoint record; must fit in one block.
const CKPT_SIZE: usize = CKPT_CHECKSUM_2 + 4;

/// The two fixed checkpoint slots of a log group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSlot {
    /// Slot used by even checkpoint numbers.
    First,
    /// Slot used by odd checkpoint numbers.
    Second,
}

impl CheckpointSlot {
    /// Slot the given checkpoint number alternates into.
    #[must_use]
    pub fn for_no(no: u64) -> Self {
        if no & 1 == 0 {
            CheckpointSlot::First
        } else {
            CheckpointSlot::Second
        }
    }

    /// Byte offset of the slot within the first file of a group.
    #[must_use]
    pub fn offset(self) -> u64 {
        match self {
            CheckpointSlot::First => CHECKPOINT_1_OFFSET,
            CheckpointSlot::Second => CHECKPOINT_2_OFFSET,
        }
    }
}

/// Decoded checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Monotonically increasing checkpoint number.
    pub no: u64,
    /// Checkpoint LSN: recovery replays log from here.
    pub lsn: Lsn,
    /// Byte offset of the checkpoint LSN within the group.
    pub offset: u64,
    /// Log buffer size recorded at checkpoint time.
    pub log_buf_size: u32,
    /// Archived LSN, `LSN_MAX` while archiving is off.
    pub archived_lsn: Lsn,
}

/// Formats a checkpoint record into `buf` (one block).
///
/// Two folded checksums cover overlapping ranges of the record; a
/// torn write fails at least one of them.
pub(crate) fn format_record(
    buf: &mut [u8],
    no: u64,
    lsn: Lsn,
    offset: u64,
    log_buf_size: u32,
    archived_lsn: Lsn,
    group_slots: &[(u32, u64)],
) {
    debug_assert!(buf.len() >= CKPT_SIZE);

    buf[..CKPT_SIZE].fill(0);
    buf[CKPT_NO..CKPT_NO + 8].copy_from_slice(&no.to_be_bytes());
    buf[CKPT_LSN..CKPT_LSN + 8].copy_from_slice(&lsn.to_be_bytes());
    buf[CKPT_OFFSET_LOW32..CKPT_OFFSET_LOW32 + 4]
        .copy_from_slice(&((offset & 0xFFFF_FFFF) as u32).to_be_bytes());
    buf[CKPT_OFFSET_HIGH32..CKPT_OFFSET_HIGH32 + 4]
        .copy_from_slice(&((offset >> 32) as u32).to_be_bytes());
    buf[CKPT_LOG_BUF_SIZE..CKPT_LOG_BUF_SIZE + 4]
        .copy_from_slice(&log_buf_size.to_be_bytes());
    buf[CKPT_ARCHIVED_LSN..CKPT_ARCHIVED_LSN + 8]
        .copy_from_slice(&archived_lsn.to_be_bytes());

    for &(group_id, archived_file_no) in group_slots {
        let at = CKPT_GROUP_ARRAY + 8 * (group_id as usize % MAX_GROUPS);
        buf[at..at + 8].copy_from_slice(&archived_file_no.to_be_bytes());
    }

    let fold = fold_bytes(&buf[..CKPT_CHECKSUM_1]);
    buf[CKPT_CHECKSUM_1..CKPT_CHECKSUM_1 + 4].copy_from_slice(&fold.to_be_bytes());

    let fold = fold_bytes(&buf[CKPT_LSN..CKPT_CHECKSUM_2]);
    buf[CKPT_CHECKSUM_2..CKPT_CHECKSUM_2 + 4].copy_from_slice(&fold.to_be_bytes());
}

/// Whether both checkpoint checksums verify.
#[must_use]
pub(crate) fn verify_record(buf: &[u8]) -> bool {
    if buf.len() < CKPT_SIZE {
        return false;
    }
    let stored_1 = u32::from_be_bytes(buf[CKPT_CHECKSUM_1..CKPT_CHECKSUM_1 + 4].try_into().unwrap_or([0; 4]));
    let stored_2 = u32::from_be_bytes(buf[CKPT_CHECKSUM_2..CKPT_CHECKSUM_2 + 4].try_into().unwrap_or([0; 4]));

    fold_bytes(&buf[..CKPT_CHECKSUM_1]) == stored_1
        && fold_bytes(&buf[CKPT_LSN..CKPT_CHECKSUM_2]) == stored_2
}

/// Decodes and verifies a checkpoint record.
///
/// # Errors
///
/// Returns [`LogError::ChecksumMismatch`] if either checksum fails.
pub(crate) fn decode_record(buf: &[u8]) -> Result<CheckpointRecord> {
    if !verify_record(buf) {
        return Err(LogError::ChecksumMismatch { block_no: 0 });
    }

    let read_u64 = |at: usize| u64::from_be_bytes(buf[at..at + 8].try_into().unwrap_or([0; 8]));
    let read_u32 = |at: usize| u32::from_be_bytes(buf[at..at + 4].try_into().unwrap_or([0; 4]));

    Ok(CheckpointRecord {
        no: read_u64(CKPT_NO),
        lsn: read_u64(CKPT_LSN),
        offset: u64::from(read_u32(CKPT_OFFSET_LOW32))
            | (u64::from(read_u32(CKPT_OFFSET_HIGH32)) << 32),
        log_buf_size: read_u32(CKPT_LOG_BUF_SIZE),
        archived_lsn: read_u64(CKPT_ARCHIVED_LSN),
    })
}

impl LogEngine {
    /// Makes a checkpoint.
    ///
    /// This does not flush dirty pages from the buffer pool: it reads
    /// the oldest modification LSN and writes checkpoint records
    /// pointing at it. Use [`make_checkpoint_at`](Self::make_checkpoint_at)
    /// to also flush the pool.
    ///
    /// With `write_always`, a record is written even if no log was
    /// generated since the latest checkpoint. Returns false if a
    /// checkpoint write was already running (after waiting for it when
    /// `sync` is set).
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or in read-only mode.
    pub fn checkpoint(&self, sync: bool, write_always: bool) -> Result<bool> {
        if self.config.read_only {
            return Err(LogError::ReadOnly);
        }

        if self.recovery.recovery_on() {
            // Outstanding records must reach their pages before the
            // pool's modification LSNs mean anything.
            self.recovery.apply_hashed_log_recs(true);
        }

        if self.config.flush_method.flushes_data_files() {
            self.tablespaces.flush_data_files()?;
        }

        let mut inner = self.inner.lock();
        let oldest_lsn = inner.oldest_modification_or_lsn(self.pool.as_ref());

        if !write_always
            && oldest_lsn == inner.last_checkpoint_lsn + CHECKPOINT_MARKER_SIZE as Lsn
        {
            // Nothing was logged since the previous checkpoint, other
            // than its own marker.
            return Ok(true);
        }

        // Re-emit tablespace name records for log records that sit
        // between the checkpoint LSN and the log end, then append a
        // checkpoint marker. Appenders are blocked while we hold the
        // mutex, so no page can be dirtied below the chosen LSN. At
        // shutdown, when the log already ends at the checkpoint LSN,
        // nothing is written and the log stays empty past it.
        let mut flush_lsn = oldest_lsn;
        let do_write =
            self.shutdown_state() == ShutdownState::None || flush_lsn != inner.lsn;

        if self.tablespaces.names_clear(flush_lsn, do_write) {
            self.append_checkpoint_marker(&mut inner, oldest_lsn);
            flush_lsn = inner.lsn;
        }
        drop(inner);

        // All log up to the checkpoint LSN must be durable before the
        // record that points at it.
        self.write_up_to(flush_lsn, true)?;

        let mut inner = self.inner.lock();

        if !write_always && inner.last_checkpoint_lsn >= oldest_lsn {
            return Ok(true);
        }
        debug_assert!(inner.flushed_to_disk_lsn >= oldest_lsn);

        if inner.n_pending_checkpoint_writes > 0 {
            // A checkpoint write is already running.
            drop(inner);

            if sync {
                // Wait for it to complete.
                drop(self.checkpoint_lock.read());
            }
            return Ok(false);
        }

        inner.next_checkpoint_lsn = oldest_lsn;
        self.write_checkpoint_info(inner, sync)
    }

    /// Makes a checkpoint at or after `lsn` (`LSN_MAX` for the latest),
    /// preflushing the buffer pool as far as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if preflushing or checkpointing fails.
    pub fn make_checkpoint_at(&self, lsn: Lsn, write_always: bool) -> Result<()> {
        // Preflush pages synchronously: flush as much as we can until
        // the oldest modification has passed the target.
        while !self.preflush_pool_modified_pages(lsn)? {}

        while !self.checkpoint(true, write_always)? {}

        Ok(())
    }

    /// Reads and verifies one checkpoint slot of a group.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ChecksumMismatch`] if the slot does not hold
    /// a valid record, or an I/O error if the read fails.
    pub fn read_checkpoint_slot(
        &self,
        group_index: usize,
        slot: CheckpointSlot,
    ) -> Result<CheckpointRecord> {
        let space = {
            let mut inner = self.inner.lock();
            let space = inner
                .groups
                .get(group_index)
                .ok_or_else(|| {
                    LogError::InvalidConfig(format!("no log group at index {group_index}"))
                })?
                .space
                .clone();
            inner.n_log_ios += 1;
            space
        };

        let mut buf = vec![0u8; BLOCK_SIZE];
        space.read_at(slot.offset(), &mut buf)?;
        decode_record(&buf)
    }

    /// Completes a log I/O identified by its tagged completion token.
    ///
    /// Buffer writes are synchronous and complete inline; checkpoint
    /// record writes flush the group files and finish the checkpoint
    /// bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion-side flush fails.
    pub fn io_complete(&self, completion: IoCompletion) -> Result<()> {
        match completion {
            IoCompletion::NormalWrite => Ok(()),
            IoCompletion::CheckpointWrite(group_id) => {
                if self.config.flush_method.needs_log_flush() {
                    let space = {
                        let inner = self.inner.lock();
                        inner
                            .groups
                            .iter()
                            .find(|g| g.id == group_id)
                            .map(|g| g.space.clone())
                    };
                    if let Some(space) = space {
                        space.flush()?;
                    }
                }

                tracing::debug!(group = group_id, "checkpoint info written");
                self.io_complete_checkpoint();
                Ok(())
            }
        }
    }

    /// Formats and submits the checkpoint record of every group, then
    /// waits for completion when `sync` is set. Releases the log mutex.
    fn write_checkpoint_info(
        &self,
        mut inner: MutexGuard<'_, LogInner>,
        sync: bool,
    ) -> Result<bool> {
        let next_no = inner.next_checkpoint_no;
        let next_lsn = inner.next_checkpoint_lsn;
        let log_buf_size = inner.buf.buf_size as u32;
        let slot = CheckpointSlot::for_no(next_no);

        let group_slots: Vec<(u32, u64)> = inner
            .groups
            .iter()
            .map(|g| (g.id, g.archived_file_no))
            .collect();

        let mut writes = Vec::with_capacity(inner.groups.len());
        let inner_ref = &mut *inner;
        for group in &mut inner_ref.groups {
            let offset = group.calc_lsn_offset(next_lsn);
            format_record(
                &mut group.checkpoint_buf,
                next_no,
                next_lsn,
                offset,
                log_buf_size,
                LSN_MAX,
                &group_slots,
            );

            tracing::debug!(
                checkpoint_no = next_no,
                checkpoint_lsn = next_lsn,
                group = group.id,
                "writing checkpoint record"
            );

            if inner_ref.n_pending_checkpoint_writes == 0 {
                // First pending write: hold the checkpoint lock
                // exclusively until the last completion releases it.
                std::mem::forget(self.checkpoint_lock.write());
            }
            inner_ref.n_pending_checkpoint_writes += 1;
            inner_ref.n_log_ios += 1;

            writes.push((group.space.clone(), group.checkpoint_buf.clone(), group.id));
        }
        drop(inner);

        for (space, record, group_id) in writes {
            space.write_at(slot.offset(), &record)?;
            self.io_complete(IoCompletion::CheckpointWrite(group_id))?;
        }

        if sync {
            // Wait for the checkpoint write to complete.
            drop(self.checkpoint_lock.read());
        }
        Ok(true)
    }

    /// Completes one checkpoint record write; the last one finishes
    /// the checkpoint.
    fn io_complete_checkpoint(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.n_pending_checkpoint_writes > 0);

        inner.n_pending_checkpoint_writes -= 1;
        if inner.n_pending_checkpoint_writes == 0 {
            self.complete_checkpoint(&mut inner);
        }
    }

    /// Adopts the written checkpoint and releases the checkpoint lock.
    fn complete_checkpoint(&self, inner: &mut LogInner) {
        debug_assert_eq!(inner.n_pending_checkpoint_writes, 0);

        inner.next_checkpoint_no += 1;
        inner.last_checkpoint_lsn = inner.next_checkpoint_lsn;

        tracing::debug!(
            checkpoint_lsn = inner.last_checkpoint_lsn,
            flushed_to_disk_lsn = inner.flushed_to_disk_lsn,
            "checkpoint completed"
        );

        // SAFETY: the exclusive lock was taken when the first pending
        // record write was submitted and its guard forgotten; the
        // engine logically owns the lock until this last completion.
        unsafe {
            self.checkpoint_lock.force_unlock_write();
        }
    }

    /// Appends the checkpoint marker record to the log stream.
    fn append_checkpoint_marker(&self, inner: &mut LogInner, checkpoint_lsn: Lsn) {
        let mut marker = [0u8; CHECKPOINT_MARKER_SIZE];
        marker[0] = CHECKPOINT_MARKER_TAG;
        marker[1..9].copy_from_slice(&checkpoint_lsn.to_be_bytes());

        let inner = &mut *inner;
        inner.lsn = inner
            .buf
            .append_bytes(&marker, inner.lsn, inner.next_checkpoint_no);

        let buf_free = inner.buf.buf_free;
        let tail = inner.buf.block_at_mut(buf_free);
        if block::first_rec_group(tail) == 0 {
            let data_len = block::data_len(tail);
            block::set_first_rec_group(tail, data_len);
        }
    }
}
