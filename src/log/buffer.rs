//! In-memory log buffer.
//!
//! The buffer stages log records as block-framed bytes before they are
//! drained to the log files. Cursors always satisfy
//! `buf_next_to_write <= buf_free <= buf_size`.

use crate::log::{block, Lsn, BLOCK_HDR_SIZE, BLOCK_SIZE, BLOCK_TRL_SIZE};

/// Free space kept in the buffer before a record is catenated.
pub const WRITE_MARGIN: usize = 4 * BLOCK_SIZE;

/// Ratio of the buffer size at which a background flush is requested.
const FLUSH_RATIO: usize = 2;

/// Rounds down to a block boundary.
#[must_use]
pub(crate) fn align_down(offset: usize) -> usize {
    offset & !(BLOCK_SIZE - 1)
}

/// Rounds up to a block boundary.
#[must_use]
pub(crate) fn align_up(offset: usize) -> usize {
    (offset + BLOCK_SIZE - 1) & !(BLOCK_SIZE - 1)
}

fn compute_max_buf_free(buf_size: usize, page_size: usize) -> usize {
    let flush_margin = WRITE_MARGIN + 4 * page_size;
    (buf_size / FLUSH_RATIO).saturating_sub(flush_margin)
}

/// Block-aligned staging area for log writes.
///
/// The backing allocation carries one spare block so that filling the
/// last block can always initialize the header of the next one.
pub struct LogBuffer {
    /// Backing bytes; the logical region is `[0, buf_size)`.
    pub(crate) buf: Vec<u8>,
    /// Logical buffer size in bytes.
    pub(crate) buf_size: usize,
    /// Fill level above which a background flush is requested.
    pub(crate) max_buf_free: usize,
    /// Write cursor: first free byte.
    pub(crate) buf_free: usize,
    /// Drain cursor: first byte not yet submitted to I/O.
    pub(crate) buf_next_to_write: usize,
    /// Value of `buf_free` when the last write I/O was submitted.
    pub(crate) write_end_offset: usize,
}

impl LogBuffer {
    /// Creates a buffer with the first block initialized at `start_lsn`.
    ///
    /// The first record group of that block starts right after the
    /// block header.
    #[must_use]
    pub fn new(buf_size: usize, page_size: usize, start_lsn: Lsn) -> Self {
        let mut buffer = Self {
            buf: vec![0u8; buf_size + BLOCK_SIZE],
            buf_size,
            max_buf_free: compute_max_buf_free(buf_size, page_size),
            buf_free: BLOCK_HDR_SIZE,
            buf_next_to_write: 0,
            write_end_offset: 0,
        };
        block::init(buffer.block_at_mut(0), start_lsn);
        block::set_first_rec_group(buffer.block_at_mut(0), BLOCK_HDR_SIZE);
        buffer
    }

    /// Returns the block slice containing `offset`.
    #[must_use]
    pub(crate) fn block_at(&self, offset: usize) -> &[u8] {
        let start = align_down(offset);
        &self.buf[start..start + BLOCK_SIZE]
    }

    /// Returns the mutable block slice containing `offset`.
    pub(crate) fn block_at_mut(&mut self, offset: usize) -> &mut [u8] {
        let start = align_down(offset);
        &mut self.buf[start..start + BLOCK_SIZE]
    }

    /// Appends record bytes, inserting block framing at boundaries.
    ///
    /// Returns the LSN after the append: the payload length plus any
    /// header and trailer bytes that became fixed. When a block fills,
    /// it is stamped with `checkpoint_no` and the next block header is
    /// initialized from the advanced LSN.
    pub fn append_bytes(&mut self, mut bytes: &[u8], mut lsn: Lsn, checkpoint_no: u64) -> Lsn {
        loop {
            let block_offset = self.buf_free % BLOCK_SIZE;
            let mut data_len = block_offset + bytes.len();
            let part_len = if data_len <= BLOCK_SIZE - BLOCK_TRL_SIZE {
                bytes.len()
            } else {
                data_len = BLOCK_SIZE - BLOCK_TRL_SIZE;
                BLOCK_SIZE - block_offset - BLOCK_TRL_SIZE
            };

            let dst = self.buf_free;
            self.buf[dst..dst + part_len].copy_from_slice(&bytes[..part_len]);
            bytes = &bytes[part_len..];

            let block_start = align_down(self.buf_free);
            let mut advance = part_len;

            if data_len == BLOCK_SIZE - BLOCK_TRL_SIZE {
                // This block became full.
                {
                    let full = &mut self.buf[block_start..block_start + BLOCK_SIZE];
                    block::set_data_len(full, BLOCK_SIZE);
                    block::set_checkpoint_no(full, checkpoint_no);
                }
                advance += BLOCK_HDR_SIZE + BLOCK_TRL_SIZE;
                lsn += advance as Lsn;

                let next = block_start + BLOCK_SIZE;
                block::init(&mut self.buf[next..next + BLOCK_SIZE], lsn);
            } else {
                block::set_data_len(
                    &mut self.buf[block_start..block_start + BLOCK_SIZE],
                    data_len,
                );
                lsn += advance as Lsn;
            }

            self.buf_free += advance;
            debug_assert!(self.buf_free <= self.buf_size);

            if bytes.is_empty() {
                return lsn;
            }
        }
    }

    /// Updates cursors after a write I/O and compacts the buffer when
    /// the drained prefix has grown past half the flush threshold.
    pub fn complete_write(&mut self) {
        self.buf_next_to_write = self.write_end_offset;

        if self.write_end_offset > self.max_buf_free / 2 {
            let move_start = align_down(self.write_end_offset);
            let move_end = align_up(self.buf_free);

            self.buf.copy_within(move_start..move_end, 0);
            self.buf_free -= move_start;
            self.buf_next_to_write -= move_start;
        }
    }

    /// Whether all complete blocks have been submitted to I/O, the
    /// precondition for reallocating the buffer.
    #[must_use]
    pub fn drained_to_tail_block(&self) -> bool {
        align_down(self.buf_free) == align_down(self.buf_next_to_write)
    }

    /// Reallocates the buffer to `new_size`, preserving the unwritten
    /// tail (the partially filled final block).
    pub fn extend_to(&mut self, new_size: usize, page_size: usize) {
        debug_assert!(self.drained_to_tail_block());
        debug_assert!(new_size > self.buf_size);

        let move_start = align_down(self.buf_free);
        let move_end = self.buf_free;
        let mut tail = [0u8; BLOCK_SIZE];
        tail[..move_end - move_start].copy_from_slice(&self.buf[move_start..move_end]);

        self.buf_free -= move_start;
        self.buf_next_to_write -= move_start;
        self.write_end_offset = self.write_end_offset.saturating_sub(move_start);

        self.buf = vec![0u8; new_size + BLOCK_SIZE];
        self.buf_size = new_size;
        self.max_buf_free = compute_max_buf_free(new_size, page_size);

        self.buf[..move_end - move_start].copy_from_slice(&tail[..move_end - move_start]);
    }
}
