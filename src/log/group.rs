//! Log group geometry.
//!
//! A group is an ordered ring of `n_files` equally sized files. LSNs
//! map onto the ring through a `(lsn, lsn_offset)` anchor, skipping the
//! file header regions; every file I/O address the engine uses is
//! produced here.

use std::sync::Arc;

use crate::error::Result;
use crate::io::LogSpace;
use crate::log::checksum::ChecksumAlgorithm;
use crate::log::{block, Lsn, BLOCK_SIZE, FILE_HDR_SIZE};

/// Offset of the group id in the file header.
const FILE_GROUP_ID: usize = 0;
/// Offset of the start LSN of the first payload byte.
const FILE_START_LSN: usize = 4;
/// Offset of the hot-backup label, spaces when absent.
const FILE_CREATED_BY_BACKUP: usize = 16;
/// Length of the hot-backup label.
const CREATED_BY_LEN: usize = 32;

/// Computes which file and file offset a given LSN maps to.
///
/// `first_header_lsn` is the LSN corresponding to the start of the
/// first file's payload. LSNs below it wrap forward by whole ring
/// lengths. The returned offset includes the file header.
#[must_use]
pub fn calc_where_lsn_is(
    first_header_lsn: Lsn,
    mut lsn: Lsn,
    n_files: u32,
    file_size: u64,
) -> (u32, u64) {
    let capacity = file_size - FILE_HDR_SIZE;
    let ring = capacity * u64::from(n_files);

    if lsn < first_header_lsn {
        let add_this_many = 1 + (first_header_lsn - lsn) / ring;
        lsn += add_this_many * ring;
    }

    let file_no = ((lsn - first_header_lsn) / capacity) % u64::from(n_files);
    let offset = (lsn - first_header_lsn) % capacity + FILE_HDR_SIZE;

    (file_no as u32, offset)
}

/// One log group: the ring of files plus the LSN anchor used to map
/// arbitrary LSNs to byte offsets.
pub struct LogGroup {
    /// Group id, also the slot index in checkpoint records.
    pub(crate) id: u32,
    /// Number of files in the ring.
    pub(crate) n_files: u32,
    /// Size of each file, header included.
    pub(crate) file_size: u64,
    /// Space id of the file space holding the ring.
    pub(crate) space_id: u32,
    /// Archived file number recorded in checkpoint slots.
    pub(crate) archived_file_no: u64,
    /// Anchor LSN with a known byte offset.
    pub(crate) lsn: Lsn,
    /// Real offset of the anchor LSN within the group.
    pub(crate) lsn_offset: u64,
    /// Staging buffer for this group's checkpoint record.
    pub(crate) checkpoint_buf: Vec<u8>,
    /// The file ring.
    pub(crate) space: Arc<LogSpace>,
}

impl LogGroup {
    /// Creates a group anchored at `start_lsn`, whose first payload
    /// byte sits right after the first file header.
    #[must_use]
    pub fn new(
        id: u32,
        n_files: u32,
        file_size: u64,
        space_id: u32,
        start_lsn: Lsn,
        space: Arc<LogSpace>,
    ) -> Self {
        Self {
            id,
            n_files,
            file_size,
            space_id,
            archived_file_no: 0,
            lsn: start_lsn,
            lsn_offset: FILE_HDR_SIZE,
            checkpoint_buf: vec![0u8; BLOCK_SIZE],
            space,
        }
    }

    /// Usable bytes in the group, file headers excluded.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        (self.file_size - FILE_HDR_SIZE) * u64::from(self.n_files)
    }

    /// Converts a real offset to a size offset (file headers removed).
    #[must_use]
    pub fn calc_size_offset(&self, offset: u64) -> u64 {
        offset - FILE_HDR_SIZE * (1 + offset / self.file_size)
    }

    /// Converts a size offset back to a real offset (file headers
    /// re-inserted).
    #[must_use]
    pub fn calc_real_offset(&self, offset: u64) -> u64 {
        offset + FILE_HDR_SIZE * (1 + offset / (self.file_size - FILE_HDR_SIZE))
    }

    /// Computes the real offset of an arbitrary LSN from the anchor,
    /// wrapping modulo the group capacity.
    #[must_use]
    pub fn calc_lsn_offset(&self, lsn: Lsn) -> u64 {
        let anchor_size_offset = self.calc_size_offset(self.lsn_offset);
        let group_size = self.capacity();

        let difference = if lsn >= self.lsn {
            (lsn - self.lsn) % group_size
        } else {
            group_size - (self.lsn - lsn) % group_size
        };

        let offset = (anchor_size_offset + difference) % group_size;
        self.calc_real_offset(offset)
    }

    /// Re-anchors the group at `lsn`.
    ///
    /// The current anchor must already correspond to some valid LSN,
    /// typically the last checkpoint.
    pub fn set_fields(&mut self, lsn: Lsn) {
        self.lsn_offset = self.calc_lsn_offset(lsn);
        self.lsn = lsn;
    }

    /// Writes the header of the `nth_file`, clearing any hot-backup
    /// label with spaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the header write fails.
    pub fn write_file_header(&self, nth_file: u32, start_lsn: Lsn) -> Result<()> {
        debug_assert!(nth_file < self.n_files);

        let mut hdr = vec![0u8; BLOCK_SIZE];
        hdr[FILE_GROUP_ID..FILE_GROUP_ID + 4].copy_from_slice(&self.id.to_be_bytes());
        hdr[FILE_START_LSN..FILE_START_LSN + 8].copy_from_slice(&start_lsn.to_be_bytes());
        for b in &mut hdr[FILE_CREATED_BY_BACKUP..FILE_CREATED_BY_BACKUP + CREATED_BY_LEN] {
            *b = b' ';
        }

        tracing::debug!(
            group = self.id,
            space = self.space_id,
            file = nth_file,
            start_lsn,
            "writing log file header"
        );

        self.space
            .write_at(u64::from(nth_file) * self.file_size, &hdr)
    }

    /// Writes a block-aligned buffer slice to the ring, splitting at
    /// file boundaries and emitting a file header before any write that
    /// starts a new file instance.
    ///
    /// Trailer checksums are stamped on every block immediately before
    /// it goes out. `new_data_offset` is the offset of the first new
    /// byte within `buf`; a zero value means the write begins at a
    /// block boundary and may need a file header.
    ///
    /// Returns the number of I/Os submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    pub fn write_buf(
        &self,
        buf: &mut [u8],
        start_lsn: Lsn,
        new_data_offset: usize,
        algorithm: ChecksumAlgorithm,
    ) -> Result<usize> {
        debug_assert_eq!(buf.len() % BLOCK_SIZE, 0);
        debug_assert_eq!(start_lsn % BLOCK_SIZE as u64, 0);

        let mut n_ios = 0;
        let mut write_header = new_data_offset == 0;
        let mut lsn = start_lsn;
        let mut pos = 0;

        while pos < buf.len() {
            let next_offset = self.calc_lsn_offset(lsn);

            if write_header && next_offset % self.file_size == FILE_HDR_SIZE {
                // This write starts a new file instance in the ring.
                self.write_file_header((next_offset / self.file_size) as u32, lsn)?;
                n_ios += 1;
            }

            let in_file = next_offset % self.file_size;
            let remaining = buf.len() - pos;
            let write_len = if in_file + remaining as u64 > self.file_size {
                (self.file_size - in_file) as usize
            } else {
                remaining
            };

            let chunk = &mut buf[pos..pos + write_len];
            for b in chunk.chunks_exact_mut(BLOCK_SIZE) {
                block::store_checksum(b, algorithm);
            }

            tracing::debug!(
                group = self.id,
                lsn,
                offset = next_offset,
                len = write_len,
                "log write"
            );

            self.space.write_at(next_offset, chunk)?;
            n_ios += 1;

            pos += write_len;
            lsn += write_len as u64;
            write_header = true;
        }

        Ok(n_ios)
    }

    /// Reads a block-aligned LSN range from the ring into `buf`,
    /// splitting at file boundaries.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails.
    pub fn read_log_seg(&self, buf: &mut [u8], start_lsn: Lsn, end_lsn: Lsn) -> Result<()> {
        debug_assert_eq!(start_lsn % BLOCK_SIZE as u64, 0);
        debug_assert_eq!(end_lsn % BLOCK_SIZE as u64, 0);
        debug_assert_eq!(buf.len() as u64, end_lsn - start_lsn);

        let mut lsn = start_lsn;
        let mut pos = 0;

        while lsn < end_lsn {
            let source_offset = self.calc_lsn_offset(lsn);
            let in_file = source_offset % self.file_size;

            let mut len = (end_lsn - lsn) as usize;
            if in_file + len as u64 > self.file_size {
                len = (self.file_size - in_file) as usize;
            }

            self.space.read_at(source_offset, &mut buf[pos..pos + len])?;

            lsn += len as u64;
            pos += len;
        }

        Ok(())
    }
}
