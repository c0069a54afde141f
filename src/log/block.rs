//! Log block codec.
//!
//! A log block is a fixed 512-byte unit with a 12-byte header, a
//! payload, and a 4-byte trailer checksum:
//!
//! ```text
//! [0..4)    block number (high bit: flush marker)
//! [4..6)    data length in this block, counted from the block start
//! [6..8)    offset of the first record group beginning in this block
//! [8..12)   checkpoint number in effect when the block was written
//! [12..508) payload
//! [508..512) trailer checksum
//! ```
//!
//! All fields are big-endian.

use crate::error::{LogError, Result};
use crate::log::checksum::{self, ChecksumAlgorithm};
use crate::log::{Lsn, BLOCK_HDR_SIZE, BLOCK_SIZE, BLOCK_TRL_SIZE, LSN_START};

const HDR_NO: usize = 0;
const HDR_DATA_LEN: usize = 4;
const HDR_FIRST_REC_GROUP: usize = 6;
const HDR_CHECKPOINT_NO: usize = 8;
const TRL_CHECKSUM: usize = BLOCK_SIZE - BLOCK_TRL_SIZE;

/// High bit of the block number, set on the first block of a write I/O.
pub const FLUSH_BIT_MASK: u32 = 0x8000_0000;

/// Converts an LSN to the number of the block it falls into.
///
/// Block numbers start at 1 and are masked to leave the flush bit free.
#[must_use]
pub fn convert_lsn_to_no(lsn: Lsn) -> u32 {
    (((lsn - LSN_START) / BLOCK_SIZE as u64) as u32 & 0x3FFF_FFFF) + 1
}

/// Initializes a block header for the block containing `lsn`.
///
/// The data length and first-record-group fields start at zero.
pub fn init(block: &mut [u8], lsn: Lsn) {
    set_hdr_no(block, convert_lsn_to_no(lsn));
    set_data_len(block, 0);
    set_first_rec_group(block, 0);
}

/// Returns the block number with the flush bit stripped.
#[must_use]
pub fn hdr_no(block: &[u8]) -> u32 {
    read_u32(block, HDR_NO) & !FLUSH_BIT_MASK
}

/// Sets the block number, clearing the flush bit.
pub fn set_hdr_no(block: &mut [u8], no: u32) {
    debug_assert!(no > 0);
    write_u32(block, HDR_NO, no & !FLUSH_BIT_MASK);
}

/// Returns whether the flush bit is set.
#[must_use]
pub fn flush_bit(block: &[u8]) -> bool {
    read_u32(block, HDR_NO) & FLUSH_BIT_MASK != 0
}

/// Sets or clears the flush bit on the block number field.
pub fn set_flush_bit(block: &mut [u8], value: bool) {
    let mut field = read_u32(block, HDR_NO);
    if value {
        field |= FLUSH_BIT_MASK;
    } else {
        field &= !FLUSH_BIT_MASK;
    }
    write_u32(block, HDR_NO, field);
}

/// Returns the data length counted from the block start.
#[must_use]
pub fn data_len(block: &[u8]) -> usize {
    read_u16(block, HDR_DATA_LEN) as usize
}

/// Sets the data length field.
pub fn set_data_len(block: &mut [u8], len: usize) {
    write_u16(block, HDR_DATA_LEN, len as u16);
}

/// Returns the offset of the first record group beginning in this
/// block, or 0 if none begins here.
#[must_use]
pub fn first_rec_group(block: &[u8]) -> usize {
    read_u16(block, HDR_FIRST_REC_GROUP) as usize
}

/// Sets the first-record-group offset.
pub fn set_first_rec_group(block: &mut [u8], offset: usize) {
    write_u16(block, HDR_FIRST_REC_GROUP, offset as u16);
}

/// Returns the checkpoint number stamped on the block.
#[must_use]
pub fn checkpoint_no(block: &[u8]) -> u32 {
    read_u32(block, HDR_CHECKPOINT_NO)
}

/// Stamps the checkpoint number, truncated to 32 bits.
pub fn set_checkpoint_no(block: &mut [u8], no: u64) {
    write_u32(block, HDR_CHECKPOINT_NO, no as u32);
}

/// Returns the stored trailer checksum.
#[must_use]
pub fn stored_checksum(block: &[u8]) -> u32 {
    read_u32(block, TRL_CHECKSUM)
}

/// Computes and stores the trailer checksum.
///
/// Called immediately before the block is handed to the writer: the
/// checkpoint number may change up to that point.
pub fn store_checksum(block: &mut [u8], algorithm: ChecksumAlgorithm) {
    let sum = checksum::block_checksum(algorithm, block);
    write_u32(block, TRL_CHECKSUM, sum);
}

/// Verifies the trailer checksum, accepting any configured algorithm.
///
/// # Errors
///
/// Returns [`LogError::ChecksumMismatch`] if no algorithm matches.
pub fn verify(block: &[u8]) -> Result<()> {
    if checksum::verify_block(block, stored_checksum(block)) {
        Ok(())
    } else {
        Err(LogError::ChecksumMismatch {
            block_no: hdr_no(block),
        })
    }
}

/// Extracts the payload bytes of a sequence of complete blocks,
/// stripping headers and trailers.
#[must_use]
pub fn strip_framing(blocks: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();

    for block in blocks.chunks_exact(BLOCK_SIZE) {
        let len = data_len(block);
        if len <= BLOCK_HDR_SIZE {
            continue;
        }
        // A full block records the whole block size; its payload still
        // stops short of the trailer.
        let end = len.min(BLOCK_SIZE - BLOCK_TRL_SIZE);
        payload.extend_from_slice(&block[BLOCK_HDR_SIZE..end]);
    }

    payload
}

fn read_u16(block: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(block[offset..offset + 2].try_into().unwrap_or([0; 2]))
}

fn write_u16(block: &mut [u8], offset: usize, value: u16) {
    block[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn read_u32(block: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(block[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

fn write_u32(block: &mut [u8], offset: usize, value: u32) {
    block[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
