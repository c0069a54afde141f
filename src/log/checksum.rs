//! Pluggable log block checksums.
//!
//! Blocks on disk carry no algorithm tag, so verification must accept
//! every algorithm the engine may have been configured with.

use crate::log::{BLOCK_SIZE, BLOCK_TRL_SIZE};

/// Checksum strategy stamped into block trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// Fast shift-folded sum over the block body.
    Folded,
    /// CRC32 over the block body.
    Crc32,
}

/// Computes the trailer checksum of a block under the given algorithm.
///
/// The checksum covers the header and payload, excluding the 4-byte
/// trailer itself.
#[must_use]
pub fn block_checksum(algorithm: ChecksumAlgorithm, block: &[u8]) -> u32 {
    debug_assert_eq!(block.len(), BLOCK_SIZE);
    let body = &block[..BLOCK_SIZE - BLOCK_TRL_SIZE];
    match algorithm {
        ChecksumAlgorithm::Folded => folded_checksum(body),
        ChecksumAlgorithm::Crc32 => crc32fast::hash(body),
    }
}

/// Verifies a block trailer against every accepted algorithm.
#[must_use]
pub fn verify_block(block: &[u8], stored: u32) -> bool {
    block_checksum(ChecksumAlgorithm::Folded, block) == stored
        || block_checksum(ChecksumAlgorithm::Crc32, block) == stored
}

/// Shift-folded checksum over a byte slice.
///
/// Every byte is added twice, once shifted by a rotating amount, with
/// the accumulator clamped to 31 bits before each step.
#[must_use]
pub fn folded_checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 1;
    let mut shift: u32 = 0;

    for &b in data {
        sum &= 0x7FFF_FFFF;
        sum = sum.wrapping_add(u32::from(b));
        sum = sum.wrapping_add(u32::from(b) << shift);
        shift += 1;
        if shift > 24 {
            shift = 0;
        }
    }

    sum
}

/// Pair-fold over a byte slice, used for checkpoint record checksums.
#[must_use]
pub fn fold_bytes(data: &[u8]) -> u32 {
    const MASK_1: u32 = 1_463_735_687;
    const MASK_2: u32 = 1_653_893_711;

    let mut fold: u32 = 0;
    for &b in data {
        let n = u32::from(b);
        fold = ((fold ^ n ^ MASK_2).wrapping_shl(8).wrapping_add(fold) ^ MASK_1).wrapping_add(n);
    }
    fold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_block(fill: u8) -> Vec<u8> {
        vec![fill; BLOCK_SIZE]
    }

    #[test]
    fn test_folded_checksum_deterministic() {
        let block = test_block(0xAB);
        let a = block_checksum(ChecksumAlgorithm::Folded, &block);
        let b = block_checksum(ChecksumAlgorithm::Folded, &block);
        assert_eq!(a, b);
    }

    #[test]
    fn test_checksum_ignores_trailer() {
        let mut block = test_block(0);
        block[0] = 7;
        let before = block_checksum(ChecksumAlgorithm::Folded, &block);

        // Mutating the trailer must not change the checksum.
        block[BLOCK_SIZE - 1] = 0xFF;
        let after = block_checksum(ChecksumAlgorithm::Folded, &block);
        assert_eq!(before, after);
    }

    #[test]
    fn test_checksum_detects_payload_change() {
        let mut block = test_block(0);
        let before = block_checksum(ChecksumAlgorithm::Crc32, &block);
        block[100] = 1;
        let after = block_checksum(ChecksumAlgorithm::Crc32, &block);
        assert_ne!(before, after);
    }

    #[test]
    fn test_verify_accepts_either_algorithm() {
        let block = test_block(0x3C);
        let folded = block_checksum(ChecksumAlgorithm::Folded, &block);
        let crc = block_checksum(ChecksumAlgorithm::Crc32, &block);

        assert!(verify_block(&block, folded));
        assert!(verify_block(&block, crc));
        assert!(!verify_block(&block, folded ^ crc ^ 1));
    }

    #[test]
    fn test_fold_bytes_differs_by_position() {
        assert_ne!(fold_bytes(&[1, 2, 3]), fold_bytes(&[3, 2, 1]));
    }
}
