//! End-to-end tests for the redo-log engine.

use std::sync::Arc;

use redolog::log::{block, group};
use redolog::{
    BufferPool, CheckpointSlot, LogConfig, LogEngine, LogError, Lsn, ShutdownState, BLOCK_HDR_SIZE,
    BLOCK_SIZE, BLOCK_TRL_SIZE, FILE_HDR_SIZE, LSN_MAX, LSN_START,
};
use tempfile::TempDir;

fn setup_engine(n_files: u32, file_size: u64, page_size: usize) -> (Arc<LogEngine>, TempDir) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let mut config = LogConfig::new(temp_dir.path());
    config.buf_size = 64 * 1024;
    config.page_size = page_size;
    let engine = LogEngine::init(config).expect("init engine");
    engine
        .group_init(0, n_files, file_size, 0, 1)
        .expect("init group");
    (Arc::new(engine), temp_dir)
}

fn append_record(engine: &LogEngine, bytes: &[u8]) -> Lsn {
    let mut record = engine.reserve_and_open(bytes.len()).expect("reserve");
    record.append(bytes);
    record.close()
}

/// Index into the stripped payload stream of `lsn`, for a window that
/// starts at the block-aligned `window_start`.
fn payload_index(window_start: Lsn, lsn: Lsn) -> usize {
    let full_blocks = ((lsn - window_start) / BLOCK_SIZE as Lsn) as usize;
    let in_block = ((lsn - window_start) % BLOCK_SIZE as Lsn) as usize;
    full_blocks * (BLOCK_SIZE - BLOCK_HDR_SIZE - BLOCK_TRL_SIZE) + (in_block - BLOCK_HDR_SIZE)
}

// =============================================================================
// Append + flush scenarios
// =============================================================================

mod append_and_flush {
    use super::*;

    #[test]
    fn test_single_append_and_flush() {
        let (engine, temp) = setup_engine(4, 16 * 1024, 256);

        let mut record = engine.reserve_and_open(100).unwrap();
        assert_eq!(record.start_lsn(), 8204);

        let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
        record.append(&payload);
        let lsn = record.close();
        assert_eq!(lsn, 8304);

        engine.write_up_to(lsn, true).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.flushed_to_disk_lsn, 8304);
        assert_eq!(stats.write_lsn, 8304);

        // The first on-disk block sits at offset 2048 of file 0 with
        // data_len covering the header plus the payload.
        let raw = std::fs::read(temp.path().join("space0").join("redo00")).unwrap();
        let disk_block = &raw[FILE_HDR_SIZE as usize..FILE_HDR_SIZE as usize + BLOCK_SIZE];
        assert_eq!(block::data_len(disk_block), 112);
        assert_eq!(block::hdr_no(disk_block), 1);
        assert!(block::flush_bit(disk_block));
        assert!(block::verify(disk_block).is_ok());

        // The payload reads back unchanged once the framing is gone.
        let seg = engine.read_log_seg(record_start(lsn, &payload), lsn).unwrap();
        let stripped = block::strip_framing(&seg);
        assert!(stripped.ends_with(&payload));
    }

    fn record_start(end_lsn: Lsn, payload: &[u8]) -> Lsn {
        end_lsn - payload.len() as Lsn
    }

    #[test]
    fn test_cross_block_append_advances_by_framing() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        // Fill the first block up to offset 500.
        let first = append_record(&engine, &[0x11; 488]);
        assert_eq!(first, 8204 + 488);

        // 80 more bytes cross the block boundary: the LSN advances by
        // the payload plus the trailer and the next header.
        let mut record = engine.reserve_and_open(80).unwrap();
        let start = record.start_lsn();
        record.append(&[0x22; 80]);
        let end = record.close();
        assert_eq!(
            end - start,
            (80 + BLOCK_TRL_SIZE + BLOCK_HDR_SIZE) as Lsn
        );

        engine.write_up_to(end, true).unwrap();
        let seg = engine.read_log_seg(LSN_START, end).unwrap();

        let first_block = &seg[..BLOCK_SIZE];
        let second_block = &seg[BLOCK_SIZE..2 * BLOCK_SIZE];
        assert_eq!(block::data_len(first_block), BLOCK_SIZE);
        assert_eq!(block::data_len(second_block), BLOCK_HDR_SIZE + 72);
        assert!(block::verify(first_block).is_ok());
        assert!(block::verify(second_block).is_ok());
    }

    #[test]
    fn test_appended_bytes_survive_read_back() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        let mut expected = Vec::new();
        for i in 0u32..20 {
            let payload = vec![(i % 251) as u8; 97 + (i as usize * 13) % 400];
            expected.extend_from_slice(&payload);
            append_record(&engine, &payload);
        }
        let lsn = engine.stats().lsn;
        engine.write_up_to(lsn, true).unwrap();

        let seg = engine.read_log_seg(LSN_START, lsn).unwrap();
        for disk_block in seg.chunks_exact(BLOCK_SIZE) {
            assert!(block::verify(disk_block).is_ok());
        }
        assert_eq!(block::strip_framing(&seg), expected);
    }

    #[test]
    fn test_lsn_is_gap_free_across_blocks() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        for _ in 0..10 {
            append_record(&engine, &[0x5A; 333]);
        }
        let lsn = engine.stats().lsn;
        engine.write_up_to(lsn, true).unwrap();

        let seg = engine.read_log_seg(LSN_START, lsn).unwrap();
        let first_no = block::hdr_no(&seg[..BLOCK_SIZE]);
        for (i, disk_block) in seg.chunks_exact(BLOCK_SIZE).enumerate() {
            assert_eq!(block::hdr_no(disk_block), first_no + i as u32);
        }
    }

    #[test]
    fn test_write_ahead_padding_keeps_blocks_valid() {
        let (engine, temp) = setup_engine(4, 16 * 1024, 256);

        // Several separate flushes so some writes start mid-unit.
        for i in 0..8 {
            let lsn = append_record(&engine, &[i as u8; 700]);
            engine.write_up_to(lsn, true).unwrap();
        }

        let lsn = engine.stats().lsn;
        let seg = engine.read_log_seg(LSN_START, lsn).unwrap();
        for disk_block in seg.chunks_exact(BLOCK_SIZE) {
            assert!(block::verify(disk_block).is_ok());
        }

        // Bytes past the log end up to the write-ahead boundary stay
        // zeroed.
        let raw = std::fs::read(temp.path().join("space0").join("redo00")).unwrap();
        let tail_offset = (FILE_HDR_SIZE + (lsn - LSN_START) / BLOCK_SIZE as u64 * 512
            + BLOCK_SIZE as u64) as usize;
        let unit_end = tail_offset.next_multiple_of(engine_write_ahead());
        if unit_end <= raw.len() {
            assert!(raw[tail_offset..unit_end].iter().all(|&b| b == 0));
        }
    }

    fn engine_write_ahead() -> usize {
        LogConfig::new("/tmp").write_ahead_size
    }
}

// =============================================================================
// Checkpoint scenarios
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_checkpoint_after_writes_uses_first_slot() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        let payload: Vec<u8> = (0u8..100).collect();
        let lsn = append_record(&engine, &payload);
        engine.write_up_to(lsn, true).unwrap();

        assert!(engine.checkpoint(true, true).unwrap());

        let record = engine
            .read_checkpoint_slot(0, CheckpointSlot::First)
            .unwrap();
        assert_eq!(record.no, 0);
        assert_eq!(record.lsn, 8304);
        assert_eq!(record.archived_lsn, LSN_MAX);

        let stats = engine.stats();
        assert_eq!(stats.last_checkpoint_lsn, 8304);
        assert_eq!(stats.next_checkpoint_no, 1);

        // The second slot has never been written.
        assert!(engine
            .read_checkpoint_slot(0, CheckpointSlot::Second)
            .is_err());
    }

    #[test]
    fn test_second_checkpoint_alternates_slot() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        let lsn = append_record(&engine, &[1; 100]);
        engine.write_up_to(lsn, true).unwrap();
        assert!(engine.checkpoint(true, true).unwrap());

        let lsn2 = append_record(&engine, &[2; 600]);
        engine.write_up_to(lsn2, true).unwrap();
        assert!(engine.checkpoint(true, true).unwrap());

        let second = engine
            .read_checkpoint_slot(0, CheckpointSlot::Second)
            .unwrap();
        assert_eq!(second.no, 1);
        assert_eq!(second.lsn, lsn2);

        // The first slot still holds the old record, checksums intact.
        let first = engine
            .read_checkpoint_slot(0, CheckpointSlot::First)
            .unwrap();
        assert_eq!(first.no, 0);
        assert_eq!(first.lsn, lsn);

        assert_eq!(engine.stats().next_checkpoint_no, 2);
    }

    #[test]
    fn test_checkpoint_without_new_log_is_a_noop() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        let lsn = append_record(&engine, &[3; 50]);
        engine.write_up_to(lsn, true).unwrap();
        assert!(engine.checkpoint(true, true).unwrap());
        let no_after_first = engine.stats().next_checkpoint_no;

        // Nothing appended in between: the second call succeeds
        // without writing a record.
        assert!(engine.checkpoint(true, false).unwrap());
        assert_eq!(engine.stats().next_checkpoint_no, no_after_first);
    }

    #[test]
    fn test_checkpoint_offset_matches_geometry() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        let lsn = append_record(&engine, &[4; 100]);
        engine.write_up_to(lsn, true).unwrap();
        engine.checkpoint(true, true).unwrap();

        let record = engine
            .read_checkpoint_slot(0, CheckpointSlot::First)
            .unwrap();
        let (file_no, file_offset) =
            group::calc_where_lsn_is(LSN_START, record.lsn, 4, 16 * 1024);
        assert_eq!(file_no, 0);
        assert_eq!(
            record.offset,
            u64::from(file_no) * 16 * 1024 + file_offset
        );
    }

    #[test]
    fn test_make_checkpoint_at_latest_lsn() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        for i in 0..5 {
            append_record(&engine, &[i; 200]);
        }
        engine.make_checkpoint_at(LSN_MAX, true).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.last_checkpoint_lsn, stats.lsn);
        assert_eq!(stats.checkpoint_age, 0);
    }
}

// =============================================================================
// Ring wrap and capacity
// =============================================================================

mod ring_and_capacity {
    use super::*;

    #[test]
    fn test_wrap_around_the_ring() {
        // Small group: 2 files of 8 KiB, 12 KiB capacity.
        let (engine, _temp) = setup_engine(2, 8192, 64);
        let capacity = 2 * (8192 - FILE_HDR_SIZE);

        let mut last_payload = Vec::new();
        let mut last_end = 0;
        while engine.stats().lsn < LSN_START + capacity + 2048 {
            let i = engine.stats().lsn as u8;
            last_payload = vec![i; 1000];
            last_end = append_record(&engine, &last_payload);
            engine.write_up_to(last_end, true).unwrap();
            // Periodic checkpoints keep the age under the threshold.
            assert!(engine.checkpoint(true, true).unwrap());
        }
        assert!(engine.stats().lsn > LSN_START + capacity);

        // A wrapped LSN lands back in file 0 after the header.
        let (file_no, file_offset) =
            group::calc_where_lsn_is(LSN_START, LSN_START + capacity + 100, 2, 8192);
        assert_eq!(file_no, 0);
        assert_eq!(file_offset, FILE_HDR_SIZE + 100);

        // The most recent record reads back intact from the wrapped
        // region.
        let seg = engine
            .read_log_seg(last_end - last_payload.len() as Lsn, last_end)
            .unwrap();
        for disk_block in seg.chunks_exact(BLOCK_SIZE) {
            assert!(block::verify(disk_block).is_ok());
        }
        assert!(block::strip_framing(&seg).ends_with(&last_payload));
    }

    #[test]
    fn test_capacity_overflow_refuses_admission() {
        let (engine, _temp) = setup_engine(2, 8192, 64);
        let capacity = 2 * (8192 - FILE_HDR_SIZE);

        // No checkpoints: append until the engine cuts us off.
        let mut refused = None;
        for _ in 0..64 {
            match engine.reserve_and_open(1000) {
                Ok(mut record) => {
                    record.append(&[0xDD; 1000]);
                    let _ = record.close();
                }
                Err(e) => {
                    refused = Some(e);
                    break;
                }
            }
        }

        match refused {
            Some(LogError::CapacityExceeded { age, capacity: cap }) => {
                assert!(age >= cap);
                assert_eq!(cap, capacity);
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }

        let stats = engine.stats();
        assert!(stats.checkpoint_age >= capacity);
        assert!(stats.check_flush_or_checkpoint);

        // A checkpoint advances the age and admission resumes.
        engine.buffer_flush_to_disk().unwrap();
        assert!(engine.checkpoint(true, true).unwrap());
        let lsn = append_record(&engine, &[0xEE; 100]);
        assert!(lsn > 0);
    }

    #[test]
    fn test_group_too_small_refused_at_init() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = LogConfig::new(temp_dir.path());
        config.page_size = 4096;
        let engine = LogEngine::init(config).unwrap();

        // 4 KiB pages need far more headroom than 2 small files offer.
        assert!(matches!(
            engine.group_init(0, 2, 8192, 0, 1),
            Err(LogError::GroupTooSmall { .. })
        ));
    }
}

// =============================================================================
// Governor and collaborator seams
// =============================================================================

mod governor {
    use super::*;
    use parking_lot::Mutex;

    /// Buffer pool mock whose oldest modification advances when the
    /// engine asks for a flush.
    struct TestPool {
        oldest: Mutex<Lsn>,
        flush_calls: Mutex<Vec<Lsn>>,
    }

    impl TestPool {
        fn new(oldest: Lsn) -> Self {
            Self {
                oldest: Mutex::new(oldest),
                flush_calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl BufferPool for TestPool {
        fn oldest_modification_lsn(&self) -> Lsn {
            *self.oldest.lock()
        }

        fn flush_lists(&self, _limit_pages: usize, upto_lsn: Lsn) -> (bool, usize) {
            self.flush_calls.lock().push(upto_lsn);
            // Flushing everything below the target leaves the pool
            // clean.
            *self.oldest.lock() = 0;
            (true, 3)
        }

        fn wait_batch_end(&self) {}

        fn all_freed(&self) -> bool {
            *self.oldest.lock() == 0
        }

        fn pending_io(&self) -> usize {
            0
        }
    }

    fn setup_with_pool(pool: Arc<TestPool>) -> (Arc<LogEngine>, TempDir) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = LogConfig::new(temp_dir.path());
        config.buf_size = 64 * 1024;
        config.page_size = 64;
        let engine = LogEngine::init(config)
            .expect("init engine")
            .with_buffer_pool(pool);
        engine.group_init(0, 2, 8192, 0, 1).expect("init group");
        (Arc::new(engine), temp_dir)
    }

    #[test]
    fn test_make_checkpoint_at_preflushes_the_pool() {
        let pool = Arc::new(TestPool::new(LSN_START + 20));
        let (engine, _temp) = setup_with_pool(Arc::clone(&pool));

        append_record(&engine, &[9; 500]);
        engine.make_checkpoint_at(LSN_MAX, true).unwrap();

        // The pool was asked to flush everything.
        assert_eq!(pool.flush_calls.lock().as_slice(), &[LSN_MAX]);
        let stats = engine.stats();
        assert_eq!(stats.last_checkpoint_lsn, stats.lsn);
    }

    #[test]
    fn test_check_margins_checkpoints_when_age_grows() {
        let (engine, _temp) = setup_engine(2, 8192, 64);

        // Grow the checkpoint age past the synchronous threshold.
        for _ in 0..8 {
            let lsn = append_record(&engine, &[7; 1000]);
            engine.write_up_to(lsn, false).unwrap();
        }
        let before = engine.stats();
        assert!(before.check_flush_or_checkpoint);

        engine.check_margins().unwrap();

        let after = engine.stats();
        assert!(after.last_checkpoint_lsn > before.last_checkpoint_lsn);
        assert!(!after.check_flush_or_checkpoint);
    }

    #[test]
    fn test_buffer_extension_for_oversized_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = LogConfig::new(temp_dir.path());
        config.buf_size = 16 * 1024;
        config.page_size = 64;
        let engine = LogEngine::init(config).unwrap();
        engine.group_init(0, 4, 64 * 1024, 0, 1).unwrap();

        // A record near the buffer size forces a reallocation.
        let payload = vec![0xAD; 12 * 1024];
        let lsn = append_record(&engine, &payload);
        engine.write_up_to(lsn, true).unwrap();

        assert!(engine.stats().buf_size > 16 * 1024);

        let seg = engine
            .read_log_seg(lsn - payload.len() as Lsn, lsn)
            .unwrap();
        assert!(block::strip_framing(&seg).ends_with(&payload));
    }
}

// =============================================================================
// Concurrency invariants
// =============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_lsn_ordering_invariant_under_load() {
        let (engine, _temp) = setup_engine(4, 256 * 1024, 256);

        let mut handles = Vec::new();
        for t in 0..4u8 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                for i in 0..50usize {
                    let lsn = append_record(&engine, &vec![t; 64 + i]);
                    if i % 3 == 0 {
                        engine.write_up_to(lsn, true).unwrap();
                    } else {
                        engine.write_up_to(lsn, false).unwrap();
                    }

                    let stats = engine.stats();
                    assert!(stats.flushed_to_disk_lsn <= stats.write_lsn);
                    assert!(stats.write_lsn <= stats.lsn);
                }
            }));
        }

        // A competing checkpointer exercises the checkpoint lock.
        {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    engine.checkpoint(true, true).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = engine.stats();
        assert_eq!(stats.n_pending_flushes, 0);
        assert_eq!(stats.n_pending_checkpoint_writes, 0);

        // Everything written is durable and verifiable.
        engine.buffer_flush_to_disk().unwrap();
        let stats = engine.stats();
        assert_eq!(stats.flushed_to_disk_lsn, stats.lsn);

        let seg = engine.read_log_seg(LSN_START, stats.lsn).unwrap();
        for disk_block in seg.chunks_exact(BLOCK_SIZE) {
            assert!(block::verify(disk_block).is_ok());
        }
    }

    #[test]
    fn test_flush_ordering_between_appenders() {
        let (engine, _temp) = setup_engine(4, 64 * 1024, 256);

        // If a later record is durable, every earlier one is too.
        let a = append_record(&engine, &[0xA1; 300]);
        let b = append_record(&engine, &[0xB2; 300]);
        assert!(a < b);

        engine.write_up_to(b, true).unwrap();
        assert!(engine.stats().flushed_to_disk_lsn >= a);

        // The earlier record reads back even though the later one
        // shares its tail block.
        let window_start = LSN_START;
        let seg = engine.read_log_seg(window_start, b).unwrap();
        let stripped = block::strip_framing(&seg);
        let from = payload_index(window_start, a - 300);
        let to = payload_index(window_start, a);
        assert_eq!(&stripped[from..to], &[0xA1; 300]);
    }
}

// =============================================================================
// Shutdown drain
// =============================================================================

mod shutdown {
    use super::*;

    #[test]
    fn test_clean_shutdown_empties_the_log() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        for i in 0..4 {
            append_record(&engine, &[i; 300]);
        }
        engine
            .logs_empty_and_mark_files_at_shutdown(false)
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.lsn, stats.last_checkpoint_lsn);
        assert_eq!(stats.flushed_to_disk_lsn, stats.lsn);
        assert_eq!(engine.shutdown_state(), ShutdownState::LastPhase);
        assert!(engine.shutdown_lsn() >= LSN_START + BLOCK_HDR_SIZE as Lsn);

        // The final checkpoint record points at the log end.
        let newest = [CheckpointSlot::First, CheckpointSlot::Second]
            .iter()
            .filter_map(|&slot| engine.read_checkpoint_slot(0, slot).ok())
            .max_by_key(|record| record.no)
            .expect("a valid checkpoint record");
        assert_eq!(newest.lsn, stats.lsn);
    }

    #[test]
    fn test_very_fast_shutdown_leaves_recovery_work() {
        let (engine, _temp) = setup_engine(4, 16 * 1024, 256);

        for i in 0..4 {
            append_record(&engine, &[i; 300]);
        }
        engine.logs_empty_and_mark_files_at_shutdown(true).unwrap();

        let stats = engine.stats();
        // The log is durable but no final checkpoint was written.
        assert_eq!(stats.flushed_to_disk_lsn, stats.lsn);
        assert!(stats.last_checkpoint_lsn < stats.lsn);
        assert_eq!(engine.shutdown_state(), ShutdownState::LastPhase);
    }
}
