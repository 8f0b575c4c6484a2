//! 日志集成测试
//!
//! `MockFile` 是内存中的映射服务：每个映射区域持有自己的缓冲区，
//! `sync` 或 drop 时写回共享存储，相当于进程被杀时页缓存仍然落盘。
//! 直接丢弃 `JournalCore` 就能模拟任意时刻的崩溃。

use super::{
    inner::JournalCore,
    transaction::TransactionGuard,
    CommitMode, JournalConfig, JournalIterator, Mode, PersistentJournal, ProtectionMode,
};
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    mapping::{MappedRegion, MappingService, MmapFile, Protection},
    types::{put_i32, BlockIndex, CommitState, ListKind},
};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

//=============================================================================
// MockFile
//=============================================================================

#[derive(Clone)]
struct MockFile {
    storage: Arc<Mutex<Vec<u8>>>,
    maps_left: Arc<AtomicUsize>,
    fail_sync: Arc<AtomicBool>,
    read_only: bool,
}

impl MockFile {
    fn new() -> Self {
        Self {
            storage: Arc::new(Mutex::new(Vec::new())),
            maps_left: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_sync: Arc::new(AtomicBool::new(false)),
            read_only: false,
        }
    }

    /// 只允许再映射 `n` 次
    fn limit_maps(&self, n: usize) {
        self.maps_left.store(n, Ordering::SeqCst);
    }

    fn fail_syncs(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    fn storage_len(&self) -> usize {
        self.storage.lock().len()
    }

    fn read_i32(&self, off: usize) -> i32 {
        crate::types::get_i32(&self.storage.lock(), off)
    }

    fn patch_i32(&self, off: usize, val: i32) {
        put_i32(&mut self.storage.lock(), off, val);
    }
}

struct MockRegion {
    storage: Arc<Mutex<Vec<u8>>>,
    offset: usize,
    buf: Vec<u8>,
    prot: Protection,
    written: bool,
    fail_sync: Arc<AtomicBool>,
}

impl MockRegion {
    fn write_back(&self) {
        let mut storage = self.storage.lock();
        let end = (self.offset + self.buf.len()).min(storage.len());
        if self.offset < end {
            storage[self.offset..end].copy_from_slice(&self.buf[..end - self.offset]);
        }
    }
}

impl MappingService for MockFile {
    type Region = MockRegion;

    fn len(&self) -> Result<u64> {
        Ok(self.storage.lock().len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.storage.lock().resize(len as usize, 0);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let storage = self.storage.lock();
        let start = (offset as usize).min(storage.len());
        let n = buf.len().min(storage.len() - start);
        buf[..n].copy_from_slice(&storage[start..start + n]);
        Ok(n)
    }

    fn map(&self, offset: u64, len: usize, prot: Protection) -> Result<MockRegion> {
        if prot.contains(Protection::WRITE) && self.read_only {
            return Err(Error::new(ErrorKind::Mem, "mock file is read-only"));
        }
        let left = self.maps_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::new(ErrorKind::Mem, "mock map limit reached"));
        }
        if left != usize::MAX {
            self.maps_left.store(left - 1, Ordering::SeqCst);
        }

        let storage = self.storage.lock();
        let start = offset as usize;
        if start + len > storage.len() {
            return Err(Error::new(ErrorKind::Mem, "mock map past end of file"));
        }
        Ok(MockRegion {
            storage: self.storage.clone(),
            offset: start,
            buf: storage[start..start + len].to_vec(),
            prot,
            written: false,
            fail_sync: self.fail_sync.clone(),
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl MappedRegion for MockRegion {
    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if !self.prot.contains(Protection::WRITE) {
            return Err(Error::new(ErrorKind::ProtectionFailure, "mock region is protected"));
        }
        self.written = true;
        Ok(&mut self.buf)
    }

    fn sync(&self) -> Result<()> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::SyncFailure, "mock sync failure"));
        }
        self.write_back();
        Ok(())
    }

    fn protect(&mut self, prot: Protection) -> Result<()> {
        self.prot = prot;
        Ok(())
    }

    fn protection(&self) -> Protection {
        self.prot
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        if self.written {
            self.write_back();
        }
    }
}

//=============================================================================
// 辅助函数
//=============================================================================

/// blockSize=64, blocksPerPage=4：header 4096，每页 4096
fn small_config() -> JournalConfig {
    JournalConfig::default().with_geometry(64, 4)
}

fn open_mock(file: &MockFile, config: &JournalConfig) -> PersistentJournal<MockFile> {
    let journal = PersistentJournal::new(CommitMode::Implicit);
    journal.open_with(file.clone(), config).unwrap();
    journal
}

fn forward<F: MappingService>(mut iter: JournalIterator<'_, F>) -> Vec<i32> {
    let mut handles = Vec::new();
    while iter.is_valid() {
        handles.push(iter.handle().get());
        iter.advance();
    }
    handles
}

fn backward<F: MappingService>(mut iter: JournalIterator<'_, F>) -> Vec<i32> {
    let mut handles = Vec::new();
    while iter.is_valid() {
        handles.push(iter.handle().get());
        iter.retreat();
    }
    handles
}

fn free_list<F: MappingService>(journal: &PersistentJournal<F>) -> Vec<i32> {
    journal.free_blocks().unwrap().iter().map(|b| b.get()).collect()
}

//=============================================================================
// 基本场景
//=============================================================================

#[test]
fn test_new_journal_has_no_pages() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    assert!(journal.is_open());
    assert_eq!(journal.num_pages(), 0);
    assert_eq!(journal.num_free_blocks(), 0);
    assert_eq!(journal.highest_block_used(), BlockIndex::NIL);
    assert_eq!(file.storage_len(), 4096);
    assert_eq!(file.read_i32(HDR_FILE_VERSION), JOURNAL_FILE_VERSION);
    assert!(journal.journal_creation_datetime().is_some());
    journal.assert_invariants().unwrap();
}

#[test]
fn test_add_small_record() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let handle = journal.add_record(b"0123456789").unwrap();

    assert_eq!(handle.get(), 0);
    assert_eq!(journal.num_unconfirmed_records(), 1);
    assert_eq!(journal.num_unconfirmed_blocks(), 1);
    assert_eq!(journal.num_unconfirmed_bytes(), 10);
    assert_eq!(journal.num_confirmed_records(), 0);
    assert_eq!(journal.num_pages(), 1);
    assert_eq!(journal.num_free_blocks(), 3);
    assert_eq!(file.storage_len(), 8192);

    let iter = journal.record_iter(handle);
    assert!(iter.is_valid());
    assert!(!iter.is_confirmed());
    assert_eq!(iter.to_vec(), b"0123456789");
    assert!(iter.creation_datetime().is_some());
    assert!(iter.confirmation_datetime().is_none());
}

#[test]
fn test_multi_block_record_and_confirm() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
    let handle = journal.add_record(&payload).unwrap();
    assert_eq!(journal.num_unconfirmed_blocks(), 4);
    assert_eq!(journal.num_free_blocks(), 0);

    journal.confirm_record(handle).unwrap();
    assert_eq!(journal.num_unconfirmed_records(), 0);
    assert_eq!(journal.num_confirmed_records(), 1);
    assert_eq!(journal.num_confirmed_blocks(), 4);
    assert_eq!(journal.num_confirmed_bytes(), 200);

    let iter = journal.first_confirmed_record();
    assert_eq!(iter.handle(), handle);
    assert!(iter.is_confirmed());
    assert!(iter.confirmation_datetime().is_some());

    let lengths: Vec<usize> = iter.data().iter().map(|s| s.len()).collect();
    assert_eq!(lengths, vec![64, 64, 64, 8]);
    assert_eq!(iter.to_vec(), payload);
}

#[test]
fn test_retention_by_record_count() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config().with_retention(Some(1), None));

    let h1 = journal.add_record(b"first").unwrap();
    let h2 = journal.add_record(b"second").unwrap();
    journal.confirm_record(h1).unwrap();
    journal.confirm_record(h2).unwrap();

    assert_eq!(journal.num_confirmed_records(), 1);
    assert_eq!(forward(journal.first_confirmed_record()), vec![h2.get()]);
    assert_eq!(journal.num_free_blocks(), 3);

    let err = journal.remove_record(h1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRecordHandle);
}

#[test]
fn test_retention_by_bytes_evicts_until_both_caps_hold() {
    let file = MockFile::new();
    let config = JournalConfig::default()
        .with_geometry(32, 4)
        .with_retention(Some(2), Some(64));
    let journal = open_mock(&file, &config);

    let h1 = journal.add_record(&[1u8; 10]).unwrap();
    let h2 = journal.add_record(&[2u8; 10]).unwrap();
    let h3 = journal.add_record(&[3u8; 64]).unwrap();
    journal.confirm_record(h1).unwrap();
    journal.confirm_record(h2).unwrap();
    assert_eq!(journal.num_confirmed_records(), 2);

    journal.confirm_record(h3).unwrap();
    assert_eq!(journal.num_confirmed_records(), 1);
    assert_eq!(journal.num_confirmed_bytes(), 64);
    assert_eq!(journal.first_confirmed_record().handle(), h3);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_zero_retention_evicts_immediately() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config().with_retention(Some(0), Some(0)));

    let handle = journal.add_record(b"gone").unwrap();
    journal.confirm_record(handle).unwrap();

    assert_eq!(journal.num_confirmed_records(), 0);
    assert_eq!(journal.num_unconfirmed_records(), 0);
    assert_eq!(journal.num_free_blocks(), 4);
    assert!(!journal.first_confirmed_record().is_valid());
}

#[test]
fn test_record_too_large_for_max_file_size() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config().with_max_file_size(Some(8192)));

    assert_eq!(journal.max_record_size_for_empty_journal(), Some(256));
    assert_eq!(journal.max_record_size(), Some(256));

    let err = journal.add_record(&[0u8; 257]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxRecordSizeForEmptyJournalViolation);
    assert_eq!(journal.num_pages(), 0);
    assert_eq!(journal.num_unconfirmed_records(), 0);
    assert_eq!(file.storage_len(), 4096);

    let handle = journal.add_record(&[0u8; 200]).unwrap();
    assert_eq!(journal.max_record_size(), Some(0));

    let err = journal.add_record(b"x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxRecordSizeViolation);
    assert_eq!(journal.num_unconfirmed_records(), 1);

    journal.remove_record(handle).unwrap();
    journal.add_record(b"x").unwrap();
    journal.assert_invariants().unwrap();
}

#[test]
fn test_invalid_max_file_size() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let err = journal.set_max_file_size(4096 + 4095).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMaxFileSize);

    for _ in 0..8 {
        journal.add_record(b"fill").unwrap();
    }
    assert_eq!(journal.num_pages(), 2);
    let err = journal.set_max_file_size(8192).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMaxFileSize);

    journal.set_max_file_size(3 * 4096).unwrap();
    assert_eq!(journal.max_record_size(), Some(0));
}

#[test]
fn test_corrupted_magic_is_rejected() {
    let file = MockFile::new();
    {
        let journal = open_mock(&file, &small_config());
        journal.add_record(b"data").unwrap();
        journal.close().unwrap();
    }

    file.storage.lock()[HDR_MAGIC_WORD] ^= 0xFF;

    let journal = PersistentJournal::new(CommitMode::Implicit);
    let err = journal.open_with(file.clone(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFile);
    assert!(!journal.is_open());
}

#[test]
fn test_newer_version_is_rejected() {
    let file = MockFile::new();
    open_mock(&file, &small_config()).close().unwrap();
    file.patch_i32(HDR_FILE_VERSION, JOURNAL_FILE_VERSION + 1);

    let journal = PersistentJournal::new(CommitMode::Implicit);
    let err = journal.open_with(file.clone(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);

    file.patch_i32(HDR_FILE_VERSION, 0);
    let err = journal.open_with(file.clone(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFile);
}

#[test]
fn test_truncated_file_is_rejected() {
    let file = MockFile::new();
    {
        let journal = open_mock(&file, &small_config());
        for _ in 0..5 {
            journal.add_record(b"page").unwrap();
        }
        journal.close().unwrap();
    }
    file.storage.lock().truncate(4096 + 4096);

    let journal = PersistentJournal::new(CommitMode::Implicit);
    let err = journal.open_with(file.clone(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFile);
}

//=============================================================================
// 分配顺序
//=============================================================================

#[test]
fn test_free_list_order_across_growth() {
    let file = MockFile::new();
    let journal = open_mock(&file, &JournalConfig::default().with_geometry(32, 4));

    assert_eq!(journal.add_record(&[0u8; 10]).unwrap().get(), 0);
    assert_eq!(journal.add_record(&[0u8; 10]).unwrap().get(), 1);
    assert_eq!(free_list(&journal), vec![2, 3]);
    assert_eq!(journal.highest_block_used().get(), 1);

    // 需要 3 块，空闲只有 2 块：新页挂到空闲链表头部
    let big = journal.add_record(&[0u8; 70]).unwrap();
    assert_eq!(big.get(), 4);
    assert_eq!(journal.num_pages(), 2);
    assert_eq!(free_list(&journal), vec![7, 2, 3]);
    assert_eq!(journal.highest_block_used().get(), 6);

    journal.remove_record(big).unwrap();
    assert_eq!(free_list(&journal), vec![4, 5, 6, 7, 2, 3]);
    assert_eq!(journal.highest_block_used().get(), 6);

    journal.remove_record(BlockIndex::new(0)).unwrap();
    assert_eq!(free_list(&journal), vec![0, 4, 5, 6, 7, 2, 3]);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_invalid_handles() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());
    let h = journal.add_record(&[0u8; 100]).unwrap();

    for bad in [BlockIndex::NIL, BlockIndex::new(1), BlockIndex::new(4), BlockIndex::new(1000)] {
        assert_eq!(journal.confirm_record(bad).unwrap_err().kind(), ErrorKind::InvalidRecordHandle);
        assert_eq!(journal.remove_record(bad).unwrap_err().kind(), ErrorKind::InvalidRecordHandle);
        assert!(!journal.record_iter(bad).is_valid());
    }

    journal.confirm_record(h).unwrap();
    // 已确认的记录不能再次确认
    assert_eq!(journal.confirm_record(h).unwrap_err().kind(), ErrorKind::InvalidRecordHandle);
    journal.remove_record(h).unwrap();
    assert_eq!(journal.remove_record(h).unwrap_err().kind(), ErrorKind::InvalidRecordHandle);
    assert_eq!(journal.num_free_blocks(), 4);
}

//=============================================================================
// 迭代器与数据
//=============================================================================

#[test]
fn test_iteration_order() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let handles: Vec<_> = (0..5u8).map(|i| journal.add_record(&[i; 20]).unwrap()).collect();
    for &i in &[2usize, 0, 4] {
        journal.confirm_record(handles[i]).unwrap();
    }

    let ids = |idx: &[usize]| idx.iter().map(|&i| handles[i].get()).collect::<Vec<_>>();
    assert_eq!(forward(journal.first_confirmed_record()), ids(&[2, 0, 4]));
    assert_eq!(backward(journal.last_confirmed_record()), ids(&[4, 0, 2]));
    assert_eq!(forward(journal.first_unconfirmed_record()), ids(&[1, 3]));
    assert_eq!(backward(journal.last_unconfirmed_record()), ids(&[3, 1]));

    let mut iter = journal.record_iter(handles[0]);
    assert!(iter.advance());
    assert_eq!(iter.handle(), handles[4]);
    assert!(!iter.advance());
    assert_eq!(iter.handle(), BlockIndex::NIL);
    assert_eq!(iter.record_length(), 0);
    assert!(iter.data().is_empty());
}

#[test]
fn test_payload_round_trip_sizes() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    for len in [1usize, 63, 64, 65, 256, 1000] {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
        let handle = journal.add_record(&payload).unwrap();

        let iter = journal.record_iter(handle);
        assert_eq!(iter.record_length(), len);
        assert_eq!(iter.to_vec(), payload, "length {}", len);

        let mut buf = vec![0u8; len];
        assert_eq!(iter.copy_data(&mut buf), len);
        assert_eq!(buf, payload);
    }
    journal.assert_invariants().unwrap();
}

#[test]
fn test_vectored_add_spans_blocks() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let a = [b'a'; 50];
    let b = [b'b'; 50];
    let c = [b'c'; 3];
    let parts: [&[u8]; 4] = [&a, &[], &b, &c];
    let handle = journal.add_record_vectored(&parts).unwrap();

    let iter = journal.record_iter(handle);
    assert_eq!(iter.record_length(), 103);
    let data = iter.to_vec();
    assert_eq!(&data[..50], &a);
    assert_eq!(&data[50..100], &b);
    assert_eq!(&data[100..], &c);
}

#[test]
fn test_copy_data_truncates() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());
    let payload: Vec<u8> = (0..150u8).collect();
    let handle = journal.add_record(&payload).unwrap();

    let iter = journal.record_iter(handle);
    let mut short = [0u8; 70];
    assert_eq!(iter.copy_data(&mut short), 70);
    assert_eq!(&short[..], &payload[..70]);

    let mut empty = [0u8; 0];
    assert_eq!(iter.copy_data(&mut empty), 0);
}

#[test]
fn test_empty_record_takes_one_block() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());

    let handle = journal.add_record(&[]).unwrap();
    assert_eq!(journal.num_unconfirmed_blocks(), 1);
    assert_eq!(journal.num_unconfirmed_bytes(), 0);

    let iter = journal.record_iter(handle);
    assert!(iter.is_valid());
    assert_eq!(iter.record_length(), 0);
    assert!(iter.data().is_empty());
    drop(iter);

    journal.remove_record(handle).unwrap();
    assert_eq!(journal.num_free_blocks(), 4);
}

//=============================================================================
// 生命周期
//=============================================================================

#[test]
fn test_state_errors() {
    let file = MockFile::new();
    let journal = PersistentJournal::new(CommitMode::Implicit);

    assert_eq!(journal.add_record(b"x").unwrap_err().kind(), ErrorKind::BadState);
    assert_eq!(journal.close().unwrap_err().kind(), ErrorKind::BadState);
    assert_eq!(journal.commit().unwrap_err().kind(), ErrorKind::BadState);
    assert!(!journal.first_confirmed_record().is_valid());
    assert_eq!(journal.num_confirmed_records(), 0);
    assert_eq!(journal.mode(), None);

    journal.open_with(file.clone(), &small_config()).unwrap();
    let err = journal.open_with(file.clone(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    assert_eq!(journal.mode(), Some(Mode::ReadWrite));

    journal.close().unwrap();
    assert!(!journal.is_open());
}

#[test]
fn test_reopen_preserves_records_and_header() {
    let file = MockFile::new();
    let config = small_config()
        .with_retention(Some(10), None)
        .with_user_data_size(16);
    let (h1, h2) = {
        let journal = open_mock(&file, &config);
        let h1 = journal.add_record(b"alpha").unwrap();
        let h2 = journal.add_record(&[9u8; 130]).unwrap();
        journal.confirm_record(h1).unwrap();
        journal.set_user_data(4, b"user").unwrap();
        journal.close().unwrap();
        (h1, h2)
    };

    // 已有文件的几何参数和保留上限以文件头为准
    let journal = open_mock(&file, &JournalConfig::default());
    assert_eq!(journal.block_size(), 64);
    assert_eq!(journal.blocks_per_page(), 4);
    assert_eq!(journal.alignment_size(), 4096);
    assert_eq!(journal.max_confirmed_records_kept(), Some(10));
    assert_eq!(journal.max_confirmed_bytes_kept(), None);
    assert_eq!(journal.user_data_length(), 16);
    assert_eq!(&journal.user_data()[4..8], b"user");

    assert_eq!(forward(journal.first_confirmed_record()), vec![h1.get()]);
    assert_eq!(forward(journal.first_unconfirmed_record()), vec![h2.get()]);
    assert_eq!(journal.record_iter(h1).to_vec(), b"alpha");
    assert_eq!(journal.record_iter(h2).to_vec(), vec![9u8; 130]);
    assert_eq!(journal.highest_block_used().get(), 3);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_user_data_bounds() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config().with_user_data_size(8));

    assert_eq!(journal.user_data(), vec![0u8; 8]);
    journal.set_user_data(0, b"12345678").unwrap();
    let err = journal.set_user_data(1, b"12345678").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    assert_eq!(journal.user_data(), b"12345678");
}

#[test]
fn test_read_only_mode() {
    let file = MockFile::new();
    let handle = {
        let journal = open_mock(&file, &small_config());
        let h = journal.add_record(b"readonly").unwrap();
        journal.close().unwrap();
        h
    };

    let journal = PersistentJournal::new(CommitMode::Implicit);
    let config = small_config().with_mode(Mode::ReadOnly);
    journal.open_with(file.clone(), &config).unwrap();

    assert_eq!(journal.mode(), Some(Mode::ReadOnly));
    assert_eq!(journal.record_iter(handle).to_vec(), b"readonly");
    assert_eq!(journal.add_record(b"x").unwrap_err().kind(), ErrorKind::BadState);
    assert_eq!(journal.remove_record(handle).unwrap_err().kind(), ErrorKind::BadState);
    assert_eq!(journal.set_user_data(0, b"").unwrap_err().kind(), ErrorKind::BadState);
    journal.commit().unwrap();
    journal.close().unwrap();

    // 只读方式不能打开空文件
    let empty = MockFile::new();
    let err = journal.open_with(empty, &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFile);
}

#[test]
fn test_print_header() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());
    journal.add_record(b"x").unwrap();

    let mut out = Vec::new();
    journal.print_header(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("A3kdh*(UNA11"));
    assert!(text.contains("blockSize               = 64"));
    assert!(text.contains("stateData[1]:"));
}

//=============================================================================
// 事务与崩溃恢复
//=============================================================================

#[test]
fn test_guard_rolls_back_growth() {
    let file = MockFile::new();
    let config = small_config();
    let mut core = JournalCore::open(file.clone(), &config).unwrap();
    core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"keep"], 4)).unwrap();
    let before = core.state;

    {
        let mut txn = TransactionGuard::begin(&mut core).unwrap();
        let payload = [7u8; 300];
        txn.add_record(&[&payload], 300).unwrap();
        assert_eq!(txn.pages.len(), 2);
        // 未提交就离开作用域
    }

    assert_eq!(core.state, before);
    assert_eq!(core.pages.len(), 1);
    assert_eq!(core.commit_state().unwrap(), CommitState::Stable);
    assert!(core.dirty_records.is_empty());
    core.check_invariants().unwrap();
}

#[test]
fn test_failed_operation_rolls_back() {
    let file = MockFile::new();
    let mut core = JournalCore::open(file.clone(), &small_config()).unwrap();
    core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"keep"], 4)).unwrap();
    let before = core.state;

    let err = core
        .mutate(CommitMode::Implicit, |j| {
            j.add_record(&[b"lost"], 4)?;
            Err::<(), _>(Error::new(ErrorKind::Internal, "injected"))
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(core.state, before);
    core.check_invariants().unwrap();
}

#[test]
fn test_failed_growth_leaves_journal_unchanged() {
    let file = MockFile::new();
    let journal = open_mock(&file, &small_config());
    file.limit_maps(1);

    for _ in 0..4 {
        journal.add_record(b"fits").unwrap();
    }
    let free_before = free_list(&journal);

    let err = journal.add_record(b"needs a page").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mem);
    assert_eq!(journal.num_pages(), 1);
    assert_eq!(journal.num_unconfirmed_records(), 4);
    assert_eq!(free_list(&journal), free_before);
    journal.assert_invariants().unwrap();

    file.limit_maps(usize::MAX);
    journal.add_record(b"now it fits").unwrap();
    assert_eq!(journal.num_pages(), 2);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_crash_mid_transaction_recovers_old_state() {
    let file = MockFile::new();
    let config = small_config();
    {
        let mut core = JournalCore::open(file.clone(), &config).unwrap();
        for _ in 0..4 {
            core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"committed"], 9)).unwrap();
        }
        core.begin_transaction().unwrap();
        core.add_record(&[b"in flight"], 9).unwrap();
        let h = core.state.list(ListKind::Unconfirmed).head;
        core.confirm_record(h).unwrap();
        assert_eq!(core.pages.len(), 2);
        // 崩溃
    }
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::MidTransaction as i32);

    // 只读打开：不恢复，看到事务前的状态
    {
        let journal = PersistentJournal::new(CommitMode::Implicit);
        journal.open_with(file.clone(), &config.with_mode(Mode::ReadOnly)).unwrap();
        assert_eq!(journal.num_unconfirmed_records(), 4);
        assert_eq!(journal.num_confirmed_records(), 0);
        assert_eq!(journal.num_pages(), 1);
        journal.assert_invariants().unwrap();
        journal.close().unwrap();
    }
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::MidTransaction as i32);

    // 读写打开：完成恢复
    let journal = open_mock(&file, &config);
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::Stable as i32);
    assert_eq!(journal.num_unconfirmed_records(), 4);
    assert_eq!(journal.num_confirmed_records(), 0);
    assert_eq!(journal.num_pages(), 1);
    assert!(free_list(&journal).is_empty());
    journal.assert_invariants().unwrap();

    journal.add_record(b"after recovery").unwrap();
    assert_eq!(journal.num_pages(), 2);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_rolled_back_confirm_has_no_confirmation_time() {
    let file = MockFile::new();
    let config = small_config();
    {
        let mut core = JournalCore::open(file.clone(), &config).unwrap();
        let (h, _) = core
            .mutate(CommitMode::Implicit, |j| j.add_record(&[b"pending"], 7))
            .unwrap();

        // 回滚的确认
        let err = core
            .mutate(CommitMode::Implicit, |j| {
                j.confirm_record(h)?;
                Err::<(), _>(Error::new(ErrorKind::Internal, "injected"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        // 崩溃在确认中途
        core.begin_transaction().unwrap();
        core.confirm_record(h).unwrap();
    }
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::MidTransaction as i32);

    let journal = open_mock(&file, &config);
    let iter = journal.first_unconfirmed_record();
    assert!(iter.is_valid());
    assert!(!iter.is_confirmed());
    assert!(iter.creation_datetime().is_some());
    assert!(iter.confirmation_datetime().is_none());
    drop(iter);

    assert_eq!(journal.num_confirmed_records(), 0);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_reads_with_live_iterator_and_queued_writer() {
    let file = MockFile::new();
    let journal = Arc::new(open_mock(&file, &small_config()));
    journal.add_record(b"held").unwrap();

    let iter = journal.first_unconfirmed_record();
    let writer = {
        let journal = Arc::clone(&journal);
        std::thread::spawn(move || journal.add_record(b"queued").unwrap())
    };
    // 等写者在写锁上排队
    std::thread::sleep(std::time::Duration::from_millis(100));

    assert_eq!(journal.num_unconfirmed_records(), 1);
    assert_eq!(forward(journal.first_unconfirmed_record()), vec![0]);
    assert_eq!(journal.free_blocks().unwrap().len(), 3);
    assert_eq!(iter.to_vec(), b"held");
    drop(iter);

    writer.join().unwrap();
    assert_eq!(journal.num_unconfirmed_records(), 2);
    journal.assert_invariants().unwrap();
}

#[test]
fn test_drop_during_unwind_skips_invariant_panic() {
    let file = MockFile::new();
    let config = small_config();
    {
        let journal = open_mock(&file, &config);
        journal.add_record(b"x").unwrap();
        journal.close().unwrap();
    }
    // 两份状态头中的空闲块数都少记一块
    for index in 0..2 {
        let off = HDR_STATE_DATA + index * STATE_HEADER_SIZE + 52;
        file.patch_i32(off, file.read_i32(off) - 1);
    }

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let journal = open_mock(&file, &config);
        assert_eq!(journal.assert_invariants().unwrap_err().kind(), ErrorKind::Internal);
        panic!("caller failure while the journal is open");
    }));
    assert!(result.is_err());
}

#[test]
fn test_crash_mid_sync_recovers_new_state() {
    let file = MockFile::new();
    let config = small_config();
    {
        let mut core = JournalCore::open(file.clone(), &config).unwrap();
        core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"first"], 5)).unwrap();
        core.begin_transaction().unwrap();
        core.add_record(&[b"second"], 6).unwrap();
        core.prepare_commit().unwrap();
        // 崩溃：副本 1 已完整，副本 0 尚未同步
    }
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::MidSync as i32);

    let journal = open_mock(&file, &config);
    assert_eq!(file.read_i32(HDR_COMMIT_STATE), CommitState::Stable as i32);
    assert_eq!(journal.num_unconfirmed_records(), 2);
    assert_eq!(journal.record_iter(BlockIndex::new(1)).to_vec(), b"second");
    journal.assert_invariants().unwrap();
}

#[test]
fn test_begin_requires_stable() {
    let file = MockFile::new();
    let mut core = JournalCore::open(file, &small_config()).unwrap();

    assert_eq!(core.prepare_commit().unwrap_err().kind(), ErrorKind::BadState);
    assert_eq!(core.abort_transaction().unwrap_err().kind(), ErrorKind::BadState);

    core.begin_transaction().unwrap();
    assert_eq!(core.begin_transaction().unwrap_err().kind(), ErrorKind::BadState);
    core.abort_transaction().unwrap();
    assert_eq!(core.commit_state().unwrap(), CommitState::Stable);
}

//=============================================================================
// 保护与刷盘
//=============================================================================

#[test]
fn test_protection_is_restored_after_mutation() {
    let file = MockFile::new();
    let mut core = JournalCore::open(file, &small_config().with_user_data_size(4)).unwrap();
    core.set_protection_mode(ProtectionMode::Protected).unwrap();
    assert_eq!(core.header.protection(), Protection::READ);

    core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"guarded"], 7)).unwrap();
    assert_eq!(core.header.protection(), Protection::READ);
    assert!(core.pages.iter().all(|p| p.protection() == Protection::READ));
    assert_eq!(core.user_data_mut().unwrap_err().kind(), ErrorKind::ProtectionFailure);

    // 失败路径同样恢复保护
    let _ = core.mutate(CommitMode::Implicit, |j| {
        j.add_record(&[b"lost"], 4)?;
        Err::<(), _>(Error::new(ErrorKind::Internal, "injected"))
    });
    assert!(core.pages.iter().all(|p| p.protection() == Protection::READ));

    core.set_protection_mode(ProtectionMode::Unprotected).unwrap();
    assert_eq!(core.header.protection(), Protection::READ_WRITE);
    core.check_invariants().unwrap();
}

#[test]
fn test_protected_facade_operations() {
    let file = MockFile::new();
    let config = small_config()
        .with_user_data_size(4)
        .with_protection(ProtectionMode::Protected);
    let journal = open_mock(&file, &config);
    assert_eq!(journal.protection_mode(), ProtectionMode::Protected);

    let h = journal.add_record(b"protected").unwrap();
    journal.confirm_record(h).unwrap();
    journal.set_user_data(0, b"abcd").unwrap();
    journal.commit().unwrap();

    assert_eq!(journal.record_iter(h).to_vec(), b"protected");
    assert_eq!(journal.user_data(), b"abcd");
    journal.close().unwrap();
}

#[test]
fn test_explicit_commit_reports_sync_failure() {
    let file = MockFile::new();
    let journal = PersistentJournal::new(CommitMode::Explicit);
    journal.open_with(file.clone(), &small_config()).unwrap();
    assert_eq!(journal.commit_mode(), CommitMode::Explicit);

    file.fail_syncs(true);
    journal.add_record(b"unsynced").unwrap();
    assert_eq!(journal.commit().unwrap_err().kind(), ErrorKind::SyncFailure);

    file.fail_syncs(false);
    journal.commit().unwrap();
    journal.close().unwrap();

    let journal = open_mock(&file, &small_config());
    assert_eq!(journal.num_unconfirmed_records(), 1);
}

//=============================================================================
// 磁盘文件
//=============================================================================

#[test]
fn test_file_backed_journal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orders.jnl");
    let config = small_config().with_user_data_size(32);

    let journal = PersistentJournal::default();
    journal.open(&path, &config).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

    let h1 = journal.add_record(b"persisted").unwrap();
    let h2 = journal.add_record(&[5u8; 300]).unwrap();
    journal.confirm_record(h1).unwrap();
    journal.set_user_data(0, b"cursor").unwrap();
    journal.close().unwrap();

    let journal = PersistentJournal::default();
    journal.open(&path, &config).unwrap();
    assert_eq!(journal.record_iter(h1).to_vec(), b"persisted");
    assert_eq!(journal.record_iter(h2).to_vec(), vec![5u8; 300]);
    assert_eq!(&journal.user_data()[..6], b"cursor");
    journal.assert_invariants().unwrap();
    journal.close().unwrap();
}

#[test]
fn test_missing_file_without_create() {
    let dir = tempdir().unwrap();
    let journal = PersistentJournal::default();
    let config = small_config().with_create_if_missing(false);

    let err = journal.open(dir.path().join("missing.jnl"), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotExists);
    assert!(!journal.is_open());
}

#[test]
fn test_invalid_config_creates_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.jnl");
    let journal = PersistentJournal::default();

    let err = journal
        .open(&path, &small_config().with_alignment_size(1000))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert!(!path.exists());
    assert!(!journal.is_open());

    journal.open(&path, &small_config()).unwrap();
    journal.add_record(b"kept").unwrap();
    journal.close().unwrap();

    // 已有文件以文件头为准
    journal
        .open(&path, &small_config().with_alignment_size(1000))
        .unwrap();
    assert_eq!(journal.alignment_size(), 4096);
    assert_eq!(journal.block_size(), 64);
    assert_eq!(journal.first_unconfirmed_record().to_vec(), b"kept");
    journal.close().unwrap();
}

#[test]
fn test_file_crash_mid_sync() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.jnl");
    let config = small_config();
    {
        let file = MmapFile::open(&path, true, true).unwrap();
        let mut core = JournalCore::open(file, &config).unwrap();
        core.mutate(CommitMode::Implicit, |j| j.add_record(&[b"committed"], 9)).unwrap();
        core.begin_transaction().unwrap();
        core.add_record(&[b"in flight"], 9).unwrap();
        core.prepare_commit().unwrap();
    }

    let journal = PersistentJournal::default();
    journal.open(&path, &config).unwrap();
    assert_eq!(journal.num_unconfirmed_records(), 2);
    journal.assert_invariants().unwrap();
    journal.close().unwrap();
}

#[test]
fn test_file_protection_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("protected.jnl");
    let journal = PersistentJournal::default();
    journal
        .open(&path, &small_config().with_protection(ProtectionMode::Protected))
        .unwrap();

    let h = journal.add_record(&[3u8; 500]).unwrap();
    journal.confirm_record(h).unwrap();
    journal.commit().unwrap();
    assert_eq!(journal.first_confirmed_record().to_vec(), vec![3u8; 500]);
    journal.close().unwrap();
}

#[test]
fn test_concurrent_writers() {
    let dir = tempdir().unwrap();
    let journal = Arc::new(PersistentJournal::default());
    journal.open(dir.path().join("mt.jnl"), &small_config()).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let journal = Arc::clone(&journal);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let payload = format!("thread {} record {}", t, i);
                    let h = journal.add_record(payload.as_bytes()).unwrap();
                    if i % 2 == 0 {
                        journal.confirm_record(h).unwrap();
                    } else {
                        journal.remove_record(h).unwrap();
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(journal.num_confirmed_records(), 4 * 13);
    assert_eq!(journal.num_unconfirmed_records(), 0);
    journal.assert_invariants().unwrap();

    let mut iter = journal.first_confirmed_record();
    while iter.is_valid() {
        assert!(iter.to_vec().starts_with(b"thread "));
        iter.advance();
    }
    drop(iter);
    journal.close().unwrap();
}
