//! 持久化日志
//!
//! [`PersistentJournal`] 是对外的入口：一个读写锁保护的 `JournalCore`。
//! 修改操作持有写锁，访问器和迭代器持有读锁。读锁一律以 `read_recursive`
//! 获取，持有迭代器的线程在有写者排队时仍能继续读。

use super::{
    config::{CommitMode, JournalConfig, Mode, ProtectionMode},
    inner::JournalCore,
    iterator::JournalIterator,
    protect::UnprotectGuard,
};
use crate::{
    error::{Error, ErrorKind, Result},
    mapping::{MappingService, MmapFile},
    types::{BlockIndex, ListKind, RecordHandle},
};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::io;
use std::path::Path;

/// 持久化日志
///
/// # 示例
///
/// ```rust,ignore
/// use persistent_journal::{CommitMode, JournalConfig, PersistentJournal};
///
/// let journal = PersistentJournal::new(CommitMode::Implicit);
/// journal.open("orders.jnl", &JournalConfig::default())?;
///
/// let handle = journal.add_record(b"new order")?;
/// journal.confirm_record(handle)?;
///
/// let mut iter = journal.first_confirmed_record();
/// while iter.is_valid() {
///     println!("{:?}", iter.to_vec());
///     iter.advance();
/// }
/// drop(iter);
///
/// journal.close()?;
/// ```
pub struct PersistentJournal<F: MappingService = MmapFile> {
    commit_mode: CommitMode,
    inner: RwLock<Option<JournalCore<F>>>,
}

fn open_mut<F: MappingService>(inner: &mut Option<JournalCore<F>>) -> Result<&mut JournalCore<F>> {
    inner
        .as_mut()
        .ok_or(Error::new(ErrorKind::BadState, "Journal is not open"))
}

/// debug 构建下每次修改之后检查不变量
fn debug_check<F: MappingService>(journal: &JournalCore<F>) {
    if cfg!(debug_assertions) {
        if let Err(e) = journal.check_invariants() {
            panic!("journal invariant violated: {}", e);
        }
    }
}

impl Default for PersistentJournal<MmapFile> {
    fn default() -> Self {
        Self::new(CommitMode::default())
    }
}

impl PersistentJournal<MmapFile> {
    /// 打开（或创建）磁盘上的日志文件
    ///
    /// # 错误
    ///
    /// - `BadState`: 已经打开
    /// - `FileNotExists` / `FileCreationFailed`: 文件打开失败
    /// - `InvalidFile` / `UnsupportedVersion`: 文件头校验失败
    /// - `InvalidConfig`: 需要创建文件而配置无效（此时不会创建文件）
    pub fn open(&self, path: impl AsRef<Path>, config: &JournalConfig) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Err(Error::new(ErrorKind::BadState, "Journal is already open"));
        }

        let writable = config.mode == Mode::ReadWrite;
        // 配置只用于创建新文件，创建之前校验
        if writable && config.create_if_missing && !path.as_ref().exists() {
            config.validate()?;
        }
        let file = MmapFile::open(path.as_ref(), writable, config.create_if_missing)?;
        *inner = Some(JournalCore::open(file, config)?);

        log::info!("[JOURNAL] opened {}", path.as_ref().display());
        Ok(())
    }
}

impl<F: MappingService> PersistentJournal<F> {
    /// 创建未打开的日志
    pub fn new(commit_mode: CommitMode) -> Self {
        Self {
            commit_mode,
            inner: RwLock::new(None),
        }
    }

    //=========================================================================
    // 生命周期
    //=========================================================================

    /// 在给定的映射服务上打开日志
    pub fn open_with(&self, file: F, config: &JournalConfig) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Err(Error::new(ErrorKind::BadState, "Journal is already open"));
        }
        *inner = Some(JournalCore::open(file, config)?);
        Ok(())
    }

    /// 关闭日志：检查不变量（debug 构建）、刷盘、解除映射、关闭文件
    ///
    /// 刷盘失败时日志依然被关闭。
    pub fn close(&self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&self, check: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let mut journal = inner
            .take()
            .ok_or(Error::new(ErrorKind::BadState, "Journal is not open"))?;

        if check {
            debug_check(&journal);
        }
        if journal.mode == Mode::ReadWrite {
            UnprotectGuard::new(&mut journal)?.flush_dirty()?;
        }

        log::debug!("[JOURNAL] closed ({} pages)", journal.pages.len());
        Ok(())
    }

    /// 是否已打开
    pub fn is_open(&self) -> bool {
        self.inner.read_recursive().is_some()
    }

    //=========================================================================
    // 记录操作
    //=========================================================================

    /// 添加一条未确认记录
    ///
    /// # 错误
    ///
    /// - `BadState`: 未打开或只读
    /// - `MaxRecordSizeForEmptyJournalViolation`: 即使日志为空也放不下
    /// - `MaxRecordSizeViolation`: 当前剩余空间放不下
    pub fn add_record(&self, payload: &[u8]) -> Result<RecordHandle> {
        self.add_record_vectored(&[payload])
    }

    /// 添加一条由多段数据拼接而成的未确认记录
    pub fn add_record_vectored(&self, parts: &[&[u8]]) -> Result<RecordHandle> {
        let mut inner = self.inner.write();
        let journal = open_mut(&mut inner)?;
        journal.check_writable()?;

        let length: u64 = parts.iter().map(|part| part.len() as u64).sum();
        journal.check_capacity(length)?;

        let (handle, highest) = journal.mutate(self.commit_mode, |j| j.add_record(parts, length))?;
        journal.highest_block_used = journal.highest_block_used.max(highest);

        debug_check(journal);
        Ok(handle)
    }

    /// 确认记录
    ///
    /// 确认后按保留上限淘汰最早确认的记录（可能就是这一条）。
    ///
    /// # 错误
    ///
    /// - `InvalidRecordHandle`: 句柄不是未确认记录
    pub fn confirm_record(&self, handle: RecordHandle) -> Result<()> {
        let mut inner = self.inner.write();
        let journal = open_mut(&mut inner)?;
        journal.mutate(self.commit_mode, |j| j.confirm_record(handle))?;
        debug_check(journal);
        Ok(())
    }

    /// 删除记录（已确认或未确认）
    ///
    /// # 错误
    ///
    /// - `InvalidRecordHandle`: 句柄不是活动记录
    pub fn remove_record(&self, handle: RecordHandle) -> Result<()> {
        let mut inner = self.inner.write();
        let journal = open_mut(&mut inner)?;
        journal.mutate(self.commit_mode, |j| j.remove_record(handle))?;
        debug_check(journal);
        Ok(())
    }

    /// 刷盘：文件头和所有脏页
    ///
    /// `Explicit` 模式下由调用者在需要持久化时调用。
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let journal = open_mut(&mut inner)?;
        if journal.mode == Mode::ReadOnly {
            return Ok(());
        }
        let mut unprotected = UnprotectGuard::new(journal)?;
        unprotected.flush_dirty()
    }

    /// 切换内存保护模式
    pub fn set_protection_mode(&self, mode: ProtectionMode) -> Result<()> {
        let mut inner = self.inner.write();
        open_mut(&mut inner)?.set_protection_mode(mode)
    }

    /// 设置最大文件大小
    ///
    /// # 错误
    ///
    /// - `InvalidMaxFileSize`: 放不下文件头和当前所有页，或连一页都放不下
    pub fn set_max_file_size(&self, max_file_size: u64) -> Result<()> {
        let mut inner = self.inner.write();
        open_mut(&mut inner)?.set_max_file_size(max_file_size)
    }

    /// 写入用户数据区 `[offset, offset + bytes.len())`
    pub fn set_user_data(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let journal = open_mut(&mut inner)?;
        journal.check_writable()?;

        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= journal.user_data_length)
            .ok_or(Error::new(ErrorKind::BadState, "User data write out of range"))?;

        let mut unprotected = UnprotectGuard::new(journal)?;
        unprotected.user_data_mut()?[offset..end].copy_from_slice(bytes);
        if self.commit_mode == CommitMode::Implicit {
            unprotected.flush_dirty()?;
        }
        Ok(())
    }

    //=========================================================================
    // 迭代
    //=========================================================================

    fn iter_from(&self, kind: ListKind, from_head: bool) -> JournalIterator<'_, F> {
        let guard = self.inner.read_recursive();
        let start = (*guard).as_ref().map_or(BlockIndex::NIL, |journal| {
            let list = journal.state.list(kind);
            if from_head {
                list.head
            } else {
                list.tail
            }
        });
        JournalIterator::new(guard, start)
    }

    /// 最早确认的记录
    pub fn first_confirmed_record(&self) -> JournalIterator<'_, F> {
        self.iter_from(ListKind::Confirmed, true)
    }

    /// 最近确认的记录
    pub fn last_confirmed_record(&self) -> JournalIterator<'_, F> {
        self.iter_from(ListKind::Confirmed, false)
    }

    /// 最早添加的未确认记录
    pub fn first_unconfirmed_record(&self) -> JournalIterator<'_, F> {
        self.iter_from(ListKind::Unconfirmed, true)
    }

    /// 最近添加的未确认记录
    pub fn last_unconfirmed_record(&self) -> JournalIterator<'_, F> {
        self.iter_from(ListKind::Unconfirmed, false)
    }

    /// 指向 `handle` 的迭代器（句柄不是活动记录时无效）
    pub fn record_iter(&self, handle: RecordHandle) -> JournalIterator<'_, F> {
        JournalIterator::new(self.inner.read_recursive(), handle)
    }

    //=========================================================================
    // 访问器
    //=========================================================================

    fn read<T>(&self, default: T, f: impl FnOnce(&JournalCore<F>) -> T) -> T {
        (*self.inner.read_recursive()).as_ref().map_or(default, f)
    }

    /// 已确认记录数
    pub fn num_confirmed_records(&self) -> usize {
        self.read(0, |j| j.state.list(ListKind::Confirmed).num_records as usize)
    }

    /// 未确认记录数
    pub fn num_unconfirmed_records(&self) -> usize {
        self.read(0, |j| j.state.list(ListKind::Unconfirmed).num_records as usize)
    }

    /// 已确认记录占用的块数
    pub fn num_confirmed_blocks(&self) -> usize {
        self.read(0, |j| j.state.list(ListKind::Confirmed).num_blocks as usize)
    }

    /// 未确认记录占用的块数
    pub fn num_unconfirmed_blocks(&self) -> usize {
        self.read(0, |j| j.state.list(ListKind::Unconfirmed).num_blocks as usize)
    }

    /// 已确认记录的总字节数
    pub fn num_confirmed_bytes(&self) -> u64 {
        self.read(0, |j| j.state.list(ListKind::Confirmed).num_bytes as u64)
    }

    /// 未确认记录的总字节数
    pub fn num_unconfirmed_bytes(&self) -> u64 {
        self.read(0, |j| j.state.list(ListKind::Unconfirmed).num_bytes as u64)
    }

    /// 空闲块数
    pub fn num_free_blocks(&self) -> usize {
        self.read(0, |j| j.state.free.num_blocks as usize)
    }

    /// 按分配顺序列出空闲块
    pub fn free_blocks(&self) -> Result<Vec<BlockIndex>> {
        let inner = self.inner.read_recursive();
        (*inner).as_ref()
            .ok_or(Error::new(ErrorKind::BadState, "Journal is not open"))?
            .free_block_list()
    }

    /// 本会话分配过的最大块号（打开时按现存记录计算）
    pub fn highest_block_used(&self) -> BlockIndex {
        self.read(BlockIndex::NIL, |j| j.highest_block_used)
    }

    /// 页数
    pub fn num_pages(&self) -> usize {
        self.read(0, |j| j.pages.len())
    }

    /// 块大小
    pub fn block_size(&self) -> u32 {
        self.read(0, |j| j.layout.block_size())
    }

    /// 每页块数
    pub fn blocks_per_page(&self) -> u32 {
        self.read(0, |j| j.layout.blocks_per_page())
    }

    /// 对齐大小
    pub fn alignment_size(&self) -> u32 {
        self.read(0, |j| j.layout.alignment_size())
    }

    /// 打开模式（未打开时为 `None`）
    pub fn mode(&self) -> Option<Mode> {
        self.read(None, |j| Some(j.mode))
    }

    /// 提交模式
    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// 内存保护模式
    pub fn protection_mode(&self) -> ProtectionMode {
        self.read(ProtectionMode::Unprotected, |j| j.protection)
    }

    /// 日志文件创建时间
    pub fn journal_creation_datetime(&self) -> Option<NaiveDateTime> {
        self.read(None, |j| j.creation.to_naive())
    }

    /// 文件版本
    pub fn file_version(&self) -> i32 {
        self.read(0, |j| j.file_version)
    }

    /// 已确认记录数上限
    pub fn max_confirmed_records_kept(&self) -> Option<u32> {
        self.read(None, |j| j.max_confirmed_records)
    }

    /// 已确认字节数上限
    pub fn max_confirmed_bytes_kept(&self) -> Option<u32> {
        self.read(None, |j| j.max_confirmed_bytes)
    }

    /// 当前能添加的最大记录（字节，未设置最大文件大小时为 `None`）
    pub fn max_record_size(&self) -> Option<u64> {
        self.read(None, |j| j.max_record_size())
    }

    /// 空日志能容纳的最大记录（字节，未设置最大文件大小时为 `None`）
    pub fn max_record_size_for_empty_journal(&self) -> Option<u64> {
        self.read(None, |j| j.max_record_size_for_empty_journal())
    }

    /// 用户数据区长度
    pub fn user_data_length(&self) -> usize {
        self.read(0, |j| j.user_data_length)
    }

    /// 用户数据区的副本
    pub fn user_data(&self) -> Vec<u8> {
        self.read(Vec::new(), |j| j.user_data().to_vec())
    }

    //=========================================================================
    // 诊断
    //=========================================================================

    /// 检查全部不变量
    pub fn assert_invariants(&self) -> Result<()> {
        let inner = self.inner.read_recursive();
        (*inner).as_ref()
            .ok_or(Error::new(ErrorKind::BadState, "Journal is not open"))?
            .check_invariants()
    }

    /// 输出文件头
    pub fn print_header(&self, out: &mut dyn io::Write) -> Result<()> {
        let inner = self.inner.read_recursive();
        (*inner).as_ref()
            .ok_or(Error::new(ErrorKind::BadState, "Journal is not open"))?
            .print_header(out)
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to print journal header", e))
    }
}

impl<F: MappingService> Drop for PersistentJournal<F> {
    fn drop(&mut self) {
        if self.inner.get_mut().is_some() {
            // 正在展开时再次 panic 会直接终止进程
            if let Err(e) = self.shutdown(!std::thread::panicking()) {
                log::error!("[JOURNAL] close on drop failed: {}", e);
            }
        }
    }
}
