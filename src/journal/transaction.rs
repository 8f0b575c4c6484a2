//! 双影子事务
//!
//! 文件头中有两份状态头（副本 0、副本 1），每个记录头有两份链接，
//! 由文件头的 `commitState` 决定哪一份可信：
//!
//! | commitState      | 可信副本 | 含义                                   |
//! |------------------|----------|----------------------------------------|
//! | `Stable`         | 两份相同 | 没有进行中的修改                       |
//! | `MidTransaction` | 副本 0   | 修改正写入副本 1，副本 0 是事务前状态 |
//! | `MidSync`        | 副本 1   | 副本 1 已完整，正在复制到副本 0        |
//!
//! ## 工作原理
//!
//! 1. **开始**: 写入 `MidTransaction`
//! 2. **修改**: 只改工作副本（内存中的状态头 + 记录头的 `linkage[work]`），
//!    每个被改的记录头登记为脏记录
//! 3. **提交**: 写回工作状态头，写入 `MidSync`，把脏记录的工作链接和状态头
//!    复制到另一份，写入 `Stable`
//! 4. **回滚**: 反方向复制，工作副本恢复为事务前状态
//!
//! 任何时刻崩溃，重新以读写方式打开时都能从可信副本完成恢复。

use super::inner::JournalCore;
use crate::{
    error::{Error, ErrorKind, Result},
    mapping::MappingService,
    types::{BlockIndex, CommitState},
};
use core::ops::{Deref, DerefMut};

impl<F: MappingService> JournalCore<F> {
    /// 开始事务
    pub(super) fn begin_transaction(&mut self) -> Result<()> {
        if self.commit_state()? != CommitState::Stable {
            return Err(Error::new(ErrorKind::BadState, "Transaction already in progress"));
        }
        debug_assert!(self.dirty_records.is_empty());

        self.set_commit_state(CommitState::MidTransaction)?;
        log::trace!("[TXN] begin (work copy {})", self.work_index);
        Ok(())
    }

    /// 提交的第一步：写回工作状态头并进入 `MidSync`
    ///
    /// 此后工作副本已完整，崩溃恢复会以它为准。
    pub(super) fn prepare_commit(&mut self) -> Result<()> {
        if self.commit_state()? != CommitState::MidTransaction {
            return Err(Error::new(ErrorKind::BadState, "No transaction in progress"));
        }

        let state = self.state;
        self.write_state(self.work_index, &state)?;
        self.set_commit_state(CommitState::MidSync)
    }

    /// 提交事务
    pub(super) fn commit_transaction(&mut self) -> Result<()> {
        self.prepare_commit()?;

        let work = self.work_index;
        let synced = self.dirty_records.len();
        self.dirty_sync(work, 1 - work)?;
        self.set_commit_state(CommitState::Stable)?;

        log::trace!("[TXN] committed ({} records synced)", synced);
        Ok(())
    }

    /// 回滚事务
    ///
    /// 把另一份副本复制回工作副本，丢弃本事务中扩容的页。
    pub(super) fn abort_transaction(&mut self) -> Result<()> {
        if self.commit_state()? != CommitState::MidTransaction {
            return Err(Error::new(ErrorKind::BadState, "No transaction in progress"));
        }

        let work = self.work_index;
        let dirty = self.dirty_records.len();
        self.dirty_sync(1 - work, work)?;
        self.state = self.read_state(work);

        let num_pages = self.state.num_pages.max(0) as usize;
        if self.pages.len() > num_pages {
            log::debug!("[TXN] discarding {} pages grown by aborted transaction", self.pages.len() - num_pages);
            self.pages.truncate(num_pages);
            self.dirty_pages.retain(|&page| page < num_pages);
        }

        self.set_commit_state(CommitState::Stable)?;
        log::debug!("[TXN] aborted ({} records restored)", dirty);
        Ok(())
    }

    /// 把所有脏记录的链接和状态头从副本 `from` 复制到副本 `to`，清空脏记录集
    pub(super) fn dirty_sync(&mut self, from: usize, to: usize) -> Result<()> {
        let dirty = core::mem::take(&mut self.dirty_records);
        for block in dirty {
            // 回滚时扩容出的页可能已不在映射范围内
            if !self.contains_block(block) {
                continue;
            }
            let mut hdr = self.load_record(block)?;
            hdr.linkage[to] = hdr.linkage[from];
            self.write_record_raw(block, &hdr)?;
        }

        let state = self.read_state(from);
        self.write_state(to, &state)
    }

    /// 打开时的崩溃恢复
    ///
    /// 以可信副本覆盖另一份：所有已映射页的链接和状态头。恢复完成前不修改
    /// `commitState`，恢复过程中再次崩溃也能重来。
    pub(super) fn recover(&mut self, state: CommitState) -> Result<()> {
        let (from, to) = match state {
            CommitState::Stable => return Ok(()),
            CommitState::MidTransaction => (0, 1),
            CommitState::MidSync => (1, 0),
        };
        log::warn!(
            "[RECOVERY] journal was closed during {:?}, restoring from copy {}",
            state,
            from
        );

        let mut repaired = 0usize;
        for raw in 0..self.total_blocks() {
            let block = BlockIndex::new(raw as i32);
            let mut hdr = self
                .load_record(block)
                .map_err(|_| Error::new(ErrorKind::InvalidFile, "Corrupted record header"))?;
            if hdr.linkage[to] != hdr.linkage[from] {
                hdr.linkage[to] = hdr.linkage[from];
                self.write_record_raw(block, &hdr)?;
                repaired += 1;
            }
        }

        let authoritative = self.read_state(from);
        self.write_state(to, &authoritative)?;
        self.set_commit_state(CommitState::Stable)?;
        self.work_index = 1;
        self.state = authoritative;
        self.flush_dirty()?;

        log::info!("[RECOVERY] recovery complete ({} record headers repaired)", repaired);
        Ok(())
    }
}

//=============================================================================
// 事务守卫
//=============================================================================

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    /// 事务活跃，可以进行修改
    Active,
    /// 事务已提交
    Committed,
}

/// 事务守卫
///
/// 创建时开始事务，`commit()` 提交；未提交就被 drop 时自动回滚。
/// 通过 `Deref` 访问日志。
///
/// # 示例
///
/// ```rust,ignore
/// let mut txn = TransactionGuard::begin(&mut journal)?;
/// txn.allocate_blocks(2)?;
/// txn.commit()?;
/// ```
pub(super) struct TransactionGuard<'a, F: MappingService> {
    journal: &'a mut JournalCore<F>,
    state: TransactionState,
}

impl<'a, F: MappingService> TransactionGuard<'a, F> {
    /// 开始新事务
    pub(super) fn begin(journal: &'a mut JournalCore<F>) -> Result<Self> {
        journal.begin_transaction()?;
        Ok(Self {
            journal,
            state: TransactionState::Active,
        })
    }

    /// 提交事务
    ///
    /// 进入 `MidSync` 之后失败时不回滚：提交状态保持在 `MidSync`，
    /// 下次以读写方式打开时完成恢复。
    pub(super) fn commit(mut self) -> Result<()> {
        let result = self.journal.commit_transaction();
        // 仍处于 MidTransaction 时交给 Drop 回滚
        if result.is_ok() || !matches!(self.journal.commit_state(), Ok(CommitState::MidTransaction)) {
            self.state = TransactionState::Committed;
        }
        result
    }
}

impl<F: MappingService> Deref for TransactionGuard<'_, F> {
    type Target = JournalCore<F>;

    fn deref(&self) -> &Self::Target {
        self.journal
    }
}

impl<F: MappingService> DerefMut for TransactionGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.journal
    }
}

impl<F: MappingService> Drop for TransactionGuard<'_, F> {
    /// 自动回滚未提交的事务
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.journal.abort_transaction() {
                log::error!("[TXN] rollback failed: {}", e);
            }
        }
    }
}
