//! 记录操作
//!
//! 添加、确认、删除和按保留上限淘汰。每个公开操作都通过 [`JournalCore::mutate`]
//! 在一个事务中完成。

use super::{
    config::CommitMode,
    inner::JournalCore,
    protect::UnprotectGuard,
    transaction::TransactionGuard,
};
use crate::{
    datetime::PackedDateTime,
    error::{Error, ErrorKind, Result},
    mapping::MappingService,
    types::{BlockIndex, ListKind, RecordHandle, RecordType},
};

impl<F: MappingService> JournalCore<F> {
    /// 在一个事务中执行修改
    ///
    /// 依次：解除保护、开始事务、执行 `op`、提交；`Implicit` 模式下再刷盘。
    /// `op` 返回错误时事务回滚。
    pub(super) fn mutate<T>(
        &mut self,
        commit_mode: CommitMode,
        op: impl FnOnce(&mut JournalCore<F>) -> Result<T>,
    ) -> Result<T> {
        self.check_writable()?;

        let mut unprotected = UnprotectGuard::new(self)?;
        let value = {
            let mut txn = TransactionGuard::begin(&mut *unprotected)?;
            let value = op(&mut *txn)?;
            txn.commit()?;
            value
        };
        if commit_mode == CommitMode::Implicit {
            unprotected.flush_dirty()?;
        }
        Ok(value)
    }

    /// 记录当前所在的链表
    ///
    /// 句柄越界时返回 `InvalidRecordHandle`；`None` 表示该块不是记录首块
    pub(super) fn record_kind(&self, handle: RecordHandle) -> Result<Option<ListKind>> {
        if !self.contains_block(handle) {
            return Err(Error::new(ErrorKind::InvalidRecordHandle, "Record handle out of range"));
        }
        let hdr = self.load_record(handle)?;
        if hdr.record_id != handle {
            return Err(Error::new(ErrorKind::Internal, "Record id does not match its block"));
        }
        Ok(hdr.linkage[self.work_index].record_type.list())
    }

    /// 添加记录（未确认）
    ///
    /// # 返回
    ///
    /// `(记录句柄, 块链中最大的块号)`
    pub(super) fn add_record(&mut self, parts: &[&[u8]], length: u64) -> Result<(RecordHandle, BlockIndex)> {
        let num_blocks = self.layout.blocks_for(length);
        let (head, highest) = self.allocate_blocks(num_blocks)?;
        self.write_payload(head, parts)?;

        let w = self.work_index;
        let mut hdr = self.load_record(head)?;
        hdr.record_length = length as i32;
        hdr.creation = PackedDateTime::now();
        hdr.confirmation = PackedDateTime::UNSET;
        hdr.linkage[w].record_type = RecordType::Unconfirmed;
        self.store_record(head, &hdr)?;

        self.push_back(ListKind::Unconfirmed, head)?;

        log::trace!("[RECORD] added {} ({} bytes, {} blocks)", head, length, num_blocks);
        Ok((head, highest))
    }

    /// 确认记录：移到已确认链表尾部，然后按保留上限淘汰
    pub(super) fn confirm_record(&mut self, handle: RecordHandle) -> Result<()> {
        if self.record_kind(handle)? != Some(ListKind::Unconfirmed) {
            return Err(Error::new(ErrorKind::InvalidRecordHandle, "Record is not unconfirmed"));
        }

        self.unlink(ListKind::Unconfirmed, handle)?;

        let w = self.work_index;
        let mut hdr = self.load_record(handle)?;
        hdr.linkage[w].record_type = RecordType::Confirmed;
        hdr.confirmation = PackedDateTime::now();
        self.store_record(handle, &hdr)?;

        self.push_back(ListKind::Confirmed, handle)?;
        log::trace!("[RECORD] confirmed {}", handle);

        self.evict_confirmed()
    }

    /// 删除记录（任一链表）
    pub(super) fn remove_record(&mut self, handle: RecordHandle) -> Result<()> {
        let kind = self
            .record_kind(handle)?
            .ok_or(Error::new(ErrorKind::InvalidRecordHandle, "Handle does not name a live record"))?;
        self.release_record(kind, handle)?;
        log::trace!("[RECORD] removed {}", handle);
        Ok(())
    }

    /// 从链表摘下记录并归还其全部块
    fn release_record(&mut self, kind: ListKind, handle: RecordHandle) -> Result<()> {
        self.unlink(kind, handle)?;

        let w = self.work_index;
        let mut hdr = self.load_record(handle)?;
        let num_blocks = self.layout.blocks_for(hdr.record_length.max(0) as u64);
        hdr.linkage[w].record_type = RecordType::None;
        self.store_record(handle, &hdr)?;

        let tail = self.chain_tail(handle, num_blocks)?;
        self.free_blocks(handle, tail, num_blocks)
    }

    /// 超过保留上限时，从已确认链表头部（最早确认的记录）开始淘汰
    fn evict_confirmed(&mut self) -> Result<()> {
        loop {
            let list = *self.state.list(ListKind::Confirmed);
            let over_records = self
                .max_confirmed_records
                .is_some_and(|max| list.num_records as i64 > max as i64);
            let over_bytes = self
                .max_confirmed_bytes
                .is_some_and(|max| list.num_bytes > max as i64);
            if !over_records && !over_bytes {
                return Ok(());
            }
            if list.head.is_nil() {
                return Err(Error::new(ErrorKind::Internal, "Confirmed counters exceed an empty list"));
            }

            log::debug!("[RECORD] evicting confirmed record {}", list.head);
            self.release_record(ListKind::Confirmed, list.head)?;
        }
    }
}
