//! 一致性检查
//!
//! 遍历全部链表和记录头，验证：
//! - 块守恒：空闲块 + 两条链表的块数 = 总块数
//! - 链表结构：双向链接一致，计数器与实际内容一致，类型标记正确
//! - 记录 ID 恒等于块号
//! - `Stable` 状态下两份状态头、每个记录头的两份链接完全相同

use super::inner::JournalCore;
use crate::{
    error::{Error, ErrorKind, Result},
    mapping::MappingService,
    types::{BlockIndex, CommitState, ListKind, RecordType},
};

fn violation(message: &'static str) -> Error {
    Error::new(ErrorKind::Internal, message)
}

impl<F: MappingService> JournalCore<F> {
    /// 检查全部不变量
    pub(super) fn check_invariants(&self) -> Result<()> {
        let total = self.total_blocks();
        if self.state.num_pages as i64 != self.pages.len() as i64 {
            return Err(violation("Page count does not match mapped pages"));
        }

        let mut used = 0i64;
        for kind in [ListKind::Confirmed, ListKind::Unconfirmed] {
            used += self.check_list(kind)?;
        }

        let free = self.free_block_list()?;
        if free.len() as i64 != self.state.free.num_blocks as i64 {
            return Err(violation("Free block count does not match free list"));
        }
        for &block in &free {
            let hdr = self.load_record(block)?;
            if hdr.linkage[self.work_index].record_type != RecordType::None {
                return Err(violation("Free block carries a record type"));
            }
        }

        if used + free.len() as i64 != total {
            return Err(violation("Blocks leaked or double counted"));
        }

        for raw in 0..total {
            let block = BlockIndex::new(raw as i32);
            if self.load_record(block)?.record_id != block {
                return Err(violation("Record id does not match its block"));
            }
        }

        if self.commit_state()? == CommitState::Stable {
            self.check_shadows_equal()?;
        }
        Ok(())
    }

    /// 检查一条链表，返回其记录占用的块数
    fn check_list(&self, kind: ListKind) -> Result<i64> {
        let w = self.work_index;
        let list = *self.state.list(kind);
        let total = self.total_blocks();

        let mut records = 0i64;
        let mut blocks = 0i64;
        let mut bytes = 0i64;
        let mut prev = BlockIndex::NIL;
        let mut rec = list.head;

        while !rec.is_nil() {
            records += 1;
            if records > total {
                return Err(violation("Cycle in record list"));
            }

            let hdr = self.load_record(rec)?;
            let link = hdr.linkage[w];
            if link.record_type != kind.record_type() {
                return Err(violation("Record type does not match its list"));
            }
            if link.prev_record != prev {
                return Err(violation("Broken backward link in record list"));
            }

            let length = hdr.record_length;
            if length < 0 {
                return Err(violation("Negative record length"));
            }
            let num_blocks = self.layout.blocks_for(length as u64);
            let tail = self.chain_tail(rec, num_blocks)?;
            if !self.link(tail)?.next_block.is_nil() {
                return Err(violation("Record chain longer than its length"));
            }

            blocks += num_blocks as i64;
            bytes += length as i64;
            prev = rec;
            rec = link.next_record;
        }

        if list.tail != prev {
            return Err(violation("Record list tail mismatch"));
        }
        if list.num_records as i64 != records || list.num_blocks as i64 != blocks || list.num_bytes != bytes {
            return Err(violation("Record list counters do not match contents"));
        }
        Ok(blocks)
    }

    /// `Stable` 状态下两份影子必须完全相同
    fn check_shadows_equal(&self) -> Result<()> {
        if self.read_state(0) != self.read_state(1) {
            return Err(violation("State header copies differ while stable"));
        }
        if self.read_state(self.work_index) != self.state {
            return Err(violation("Cached state differs from header"));
        }
        for raw in 0..self.total_blocks() {
            let hdr = self.load_record(BlockIndex::new(raw as i32))?;
            if hdr.linkage[0] != hdr.linkage[1] {
                return Err(violation("Record linkage copies differ while stable"));
            }
        }
        Ok(())
    }
}
