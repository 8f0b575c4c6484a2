//! 记录链表
//!
//! 已确认和未确认两条双向链表，以记录首块的块号串联。
//! 计数器（记录数、块数、字节数）与链表结构同步维护。

use super::inner::JournalCore;
use crate::{
    error::{Error, ErrorKind, Result},
    mapping::MappingService,
    types::{BlockIndex, ListKind},
};

impl<F: MappingService> JournalCore<F> {
    /// 把记录追加到链表尾部
    ///
    /// 记录长度必须已经写入记录头。
    pub(super) fn push_back(&mut self, kind: ListKind, rec: BlockIndex) -> Result<()> {
        let w = self.work_index;
        let tail = self.state.list(kind).tail;

        let mut hdr = self.load_record(rec)?;
        hdr.linkage[w].prev_record = tail;
        hdr.linkage[w].next_record = BlockIndex::NIL;
        self.store_record(rec, &hdr)?;

        if tail.is_nil() {
            self.state.list_mut(kind).head = rec;
        } else {
            self.update_link(tail, |link| link.next_record = rec)?;
        }

        let length = hdr.record_length.max(0) as u64;
        let blocks = self.layout.blocks_for(length) as i32;
        let list = self.state.list_mut(kind);
        list.tail = rec;
        list.num_records += 1;
        list.num_blocks += blocks;
        list.num_bytes += length as i64;
        Ok(())
    }

    /// 把记录从链表中摘下
    pub(super) fn unlink(&mut self, kind: ListKind, rec: BlockIndex) -> Result<()> {
        let w = self.work_index;
        let mut hdr = self.load_record(rec)?;
        let link = hdr.linkage[w];

        if link.prev_record.is_nil() {
            if self.state.list(kind).head != rec {
                return Err(Error::new(ErrorKind::Internal, "Record list head mismatch"));
            }
            self.state.list_mut(kind).head = link.next_record;
        } else {
            self.update_link(link.prev_record, |prev| prev.next_record = link.next_record)?;
        }

        if link.next_record.is_nil() {
            if self.state.list(kind).tail != rec {
                return Err(Error::new(ErrorKind::Internal, "Record list tail mismatch"));
            }
            self.state.list_mut(kind).tail = link.prev_record;
        } else {
            self.update_link(link.next_record, |next| next.prev_record = link.prev_record)?;
        }

        hdr.linkage[w].next_record = BlockIndex::NIL;
        hdr.linkage[w].prev_record = BlockIndex::NIL;
        self.store_record(rec, &hdr)?;

        let length = hdr.record_length.max(0) as u64;
        let blocks = self.layout.blocks_for(length) as i32;
        let list = self.state.list_mut(kind);
        list.num_records -= 1;
        list.num_blocks -= blocks;
        list.num_bytes -= length as i64;
        Ok(())
    }

    /// 链表中的相邻记录
    ///
    /// `forward` 为 `true` 时取下一条，否则取上一条
    pub(super) fn neighbor(&self, rec: BlockIndex, forward: bool) -> Result<BlockIndex> {
        let link = self.link(rec)?;
        Ok(if forward { link.next_record } else { link.prev_record })
    }
}
