//! 块分配器
//!
//! 空闲块以 `next_block` 串成单向链表，只在链表头分配和归还：
//! - 分配：从头部摘下 n 块，链尾的 `next_block` 置空
//! - 归还：整条块链挂回头部
//! - 扩容：新页的全部槽位按顺序串起来挂到头部
//!
//! 所有修改都写入当前影子副本，并经过 `store_record` 登记脏记录。

use super::inner::JournalCore;
use crate::{
    consts::RECORD_HEADER_SIZE,
    error::{Error, ErrorKind, Result},
    mapping::{MappedRegion, MappingService, Protection},
    types::{BlockIndex, RecordHeader},
};

impl<F: MappingService> JournalCore<F> {
    /// 追加一页
    ///
    /// 必要时延长文件，映射新页，初始化页内全部记录头（两份链接相同），
    /// 并把新页的块挂到空闲链表头部。
    pub(super) fn grow(&mut self) -> Result<()> {
        let page = self.pages.len();
        let bpp = self.layout.blocks_per_page();

        if (page as u64 + 1) * bpp as u64 > i32::MAX as u64 {
            return Err(Error::new(ErrorKind::Mem, "Journal block index space exhausted"));
        }
        if let Some(max) = self.max_file_size {
            if page as u64 >= self.layout.max_pages_for(max) {
                return Err(Error::new(ErrorKind::MaxRecordSizeViolation, "Journal reached its max file size"));
            }
        }

        let needed = self.layout.file_size_for(page + 1);
        if self.file.len()? < needed {
            self.file.set_len(needed)?;
        }

        let mut region = self.file.map(
            self.layout.page_offset(page),
            self.layout.chunk_size() as usize,
            Protection::READ_WRITE,
        )?;

        let first = BlockIndex::from_page_slot(page, 0, bpp);
        {
            let buf = region.bytes_mut()?;
            for slot in 0..bpp as usize {
                let id = BlockIndex::from_page_slot(page, slot, bpp);
                let next = if slot + 1 == bpp as usize {
                    self.state.free.head
                } else {
                    BlockIndex::from_page_slot(page, slot + 1, bpp)
                };
                let off = slot * RECORD_HEADER_SIZE;
                RecordHeader::initial(id, next).encode(&mut buf[off..off + RECORD_HEADER_SIZE]);
            }
        }

        self.pages.push(region);
        self.dirty_pages.insert(page);
        self.state.free.head = first;
        self.state.free.num_blocks += bpp as i32;
        self.state.num_pages += 1;

        log::debug!(
            "[ALLOC] grew journal to {} pages ({} free blocks)",
            self.state.num_pages,
            self.state.free.num_blocks
        );
        Ok(())
    }

    /// 保证空闲链表至少有 `num_blocks` 块
    pub(super) fn reserve_blocks(&mut self, num_blocks: u64) -> Result<()> {
        while (self.state.free.num_blocks as u64) < num_blocks {
            self.grow()?;
        }
        Ok(())
    }

    /// 分配 `num_blocks` 块
    ///
    /// # 返回
    ///
    /// `(首块, 块链中最大的块号)`
    pub(super) fn allocate_blocks(&mut self, num_blocks: u64) -> Result<(BlockIndex, BlockIndex)> {
        debug_assert!(num_blocks > 0);
        self.reserve_blocks(num_blocks)?;

        let head = self.state.free.head;
        let mut tail = head;
        let mut highest = head;
        for _ in 1..num_blocks {
            tail = self.link(tail)?.next_block;
            if tail.is_nil() {
                return Err(Error::new(ErrorKind::Internal, "Free list shorter than its block count"));
            }
            highest = highest.max(tail);
        }

        let mut rest = BlockIndex::NIL;
        self.update_link(tail, |link| {
            rest = link.next_block;
            link.next_block = BlockIndex::NIL;
        })?;

        self.state.free.head = rest;
        self.state.free.num_blocks -= num_blocks as i32;

        log::trace!("[ALLOC] allocated {} blocks at {}", num_blocks, head);
        Ok((head, highest))
    }

    /// 把块链 `head..=tail`（共 `num_blocks` 块）挂回空闲链表头部
    pub(super) fn free_blocks(&mut self, head: BlockIndex, tail: BlockIndex, num_blocks: u64) -> Result<()> {
        let free_head = self.state.free.head;
        self.update_link(tail, |link| link.next_block = free_head)?;

        self.state.free.head = head;
        self.state.free.num_blocks += num_blocks as i32;

        log::trace!("[ALLOC] freed {} blocks at {}", num_blocks, head);
        Ok(())
    }

    /// 块链的最后一块
    pub(super) fn chain_tail(&self, head: BlockIndex, num_blocks: u64) -> Result<BlockIndex> {
        let mut block = head;
        for _ in 1..num_blocks {
            block = self.link(block)?.next_block;
            if block.is_nil() {
                return Err(Error::new(ErrorKind::Internal, "Record chain shorter than its length"));
            }
        }
        Ok(block)
    }

    /// 按分配顺序列出空闲块
    pub(super) fn free_block_list(&self) -> Result<Vec<BlockIndex>> {
        let mut blocks = Vec::with_capacity(self.state.free.num_blocks.max(0) as usize);
        let mut block = self.state.free.head;
        while !block.is_nil() {
            if blocks.len() as i64 >= self.total_blocks() {
                return Err(Error::new(ErrorKind::Internal, "Cycle in free list"));
            }
            blocks.push(block);
            block = self.link(block)?.next_block;
        }
        Ok(blocks)
    }

    /// 把分段数据依次写入以 `head` 开始的块链
    pub(super) fn write_payload(&mut self, head: BlockIndex, parts: &[&[u8]]) -> Result<()> {
        let block_size = self.layout.block_size() as usize;
        let mut block = head;
        let mut used = 0;

        for part in parts {
            let mut rest = *part;
            while !rest.is_empty() {
                if used == block_size {
                    block = self.link(block)?.next_block;
                    if block.is_nil() {
                        return Err(Error::new(ErrorKind::Internal, "Record chain shorter than its length"));
                    }
                    used = 0;
                }
                let n = (block_size - used).min(rest.len());
                self.block_data_mut(block)?[used..used + n].copy_from_slice(&rest[..n]);
                used += n;
                rest = &rest[n..];
            }
        }
        Ok(())
    }

    /// 记录数据所在的各段，依次为 `(块号, 段长)`
    pub(super) fn payload_segments(&self, head: BlockIndex, length: u64) -> Result<Vec<(BlockIndex, usize)>> {
        let block_size = self.layout.block_size() as u64;
        let mut segments = Vec::with_capacity(self.layout.blocks_for(length) as usize);
        let mut block = head;
        let mut remaining = length;

        while remaining > 0 {
            let n = remaining.min(block_size);
            segments.push((block, n as usize));
            remaining -= n;
            if remaining > 0 {
                block = self.link(block)?.next_block;
                if block.is_nil() {
                    return Err(Error::new(ErrorKind::Internal, "Record chain shorter than its length"));
                }
            }
        }
        Ok(segments)
    }
}
