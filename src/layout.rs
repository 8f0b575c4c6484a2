//! 磁盘布局计算
//!
//! 纯算术，无 I/O。分配器和链表管理都通过这里计算的偏移定位字节。
//!
//! ```text
//! [0 .. headerSize)                 文件头（两份状态头 + 用户数据）
//! [headerSize .. +chunkSize)        第 0 页：记录头表 + 数据块
//! [+chunkSize .. +2*chunkSize)      第 1 页
//! ...                               （只追加，从不收缩）
//! ```

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    types::BlockIndex,
};

/// 向上对齐到 `alignment` 的整数倍（`alignment` 必须是 2 的幂）
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// 日志文件几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    block_size: u32,
    blocks_per_page: u32,
    alignment_size: u32,
    header_size: u64,
    table_size: u64,
    chunk_size: u64,
}

impl Layout {
    /// 计算几何参数
    ///
    /// # 参数
    ///
    /// * `block_size` - 块大小（字节）
    /// * `blocks_per_page` - 每页块数
    /// * `alignment_size` - 对齐大小（2 的幂）
    /// * `user_data_length` - 用户数据长度
    pub fn new(
        block_size: u32,
        blocks_per_page: u32,
        alignment_size: u32,
        user_data_length: u32,
    ) -> Result<Self> {
        if block_size == 0 || blocks_per_page == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "Block size and blocks per page must be positive"));
        }
        if alignment_size == 0 || !alignment_size.is_power_of_two() {
            return Err(Error::new(ErrorKind::InvalidConfig, "Alignment size must be a power of two"));
        }

        let align = alignment_size as u64;
        let header_size = align_up(FIXED_HEADER_SIZE as u64 + user_data_length as u64, align);
        let table_size = blocks_per_page as u64 * RECORD_HEADER_SIZE as u64;
        let chunk_size = align_up(table_size + blocks_per_page as u64 * block_size as u64, align);

        // 块号是 i32
        let max_blocks = blocks_per_page as u64 * (i32::MAX as u64 / blocks_per_page as u64);
        if max_blocks == 0 || header_size > i32::MAX as u64 {
            return Err(Error::new(ErrorKind::InvalidConfig, "Journal geometry out of range"));
        }

        Ok(Self {
            block_size,
            blocks_per_page,
            alignment_size,
            header_size,
            table_size,
            chunk_size,
        })
    }

    /// 块大小
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 每页块数
    pub const fn blocks_per_page(&self) -> u32 {
        self.blocks_per_page
    }

    /// 对齐大小
    pub const fn alignment_size(&self) -> u32 {
        self.alignment_size
    }

    /// 文件头大小（已对齐）
    pub const fn header_size(&self) -> u64 {
        self.header_size
    }

    /// 页内记录头表大小
    pub const fn table_size(&self) -> u64 {
        self.table_size
    }

    /// 页大小（已对齐）
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 第 `page` 页的文件偏移
    pub const fn page_offset(&self, page: usize) -> u64 {
        self.header_size + page as u64 * self.chunk_size
    }

    /// 块数据的文件偏移
    pub const fn block_offset(&self, block: BlockIndex) -> u64 {
        self.page_offset(block.page(self.blocks_per_page)) + self.block_offset_in_page(block) as u64
    }

    /// 块数据在所属页映射中的偏移
    pub const fn block_offset_in_page(&self, block: BlockIndex) -> usize {
        self.table_size as usize + block.slot(self.blocks_per_page) * self.block_size as usize
    }

    /// 记录头在所属页映射中的偏移
    pub const fn record_offset_in_page(&self, block: BlockIndex) -> usize {
        block.slot(self.blocks_per_page) * RECORD_HEADER_SIZE
    }

    /// 包含 `num_pages` 页时的文件长度
    pub const fn file_size_for(&self, num_pages: usize) -> u64 {
        self.page_offset(num_pages)
    }

    /// 存放 `length` 字节需要的块数（至少一块）
    pub const fn blocks_for(&self, length: u64) -> u64 {
        let blocks = length.div_ceil(self.block_size as u64);
        if blocks == 0 {
            1
        } else {
            blocks
        }
    }

    /// `max_file_size` 内能容纳的页数
    pub const fn max_pages_for(&self, max_file_size: u64) -> u64 {
        if max_file_size < self.header_size {
            0
        } else {
            (max_file_size - self.header_size) / self.chunk_size
        }
    }
}
