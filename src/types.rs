//! 日志磁盘格式数据结构
//!
//! 这个模块包含了直接对应磁盘格式的数据结构。
//!
//! ## 设计原则
//!
//! 1. **块号即身份** - 所有链表都以块号（[`BlockIndex`]）串联，而不是指针；
//!    块号会被持久化，进程重启后依然有效
//! 2. **显式编解码** - 每个结构提供 `decode` / `encode`，使用本机字节序
//!    读写映射内存，不依赖 `#[repr(C)]` 内存布局
//! 3. **双影子链接** - 每个记录头有两份 [`BlockLinkage`]，与文件头中的两份
//!    [`JournalStateHeader`] 一一对应

use crate::{
    consts::*,
    datetime::PackedDateTime,
    error::{Error, ErrorKind, Result},
};
use byteorder::{ByteOrder, NativeEndian};
use core::fmt;

#[inline]
pub(crate) fn get_i32(buf: &[u8], off: usize) -> i32 {
    NativeEndian::read_i32(&buf[off..off + 4])
}

#[inline]
pub(crate) fn put_i32(buf: &mut [u8], off: usize, val: i32) {
    NativeEndian::write_i32(&mut buf[off..off + 4], val)
}

#[inline]
pub(crate) fn get_i64(buf: &[u8], off: usize) -> i64 {
    NativeEndian::read_i64(&buf[off..off + 8])
}

#[inline]
pub(crate) fn put_i64(buf: &mut [u8], off: usize, val: i64) {
    NativeEndian::write_i64(&mut buf[off..off + 8], val)
}

//=============================================================================
// 块号
//=============================================================================

/// 块号
///
/// 记录的身份就是其首块的块号，所以同一个类型也用作记录句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockIndex(i32);

/// 记录句柄：记录首块的块号
pub type RecordHandle = BlockIndex;

impl BlockIndex {
    /// 链表结束标记
    pub const NIL: BlockIndex = BlockIndex(NIL_INDEX);

    /// 从原始整数创建
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// 获取原始整数
    pub const fn get(self) -> i32 {
        self.0
    }

    /// 是否为结束标记
    pub const fn is_nil(self) -> bool {
        self.0 < 0
    }

    /// 所在页号
    pub const fn page(self, blocks_per_page: u32) -> usize {
        (self.0 as u32 / blocks_per_page) as usize
    }

    /// 页内槽位号
    pub const fn slot(self, blocks_per_page: u32) -> usize {
        (self.0 as u32 % blocks_per_page) as usize
    }

    /// 由页号和槽位号组成块号
    pub const fn from_page_slot(page: usize, slot: usize, blocks_per_page: u32) -> Self {
        Self((page * blocks_per_page as usize + slot) as i32)
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for BlockIndex {
    fn from(index: i32) -> Self {
        Self(index)
    }
}

//=============================================================================
// 枚举
//=============================================================================

/// 记录类型（记录所在链表）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RecordType {
    /// 空闲块，或多块记录的非首块
    None = 0,
    /// 未确认记录
    Unconfirmed = 1,
    /// 已确认记录
    Confirmed = 2,
}

impl RecordType {
    /// 从磁盘值解析
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(RecordType::None),
            1 => Ok(RecordType::Unconfirmed),
            2 => Ok(RecordType::Confirmed),
            _ => Err(Error::new(ErrorKind::Internal, "Invalid record type in linkage")),
        }
    }

    /// 对应的记录链表
    pub fn list(self) -> Option<ListKind> {
        match self {
            RecordType::None => None,
            RecordType::Unconfirmed => Some(ListKind::Unconfirmed),
            RecordType::Confirmed => Some(ListKind::Confirmed),
        }
    }
}

/// 记录链表种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// 已确认链表
    Confirmed = 0,
    /// 未确认链表
    Unconfirmed = 1,
}

impl ListKind {
    /// 链表中记录的类型标记
    pub fn record_type(self) -> RecordType {
        match self {
            ListKind::Confirmed => RecordType::Confirmed,
            ListKind::Unconfirmed => RecordType::Unconfirmed,
        }
    }
}

/// 提交状态（双缓冲状态机）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CommitState {
    /// 两份状态相同
    Stable = 0,
    /// 副本 0 为事务前状态，修改正写入工作副本
    MidTransaction = 1,
    /// 工作副本已完整，正在复制到另一份
    MidSync = 2,
}

impl CommitState {
    /// 从磁盘值解析
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(CommitState::Stable),
            1 => Some(CommitState::MidTransaction),
            2 => Some(CommitState::MidSync),
            _ => None,
        }
    }
}

//=============================================================================
// 记录头
//=============================================================================

/// 块链接（每个记录头两份，对应两个影子状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLinkage {
    /// 记录类型
    pub record_type: RecordType,
    /// 本记录块链中的下一块（空闲块时为空闲链表中的下一块）
    pub next_block: BlockIndex,
    /// 记录链表中的下一条记录
    pub next_record: BlockIndex,
    /// 记录链表中的上一条记录
    pub prev_record: BlockIndex,
}

impl BlockLinkage {
    /// 未链接的空闲块
    pub const fn free(next_block: BlockIndex) -> Self {
        Self {
            record_type: RecordType::None,
            next_block,
            next_record: BlockIndex::NIL,
            prev_record: BlockIndex::NIL,
        }
    }

    /// 解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            record_type: RecordType::from_raw(get_i32(buf, 0))?,
            next_block: BlockIndex(get_i32(buf, 4)),
            next_record: BlockIndex(get_i32(buf, 8)),
            prev_record: BlockIndex(get_i32(buf, 12)),
        })
    }

    /// 编码
    pub fn encode(&self, buf: &mut [u8]) {
        put_i32(buf, 0, self.record_type as i32);
        put_i32(buf, 4, self.next_block.0);
        put_i32(buf, 8, self.next_record.0);
        put_i32(buf, 12, self.prev_record.0);
    }
}

/// 记录头（页表中每个块槽位一个）
///
/// 只有链接是双份的；长度和时间戳只在首块上有意义。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// 两份影子链接
    pub linkage: [BlockLinkage; 2],
    /// 记录 ID（恒等于本块块号）
    pub record_id: BlockIndex,
    /// 记录长度（字节）
    pub record_length: i32,
    /// 创建时间
    pub creation: PackedDateTime,
    /// 确认时间
    pub confirmation: PackedDateTime,
}

impl RecordHeader {
    /// 新页中槽位的初始记录头
    pub fn initial(record_id: BlockIndex, next_block: BlockIndex) -> Self {
        let link = BlockLinkage::free(next_block);
        Self {
            linkage: [link, link],
            record_id,
            record_length: 0,
            creation: PackedDateTime::UNSET,
            confirmation: PackedDateTime::UNSET,
        }
    }

    /// 解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let base = 2 * BLOCK_LINKAGE_SIZE;
        Ok(Self {
            linkage: [
                BlockLinkage::decode(&buf[..BLOCK_LINKAGE_SIZE])?,
                BlockLinkage::decode(&buf[BLOCK_LINKAGE_SIZE..base])?,
            ],
            record_id: BlockIndex(get_i32(buf, base)),
            record_length: get_i32(buf, base + 4),
            creation: PackedDateTime {
                date: get_i32(buf, base + 8),
                time: get_i32(buf, base + 12),
            },
            confirmation: PackedDateTime {
                date: get_i32(buf, base + 16),
                time: get_i32(buf, base + 20),
            },
        })
    }

    /// 编码
    pub fn encode(&self, buf: &mut [u8]) {
        let base = 2 * BLOCK_LINKAGE_SIZE;
        self.linkage[0].encode(&mut buf[..BLOCK_LINKAGE_SIZE]);
        self.linkage[1].encode(&mut buf[BLOCK_LINKAGE_SIZE..base]);
        put_i32(buf, base, self.record_id.0);
        put_i32(buf, base + 4, self.record_length);
        put_i32(buf, base + 8, self.creation.date);
        put_i32(buf, base + 12, self.creation.time);
        put_i32(buf, base + 16, self.confirmation.date);
        put_i32(buf, base + 20, self.confirmation.time);
    }
}

//=============================================================================
// 状态头
//=============================================================================

/// 记录链表（以块号串联的双向链表）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordList {
    /// 链表头
    pub head: BlockIndex,
    /// 链表尾
    pub tail: BlockIndex,
    /// 记录数
    pub num_records: i32,
    /// 块数
    pub num_blocks: i32,
    /// 字节数
    pub num_bytes: i64,
}

impl RecordList {
    /// 编码后大小
    pub const SIZE: usize = 24;

    /// 空链表
    pub const EMPTY: RecordList = RecordList {
        head: BlockIndex::NIL,
        tail: BlockIndex::NIL,
        num_records: 0,
        num_blocks: 0,
        num_bytes: 0,
    };

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.head.is_nil()
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            head: BlockIndex(get_i32(buf, 0)),
            tail: BlockIndex(get_i32(buf, 4)),
            num_records: get_i32(buf, 8),
            num_blocks: get_i32(buf, 12),
            num_bytes: get_i64(buf, 16),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        put_i32(buf, 0, self.head.0);
        put_i32(buf, 4, self.tail.0);
        put_i32(buf, 8, self.num_records);
        put_i32(buf, 12, self.num_blocks);
        put_i64(buf, 16, self.num_bytes);
    }
}

/// 空闲块链表（以 next_block 串联的单向链表）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlockList {
    /// 链表头
    pub head: BlockIndex,
    /// 空闲块数
    pub num_blocks: i32,
}

impl FreeBlockList {
    /// 编码后大小
    pub const SIZE: usize = 8;

    /// 空链表
    pub const EMPTY: FreeBlockList = FreeBlockList {
        head: BlockIndex::NIL,
        num_blocks: 0,
    };
}

/// 日志状态头（文件头中有两份影子副本）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalStateHeader {
    /// 记录链表，按 [`ListKind`] 索引
    pub lists: [RecordList; 2],
    /// 空闲块链表
    pub free: FreeBlockList,
    /// 已分配页数
    pub num_pages: i32,
}

impl Default for JournalStateHeader {
    fn default() -> Self {
        Self {
            lists: [RecordList::EMPTY, RecordList::EMPTY],
            free: FreeBlockList::EMPTY,
            num_pages: 0,
        }
    }
}

impl JournalStateHeader {
    /// 获取链表
    pub fn list(&self, kind: ListKind) -> &RecordList {
        &self.lists[kind as usize]
    }

    /// 获取可变链表
    pub fn list_mut(&mut self, kind: ListKind) -> &mut RecordList {
        &mut self.lists[kind as usize]
    }

    /// 解码
    pub fn decode(buf: &[u8]) -> Self {
        let free_off = 2 * RecordList::SIZE;
        Self {
            lists: [
                RecordList::decode(&buf[..RecordList::SIZE]),
                RecordList::decode(&buf[RecordList::SIZE..free_off]),
            ],
            free: FreeBlockList {
                head: BlockIndex(get_i32(buf, free_off)),
                num_blocks: get_i32(buf, free_off + 4),
            },
            num_pages: get_i32(buf, free_off + FreeBlockList::SIZE),
        }
    }

    /// 编码（包括填充字节）
    pub fn encode(&self, buf: &mut [u8]) {
        let free_off = 2 * RecordList::SIZE;
        self.lists[0].encode(&mut buf[..RecordList::SIZE]);
        self.lists[1].encode(&mut buf[RecordList::SIZE..free_off]);
        put_i32(buf, free_off, self.free.head.0);
        put_i32(buf, free_off + 4, self.free.num_blocks);
        put_i32(buf, free_off + FreeBlockList::SIZE, self.num_pages);
        put_i32(buf, free_off + FreeBlockList::SIZE + 4, 0);
    }
}

// =============================================================================
// Tests
// =============================================================================
