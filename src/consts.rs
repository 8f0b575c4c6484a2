//! 日志文件常量定义
//!
//! 这个模块包含了日志文件格式的所有常量定义，包括：
//! - 魔数与版本
//! - 文件头各字段的字节偏移
//! - 记录头、状态头的大小
//! - 默认配置

//=============================================================================
// 基础常量
//=============================================================================

/// 日志文件魔数（12 字节，不含结尾 NUL）
pub const JOURNAL_MAGIC_WORD: &[u8; 12] = b"A3kdh*(UNA11";

/// 当前实现所写入、可理解的最高文件版本
pub const JOURNAL_FILE_VERSION: i32 = 1;

/// 链表结束标记（空块号）
pub const NIL_INDEX: i32 = -1;

/// 表示“不限制”的保留上限值
pub const UNLIMITED: i32 = -1;

//=============================================================================
// 文件头布局（字节偏移）
//=============================================================================

/// headerSize: i32
pub const HDR_HEADER_SIZE: usize = 0;

/// fileVersion: i32
pub const HDR_FILE_VERSION: usize = 4;

/// magicWord: [u8; 12]
pub const HDR_MAGIC_WORD: usize = 8;

/// optionFlags: i32（保留，写入 0）
pub const HDR_OPTION_FLAGS: usize = 20;

/// alignmentSize: i32
pub const HDR_ALIGNMENT_SIZE: usize = 24;

/// blockSize: i32
pub const HDR_BLOCK_SIZE: usize = 28;

/// blocksPerPage: i32
pub const HDR_BLOCKS_PER_PAGE: usize = 32;

/// maxConfirmedBytesKept: i32
pub const HDR_MAX_CONFIRMED_BYTES: usize = 36;

/// maxConfirmedRecordsKept: i32
pub const HDR_MAX_CONFIRMED_RECORDS: usize = 40;

/// userDataLength: i32
pub const HDR_USER_DATA_LENGTH: usize = 44;

/// creationDate: i32（YYYYMMDD）
pub const HDR_CREATION_DATE: usize = 48;

/// creationTime: i32（HHMMSS）
pub const HDR_CREATION_TIME: usize = 52;

/// commitState: i32
pub const HDR_COMMIT_STATE: usize = 56;

/// stateData[2] 的起始偏移（60..64 为填充）
pub const HDR_STATE_DATA: usize = 64;

/// 单个状态头（JournalStateHeader）的大小
///
/// confirmed(24) + unconfirmed(24) + free(8) + numPages(4) + 填充(4)
pub const STATE_HEADER_SIZE: usize = 64;

/// 文件头固定部分大小（用户数据紧随其后）
pub const FIXED_HEADER_SIZE: usize = HDR_STATE_DATA + 2 * STATE_HEADER_SIZE;

//=============================================================================
// 页内布局
//=============================================================================

/// 单个块链接（JournalBlockLinkage）的大小
///
/// recordType(4) + nextBlock(4) + nextRecord(4) + prevRecord(4)
pub const BLOCK_LINKAGE_SIZE: usize = 16;

/// 单个记录头（JournalRecordHeader）的大小
///
/// linkage[2](32) + recordId(4) + recordLength(4) + creation(8) + confirmation(8)
pub const RECORD_HEADER_SIZE: usize = 2 * BLOCK_LINKAGE_SIZE + 24;

//=============================================================================
// 默认配置
//=============================================================================

/// 默认块大小（字节）
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

/// 默认每页块数
pub const DEFAULT_BLOCKS_PER_PAGE: u32 = 1024;

/// 默认对齐大小（字节，必须是 2 的幂且为系统页大小的整数倍）
pub const DEFAULT_ALIGNMENT_SIZE: u32 = 4096;
