//! 日志配置

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    layout::Layout,
};

/// 打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// 只读（不执行恢复，不允许修改）
    ReadOnly,
    /// 读写
    #[default]
    ReadWrite,
}

/// 提交模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// 每个修改操作结束时自动刷盘
    #[default]
    Implicit,
    /// 由调用者调用 `commit()` 刷盘
    Explicit,
}

/// 内存保护模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionMode {
    /// 修改操作之外映射区域为只读，捕获越界写入
    Protected,
    /// 映射区域始终可写
    #[default]
    Unprotected,
}

/// 日志配置
///
/// 打开已有文件时，几何参数（块大小、每页块数、对齐、用户数据长度）和
/// 保留上限以文件头为准，这里的值只用于创建新文件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalConfig {
    /// 打开模式
    pub mode: Mode,
    /// 文件不存在时是否创建
    pub create_if_missing: bool,
    /// 用户数据区长度（字节）
    pub user_data_size: u32,
    /// 最多保留的已确认记录数（`None` 表示不限制）
    pub max_confirmed_records_kept: Option<u32>,
    /// 最多保留的已确认字节数（`None` 表示不限制）
    pub max_confirmed_bytes_kept: Option<u32>,
    /// 块大小（字节）
    pub block_size: u32,
    /// 每页块数
    pub blocks_per_page: u32,
    /// 对齐大小（2 的幂，且为系统页大小的整数倍）
    pub alignment_size: u32,
    /// 最大文件大小（`None` 表示不限制）
    pub max_file_size: Option<u64>,
    /// 打开后的内存保护模式
    pub protection: ProtectionMode,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            mode: Mode::ReadWrite,
            create_if_missing: true,
            user_data_size: 0,
            max_confirmed_records_kept: None,
            max_confirmed_bytes_kept: None,
            block_size: DEFAULT_BLOCK_SIZE,
            blocks_per_page: DEFAULT_BLOCKS_PER_PAGE,
            alignment_size: DEFAULT_ALIGNMENT_SIZE,
            max_file_size: None,
            protection: ProtectionMode::Unprotected,
        }
    }
}

impl JournalConfig {
    /// 设置打开模式
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// 设置是否创建
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// 设置用户数据区长度
    pub fn with_user_data_size(mut self, size: u32) -> Self {
        self.user_data_size = size;
        self
    }

    /// 设置块几何参数
    pub fn with_geometry(mut self, block_size: u32, blocks_per_page: u32) -> Self {
        self.block_size = block_size;
        self.blocks_per_page = blocks_per_page;
        self
    }

    /// 设置对齐大小
    pub fn with_alignment_size(mut self, alignment_size: u32) -> Self {
        self.alignment_size = alignment_size;
        self
    }

    /// 设置已确认记录的保留上限
    pub fn with_retention(mut self, max_records: Option<u32>, max_bytes: Option<u32>) -> Self {
        self.max_confirmed_records_kept = max_records;
        self.max_confirmed_bytes_kept = max_bytes;
        self
    }

    /// 设置最大文件大小
    pub fn with_max_file_size(mut self, max_file_size: Option<u64>) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// 设置内存保护模式
    pub fn with_protection(mut self, protection: ProtectionMode) -> Self {
        self.protection = protection;
        self
    }

    /// 校验配置并计算新文件的几何参数
    pub fn validate(&self) -> Result<Layout> {
        if self.max_confirmed_records_kept.is_some_and(|n| n > i32::MAX as u32)
            || self.max_confirmed_bytes_kept.is_some_and(|n| n > i32::MAX as u32)
        {
            return Err(Error::new(ErrorKind::InvalidConfig, "Retention limit out of range"));
        }
        if self.block_size > i32::MAX as u32 || self.blocks_per_page > i32::MAX as u32 {
            return Err(Error::new(ErrorKind::InvalidConfig, "Journal geometry out of range"));
        }
        Layout::new(self.block_size, self.blocks_per_page, self.alignment_size, self.user_data_size)
    }
}

/// 把可选上限编码为文件头中的 i32（-1 表示不限制）
pub(crate) fn encode_limit(limit: Option<u32>) -> i32 {
    limit.map_or(UNLIMITED, |n| n as i32)
}

/// 从文件头中的 i32 解码可选上限
pub(crate) fn decode_limit(raw: i32) -> Option<u32> {
    if raw < 0 {
        None
    } else {
        Some(raw as u32)
    }
}
