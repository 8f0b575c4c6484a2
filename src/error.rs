//! 错误类型定义
//!
//! 提供日志存储操作的错误类型。每个错误类别都有一个稳定的整数错误码，
//! 便于跨语言或跨进程传递。

use core::fmt;

/// 日志操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 状态错误（未打开、已打开、只读模式下写入等）
    BadState,
    /// I/O 错误
    Io,
    /// 内存映射失败
    Mem,
    /// 文件格式无效
    InvalidFile,
    /// 文件版本高于当前实现
    UnsupportedVersion,
    /// 记录句柄无效
    InvalidRecordHandle,
    /// 内部不变量被破坏
    Internal,
    /// 内存保护切换失败
    ProtectionFailure,
    /// 刷盘失败
    SyncFailure,
    /// 最大文件大小无效
    InvalidMaxFileSize,
    /// 记录超过当前可用空间
    MaxRecordSizeViolation,
    /// 记录超过空日志所能容纳的最大空间
    MaxRecordSizeForEmptyJournalViolation,
    /// 文件不存在
    FileNotExists,
    /// 文件创建失败
    FileCreationFailed,
    /// 配置参数无效
    InvalidConfig,
}

impl ErrorKind {
    /// 稳定的整数错误码（0 保留给成功）
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::BadState => -1,
            ErrorKind::Io => -2,
            ErrorKind::Mem => -3,
            ErrorKind::InvalidFile => -4,
            ErrorKind::UnsupportedVersion => -5,
            ErrorKind::InvalidRecordHandle => -6,
            ErrorKind::Internal => -7,
            ErrorKind::ProtectionFailure => -8,
            ErrorKind::SyncFailure => -9,
            ErrorKind::InvalidMaxFileSize => -10,
            ErrorKind::MaxRecordSizeViolation => -11,
            ErrorKind::MaxRecordSizeForEmptyJournalViolation => -12,
            ErrorKind::FileNotExists => -13,
            ErrorKind::FileCreationFailed => -14,
            ErrorKind::InvalidConfig => -15,
        }
    }
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 创建带原因的错误
    ///
    /// 原因不随错误保存，只以 debug 级别写入日志
    pub fn with_cause(kind: ErrorKind, message: &'static str, cause: impl fmt::Debug) -> Self {
        log::debug!("{}: {:?}", message, cause);
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 获取整数错误码
    pub const fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
