//! persistent_journal: 基于内存映射文件的持久化记录日志
//!
//! 这是一个纯 Rust 实现的日志存储库，旨在提供：
//! - **崩溃一致性**：双影子状态，任何时刻崩溃都能恢复到某个操作前后的完整状态
//! - **零拷贝读取**：迭代器直接返回映射内存中的数据切片
//! - **可替换的文件层**：通过 [`MappingService`] trait 接入任意文件实现
//!
//! # 示例
//!
//! ```rust,ignore
//! use persistent_journal::{CommitMode, JournalConfig, PersistentJournal, Result};
//!
//! fn main() -> Result<()> {
//!     let config = JournalConfig::default()
//!         .with_geometry(256, 64)
//!         .with_retention(Some(1000), None);
//!
//!     let journal = PersistentJournal::new(CommitMode::Implicit);
//!     journal.open("messages.jnl", &config)?;
//!
//!     let handle = journal.add_record(b"hello")?;
//!     journal.confirm_record(handle)?;
//!
//!     journal.close()
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 磁盘格式数据结构
//! - [`layout`] - 磁盘布局计算
//! - [`datetime`] - 打包的日期时间
//! - [`mapping`] - 文件映射服务抽象
//! - [`journal`] - 日志本体

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// 磁盘布局
pub mod layout;

/// 日期时间
pub mod datetime;

/// 文件映射
pub mod mapping;

/// 持久化日志
pub mod journal;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 数据结构
pub use types::{BlockIndex, RecordHandle};

// 文件映射
pub use mapping::{MappedRegion, MappingService, MmapFile, MmapRegion, Protection};

// 日志
pub use journal::{CommitMode, JournalConfig, JournalIterator, Mode, PersistentJournal, ProtectionMode};
