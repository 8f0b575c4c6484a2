//! 持久化日志
//!
//! 基于内存映射文件的记录日志：记录先以“未确认”状态写入，确认后移入
//! “已确认”链表，按保留上限淘汰最早确认的记录。
//!
//! # 架构概述
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  PersistentJournal                        │
//! │   open / add_record / confirm_record / remove_record      │
//! │   RwLock：修改持写锁，访问器和迭代器持读锁                │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   UnprotectGuard → TransactionGuard → 记录操作            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │
//! │  │    record    │  │     list     │  │    alloc     │   │
//! │  │ (添加/确认)  │  │  (双向链表)  │  │ (空闲块链表) │   │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘   │
//! │         └──────────────────┴──────────────────┘           │
//! │                            │                              │
//! │                            ▼                              │
//! │                    ┌──────────────┐                       │
//! │                    │ JournalCore  │                       │
//! │                    │ (双影子状态) │                       │
//! │                    └──────┬───────┘                       │
//! └───────────────────────────┼───────────────────────────────┘
//!                             │
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              MappingService / MappedRegion                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # 核心组件
//!
//! - [`PersistentJournal`] - 对外入口
//! - [`JournalIterator`] - 沿链表遍历记录
//! - [`JournalConfig`] - 打开 / 创建参数
//!
//! # 崩溃一致性
//!
//! 每个修改操作是一个事务，详见 `transaction.rs`。文件在任何时刻崩溃，
//! 以读写方式重新打开后都处于某个操作之前或之后的完整状态。

mod alloc;
mod config;
mod inner;
mod invariants;
mod iterator;
mod list;
mod persistent;
mod protect;
mod record;
mod transaction;

#[cfg(test)]
mod tests;

pub use config::{CommitMode, JournalConfig, Mode, ProtectionMode};
pub use iterator::JournalIterator;
pub use persistent::PersistentJournal;
