//! 内存保护
//!
//! 保护模式下所有映射区域平时只读，越界写入会触发段错误而不是悄悄破坏文件。
//! 修改操作在 [`UnprotectGuard`] 的作用域内进行。

use super::{config::ProtectionMode, inner::JournalCore};
use crate::{
    error::Result,
    mapping::{MappingService, Protection},
};
use core::ops::{Deref, DerefMut};

/// 解除保护守卫
///
/// 创建时把所有区域设为可写（仅在保护模式下），drop 时恢复只读。
/// 作用域内新映射的页也会在 drop 时一并设为只读。
pub(super) struct UnprotectGuard<'a, F: MappingService> {
    journal: &'a mut JournalCore<F>,
    restore: bool,
}

impl<'a, F: MappingService> UnprotectGuard<'a, F> {
    /// 解除保护
    pub(super) fn new(journal: &'a mut JournalCore<F>) -> Result<Self> {
        let restore = journal.protection == ProtectionMode::Protected;
        if restore {
            if let Err(e) = journal.set_region_protection(Protection::READ_WRITE) {
                // 恢复已经解除保护的区域
                let _ = journal.set_region_protection(Protection::READ);
                return Err(e);
            }
        }
        Ok(Self { journal, restore })
    }
}

impl<F: MappingService> Deref for UnprotectGuard<'_, F> {
    type Target = JournalCore<F>;

    fn deref(&self) -> &Self::Target {
        self.journal
    }
}

impl<F: MappingService> DerefMut for UnprotectGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.journal
    }
}

impl<F: MappingService> Drop for UnprotectGuard<'_, F> {
    fn drop(&mut self) {
        if self.restore {
            if let Err(e) = self.journal.set_region_protection(Protection::READ) {
                log::error!("[PROTECT] failed to re-protect journal regions: {}", e);
            }
        }
    }
}
