//! 文件映射服务抽象
//!
//! 提供日志所需的文件和内存映射接口。
//! mapping/file.rs 提供基于 `std::fs::File` 和 `memmap2` 的默认实现。
//!
//! 解除映射由 [`MappedRegion`] 的 `Drop` 完成，关闭文件由 [`MappingService`]
//! 的 `Drop` 完成。

mod file;

pub use file::{MmapFile, MmapRegion};

use crate::error::Result;
use bitflags::bitflags;

bitflags! {
    /// 映射区域的访问权限
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        /// 可读
        const READ  = 0x01;
        /// 可写
        const WRITE = 0x02;
    }
}

impl Protection {
    /// 读写权限
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);
}

/// 文件映射服务
///
/// 实现此 trait 以提供底层文件访问。
///
/// # 示例
///
/// ```rust,ignore
/// use persistent_journal::{MappingService, Protection, Result};
///
/// struct MyFile {
///     // ...
/// }
///
/// impl MappingService for MyFile {
///     type Region = MyRegion;
///
///     fn len(&self) -> Result<u64> {
///         // 返回文件长度
///     }
///
///     fn map(&self, offset: u64, len: usize, prot: Protection) -> Result<MyRegion> {
///         // 建立映射
///     }
///
///     // ...
/// }
/// ```
pub trait MappingService: Send + Sync {
    /// 映射区域类型
    type Region: MappedRegion;

    /// 文件当前长度
    fn len(&self) -> Result<u64>;

    /// 设置文件长度
    ///
    /// 失败时返回 `ErrorKind::Io`
    fn set_len(&self, len: u64) -> Result<()>;

    /// 从 `offset` 读取数据
    ///
    /// # 返回
    ///
    /// 实际读取的字节数（遇到文件尾时可能小于 `buf.len()`）
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// 映射 `[offset, offset + len)`
    ///
    /// 失败时返回 `ErrorKind::Mem`
    fn map(&self, offset: u64, len: usize, prot: Protection) -> Result<Self::Region>;

    /// 是否以只读方式打开
    fn is_read_only(&self) -> bool {
        false
    }
}

/// 已映射的文件区域
pub trait MappedRegion: Send + Sync {
    /// 区域内容
    fn bytes(&self) -> &[u8];

    /// 可写的区域内容
    ///
    /// 区域被保护为只读时返回 `ErrorKind::ProtectionFailure`
    fn bytes_mut(&mut self) -> Result<&mut [u8]>;

    /// 把区域内容刷到稳定存储
    ///
    /// 失败时返回 `ErrorKind::SyncFailure`
    fn sync(&self) -> Result<()>;

    /// 修改访问权限
    ///
    /// 失败时返回 `ErrorKind::ProtectionFailure`
    fn protect(&mut self, prot: Protection) -> Result<()>;

    /// 当前访问权限
    fn protection(&self) -> Protection;

    /// 区域长度
    fn len(&self) -> usize {
        self.bytes().len()
    }

    /// 区域是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
