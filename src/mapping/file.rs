//! 基于 `memmap2` 的文件映射实现

use super::{MappedRegion, MappingService, Protection};
use crate::error::{Error, ErrorKind, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// 磁盘文件
///
/// 独占持有文件句柄，`Drop` 时关闭。
#[derive(Debug)]
pub struct MmapFile {
    file: File,
    read_only: bool,
}

impl MmapFile {
    /// 打开文件
    ///
    /// # 参数
    ///
    /// * `path` - 文件路径
    /// * `writable` - 是否以读写方式打开
    /// * `create_if_missing` - 文件不存在时是否创建（仅在读写方式下生效）
    ///
    /// # 错误
    ///
    /// - `FileNotExists`: 文件不存在且不允许创建
    /// - `FileCreationFailed`: 创建文件失败
    /// - `Io`: 其他打开错误
    pub fn open(path: &Path, writable: bool, create_if_missing: bool) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(writable);

        let file = match opts.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !(writable && create_if_missing) {
                    return Err(Error::new(ErrorKind::FileNotExists, "Journal file does not exist"));
                }
                opts.create(true).open(path).map_err(|e| {
                    Error::with_cause(ErrorKind::FileCreationFailed, "Failed to create journal file", e)
                })?
            }
            Err(e) => {
                return Err(Error::with_cause(ErrorKind::Io, "Failed to open journal file", e));
            }
        };

        log::debug!("[MAPPING] opened {} (writable={})", path.display(), writable);

        Ok(Self {
            file,
            read_only: !writable,
        })
    }
}

impl MappingService for MmapFile {
    type Region = MmapRegion;

    fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to stat journal file", e))
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to extend journal file", e))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::with_cause(ErrorKind::Io, "Failed to seek journal file", e))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::with_cause(ErrorKind::Io, "Failed to read journal file", e));
                }
            }
        }
        Ok(total)
    }

    fn map(&self, offset: u64, len: usize, prot: Protection) -> Result<MmapRegion> {
        let mut opts = MmapOptions::new();
        opts.offset(offset).len(len);

        // SAFETY: 映射的文件区域只由持有本文件的日志实例修改，
        // 跨进程并发修改同一文件不在支持范围内。
        let map = if prot.contains(Protection::WRITE) {
            if self.read_only {
                return Err(Error::new(ErrorKind::Mem, "Cannot map a read-only file for writing"));
            }
            unsafe { opts.map_mut(&self.file) }.map(RegionMap::Writable)
        } else {
            unsafe { opts.map(&self.file) }.map(RegionMap::ReadOnly)
        }
        .map_err(|e| Error::with_cause(ErrorKind::Mem, "Failed to map journal region", e))?;

        Ok(MmapRegion { map })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[derive(Debug)]
enum RegionMap {
    Writable(MmapMut),
    ReadOnly(Mmap),
    /// 切换保护失败后映射已被释放
    Unmapped,
}

/// 内存映射区域
///
/// `Drop` 时解除映射。
#[derive(Debug)]
pub struct MmapRegion {
    map: RegionMap,
}

impl MappedRegion for MmapRegion {
    fn bytes(&self) -> &[u8] {
        match &self.map {
            RegionMap::Writable(m) => &m[..],
            RegionMap::ReadOnly(m) => &m[..],
            RegionMap::Unmapped => &[],
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.map {
            RegionMap::Writable(m) => Ok(&mut m[..]),
            RegionMap::ReadOnly(_) => Err(Error::new(
                ErrorKind::ProtectionFailure,
                "Write to a protected journal region",
            )),
            RegionMap::Unmapped => Err(Error::new(ErrorKind::Mem, "Journal region is not mapped")),
        }
    }

    fn sync(&self) -> Result<()> {
        match &self.map {
            RegionMap::Writable(m) => m
                .flush()
                .map_err(|e| Error::with_cause(ErrorKind::SyncFailure, "Failed to sync journal region", e)),
            // 只读区域上不会有未刷盘的写入
            RegionMap::ReadOnly(_) => Ok(()),
            RegionMap::Unmapped => Err(Error::new(ErrorKind::SyncFailure, "Journal region is not mapped")),
        }
    }

    fn protect(&mut self, prot: Protection) -> Result<()> {
        let writable = prot.contains(Protection::WRITE);

        self.map = match core::mem::replace(&mut self.map, RegionMap::Unmapped) {
            RegionMap::Writable(m) if !writable => RegionMap::ReadOnly(m.make_read_only().map_err(|e| {
                Error::with_cause(ErrorKind::ProtectionFailure, "Failed to write-protect journal region", e)
            })?),
            RegionMap::ReadOnly(m) if writable => RegionMap::Writable(m.make_mut().map_err(|e| {
                Error::with_cause(ErrorKind::ProtectionFailure, "Failed to unprotect journal region", e)
            })?),
            RegionMap::Unmapped => {
                return Err(Error::new(ErrorKind::ProtectionFailure, "Journal region is not mapped"));
            }
            unchanged => unchanged,
        };

        Ok(())
    }

    fn protection(&self) -> Protection {
        match &self.map {
            RegionMap::Writable(_) => Protection::READ_WRITE,
            RegionMap::ReadOnly(_) => Protection::READ,
            RegionMap::Unmapped => Protection::empty(),
        }
    }
}
