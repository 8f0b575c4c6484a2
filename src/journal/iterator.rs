//! 记录迭代器
//!
//! 迭代器持有日志的读锁，存活期间其他线程的修改操作会被阻塞；
//! 同一线程在迭代器存活时调用修改操作会死锁；访问器和新的迭代器使用
//! 递归读锁，不受排队写者影响。

use super::inner::JournalCore;
use crate::{
    mapping::{MappingService, MmapFile},
    types::{BlockIndex, ListKind, RecordHandle, RecordHeader},
};
use chrono::NaiveDateTime;
use parking_lot::RwLockReadGuard;
use std::cell::OnceCell;

/// 记录迭代器
///
/// 指向某条记录，或为无效（越过链表端点、日志未打开、句柄无效）。
pub struct JournalIterator<'a, F: MappingService = MmapFile> {
    guard: RwLockReadGuard<'a, Option<JournalCore<F>>>,
    current: RecordHandle,
    header: Option<RecordHeader>,
    /// 当前记录的数据段 `(块号, 段长)`，首次访问数据时计算
    segments: OnceCell<Vec<(BlockIndex, usize)>>,
}

impl<'a, F: MappingService> JournalIterator<'a, F> {
    pub(super) fn new(guard: RwLockReadGuard<'a, Option<JournalCore<F>>>, handle: RecordHandle) -> Self {
        let mut iter = Self {
            guard,
            current: BlockIndex::NIL,
            header: None,
            segments: OnceCell::new(),
        };
        iter.seek(handle);
        iter
    }

    fn journal(&self) -> Option<&JournalCore<F>> {
        (*self.guard).as_ref()
    }

    fn seek(&mut self, handle: RecordHandle) {
        let header = self.journal().and_then(|journal| load_live(journal, handle));
        self.current = if header.is_some() { handle } else { BlockIndex::NIL };
        self.header = header;
        self.segments = OnceCell::new();
    }

    fn step(&mut self, forward: bool) -> bool {
        let next = match (self.journal(), self.header.as_ref()) {
            (Some(journal), Some(hdr)) => {
                let link = hdr.linkage[journal.work_index];
                if forward {
                    link.next_record
                } else {
                    link.prev_record
                }
            }
            _ => BlockIndex::NIL,
        };
        self.seek(next);
        self.is_valid()
    }

    /// 是否指向一条记录
    pub fn is_valid(&self) -> bool {
        self.header.is_some()
    }

    /// 当前记录句柄（无效时为 [`BlockIndex::NIL`]）
    pub fn handle(&self) -> RecordHandle {
        self.current
    }

    /// 移到同一链表中的下一条记录
    ///
    /// # 返回
    ///
    /// 移动后是否仍然有效
    pub fn advance(&mut self) -> bool {
        self.step(true)
    }

    /// 移到同一链表中的上一条记录
    pub fn retreat(&mut self) -> bool {
        self.step(false)
    }

    /// 当前记录是否已确认
    pub fn is_confirmed(&self) -> bool {
        match (self.journal(), self.header.as_ref()) {
            (Some(journal), Some(hdr)) => {
                hdr.linkage[journal.work_index].record_type.list() == Some(ListKind::Confirmed)
            }
            _ => false,
        }
    }

    /// 记录长度（字节）
    pub fn record_length(&self) -> usize {
        self.header.map_or(0, |hdr| hdr.record_length.max(0) as usize)
    }

    /// 创建时间
    pub fn creation_datetime(&self) -> Option<NaiveDateTime> {
        self.header.and_then(|hdr| hdr.creation.to_naive())
    }

    /// 确认时间（未确认时为 `None`）
    ///
    /// 确认时间不在影子链接中，回滚的确认可能留下旧值，以记录类型为准。
    pub fn confirmation_datetime(&self) -> Option<NaiveDateTime> {
        if !self.is_confirmed() {
            return None;
        }
        self.header.and_then(|hdr| hdr.confirmation.to_naive())
    }

    fn segments(&self) -> &[(BlockIndex, usize)] {
        self.segments.get_or_init(|| {
            let (Some(journal), Some(hdr)) = (self.journal(), self.header.as_ref()) else {
                return Vec::new();
            };
            journal
                .payload_segments(self.current, hdr.record_length.max(0) as u64)
                .unwrap_or_else(|e| {
                    log::error!("[ITER] corrupted record chain at {}: {}", self.current, e);
                    Vec::new()
                })
        })
    }

    /// 记录数据，按块分段，不复制
    pub fn data(&self) -> Vec<&[u8]> {
        let Some(journal) = self.journal() else {
            return Vec::new();
        };
        self.segments()
            .iter()
            .filter_map(|&(block, len)| journal.block_data(block).ok().map(|data| &data[..len]))
            .collect()
    }

    /// 把记录数据复制到 `buf`
    ///
    /// # 返回
    ///
    /// 复制的字节数（`buf` 较短时截断）
    pub fn copy_data(&self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        for segment in self.data() {
            let n = segment.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&segment[..n]);
            copied += n;
            if copied == buf.len() {
                break;
            }
        }
        copied
    }

    /// 记录数据的副本
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().concat()
    }
}

/// 读取活动记录的记录头；不是活动记录时返回 `None`
fn load_live<F: MappingService>(journal: &JournalCore<F>, handle: RecordHandle) -> Option<RecordHeader> {
    if handle.is_nil() {
        return None;
    }
    match journal.record_kind(handle) {
        Ok(Some(_)) => journal.load_record(handle).ok(),
        Ok(None) => None,
        Err(e) => {
            log::debug!("[ITER] invalid record handle {}: {}", handle, e);
            None
        }
    }
}
