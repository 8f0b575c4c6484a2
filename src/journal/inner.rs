//! 已打开日志的内部状态
//!
//! [`JournalCore`] 拥有文件、文件头映射和全部页映射，提供：
//! - 打开 / 创建 / 校验
//! - 文件头字段与两份状态头的读写
//! - 记录头读写（事务中的写入经过脏记录跟踪）
//! - 块数据访问
//!
//! 分配、链表、事务、记录操作分别在 `alloc.rs`、`list.rs`、`transaction.rs`、`record.rs` 中
//! 以 `impl JournalCore` 的形式扩展。

use super::config::{decode_limit, encode_limit, JournalConfig, Mode, ProtectionMode};
use crate::{
    consts::*,
    datetime::PackedDateTime,
    error::{Error, ErrorKind, Result},
    layout::Layout,
    mapping::{MappedRegion, MappingService, Protection},
    types::*,
};
use std::collections::BTreeSet;
use std::io;

/// 第 `index` 份状态头在文件头中的偏移
#[inline]
pub(crate) const fn state_offset(index: usize) -> usize {
    HDR_STATE_DATA + index * STATE_HEADER_SIZE
}

/// 已打开的日志
pub(crate) struct JournalCore<F: MappingService> {
    pub(super) file: F,
    pub(super) mode: Mode,
    pub(super) layout: Layout,
    /// 文件头映射 `[0, headerSize)`
    pub(super) header: F::Region,
    /// 页映射，下标即页号
    pub(super) pages: Vec<F::Region>,
    /// 当前写入（读取）的影子副本
    pub(super) work_index: usize,
    /// `stateData[work_index]` 的内存副本，事务提交时写回
    pub(super) state: JournalStateHeader,
    /// 本事务中链接被改写过的记录
    pub(super) dirty_records: BTreeSet<BlockIndex>,
    /// 尚未刷盘的页
    pub(super) dirty_pages: BTreeSet<usize>,
    /// 本会话分配过的最大块号
    pub(super) highest_block_used: BlockIndex,
    pub(super) max_file_size: Option<u64>,
    pub(super) protection: ProtectionMode,
    pub(super) max_confirmed_records: Option<u32>,
    pub(super) max_confirmed_bytes: Option<u32>,
    pub(super) user_data_length: usize,
    pub(super) creation: PackedDateTime,
    pub(super) file_version: i32,
}

impl<F: MappingService> JournalCore<F> {
    //=========================================================================
    // 打开与创建
    //=========================================================================

    /// 打开日志文件
    ///
    /// 空文件（且以读写方式打开）按 `config` 初始化；否则读取并校验已有文件头，
    /// 映射所有页，必要时完成崩溃恢复。已有文件不校验 `config` 中的几何参数
    /// 和保留上限。
    pub(super) fn open(file: F, config: &JournalConfig) -> Result<Self> {
        if config.mode == Mode::ReadWrite && file.is_read_only() {
            return Err(Error::new(ErrorKind::BadState, "Read-write journal over a read-only file"));
        }

        let mut journal = if file.len()? == 0 {
            if config.mode == Mode::ReadOnly {
                return Err(Error::new(ErrorKind::InvalidFile, "Journal file is empty"));
            }
            let layout = config.validate()?;
            Self::create(file, layout, config)?
        } else {
            Self::load(file, config.mode)?
        };

        if let Some(max) = config.max_file_size {
            journal.set_max_file_size(max)?;
        }
        if config.protection == ProtectionMode::Protected {
            journal.set_protection_mode(ProtectionMode::Protected)?;
        }

        Ok(journal)
    }

    /// 初始化新文件：写入文件头和两份空状态，不分配任何页
    fn create(file: F, layout: Layout, config: &JournalConfig) -> Result<Self> {
        file.set_len(layout.header_size())?;
        let mut header = file.map(0, layout.header_size() as usize, Protection::READ_WRITE)?;

        let creation = PackedDateTime::now();
        let state = JournalStateHeader::default();
        {
            let buf = header.bytes_mut()?;
            put_i32(buf, HDR_HEADER_SIZE, layout.header_size() as i32);
            put_i32(buf, HDR_FILE_VERSION, JOURNAL_FILE_VERSION);
            buf[HDR_MAGIC_WORD..HDR_MAGIC_WORD + JOURNAL_MAGIC_WORD.len()].copy_from_slice(JOURNAL_MAGIC_WORD);
            put_i32(buf, HDR_OPTION_FLAGS, 0);
            put_i32(buf, HDR_ALIGNMENT_SIZE, layout.alignment_size() as i32);
            put_i32(buf, HDR_BLOCK_SIZE, layout.block_size() as i32);
            put_i32(buf, HDR_BLOCKS_PER_PAGE, layout.blocks_per_page() as i32);
            put_i32(buf, HDR_MAX_CONFIRMED_BYTES, encode_limit(config.max_confirmed_bytes_kept));
            put_i32(buf, HDR_MAX_CONFIRMED_RECORDS, encode_limit(config.max_confirmed_records_kept));
            put_i32(buf, HDR_USER_DATA_LENGTH, config.user_data_size as i32);
            put_i32(buf, HDR_CREATION_DATE, creation.date);
            put_i32(buf, HDR_CREATION_TIME, creation.time);
            put_i32(buf, HDR_COMMIT_STATE, CommitState::Stable as i32);
            for index in 0..2 {
                state.encode(&mut buf[state_offset(index)..state_offset(index + 1)]);
            }
        }
        header.sync()?;

        log::debug!(
            "[JOURNAL] created journal: block_size={}, blocks_per_page={}, header_size={}, chunk_size={}",
            layout.block_size(),
            layout.blocks_per_page(),
            layout.header_size(),
            layout.chunk_size()
        );

        Ok(Self {
            file,
            mode: Mode::ReadWrite,
            layout,
            header,
            pages: Vec::new(),
            work_index: 1,
            state,
            dirty_records: BTreeSet::new(),
            dirty_pages: BTreeSet::new(),
            highest_block_used: BlockIndex::NIL,
            max_file_size: None,
            protection: ProtectionMode::Unprotected,
            max_confirmed_records: config.max_confirmed_records_kept,
            max_confirmed_bytes: config.max_confirmed_bytes_kept,
            user_data_length: config.user_data_size as usize,
            creation,
            file_version: JOURNAL_FILE_VERSION,
        })
    }

    /// 读取已有文件
    fn load(file: F, mode: Mode) -> Result<Self> {
        let mut fixed = [0u8; FIXED_HEADER_SIZE];
        if file.read_at(0, &mut fixed)? < FIXED_HEADER_SIZE {
            return Err(Error::new(ErrorKind::InvalidFile, "Journal file shorter than its header"));
        }

        // 验证魔数与版本
        if &fixed[HDR_MAGIC_WORD..HDR_MAGIC_WORD + JOURNAL_MAGIC_WORD.len()] != JOURNAL_MAGIC_WORD {
            return Err(Error::new(ErrorKind::InvalidFile, "Bad journal magic word"));
        }
        let file_version = get_i32(&fixed, HDR_FILE_VERSION);
        if file_version > JOURNAL_FILE_VERSION {
            return Err(Error::new(ErrorKind::UnsupportedVersion, "Journal file version is newer than supported"));
        }
        if file_version < 1 {
            return Err(Error::new(ErrorKind::InvalidFile, "Bad journal file version"));
        }

        // 几何参数
        let block_size = get_i32(&fixed, HDR_BLOCK_SIZE);
        let blocks_per_page = get_i32(&fixed, HDR_BLOCKS_PER_PAGE);
        let alignment_size = get_i32(&fixed, HDR_ALIGNMENT_SIZE);
        let user_data_length = get_i32(&fixed, HDR_USER_DATA_LENGTH);
        if block_size <= 0 || blocks_per_page <= 0 || alignment_size <= 0 || user_data_length < 0 {
            return Err(Error::new(ErrorKind::InvalidFile, "Bad journal geometry"));
        }
        let layout = Layout::new(
            block_size as u32,
            blocks_per_page as u32,
            alignment_size as u32,
            user_data_length as u32,
        )
        .map_err(|_| Error::new(ErrorKind::InvalidFile, "Bad journal geometry"))?;
        if get_i32(&fixed, HDR_HEADER_SIZE) as i64 != layout.header_size() as i64 {
            return Err(Error::new(ErrorKind::InvalidFile, "Header size does not match geometry"));
        }

        let commit_state = CommitState::from_raw(get_i32(&fixed, HDR_COMMIT_STATE))
            .ok_or(Error::new(ErrorKind::InvalidFile, "Bad commit state"))?;

        // 中断的事务：副本 0 是事务前的完整状态；中断的同步：副本 1 已完整
        let authoritative = if commit_state == CommitState::MidTransaction { 0 } else { 1 };
        let state = JournalStateHeader::decode(&fixed[state_offset(authoritative)..state_offset(authoritative + 1)]);

        let total_blocks = state.num_pages as i64 * blocks_per_page as i64;
        if state.num_pages < 0 || total_blocks > i32::MAX as i64 {
            return Err(Error::new(ErrorKind::InvalidFile, "Bad page count"));
        }
        let num_pages = state.num_pages as usize;
        if file.len()? < layout.file_size_for(num_pages) {
            return Err(Error::new(ErrorKind::InvalidFile, "Journal file is truncated"));
        }

        let prot = match mode {
            Mode::ReadOnly => Protection::READ,
            Mode::ReadWrite => Protection::READ_WRITE,
        };
        let header = file.map(0, layout.header_size() as usize, prot)?;
        let mut pages = Vec::with_capacity(num_pages);
        for page in 0..num_pages {
            pages.push(file.map(layout.page_offset(page), layout.chunk_size() as usize, prot)?);
        }

        let mut journal = Self {
            file,
            mode,
            layout,
            header,
            pages,
            work_index: authoritative,
            state,
            dirty_records: BTreeSet::new(),
            dirty_pages: BTreeSet::new(),
            highest_block_used: BlockIndex::NIL,
            max_file_size: None,
            protection: ProtectionMode::Unprotected,
            max_confirmed_records: decode_limit(get_i32(&fixed, HDR_MAX_CONFIRMED_RECORDS)),
            max_confirmed_bytes: decode_limit(get_i32(&fixed, HDR_MAX_CONFIRMED_BYTES)),
            user_data_length: user_data_length as usize,
            creation: PackedDateTime {
                date: get_i32(&fixed, HDR_CREATION_DATE),
                time: get_i32(&fixed, HDR_CREATION_TIME),
            },
            file_version,
        };

        if mode == Mode::ReadWrite {
            journal.recover(commit_state)?;
        }

        journal.validate_state()?;
        journal.highest_block_used = journal
            .scan_highest_block_used()
            .map_err(|_| Error::new(ErrorKind::InvalidFile, "Corrupted record chain"))?;

        log::debug!(
            "[JOURNAL] opened journal: mode={:?}, pages={}, commit_state={:?}, work_index={}",
            mode,
            num_pages,
            commit_state,
            journal.work_index
        );

        Ok(journal)
    }

    /// 校验状态头的结构边界
    fn validate_state(&self) -> Result<()> {
        let total = self.total_blocks();
        let in_range = |b: BlockIndex| b.is_nil() || (b.get() as i64) < total;
        let bad = || Error::new(ErrorKind::InvalidFile, "Journal state header out of bounds");

        for list in &self.state.lists {
            if !in_range(list.head) || !in_range(list.tail) {
                return Err(bad());
            }
            if list.num_records < 0 || list.num_blocks < 0 || list.num_bytes < 0 {
                return Err(bad());
            }
            if list.head.is_nil() != list.tail.is_nil() {
                return Err(bad());
            }
        }
        if !in_range(self.state.free.head) || self.state.free.num_blocks < 0 {
            return Err(bad());
        }
        if self.state.free.num_blocks as i64 > total {
            return Err(bad());
        }
        Ok(())
    }

    /// 遍历所有记录的块链，求最大块号
    fn scan_highest_block_used(&self) -> Result<BlockIndex> {
        let mut highest = BlockIndex::NIL;
        for kind in [ListKind::Confirmed, ListKind::Unconfirmed] {
            let mut rec = self.state.list(kind).head;
            let mut seen = 0i64;
            while !rec.is_nil() {
                seen += 1;
                if seen > self.total_blocks() {
                    return Err(Error::new(ErrorKind::Internal, "Cycle in record list"));
                }
                let hdr = self.load_record(rec)?;
                let num_blocks = self.layout.blocks_for(hdr.record_length.max(0) as u64);
                let mut block = rec;
                for i in 0..num_blocks {
                    highest = highest.max(block);
                    if i + 1 < num_blocks {
                        block = self.link(block)?.next_block;
                    }
                }
                rec = hdr.linkage[self.work_index].next_record;
            }
        }
        Ok(highest)
    }

    //=========================================================================
    // 文件头
    //=========================================================================

    /// 当前提交状态
    pub(super) fn commit_state(&self) -> Result<CommitState> {
        CommitState::from_raw(get_i32(self.header.bytes(), HDR_COMMIT_STATE))
            .ok_or(Error::new(ErrorKind::Internal, "Bad commit state in header"))
    }

    /// 写入提交状态
    ///
    /// 只由 `transaction.rs` 中的状态转换函数调用
    pub(super) fn set_commit_state(&mut self, state: CommitState) -> Result<()> {
        put_i32(self.header.bytes_mut()?, HDR_COMMIT_STATE, state as i32);
        Ok(())
    }

    /// 读取第 `index` 份状态头
    pub(super) fn read_state(&self, index: usize) -> JournalStateHeader {
        JournalStateHeader::decode(&self.header.bytes()[state_offset(index)..state_offset(index + 1)])
    }

    /// 写入第 `index` 份状态头
    pub(super) fn write_state(&mut self, index: usize, state: &JournalStateHeader) -> Result<()> {
        let buf = self.header.bytes_mut()?;
        state.encode(&mut buf[state_offset(index)..state_offset(index + 1)]);
        Ok(())
    }

    /// 用户数据区
    pub(super) fn user_data(&self) -> &[u8] {
        &self.header.bytes()[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + self.user_data_length]
    }

    /// 可写的用户数据区
    pub(super) fn user_data_mut(&mut self) -> Result<&mut [u8]> {
        let len = self.user_data_length;
        Ok(&mut self.header.bytes_mut()?[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + len])
    }

    /// 读写模式检查
    pub(super) fn check_writable(&self) -> Result<()> {
        match self.mode {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(Error::new(ErrorKind::BadState, "Journal is opened read-only")),
        }
    }

    //=========================================================================
    // 记录头
    //=========================================================================

    /// 已分配的总块数
    pub(super) fn total_blocks(&self) -> i64 {
        self.pages.len() as i64 * self.layout.blocks_per_page() as i64
    }

    /// 块号是否指向已映射的块
    pub(super) fn contains_block(&self, block: BlockIndex) -> bool {
        !block.is_nil() && (block.get() as i64) < self.total_blocks()
    }

    fn record_range(&self, block: BlockIndex) -> Result<(usize, std::ops::Range<usize>)> {
        if !self.contains_block(block) {
            return Err(Error::new(ErrorKind::Internal, "Block index out of range"));
        }
        let page = block.page(self.layout.blocks_per_page());
        let start = self.layout.record_offset_in_page(block);
        Ok((page, start..start + RECORD_HEADER_SIZE))
    }

    /// 读取记录头
    pub(super) fn load_record(&self, block: BlockIndex) -> Result<RecordHeader> {
        let (page, range) = self.record_range(block)?;
        let buf = self.pages[page]
            .bytes()
            .get(range)
            .ok_or(Error::new(ErrorKind::Internal, "Record header outside its page"))?;
        RecordHeader::decode(buf)
    }

    /// 读取当前影子副本的链接
    pub(super) fn link(&self, block: BlockIndex) -> Result<BlockLinkage> {
        Ok(self.load_record(block)?.linkage[self.work_index])
    }

    /// 写入记录头，不做脏记录跟踪（页初始化、恢复、影子同步使用）
    pub(super) fn write_record_raw(&mut self, block: BlockIndex, hdr: &RecordHeader) -> Result<()> {
        let (page, range) = self.record_range(block)?;
        let buf = self.pages[page]
            .bytes_mut()?
            .get_mut(range)
            .ok_or(Error::new(ErrorKind::Internal, "Record header outside its page"))?;
        hdr.encode(buf);
        self.dirty_pages.insert(page);
        Ok(())
    }

    /// 写入记录头并登记为脏记录
    ///
    /// 事务中对记录头的所有修改都必须经过这里，提交时才能把工作副本的
    /// 链接同步到另一份。
    pub(super) fn store_record(&mut self, block: BlockIndex, hdr: &RecordHeader) -> Result<()> {
        self.write_record_raw(block, hdr)?;
        self.dirty_records.insert(block);
        Ok(())
    }

    /// 修改当前影子副本的链接
    pub(super) fn update_link(
        &mut self,
        block: BlockIndex,
        f: impl FnOnce(&mut BlockLinkage),
    ) -> Result<()> {
        let mut hdr = self.load_record(block)?;
        f(&mut hdr.linkage[self.work_index]);
        self.store_record(block, &hdr)
    }

    //=========================================================================
    // 块数据
    //=========================================================================

    fn data_range(&self, block: BlockIndex) -> Result<(usize, std::ops::Range<usize>)> {
        if !self.contains_block(block) {
            return Err(Error::new(ErrorKind::Internal, "Block index out of range"));
        }
        let page = block.page(self.layout.blocks_per_page());
        let start = self.layout.block_offset_in_page(block);
        Ok((page, start..start + self.layout.block_size() as usize))
    }

    /// 块数据（只读）
    pub(super) fn block_data(&self, block: BlockIndex) -> Result<&[u8]> {
        let (page, range) = self.data_range(block)?;
        self.pages[page]
            .bytes()
            .get(range)
            .ok_or(Error::new(ErrorKind::Internal, "Data block outside its page"))
    }

    /// 块数据（可写），所在页登记为待刷盘
    pub(super) fn block_data_mut(&mut self, block: BlockIndex) -> Result<&mut [u8]> {
        let (page, range) = self.data_range(block)?;
        self.dirty_pages.insert(page);
        self.pages[page]
            .bytes_mut()?
            .get_mut(range)
            .ok_or(Error::new(ErrorKind::Internal, "Data block outside its page"))
    }

    //=========================================================================
    // 刷盘与保护
    //=========================================================================

    /// 刷盘：文件头和所有脏页
    pub(super) fn flush_dirty(&mut self) -> Result<()> {
        self.header.sync()?;
        for &page in &self.dirty_pages {
            if let Some(region) = self.pages.get(page) {
                region.sync()?;
            }
        }
        log::trace!("[JOURNAL] synced header and {} pages", self.dirty_pages.len());
        self.dirty_pages.clear();
        Ok(())
    }

    /// 设置所有映射区域的访问权限
    pub(super) fn set_region_protection(&mut self, prot: Protection) -> Result<()> {
        self.header.protect(prot)?;
        for region in &mut self.pages {
            region.protect(prot)?;
        }
        Ok(())
    }

    /// 切换内存保护模式
    pub(super) fn set_protection_mode(&mut self, mode: ProtectionMode) -> Result<()> {
        // 只读日志的映射本来就不可写
        if self.mode == Mode::ReadOnly {
            self.protection = mode;
            return Ok(());
        }

        let prot = match mode {
            ProtectionMode::Protected => Protection::READ,
            ProtectionMode::Unprotected => Protection::READ_WRITE,
        };
        self.set_region_protection(prot)?;
        self.protection = mode;
        Ok(())
    }

    //=========================================================================
    // 容量
    //=========================================================================

    /// 设置最大文件大小
    ///
    /// 至少要能容纳文件头和当前所有页，且不少于一页
    pub(super) fn set_max_file_size(&mut self, max_file_size: u64) -> Result<()> {
        let pages = self.layout.max_pages_for(max_file_size);
        if pages == 0 || pages < self.pages.len() as u64 {
            return Err(Error::new(ErrorKind::InvalidMaxFileSize, "Max file size smaller than the journal"));
        }
        self.max_file_size = Some(max_file_size);
        Ok(())
    }

    /// 最大文件大小下可用的总块数
    fn max_total_blocks(&self) -> Option<u64> {
        self.max_file_size
            .map(|max| self.layout.max_pages_for(max) * self.layout.blocks_per_page() as u64)
    }

    /// 空日志所能容纳的最大记录（字节）
    pub(super) fn max_record_size_for_empty_journal(&self) -> Option<u64> {
        self.max_total_blocks()
            .map(|blocks| blocks * self.layout.block_size() as u64)
    }

    /// 当前所能容纳的最大记录（字节）
    pub(super) fn max_record_size(&self) -> Option<u64> {
        self.max_total_blocks().map(|blocks| {
            let ungrown = blocks.saturating_sub(self.total_blocks() as u64);
            (self.state.free.num_blocks as u64 + ungrown) * self.layout.block_size() as u64
        })
    }

    /// 检查 `length` 字节的记录能否放入
    pub(super) fn check_capacity(&self, length: u64) -> Result<()> {
        if length > i32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::MaxRecordSizeForEmptyJournalViolation,
                "Record length out of range",
            ));
        }
        let needed = self.layout.blocks_for(length) * self.layout.block_size() as u64;
        if let Some(limit) = self.max_record_size_for_empty_journal() {
            if needed > limit {
                return Err(Error::new(
                    ErrorKind::MaxRecordSizeForEmptyJournalViolation,
                    "Record can never fit within the max file size",
                ));
            }
        }
        if let Some(limit) = self.max_record_size() {
            if needed > limit {
                return Err(Error::new(
                    ErrorKind::MaxRecordSizeViolation,
                    "Record does not fit in the space currently available",
                ));
            }
        }
        Ok(())
    }

    //=========================================================================
    // 诊断输出
    //=========================================================================

    /// 输出文件头
    pub(super) fn print_header(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let hdr = self.header.bytes();
        let magic = String::from_utf8_lossy(&hdr[HDR_MAGIC_WORD..HDR_MAGIC_WORD + JOURNAL_MAGIC_WORD.len()]);

        writeln!(out, "headerSize              = {}", get_i32(hdr, HDR_HEADER_SIZE))?;
        writeln!(out, "fileVersion             = {}", get_i32(hdr, HDR_FILE_VERSION))?;
        writeln!(out, "magicWord               = {}", magic)?;
        writeln!(out, "optionFlags             = {:#x}", get_i32(hdr, HDR_OPTION_FLAGS))?;
        writeln!(out, "alignmentSize           = {}", get_i32(hdr, HDR_ALIGNMENT_SIZE))?;
        writeln!(out, "blockSize               = {}", get_i32(hdr, HDR_BLOCK_SIZE))?;
        writeln!(out, "blocksPerPage           = {}", get_i32(hdr, HDR_BLOCKS_PER_PAGE))?;
        writeln!(out, "maxConfirmedBytesKept   = {}", get_i32(hdr, HDR_MAX_CONFIRMED_BYTES))?;
        writeln!(out, "maxConfirmedRecordsKept = {}", get_i32(hdr, HDR_MAX_CONFIRMED_RECORDS))?;
        writeln!(out, "userDataLength          = {}", get_i32(hdr, HDR_USER_DATA_LENGTH))?;
        writeln!(
            out,
            "creation                = {:08} {:06}",
            get_i32(hdr, HDR_CREATION_DATE),
            get_i32(hdr, HDR_CREATION_TIME)
        )?;
        writeln!(out, "commitState             = {}", get_i32(hdr, HDR_COMMIT_STATE))?;

        for index in 0..2 {
            let state = self.read_state(index);
            writeln!(out, "stateData[{}]:", index)?;
            for (name, kind) in [("confirmed", ListKind::Confirmed), ("unconfirmed", ListKind::Unconfirmed)] {
                let list = state.list(kind);
                writeln!(
                    out,
                    "    {:<12} head={} tail={} records={} blocks={} bytes={}",
                    name, list.head, list.tail, list.num_records, list.num_blocks, list.num_bytes
                )?;
            }
            writeln!(
                out,
                "    {:<12} head={} blocks={}",
                "free", state.free.head, state.free.num_blocks
            )?;
            writeln!(out, "    {:<12} {}", "pages", state.num_pages)?;
        }
        Ok(())
    }
}
