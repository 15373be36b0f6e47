//! Раскладка shared-региона и заголовок.
//!
//! Все ссылки внутри региона — смещения от его начала (0 = "нет"), поэтому каждый процесс
//! может мапить регион по любому адресу. Поле base_addr хранит адрес маппинга писателя
//! только для диагностики и при attach не сравнивается.
//!
//! Заголовок (LE):
//!   0   magic [8]
//!   8   version u32
//!   12  header_size u32
//!   16  region_size u64
//!   24  hash_kind u32
//!   28  max_readers u32
//!   32  max_symbols u32
//!   36  reserved u32
//!   40  reader_off u64
//!   48  symbol_off u64
//!   56  heap_start u64
//!   64  heap_end u64
//!   72  base_addr u64 (diagnostic)
//!   80  crc32 u32 по байтам [0..80)
//!   84  writer_pid u32     (atomic)
//!   88  cycle u64          (atomic)
//!   96  symbol_count u64   (atomic, Release при публикации)
//!   104 heap_top u64       (atomic)
//!   112 free_heads[HEAP_CLASSES] u64 (atomic)
//!
//! Далее: таблица читателей (max_readers * READER_ENTRY_SIZE), каталог символов
//! (max_symbols * SYMBOL_ENTRY_SIZE), куча до конца региона.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::TableConfig;
use crate::consts::{
    HEAP_CLASSES, READER_ENTRY_SIZE, SHARE_ALIGN, SHARE_MAGIC, SHARE_VERSION, SYMBOL_ENTRY_SIZE,
};
use crate::hash::HASH_KIND_DEFAULT;

use super::ShareError;

pub const OFF_MAGIC: usize = 0;
pub const OFF_VERSION: usize = 8;
pub const OFF_HEADER_SIZE: usize = 12;
pub const OFF_REGION_SIZE: usize = 16;
pub const OFF_HASH_KIND: usize = 24;
pub const OFF_MAX_READERS: usize = 28;
pub const OFF_MAX_SYMBOLS: usize = 32;
pub const OFF_READER_OFF: usize = 40;
pub const OFF_SYMBOL_OFF: usize = 48;
pub const OFF_HEAP_START: usize = 56;
pub const OFF_HEAP_END: usize = 64;
pub const OFF_BASE_ADDR: usize = 72;
pub const OFF_CRC: usize = 80;
pub const OFF_WRITER_PID: usize = 84;
pub const OFF_CYCLE: usize = 88;
pub const OFF_SYMBOL_COUNT: usize = 96;
pub const OFF_HEAP_TOP: usize = 104;
pub const OFF_FREE_HEADS: usize = 112;

/// Иммутабельная часть, покрытая crc.
pub const CRC_COVERED: usize = OFF_CRC;

/// Полный размер заголовка (выровнен).
pub const HEADER_SIZE: usize = align_up_usize(OFF_FREE_HEADS + HEAP_CLASSES * 8, 64);

/// Минимальная куча, без которой регион бессмысленен.
pub const MIN_HEAP_BYTES: u64 = 4096;

const fn align_up_usize(v: usize, a: usize) -> usize {
    (v + a - 1) / a * a
}

#[inline]
pub fn align_up(v: u64, a: u64) -> u64 {
    (v + a - 1) / a * a
}

/// Геометрия региона (иммутабельна после create).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareLayout {
    pub region_size: u64,
    pub hash_kind: u32,
    pub max_readers: u32,
    pub max_symbols: u32,
    pub reader_off: u64,
    pub symbol_off: u64,
    pub heap_start: u64,
    pub heap_end: u64,
}

impl ShareLayout {
    /// Раскладка для нового региона. Undersized — если под кучу не остаётся места.
    pub fn plan(name: &str, cfg: &TableConfig) -> Result<Self, ShareError> {
        let reader_off = HEADER_SIZE as u64;
        let symbol_off = reader_off + cfg.share_readers as u64 * READER_ENTRY_SIZE;
        let heap_start = align_up(
            symbol_off + cfg.share_symbols as u64 * SYMBOL_ENTRY_SIZE,
            SHARE_ALIGN,
        );
        let need = heap_start + MIN_HEAP_BYTES;
        if cfg.share_size < need {
            return Err(ShareError::Undersized {
                name: name.to_string(),
                size: cfg.share_size,
                need,
            });
        }
        let region_size = cfg.share_size / SHARE_ALIGN * SHARE_ALIGN;
        Ok(Self {
            region_size,
            hash_kind: HASH_KIND_DEFAULT.to_u32(),
            max_readers: cfg.share_readers,
            max_symbols: cfg.share_symbols,
            reader_off,
            symbol_off,
            heap_start,
            heap_end: region_size,
        })
    }

    /// Сериализовать иммутабельную часть заголовка (с crc).
    pub fn encode(&self, base_addr: u64) -> [u8; OFF_WRITER_PID] {
        let mut buf = [0u8; OFF_WRITER_PID];
        buf[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(SHARE_MAGIC);
        LittleEndian::write_u32(&mut buf[OFF_VERSION..OFF_VERSION + 4], SHARE_VERSION);
        LittleEndian::write_u32(
            &mut buf[OFF_HEADER_SIZE..OFF_HEADER_SIZE + 4],
            HEADER_SIZE as u32,
        );
        LittleEndian::write_u64(&mut buf[OFF_REGION_SIZE..OFF_REGION_SIZE + 8], self.region_size);
        LittleEndian::write_u32(&mut buf[OFF_HASH_KIND..OFF_HASH_KIND + 4], self.hash_kind);
        LittleEndian::write_u32(&mut buf[OFF_MAX_READERS..OFF_MAX_READERS + 4], self.max_readers);
        LittleEndian::write_u32(&mut buf[OFF_MAX_SYMBOLS..OFF_MAX_SYMBOLS + 4], self.max_symbols);
        LittleEndian::write_u64(&mut buf[OFF_READER_OFF..OFF_READER_OFF + 8], self.reader_off);
        LittleEndian::write_u64(&mut buf[OFF_SYMBOL_OFF..OFF_SYMBOL_OFF + 8], self.symbol_off);
        LittleEndian::write_u64(&mut buf[OFF_HEAP_START..OFF_HEAP_START + 8], self.heap_start);
        LittleEndian::write_u64(&mut buf[OFF_HEAP_END..OFF_HEAP_END + 8], self.heap_end);
        LittleEndian::write_u64(&mut buf[OFF_BASE_ADDR..OFF_BASE_ADDR + 8], base_addr);
        let crc = crc32fast::hash(&buf[..CRC_COVERED]);
        LittleEndian::write_u32(&mut buf[OFF_CRC..OFF_CRC + 4], crc);
        buf
    }

    /// Разобрать и проверить заголовок существующего региона.
    /// `file_len` — фактический размер файла/маппинга.
    pub fn decode(name: &str, hdr: &[u8], file_len: u64) -> Result<Self, ShareError> {
        if (hdr.len() as u64) < HEADER_SIZE as u64 || file_len < HEADER_SIZE as u64 {
            return Err(ShareError::Undersized {
                name: name.to_string(),
                size: file_len,
                need: HEADER_SIZE as u64,
            });
        }
        if &hdr[OFF_MAGIC..OFF_MAGIC + 8] != SHARE_MAGIC {
            return Err(ShareError::BadMagic {
                name: name.to_string(),
            });
        }
        let version = LittleEndian::read_u32(&hdr[OFF_VERSION..OFF_VERSION + 4]);
        if version != SHARE_VERSION {
            return Err(ShareError::BadVersion {
                name: name.to_string(),
                found: version,
            });
        }
        let header_size = LittleEndian::read_u32(&hdr[OFF_HEADER_SIZE..OFF_HEADER_SIZE + 4]);
        if header_size != HEADER_SIZE as u32 {
            return Err(ShareError::HeaderSize {
                name: name.to_string(),
                found: header_size,
                expected: HEADER_SIZE as u32,
            });
        }
        let stored_crc = LittleEndian::read_u32(&hdr[OFF_CRC..OFF_CRC + 4]);
        if crc32fast::hash(&hdr[..CRC_COVERED]) != stored_crc {
            return Err(ShareError::HeaderChecksum {
                name: name.to_string(),
            });
        }

        let layout = Self {
            region_size: LittleEndian::read_u64(&hdr[OFF_REGION_SIZE..OFF_REGION_SIZE + 8]),
            hash_kind: LittleEndian::read_u32(&hdr[OFF_HASH_KIND..OFF_HASH_KIND + 4]),
            max_readers: LittleEndian::read_u32(&hdr[OFF_MAX_READERS..OFF_MAX_READERS + 4]),
            max_symbols: LittleEndian::read_u32(&hdr[OFF_MAX_SYMBOLS..OFF_MAX_SYMBOLS + 4]),
            reader_off: LittleEndian::read_u64(&hdr[OFF_READER_OFF..OFF_READER_OFF + 8]),
            symbol_off: LittleEndian::read_u64(&hdr[OFF_SYMBOL_OFF..OFF_SYMBOL_OFF + 8]),
            heap_start: LittleEndian::read_u64(&hdr[OFF_HEAP_START..OFF_HEAP_START + 8]),
            heap_end: LittleEndian::read_u64(&hdr[OFF_HEAP_END..OFF_HEAP_END + 8]),
        };
        if layout.region_size > file_len || layout.heap_end > layout.region_size {
            return Err(ShareError::Undersized {
                name: name.to_string(),
                size: file_len,
                need: layout.region_size,
            });
        }
        Ok(layout)
    }

    pub fn base_addr(hdr: &[u8]) -> u64 {
        LittleEndian::read_u64(&hdr[OFF_BASE_ADDR..OFF_BASE_ADDR + 8])
    }
}
