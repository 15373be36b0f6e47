//! Region-local heap (только писатель).
//!
//! Блок = [class u32][magic u32] + payload размера 2^class.
//! - свободные блоки лежат в free list своего класса (next — первые 8 байт payload);
//! - если список пуст, блок отрезается от bump-вершины heap_top;
//! - исчерпание кучи — None, не паника;
//! - magic блока: LIVE → QUEUED (free, ждёт GC) → FREE (в free list).

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::consts::{
    BLOCK_HDR_SIZE, BLOCK_MAGIC_FREE, BLOCK_MAGIC_LIVE, BLOCK_MAGIC_QUEUED, HEAP_CLASSES,
    HEAP_MIN_CLASS, NO_OFFSET,
};
use crate::metrics::record_share_alloc;

use super::header::{OFF_FREE_HEADS, OFF_HEAP_TOP};
use super::Region;

/// Индекс size-класса для payload `size` байт. None — больше самого крупного класса.
pub fn size_class(size: u64) -> Option<usize> {
    let size = size.max(1u64 << HEAP_MIN_CLASS);
    let bits = 64 - (size - 1).leading_zeros();
    let idx = (bits - HEAP_MIN_CLASS) as usize;
    (idx < HEAP_CLASSES).then_some(idx)
}

#[inline]
pub fn class_payload(idx: usize) -> u64 {
    1u64 << (idx as u32 + HEAP_MIN_CLASS)
}

/// Снимок заполнения кучи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    pub heap_start: u64,
    pub heap_top: u64,
    pub heap_end: u64,
    /// Блоки, лежащие в free lists.
    pub free_blocks: u64,
}

impl HeapUsage {
    pub fn bump_used(&self) -> u64 {
        self.heap_top - self.heap_start
    }

    pub fn bump_left(&self) -> u64 {
        self.heap_end - self.heap_top
    }
}

impl Region {
    #[inline]
    fn free_head(&self, idx: usize) -> &AtomicU64 {
        self.atomic_u64(OFF_FREE_HEADS as u64 + idx as u64 * 8)
    }

    #[inline]
    fn heap_top(&self) -> &AtomicU64 {
        self.atomic_u64(OFF_HEAP_TOP as u64)
    }

    fn block_header(&self, payload: u64) -> Option<(u32, u32)> {
        if payload < self.layout.heap_start + BLOCK_HDR_SIZE {
            return None;
        }
        let hdr = self.bytes(payload - BLOCK_HDR_SIZE, BLOCK_HDR_SIZE)?;
        Some((
            LittleEndian::read_u32(&hdr[0..4]),
            LittleEndian::read_u32(&hdr[4..8]),
        ))
    }

    fn set_block_header(&self, payload: u64, class: u32, magic: u32) {
        let mut hdr = [0u8; BLOCK_HDR_SIZE as usize];
        LittleEndian::write_u32(&mut hdr[0..4], class);
        LittleEndian::write_u32(&mut hdr[4..8], magic);
        self.write_bytes(payload - BLOCK_HDR_SIZE, &hdr);
    }

    /// Класс живого блока; None — по смещению нет живого блока.
    pub(crate) fn live_block_class(&self, payload: u64) -> Option<usize> {
        match self.block_header(payload)? {
            (class, BLOCK_MAGIC_LIVE) if (class as usize) < HEAP_CLASSES => Some(class as usize),
            _ => None,
        }
    }

    pub(crate) fn heap_alloc(&self, size: u64) -> Option<u64> {
        let idx = match size_class(size) {
            Some(i) => i,
            None => {
                record_share_alloc(false);
                warn!("share '{}': allocation of {} bytes exceeds largest class", self.name, size);
                return None;
            }
        };

        let head = self.free_head(idx).load(Ordering::Acquire);
        if head != NO_OFFSET {
            let next = self
                .bytes(head, 8)
                .map(LittleEndian::read_u64)
                .unwrap_or(NO_OFFSET);
            self.free_head(idx).store(next, Ordering::Release);
            self.set_block_header(head, idx as u32, BLOCK_MAGIC_LIVE);
            record_share_alloc(true);
            return Some(head);
        }

        let total = BLOCK_HDR_SIZE + class_payload(idx);
        let top = self.heap_top().load(Ordering::Acquire);
        let end = match top.checked_add(total) {
            Some(e) if e <= self.layout.heap_end => e,
            _ => {
                record_share_alloc(false);
                warn!(
                    "share '{}': heap exhausted ({} bytes requested, {} left)",
                    self.name,
                    total,
                    self.layout.heap_end.saturating_sub(top)
                );
                return None;
            }
        };
        let payload = top + BLOCK_HDR_SIZE;
        self.set_block_header(payload, idx as u32, BLOCK_MAGIC_LIVE);
        self.heap_top().store(end, Ordering::Release);
        record_share_alloc(true);
        Some(payload)
    }

    /// Пометить живой блок как стоящий в очереди мусора. None — по смещению нет живого блока
    /// (в том числе блок уже в очереди).
    pub(crate) fn mark_queued(&self, payload: u64) -> Option<usize> {
        let idx = self.live_block_class(payload)?;
        self.set_block_header(payload, idx as u32, BLOCK_MAGIC_QUEUED);
        Some(idx)
    }

    /// Вернуть блок из очереди мусора в free list его класса. Вызывается только GC после
    /// grace window. false — блок не в очереди, пропущен.
    pub(crate) fn heap_reclaim(&self, payload: u64) -> bool {
        let idx = match self.block_header(payload) {
            Some((class, BLOCK_MAGIC_QUEUED)) if (class as usize) < HEAP_CLASSES => class as usize,
            _ => {
                warn!(
                    "share '{}': skip reclaim of block at offset {} (not queued)",
                    self.name, payload
                );
                return false;
            }
        };
        self.set_block_header(payload, idx as u32, BLOCK_MAGIC_FREE);
        let head = self.free_head(idx).load(Ordering::Acquire);
        let mut next = [0u8; 8];
        LittleEndian::write_u64(&mut next, head);
        self.write_bytes(payload, &next);
        self.free_head(idx).store(payload, Ordering::Release);
        true
    }

    pub(crate) fn heap_usage(&self) -> HeapUsage {
        let mut free_blocks = 0u64;
        for idx in 0..HEAP_CLASSES {
            let mut cur = self.free_head(idx).load(Ordering::Acquire);
            while cur != NO_OFFSET {
                free_blocks += 1;
                cur = match self.bytes(cur, 8) {
                    Some(b) => LittleEndian::read_u64(b),
                    None => NO_OFFSET,
                };
            }
        }
        HeapUsage {
            heap_start: self.layout.heap_start,
            heap_top: self.heap_top().load(Ordering::Acquire),
            heap_end: self.layout.heap_end,
            free_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_round_up_to_power_of_two() {
        assert_eq!(size_class(0), Some(0));
        assert_eq!(size_class(16), Some(0));
        assert_eq!(size_class(17), Some(1));
        assert_eq!(size_class(32), Some(1));
        assert_eq!(size_class(1000), Some(6));
        assert_eq!(class_payload(6), 1024);
        assert_eq!(size_class(u64::MAX), None);
    }
}
