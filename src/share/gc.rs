//! Epoch GC писателя.
//!
//! - write_lock(): cycle += 1 (минуя CYCLE_UNLOCKED при переполнении) до любых изменений;
//! - free(): блок не переиспользуется сразу, а помечается QUEUED и встаёт в очередь
//!   (cycle, offset); повторный free того же блока — BadBlock;
//! - write_unlock(): horizon = самый старый цикл живого читателя; из головы очереди
//!   освобождаются записи, чей цикл удаления старше horizon больше чем на grace window.
//!
//! Очередь упорядочена по циклу, поэтому сбор останавливается на первой защищённой записи.
//! Очередь живёт в памяти процесса-писателя: после его смерти неосвобождённые блоки утекают.

use log::debug;
use std::collections::VecDeque;

use crate::consts::CYCLE_UNLOCKED;
use crate::metrics::{record_gc_reclaimed, record_share_free_queued};

use super::heap::HeapUsage;
use super::lock::WriterLock;
use super::{Role, Share, ShareError};

/// Следующий цикл писателя; sentinel "unlocked" никогда не выдаётся.
#[inline]
pub fn next_cycle(c: u64) -> u64 {
    let n = c.wrapping_add(1);
    if n == CYCLE_UNLOCKED {
        n.wrapping_add(1)
    } else {
        n
    }
}

/// На сколько циклов `c` отстаёт от `horizon` (отрицательно — c новее).
#[inline]
pub fn cycle_age(horizon: u64, c: u64) -> i64 {
    horizon.wrapping_sub(c) as i64
}

#[derive(Debug, Clone, Copy)]
struct Garbage {
    cycle: u64,
    off: u64,
}

pub(crate) struct WriterState {
    lock: WriterLock,
    garbage: VecDeque<Garbage>,
    grace: u64,
    in_write: bool,
}

impl WriterState {
    pub(crate) fn new(lock: WriterLock, grace: u64) -> Self {
        Self {
            lock,
            garbage: VecDeque::new(),
            grace,
            in_write: false,
        }
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.garbage.len()
    }
}

impl Share {
    fn writer_mut(&mut self) -> Result<&mut WriterState, ShareError> {
        match &mut self.role {
            Role::Writer(w) => Ok(w),
            Role::Reader { .. } => Err(ShareError::NotWriter {
                name: self.region.name().to_string(),
            }),
        }
    }

    /// Открыть скобку записи: новый цикл. Повторный вызов внутри скобки цикл не меняет.
    pub fn write_lock(&mut self) -> Result<u64, ShareError> {
        let w = self.writer_mut()?;
        if w.in_write {
            return Ok(self.cycle());
        }
        w.in_write = true;
        let next = next_cycle(self.cycle());
        self.region
            .cycle()
            .store(next, std::sync::atomic::Ordering::SeqCst);
        Ok(next)
    }

    /// Закрыть скобку записи и собрать мусор за horizon. Возвращает число освобождённых блоков.
    pub fn write_unlock(&mut self) -> Result<usize, ShareError> {
        self.writer_mut()?.in_write = false;
        let horizon = self.region.horizon();
        self.collect(horizon)
    }

    /// Внутри скобки записи?
    pub fn in_write(&self) -> bool {
        matches!(&self.role, Role::Writer(w) if w.in_write)
    }

    /// Выделить блок в куче региона. None — куча исчерпана (или вызывающий не писатель).
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if !self.is_writer() {
            return None;
        }
        self.region.heap_alloc(size)
    }

    /// Ёмкость payload живого блока.
    pub fn block_capacity(&self, off: u64) -> Option<u64> {
        self.region.live_block_class(off).map(super::heap::class_payload)
    }

    /// Поставить блок в очередь мусора с текущим циклом.
    /// BadBlock — по смещению нет живого блока (чужое смещение или повторный free).
    pub fn free(&mut self, off: u64) -> Result<(), ShareError> {
        let cycle = self.cycle();
        let Self { region, role, .. } = self;
        let w = match role {
            Role::Writer(w) => w,
            Role::Reader { .. } => {
                return Err(ShareError::NotWriter {
                    name: region.name().to_string(),
                })
            }
        };
        if region.mark_queued(off).is_none() {
            return Err(ShareError::BadBlock {
                name: region.name().to_string(),
                off,
            });
        }
        if let Some(last) = w.garbage.back() {
            debug_assert!(cycle_age(cycle, last.cycle) >= 0, "garbage queue out of cycle order");
        }
        w.garbage.push_back(Garbage { cycle, off });
        record_share_free_queued();
        Ok(())
    }

    /// Блоки, ждущие освобождения.
    pub fn pending_garbage(&self) -> usize {
        match &self.role {
            Role::Writer(w) => w.pending(),
            Role::Reader { .. } => 0,
        }
    }

    pub fn grace_window(&self) -> u64 {
        match &self.role {
            Role::Writer(w) => w.grace,
            Role::Reader { .. } => 0,
        }
    }

    pub fn heap_usage(&self) -> HeapUsage {
        self.region.heap_usage()
    }

    /// Путь lock-файла писателя.
    pub fn lock_path(&self) -> Option<&std::path::Path> {
        match &self.role {
            Role::Writer(w) => Some(w.lock.path()),
            Role::Reader { .. } => None,
        }
    }

    fn collect(&mut self, horizon: u64) -> Result<usize, ShareError> {
        let Self { region, role, .. } = self;
        let w = match role {
            Role::Writer(w) => w,
            Role::Reader { .. } => {
                return Err(ShareError::NotWriter {
                    name: region.name().to_string(),
                })
            }
        };
        let grace = w.grace as i64;
        let mut reclaimed = 0usize;
        while let Some(g) = w.garbage.front().copied() {
            if cycle_age(horizon, g.cycle) <= grace {
                break;
            }
            w.garbage.pop_front();
            if region.heap_reclaim(g.off) {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            record_gc_reclaimed(reclaimed as u64);
            debug!(
                "share '{}': reclaimed {} blocks (horizon {}, grace {}, {} pending)",
                region.name(),
                reclaimed,
                horizon,
                w.grace,
                w.garbage.len()
            );
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_cycle_skips_sentinel() {
        assert_eq!(next_cycle(1), 2);
        assert_eq!(next_cycle(u64::MAX), 1);
        assert_ne!(next_cycle(u64::MAX - 1), CYCLE_UNLOCKED);
    }

    #[test]
    fn age_is_wrap_safe() {
        assert_eq!(cycle_age(10, 7), 3);
        assert_eq!(cycle_age(7, 10), -3);
        assert_eq!(cycle_age(2, u64::MAX - 1), 4);
    }
}
