//! Таблица читателей: слот = [pid u32][pad u32][cycle u64].
//!
//! pid == 0 — слот свободен; cycle == CYCLE_UNLOCKED — читатель ничего не держит.
//! Мёртвые читатели обнаруживаются лениво, при расчёте horizon (проба pid).

use log::{debug, warn};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::consts::{CYCLE_UNLOCKED, READER_ENTRY_SIZE};
use crate::metrics::record_reader_purged;
use crate::util::pid_alive;

use super::{Region, Role, Share, ShareError};

/// Снимок одного занятого слота (диагностика).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderInfo {
    pub slot: u32,
    pub pid: u32,
    /// None — читатель не держит read_lock.
    pub cycle: Option<u64>,
}

impl Region {
    #[inline]
    fn reader_entry(&self, slot: u32) -> u64 {
        self.layout.reader_off + slot as u64 * READER_ENTRY_SIZE
    }

    #[inline]
    fn reader_pid(&self, slot: u32) -> &AtomicU32 {
        self.atomic_u32(self.reader_entry(slot))
    }

    #[inline]
    fn reader_cycle(&self, slot: u32) -> &AtomicU64 {
        self.atomic_u64(self.reader_entry(slot) + 8)
    }

    fn try_claim(&self, pid: u32) -> Option<u32> {
        (0..self.layout.max_readers).find(|&slot| {
            let ok = self
                .reader_pid(slot)
                .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if ok {
                self.reader_cycle(slot)
                    .store(CYCLE_UNLOCKED, Ordering::SeqCst);
            }
            ok
        })
    }

    /// Занять свободный слот; при заполненной таблице сначала чистим мёртвых.
    pub(crate) fn claim_reader_slot(&self, pid: u32) -> Result<u32, ShareError> {
        if let Some(slot) = self.try_claim(pid) {
            return Ok(slot);
        }
        if self.purge_dead_readers() > 0 {
            if let Some(slot) = self.try_claim(pid) {
                return Ok(slot);
            }
        }
        warn!(
            "share '{}': reader table full ({} slots), attach refused",
            self.name, self.layout.max_readers
        );
        Err(ShareError::ReaderTableFull {
            name: self.name.clone(),
            capacity: self.layout.max_readers,
        })
    }

    pub(crate) fn release_reader_slot(&self, slot: u32) {
        self.reader_cycle(slot)
            .store(CYCLE_UNLOCKED, Ordering::SeqCst);
        self.reader_pid(slot).store(0, Ordering::SeqCst);
    }

    /// Закрепить текущий цикл в слоте читателя.
    pub(crate) fn pin(&self, slot: u32) -> u64 {
        loop {
            let c = self.cycle().load(Ordering::SeqCst);
            self.reader_cycle(slot).store(c, Ordering::SeqCst);
            if self.cycle().load(Ordering::SeqCst) == c {
                return c;
            }
        }
    }

    pub(crate) fn unpin(&self, slot: u32) {
        self.reader_cycle(slot)
            .store(CYCLE_UNLOCKED, Ordering::SeqCst);
    }

    /// Освободить слоты процессов, которых больше нет. Возвращает число очищенных.
    pub(crate) fn purge_dead_readers(&self) -> usize {
        let mut purged = 0;
        for slot in 0..self.layout.max_readers {
            let pid = self.reader_pid(slot).load(Ordering::Acquire);
            if pid == 0 || pid_alive(pid) {
                continue;
            }
            // слот мог смениться между load и проверкой: чистим только если pid тот же
            if self
                .reader_pid(slot)
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.reader_cycle(slot)
                    .store(CYCLE_UNLOCKED, Ordering::SeqCst);
                record_reader_purged();
                debug!(
                    "share '{}': purged dead reader pid {} from slot {}",
                    self.name, pid, slot
                );
                purged += 1;
            }
        }
        purged
    }

    /// Самый старый цикл, который держит живой читатель; без читателей — текущий цикл.
    pub(crate) fn horizon(&self) -> u64 {
        self.purge_dead_readers();
        let current = self.cycle().load(Ordering::SeqCst);
        let mut oldest_age = 0u64;
        for slot in 0..self.layout.max_readers {
            if self.reader_pid(slot).load(Ordering::Acquire) == 0 {
                continue;
            }
            let c = self.reader_cycle(slot).load(Ordering::SeqCst);
            if c == CYCLE_UNLOCKED {
                continue;
            }
            let age = current.wrapping_sub(c);
            // цикл "из будущего" невозможен; считаем его текущим
            if (age as i64) > 0 && age > oldest_age {
                oldest_age = age;
            }
        }
        current.wrapping_sub(oldest_age)
    }

    pub(crate) fn readers(&self) -> Vec<ReaderInfo> {
        (0..self.layout.max_readers)
            .filter_map(|slot| {
                let pid = self.reader_pid(slot).load(Ordering::Acquire);
                if pid == 0 {
                    return None;
                }
                let c = self.reader_cycle(slot).load(Ordering::SeqCst);
                Some(ReaderInfo {
                    slot,
                    pid,
                    cycle: (c != CYCLE_UNLOCKED).then_some(c),
                })
            })
            .collect()
    }
}

impl Share {
    /// Закрепить согласованный вид: записать текущий цикл писателя в свой слот.
    /// У писателя слота нет — возвращается текущий цикл.
    pub fn read_lock(&self) -> u64 {
        match &self.role {
            Role::Reader { slot } => self.region.pin(*slot),
            Role::Writer(_) => self.cycle(),
        }
    }

    /// Снять закрепление (слот получает CYCLE_UNLOCKED).
    pub fn read_unlock(&self) {
        if let Role::Reader { slot } = &self.role {
            self.region.unpin(*slot);
        }
    }

    /// Слот читателя в таблице (None у писателя).
    pub fn reader_slot(&self) -> Option<u32> {
        match &self.role {
            Role::Reader { slot } => Some(*slot),
            Role::Writer(_) => None,
        }
    }

    /// GC horizon с предварительной чисткой мёртвых читателей.
    pub fn horizon(&self) -> u64 {
        self.region.horizon()
    }

    /// Занятые слоты читателей.
    pub fn readers(&self) -> Vec<ReaderInfo> {
        self.region.readers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;

    fn unique_name(tag: &str) -> (String, TableConfig) {
        let suffix = crate::util::unique_suffix();
        let dir = std::env::temp_dir().join(format!("st-readers-{}", suffix));
        let cfg = TableConfig::default()
            .with_share_dir(Some(dir.to_string_lossy().to_string()))
            .with_share_size(256 * 1024)
            .with_share_readers(4);
        (format!("{}-{}", tag, suffix), cfg)
    }

    // pid, которого заведомо нет среди живых процессов
    fn dead_pid() -> u32 {
        let mut pid = 4_000_000;
        while pid_alive(pid) {
            pid += 1;
        }
        pid
    }

    #[test]
    fn dead_reader_is_ignored_by_horizon_and_purged() {
        let (name, cfg) = unique_name("dead");
        let mut w = Share::create(&name, &cfg).unwrap();
        w.write_lock().unwrap();
        w.write_unlock().unwrap();
        let first = w.cycle();

        let region = w.region();
        let slot = region.try_claim(dead_pid()).unwrap();
        region.reader_cycle(slot).store(first, Ordering::SeqCst);

        w.write_lock().unwrap();
        w.write_unlock().unwrap();
        w.write_lock().unwrap();

        // мёртвый читатель не задерживает horizon
        assert_eq!(w.horizon(), w.cycle());
        assert!(w.readers().is_empty());
        w.write_unlock().unwrap();
        Share::unlink(&name, &cfg).unwrap();
    }

    #[test]
    fn full_table_refuses_attach() {
        let (name, cfg) = unique_name("full");
        let _w = Share::create(&name, &cfg).unwrap();
        let readers: Vec<Share> = (0..4).map(|_| Share::attach(&name, &cfg).unwrap()).collect();
        let err = Share::attach(&name, &cfg).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ShareError>(),
            Some(ShareError::ReaderTableFull { capacity: 4, .. })
        ));
        drop(readers);
        assert!(Share::attach(&name, &cfg).is_ok());
        Share::unlink(&name, &cfg).unwrap();
    }
}
