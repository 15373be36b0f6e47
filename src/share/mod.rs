//! share — shared-memory регион: один писатель, много читателей, epoch GC.
//!
//! Раскладка модулей:
//! - header.rs  — геометрия региона и заголовок (magic/version/crc)
//! - readers.rs — таблица читателей (pid → закреплённый cycle), horizon, чистка мёртвых pid
//! - heap.rs    — region-local heap: size-class free lists + bump
//! - gc.rs      — write_lock/write_unlock, очередь мусора в порядке циклов
//! - symbols.rs — append-only каталог name → offset/value
//! - lock.rs    — fs2 lock-файл единственного писателя
//!
//! Файлы: `<dir>/<name>.shm` (сам регион) и `<dir>/<name>.lock`.
//! Все ссылки внутри региона — смещения от базы (0 = нет), адрес маппинга у каждого процесса свой.

use anyhow::{Context, Result};
use log::{info, warn};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::TableConfig;
use crate::consts::{CYCLE_FIRST, SHARE_FILE_EXT, SHARE_LOCK_EXT};

pub mod error;
pub mod gc;
pub mod header;
pub mod heap;
mod lock;
pub mod readers;
pub mod symbols;

pub use error::ShareError;
pub use header::ShareLayout;
pub use readers::ReaderInfo;
pub use symbols::{Symbol, SymbolKind};

use gc::WriterState;
use header::{HEADER_SIZE, OFF_CYCLE, OFF_HEAP_TOP, OFF_SYMBOL_COUNT, OFF_WRITER_PID};

/// Сырой доступ к замапленному региону по смещениям.
/// Поля, которые читают другие процессы, трогаются только через атомики.
#[derive(Debug)]
pub(crate) struct Region {
    name: String,
    base: *mut u8,
    len: u64,
    layout: ShareLayout,
}

impl Region {
    #[inline]
    fn in_bounds(&self, off: u64, len: u64) -> bool {
        off.checked_add(len).map(|end| end <= self.len).unwrap_or(false)
    }

    pub(crate) fn atomic_u64(&self, off: u64) -> &AtomicU64 {
        assert!(
            off % 8 == 0 && self.in_bounds(off, 8),
            "share '{}': bad u64 slot offset {}",
            self.name,
            off
        );
        // SAFETY: смещение выровнено и лежит внутри маппинга, который живёт дольше &self.
        unsafe { &*(self.base.add(off as usize) as *const AtomicU64) }
    }

    pub(crate) fn atomic_u32(&self, off: u64) -> &AtomicU32 {
        assert!(
            off % 4 == 0 && self.in_bounds(off, 4),
            "share '{}': bad u32 slot offset {}",
            self.name,
            off
        );
        // SAFETY: см. atomic_u64.
        unsafe { &*(self.base.add(off as usize) as *const AtomicU32) }
    }

    /// Байты региона; None при выходе за границы (битое смещение у читателя).
    pub(crate) fn bytes(&self, off: u64, len: u64) -> Option<&[u8]> {
        if !self.in_bounds(off, len) {
            return None;
        }
        // SAFETY: диапазон проверен выше.
        Some(unsafe { std::slice::from_raw_parts(self.base.add(off as usize), len as usize) })
    }

    /// Запись в блок писателя (смещения приходят из heap_alloc).
    pub(crate) fn write_bytes(&self, off: u64, data: &[u8]) {
        assert!(
            self.in_bounds(off, data.len() as u64),
            "share '{}': write of {} bytes at {} out of region",
            self.name,
            data.len(),
            off
        );
        // SAFETY: диапазон проверен; писатель единственный, читатели не видят блок до публикации.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(off as usize), data.len())
        }
    }

    #[inline]
    pub(crate) fn cycle(&self) -> &AtomicU64 {
        self.atomic_u64(OFF_CYCLE as u64)
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn layout(&self) -> &ShareLayout {
        &self.layout
    }
}

enum Role {
    Writer(WriterState),
    Reader { slot: u32 },
}

/// Один shared-регион глазами текущего процесса.
pub struct Share {
    region: Region,
    path: PathBuf,
    role: Role,
    // держит маппинг живым; после получения base не трогаем
    _map: MmapMut,
}

// Регион принадлежит Share, а межпроцессные поля меняются только атомиками.
unsafe impl Send for Share {}

fn validate_share_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        && !name.starts_with('.');
    if !ok {
        anyhow::bail!("invalid share name '{}'", name);
    }
    Ok(())
}

pub fn region_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, SHARE_FILE_EXT))
}

pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, SHARE_LOCK_EXT))
}

impl Share {
    /// Создать (или пересоздать) регион и стать его писателем.
    pub fn create(name: &str, cfg: &TableConfig) -> Result<Self> {
        validate_share_name(name)?;
        let dir = cfg.resolved_share_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create share dir {}", dir.display()))?;

        let layout = ShareLayout::plan(name, cfg)?;
        let writer_lock = lock::try_acquire_writer(name, &lock_path(&dir, name))?;

        let path = region_path(&dir, name);
        // старый файл не переписываем: читатели прежнего писателя держат его inode
        match std::fs::remove_file(&path) {
            Ok(()) => info!("share '{}': replacing previous region {}", name, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("remove stale share file {}", path.display()));
            }
        }
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create share file {}", path.display()))?;
        f.set_len(layout.region_size)
            .with_context(|| format!("set_len {} on {}", layout.region_size, path.display()))?;

        let mut map = unsafe {
            MmapOptions::new()
                .len(layout.region_size as usize)
                .map_mut(&f)
                .with_context(|| format!("mmap {}", path.display()))?
        };
        let addr = map.as_ptr() as u64;
        map[..OFF_WRITER_PID].copy_from_slice(&layout.encode(addr));
        let base = map.as_mut_ptr();

        let region = Region {
            name: name.to_string(),
            base,
            len: layout.region_size,
            layout,
        };
        region
            .atomic_u32(OFF_WRITER_PID as u64)
            .store(std::process::id(), Ordering::SeqCst);
        region.atomic_u64(OFF_SYMBOL_COUNT as u64).store(0, Ordering::SeqCst);
        region
            .atomic_u64(OFF_HEAP_TOP as u64)
            .store(layout.heap_start, Ordering::SeqCst);
        region.cycle().store(CYCLE_FIRST, Ordering::SeqCst);

        info!(
            "share '{}' created at {} ({} bytes, {} reader slots, heap {}..{})",
            name,
            path.display(),
            layout.region_size,
            layout.max_readers,
            layout.heap_start,
            layout.heap_end
        );

        Ok(Self {
            region,
            path,
            role: Role::Writer(WriterState::new(writer_lock, cfg.grace_window)),
            _map: map,
        })
    }

    /// Подключиться к существующему региону читателем (занимает слот в таблице читателей).
    pub fn attach(name: &str, cfg: &TableConfig) -> Result<Self> {
        validate_share_name(name)?;
        let dir = cfg.resolved_share_dir();
        let path = region_path(&dir, name);
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open share file {}", path.display()))?;
        let file_len = f
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        if file_len < HEADER_SIZE as u64 {
            return Err(ShareError::Undersized {
                name: name.to_string(),
                size: file_len,
                need: HEADER_SIZE as u64,
            }
            .into());
        }

        let mut map = unsafe {
            MmapOptions::new()
                .len(file_len as usize)
                .map_mut(&f)
                .with_context(|| format!("mmap {}", path.display()))?
        };
        let layout = ShareLayout::decode(name, &map[..HEADER_SIZE], file_len)?;
        let writer_addr = ShareLayout::base_addr(&map[..HEADER_SIZE]);
        let base = map.as_mut_ptr();

        let region = Region {
            name: name.to_string(),
            base,
            len: layout.region_size,
            layout,
        };
        let slot = region.claim_reader_slot(std::process::id())?;

        info!(
            "share '{}' attached from {} (reader slot {}, writer mapped at {:#x}, here {:#x})",
            name,
            path.display(),
            slot,
            writer_addr,
            base as u64
        );

        Ok(Self {
            region,
            path,
            role: Role::Reader { slot },
            _map: map,
        })
    }

    /// Удалить файлы региона (маппинги у уже подключённых процессов остаются валидными).
    pub fn unlink(name: &str, cfg: &TableConfig) -> Result<()> {
        let dir = cfg.resolved_share_dir();
        for p in [region_path(&dir, name), lock_path(&dir, name)] {
            match std::fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("remove {}", p.display()));
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.region.name()
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn layout(&self) -> &ShareLayout {
        self.region.layout()
    }

    #[inline]
    pub fn is_writer(&self) -> bool {
        matches!(self.role, Role::Writer(_))
    }

    /// Текущий цикл писателя.
    #[inline]
    pub fn cycle(&self) -> u64 {
        self.region.cycle().load(Ordering::SeqCst)
    }

    /// Pid писателя, создавшего регион.
    pub fn writer_pid(&self) -> u32 {
        self.region
            .atomic_u32(OFF_WRITER_PID as u64)
            .load(Ordering::SeqCst)
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    fn not_writer(&self) -> ShareError {
        ShareError::NotWriter {
            name: self.name().to_string(),
        }
    }

    /// Байты региона по смещению (для разбора опубликованных записей).
    pub fn bytes(&self, off: u64, len: u64) -> Option<&[u8]> {
        self.region.bytes(off, len)
    }

    /// Записать данные в собственный блок писателя.
    pub fn write(&mut self, off: u64, data: &[u8]) -> Result<(), ShareError> {
        if !self.is_writer() {
            return Err(self.not_writer());
        }
        self.region.write_bytes(off, data);
        Ok(())
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        match &self.role {
            Role::Reader { slot } => self.region.release_reader_slot(*slot),
            Role::Writer(w) => {
                if w.pending() > 0 {
                    warn!(
                        "share '{}': writer detaching with {} unreclaimed blocks",
                        self.region.name(),
                        w.pending()
                    );
                }
            }
        }
    }
}
