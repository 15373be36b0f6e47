//! Lightweight global metrics for SpeedTable.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Hash table (рост)
//! - Skip list / intrusive lists
//! - Shared region (аллокации, GC, читатели)
//! - Search engine

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Hash table -----
static HASH_GROWTHS: AtomicU64 = AtomicU64::new(0);

// ----- Skip list -----
static SKIP_INSERTS: AtomicU64 = AtomicU64::new(0);
static SKIP_ERASES: AtomicU64 = AtomicU64::new(0);

// ----- Lists -----
static LIST_INSERTS: AtomicU64 = AtomicU64::new(0);
static LIST_REMOVES: AtomicU64 = AtomicU64::new(0);

// ----- Share -----
static SHARE_ALLOCS: AtomicU64 = AtomicU64::new(0);
static SHARE_ALLOC_FAILURES: AtomicU64 = AtomicU64::new(0);
static SHARE_FREES_QUEUED: AtomicU64 = AtomicU64::new(0);
static GC_RECLAIMED: AtomicU64 = AtomicU64::new(0);
static READERS_PURGED: AtomicU64 = AtomicU64::new(0);

// ----- Search -----
static SEARCHES: AtomicU64 = AtomicU64::new(0);
static ROWS_MATCHED: AtomicU64 = AtomicU64::new(0);
static ROWS_DELIVERED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub hash_growths: u64,

    pub skip_inserts: u64,
    pub skip_erases: u64,

    pub list_inserts: u64,
    pub list_removes: u64,

    pub share_allocs: u64,
    pub share_alloc_failures: u64,
    pub share_frees_queued: u64,
    pub gc_reclaimed: u64,
    pub readers_purged: u64,

    pub searches: u64,
    pub rows_matched: u64,
    pub rows_delivered: u64,
}

impl MetricsSnapshot {
    /// Доля отложенных освобождений, которые уже физически переиспользованы.
    pub fn gc_reclaim_ratio(&self) -> f64 {
        if self.share_frees_queued == 0 {
            0.0
        } else {
            self.gc_reclaimed as f64 / self.share_frees_queued as f64
        }
    }

    pub fn delivered_per_search(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            self.rows_delivered as f64 / self.searches as f64
        }
    }
}

pub fn record_hash_growth() {
    HASH_GROWTHS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_skip_insert() {
    SKIP_INSERTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_skip_erase() {
    SKIP_ERASES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_list_insert() {
    LIST_INSERTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_list_remove() {
    LIST_REMOVES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_share_alloc(ok: bool) {
    if ok {
        SHARE_ALLOCS.fetch_add(1, Ordering::Relaxed);
    } else {
        SHARE_ALLOC_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}
pub fn record_share_free_queued() {
    SHARE_FREES_QUEUED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_gc_reclaimed(blocks: u64) {
    GC_RECLAIMED.fetch_add(blocks, Ordering::Relaxed);
}
pub fn record_reader_purged() {
    READERS_PURGED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_search(matched: u64, delivered: u64) {
    SEARCHES.fetch_add(1, Ordering::Relaxed);
    ROWS_MATCHED.fetch_add(matched, Ordering::Relaxed);
    ROWS_DELIVERED.fetch_add(delivered, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        hash_growths: HASH_GROWTHS.load(Ordering::Relaxed),

        skip_inserts: SKIP_INSERTS.load(Ordering::Relaxed),
        skip_erases: SKIP_ERASES.load(Ordering::Relaxed),

        list_inserts: LIST_INSERTS.load(Ordering::Relaxed),
        list_removes: LIST_REMOVES.load(Ordering::Relaxed),

        share_allocs: SHARE_ALLOCS.load(Ordering::Relaxed),
        share_alloc_failures: SHARE_ALLOC_FAILURES.load(Ordering::Relaxed),
        share_frees_queued: SHARE_FREES_QUEUED.load(Ordering::Relaxed),
        gc_reclaimed: GC_RECLAIMED.load(Ordering::Relaxed),
        readers_purged: READERS_PURGED.load(Ordering::Relaxed),

        searches: SEARCHES.load(Ordering::Relaxed),
        rows_matched: ROWS_MATCHED.load(Ordering::Relaxed),
        rows_delivered: ROWS_DELIVERED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    HASH_GROWTHS.store(0, Ordering::Relaxed);

    SKIP_INSERTS.store(0, Ordering::Relaxed);
    SKIP_ERASES.store(0, Ordering::Relaxed);

    LIST_INSERTS.store(0, Ordering::Relaxed);
    LIST_REMOVES.store(0, Ordering::Relaxed);

    SHARE_ALLOCS.store(0, Ordering::Relaxed);
    SHARE_ALLOC_FAILURES.store(0, Ordering::Relaxed);
    SHARE_FREES_QUEUED.store(0, Ordering::Relaxed);
    GC_RECLAIMED.store(0, Ordering::Relaxed);
    READERS_PURGED.store(0, Ordering::Relaxed);

    SEARCHES.store(0, Ordering::Relaxed);
    ROWS_MATCHED.store(0, Ordering::Relaxed);
    ROWS_DELIVERED.store(0, Ordering::Relaxed);
}
