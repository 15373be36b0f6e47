//! hashtable — primary-key index (chained buckets, multiplicative bucket selection).
//!
//! Раскладка:
//! - mod.rs    — HashTable, бакеты (inline → heap), find/find_or_insert/insert/delete, рост
//! - cursor.rs — HashCursor (first/next) и итератор
//! - stats.rs  — HashStats (распределение длин цепочек)
//!
//! Политика:
//! - Стартуем с 16 inline-бакетов (без аллокации массива бакетов).
//! - Когда entries / buckets > 3 — растём в 16 раз, пересчитываем downshift/mask, rehash всех записей.
//! - Записи живут в slab (Vec<Option<Entry>>), цепочки — индексы, не указатели.
//! - Внутренней синхронизации нет: single-writer дисциплина на стороне вызывающего.

use std::cmp::Ordering;

use log::debug;

use crate::consts::{
    HASH_GROWTH_SHIFT, HASH_INITIAL_DOWNSHIFT, HASH_INLINE_BUCKETS, HASH_REBUILD_MULTIPLIER,
};
use crate::hash::{key_compare, key_hash, random_index};
use crate::metrics::record_hash_growth;

pub mod cursor;
pub mod stats;

pub use cursor::{HashCursor, Iter};
pub use stats::HashStats;

/// Stable handle of a live entry (slab index).
pub type EntryId = u32;

#[derive(Debug)]
pub(crate) struct Entry<V> {
    pub(crate) key: String,
    pub(crate) hash: u32,
    pub(crate) next: Option<EntryId>,
    pub(crate) value: V,
}

/// Массив бакетов: inline до первого роста, затем heap.
#[derive(Debug)]
pub(crate) enum Buckets {
    Inline([Option<EntryId>; HASH_INLINE_BUCKETS]),
    Heap(Vec<Option<EntryId>>),
}

impl Buckets {
    #[inline]
    pub(crate) fn as_slice(&self) -> &[Option<EntryId>] {
        match self {
            Buckets::Inline(a) => &a[..],
            Buckets::Heap(v) => v.as_slice(),
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [Option<EntryId>] {
        match self {
            Buckets::Inline(a) => &mut a[..],
            Buckets::Heap(v) => v.as_mut_slice(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}

#[derive(Debug)]
pub struct HashTable<V> {
    pub(crate) buckets: Buckets,
    pub(crate) entries: Vec<Option<Entry<V>>>,
    free: Vec<EntryId>,
    num_entries: usize,
    down_shift: u32,
    mask: u32,
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    pub fn new() -> Self {
        Self {
            buckets: Buckets::Inline([None; HASH_INLINE_BUCKETS]),
            entries: Vec::new(),
            free: Vec::new(),
            num_entries: 0,
            down_shift: HASH_INITIAL_DOWNSHIFT,
            mask: (HASH_INLINE_BUCKETS - 1) as u32,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.num_entries
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// true, пока таблица ещё не выросла из inline-массива.
    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self.buckets, Buckets::Inline(_))
    }

    #[inline]
    fn index_of(&self, hash: u32) -> usize {
        random_index(hash, self.down_shift, self.mask)
    }

    #[inline]
    fn entry(&self, id: EntryId) -> Option<&Entry<V>> {
        self.entries.get(id as usize).and_then(|e| e.as_ref())
    }

    /// Найти запись по ключу.
    pub fn find(&self, key: &str) -> Option<EntryId> {
        let hash = key_hash(key.as_bytes());
        let mut cur = self.buckets.as_slice()[self.index_of(hash)];
        while let Some(id) = cur {
            let e = match self.entry(id) {
                Some(e) => e,
                None => panic!("hashtable: bucket chain references dead entry {}", id),
            };
            if e.hash == hash && key_compare(&e.key, key) == Ordering::Equal {
                return Some(id);
            }
            cur = e.next;
        }
        None
    }

    /// Найти запись или вставить новую со значением из `factory`.
    /// Возвращает (id, was_new).
    pub fn find_or_insert<F>(&mut self, key: &str, factory: F) -> (EntryId, bool)
    where
        F: FnOnce() -> V,
    {
        if let Some(id) = self.find(key) {
            return (id, false);
        }
        let hash = key_hash(key.as_bytes());
        let idx = self.index_of(hash);
        let head = self.buckets.as_slice()[idx];
        let entry = Entry {
            key: key.to_string(),
            hash,
            next: head,
            value: factory(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as EntryId
            }
        };
        self.buckets.as_mut_slice()[idx] = Some(id);
        self.num_entries += 1;

        if self.num_entries > self.buckets.len() * HASH_REBUILD_MULTIPLIER {
            self.rebuild();
        }
        (id, true)
    }

    /// Вставить или заменить значение. Возвращает предыдущее значение, если ключ уже был.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        if let Some(id) = self.find(key) {
            return self.get_mut(id).map(|old| std::mem::replace(old, value));
        }
        self.find_or_insert(key, || value);
        None
    }

    #[inline]
    pub fn get(&self, id: EntryId) -> Option<&V> {
        self.entry(id).map(|e| &e.value)
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut V> {
        self.entries
            .get_mut(id as usize)
            .and_then(|e| e.as_mut())
            .map(|e| &mut e.value)
    }

    #[inline]
    pub fn key(&self, id: EntryId) -> Option<&str> {
        self.entry(id).map(|e| e.key.as_str())
    }

    /// Удобство: значение по ключу.
    pub fn lookup(&self, key: &str) -> Option<&V> {
        self.find(key).and_then(|id| self.get(id))
    }

    /// Удалить запись по id. Возвращает (key, value) или None для мёртвого id.
    pub fn delete(&mut self, id: EntryId) -> Option<(String, V)> {
        let (hash, next) = match self.entry(id) {
            Some(e) => (e.hash, e.next),
            None => return None,
        };
        let idx = self.index_of(hash);

        // Найти, чей next указывает на id: голова бакета или предыдущая запись.
        if self.buckets.as_slice()[idx] == Some(id) {
            self.buckets.as_mut_slice()[idx] = next;
        } else {
            let mut prev = self.buckets.as_slice()[idx];
            loop {
                let p = match prev {
                    Some(p) => p,
                    None => panic!("hashtable: malformed bucket chain, entry {} not in bucket {}", id, idx),
                };
                let pe = self.entries[p as usize]
                    .as_mut()
                    .unwrap_or_else(|| panic!("hashtable: bucket chain references dead entry {}", p));
                if pe.next == Some(id) {
                    pe.next = next;
                    break;
                }
                prev = pe.next;
            }
        }

        let e = self.entries[id as usize].take()?;
        self.free.push(id);
        self.num_entries -= 1;
        Some((e.key, e.value))
    }

    /// Удалить по ключу.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let id = self.find(key)?;
        self.delete(id).map(|(_, v)| v)
    }

    /// Рост в 16 раз: новый массив бакетов, пересчёт downshift/mask, rehash.
    fn rebuild(&mut self) {
        if self.down_shift < HASH_GROWTH_SHIFT {
            return;
        }
        let old_len = self.buckets.len();
        let new_len = old_len << HASH_GROWTH_SHIFT;
        self.down_shift -= HASH_GROWTH_SHIFT;
        self.mask = (self.mask << HASH_GROWTH_SHIFT) | ((1 << HASH_GROWTH_SHIFT) - 1);

        let mut new_buckets: Vec<Option<EntryId>> = vec![None; new_len];
        let old = std::mem::replace(&mut self.buckets, Buckets::Heap(Vec::new()));
        for &head in old.as_slice() {
            let mut cur = head;
            while let Some(id) = cur {
                let e = self.entries[id as usize]
                    .as_mut()
                    .unwrap_or_else(|| panic!("hashtable: rehash hit dead entry {}", id));
                cur = e.next;
                let idx = random_index(e.hash, self.down_shift, self.mask);
                e.next = new_buckets[idx];
                new_buckets[idx] = Some(id);
            }
        }
        self.buckets = Buckets::Heap(new_buckets);
        record_hash_growth();
        debug!(
            "hashtable: grew {} -> {} buckets ({} entries)",
            old_len, new_len, self.num_entries
        );
    }

    /// Убрать все записи и вернуться к inline-бакетам.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
