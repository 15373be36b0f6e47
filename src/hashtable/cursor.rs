//! Обход hash table: first/next с явным курсором и итератор поверх него.
//!
//! Обход корректен только если таблица не мутируется во время прохода.

use super::{EntryId, HashTable};

/// Позиция обхода: текущий бакет и следующая запись в его цепочке.
#[derive(Debug, Clone, Default)]
pub struct HashCursor {
    bucket: usize,
    next: Option<EntryId>,
}

impl<V> HashTable<V> {
    /// Начать обход: вернуть первую запись (в порядке бакетов) и подготовить курсор.
    pub fn first(&self, cursor: &mut HashCursor) -> Option<EntryId> {
        cursor.bucket = 0;
        cursor.next = None;
        self.next(cursor)
    }

    /// Следующая запись обхода.
    pub fn next(&self, cursor: &mut HashCursor) -> Option<EntryId> {
        let buckets = self.buckets.as_slice();
        while cursor.next.is_none() {
            if cursor.bucket >= buckets.len() {
                return None;
            }
            cursor.next = buckets[cursor.bucket];
            cursor.bucket += 1;
        }
        let id = cursor.next?;
        cursor.next = self.entries[id as usize].as_ref().and_then(|e| e.next);
        Some(id)
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            table: self,
            cursor: HashCursor::default(),
        }
    }
}

/// Iterator of (id, key, value) in bucket order.
pub struct Iter<'a, V> {
    table: &'a HashTable<V>,
    cursor: HashCursor,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (EntryId, &'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table;
        let id = table.next(&mut self.cursor)?;
        let e = table.entries[id as usize].as_ref()?;
        Some((id, e.key.as_str(), &e.value))
    }
}
