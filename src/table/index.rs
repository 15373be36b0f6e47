//! Embedded skip-list индексы по полям: forward-ссылки лежат в слоте строки (RowSlot::Skip),
//! отдельных узлов нет.
//!
//! Порядок индекса — (значение поля, ключ строки), поэтому все узлы уникальны и
//! порядок равных значений детерминирован.

use std::cmp::Ordering;

use crate::hash::key_compare;
use crate::hashtable::HashTable;
use crate::list::RowId;
use crate::skiplist::{NodeId, SkipIndex, SkipLinks, SkipStore};

use super::schema::{FieldId, Schema, Value};
use super::{Row, RowSlot};

/// Индекс одного поля.
#[derive(Debug)]
pub(crate) struct FieldIndex {
    pub(crate) field: FieldId,
    pub(crate) slot: usize,
    pub(crate) skip: SkipIndex,
}

/// Только чтение ссылок из слота строки.
pub(crate) struct SlotLinks<'a> {
    pub(crate) rows: &'a HashTable<Row>,
    pub(crate) slot: usize,
}

/// Чтение и запись ссылок из слота строки.
pub(crate) struct SlotLinksMut<'a> {
    pub(crate) rows: &'a mut HashTable<Row>,
    pub(crate) slot: usize,
}

fn links_of(rows: &HashTable<Row>, node: NodeId, slot: usize) -> Option<&Vec<Option<RowId>>> {
    match rows.get(node)?.slots.get(slot)? {
        RowSlot::Skip(links) => Some(links),
        RowSlot::List(_) => panic!("index: slot {} of row {} is a list anchor", slot, node),
    }
}

fn links_of_mut(rows: &mut HashTable<Row>, node: NodeId, slot: usize) -> &mut Vec<Option<RowId>> {
    match rows.get_mut(node).and_then(|r| r.slots.get_mut(slot)) {
        Some(RowSlot::Skip(links)) => links,
        Some(RowSlot::List(_)) => panic!("index: slot {} of row {} is a list anchor", slot, node),
        None => panic!("index: dangling row {} (slot {})", node, slot),
    }
}

impl SkipLinks for SlotLinks<'_> {
    fn forward(&self, node: NodeId, level: usize) -> Option<NodeId> {
        links_of(self.rows, node, self.slot).and_then(|l| l.get(level).copied().flatten())
    }

    fn height(&self, node: NodeId) -> usize {
        links_of(self.rows, node, self.slot).map(|l| l.len()).unwrap_or(0)
    }
}

impl SkipLinks for SlotLinksMut<'_> {
    fn forward(&self, node: NodeId, level: usize) -> Option<NodeId> {
        links_of(self.rows, node, self.slot).and_then(|l| l.get(level).copied().flatten())
    }

    fn height(&self, node: NodeId) -> usize {
        links_of(self.rows, node, self.slot).map(|l| l.len()).unwrap_or(0)
    }
}

impl SkipStore for SlotLinksMut<'_> {
    fn set_forward(&mut self, node: NodeId, level: usize, next: Option<NodeId>) {
        links_of_mut(self.rows, node, self.slot)[level] = next;
    }

    fn init_links(&mut self, node: NodeId, height: usize) {
        *links_of_mut(self.rows, node, self.slot) = vec![None; height];
    }

    fn clear_links(&mut self, node: NodeId) {
        links_of_mut(self.rows, node, self.slot).clear();
    }
}

/// Сравнение узла с (value, key).
fn cmp_entry(
    schema: &dyn Schema,
    rows: &HashTable<Row>,
    field: FieldId,
    node: NodeId,
    value: &Value,
    key: &str,
) -> Ordering {
    let row = match rows.get(node) {
        Some(r) => r,
        None => panic!("index: dangling row {}", node),
    };
    schema
        .compare(field, &row.values[field], value)
        .then_with(|| key_compare(rows.key(node).unwrap_or(""), key))
}

impl FieldIndex {
    /// Вставить строку (значение поля берётся из самой строки).
    pub(crate) fn insert(&mut self, schema: &dyn Schema, rows: &mut HashTable<Row>, id: RowId) {
        let (value, key) = match (rows.get(id), rows.key(id)) {
            (Some(r), Some(k)) => (r.values[self.field].clone(), k.to_string()),
            _ => panic!("index: insert of dangling row {}", id),
        };
        let field = self.field;
        let mut store = SlotLinksMut {
            rows,
            slot: self.slot,
        };
        let inserted = self.skip.insert_unique(&mut store, id, |s: &SlotLinksMut<'_>, n| {
            cmp_entry(schema, s.rows, field, n, &value, &key)
        });
        if !inserted {
            panic!("index: row {} already linked in field index {}", id, field);
        }
    }

    /// Убрать строку из индекса. Вызывать ДО изменения индексируемого значения.
    pub(crate) fn erase(&mut self, schema: &dyn Schema, rows: &mut HashTable<Row>, id: RowId) -> bool {
        let (value, key) = match (rows.get(id), rows.key(id)) {
            (Some(r), Some(k)) => (r.values[self.field].clone(), k.to_string()),
            _ => return false,
        };
        let field = self.field;
        let mut store = SlotLinksMut {
            rows,
            slot: self.slot,
        };
        self.skip.erase(&mut store, id, |s: &SlotLinksMut<'_>, n| {
            cmp_entry(schema, s.rows, field, n, &value, &key)
        })
    }

    /// Строки в порядке индекса, начиная с первой, чьё значение >= lo (или с начала).
    pub(crate) fn scan_from(
        &self,
        schema: &dyn Schema,
        rows: &HashTable<Row>,
        lo: Option<&Value>,
    ) -> Vec<RowId> {
        let store = SlotLinks {
            rows,
            slot: self.slot,
        };
        let field = self.field;
        let mut cur = match lo {
            None => self.skip.first(),
            Some(lo) => self.skip.lower_bound(&store, |s: &SlotLinks<'_>, n| {
                let row = match s.rows.get(n) {
                    Some(r) => r,
                    None => panic!("index: dangling row {}", n),
                };
                // Equal трактуем как Greater: позиция перед первым значением >= lo
                match schema.compare(field, &row.values[field], lo) {
                    Ordering::Less => Ordering::Less,
                    _ => Ordering::Greater,
                }
            }),
        };
        let mut out = Vec::new();
        while let Some(n) = cur {
            out.push(n);
            cur = store.forward(n, 0);
        }
        out
    }

    pub(crate) fn check(&self, schema: &dyn Schema, rows: &HashTable<Row>) -> Result<(), String> {
        let store = SlotLinks {
            rows,
            slot: self.slot,
        };
        let field = self.field;
        self.skip.check(&store, |s: &SlotLinks<'_>, a, b| {
            let (ra, rb) = match (s.rows.get(a), s.rows.get(b)) {
                (Some(x), Some(y)) => (x, y),
                _ => return Ordering::Greater,
            };
            schema
                .compare(field, &ra.values[field], &rb.values[field])
                .then_with(|| key_compare(s.rows.key(a).unwrap_or(""), s.rows.key(b).unwrap_or("")))
        })
    }
}
