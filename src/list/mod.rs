//! list — intrusive multi-list: O(1) членство строки в N именованных списках.
//!
//! Каждая строка держит по якорю (ListAnchor) на каждый список таблицы:
//! - next — следующая строка;
//! - prev — "чей forward указывает на меня": голова списка или слот предыдущей строки
//!   (PrevSlot), поэтому remove() не обходит список;
//! - head — обратная ссылка на список (None — не состоит).
//!
//! Порядок записи (важно для читателей без блокировок): поля нового узла заполняются
//! полностью ДО вклейки; голова/forward предшественника обновляется последним.
//!
//! Ссылки — индексы (RowId/ListId), не указатели. Где лежат якоря, решает AnchorLinks/AnchorStore.

use crate::metrics::{record_list_insert, record_list_remove};

pub type RowId = u32;
pub type ListId = u32;

/// Слот, чьё forward-поле указывает на узел.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrevSlot {
    ListHead(ListId),
    RowSlot(RowId, ListId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListAnchor {
    pub next: Option<RowId>,
    pub prev: Option<PrevSlot>,
    pub head: Option<ListId>,
}

impl ListAnchor {
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.head.is_some()
    }
}

/// Где хранятся якоря строк (чтение).
pub trait AnchorLinks {
    fn anchor(&self, row: RowId, list: ListId) -> &ListAnchor;
}

/// Якоря с правом записи.
pub trait AnchorStore: AnchorLinks {
    fn anchor_mut(&mut self, row: RowId, list: ListId) -> &mut ListAnchor;
}

/// Результат remove().
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListRemoval {
    NotMember,
    Removed { was_last: bool },
}

impl ListRemoval {
    #[inline]
    pub fn removed(self) -> bool {
        matches!(self, ListRemoval::Removed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ListHead {
    pub name: String,
    pub first: Option<RowId>,
    pub tail: Option<RowId>,
    pub len: usize,
}

/// Набор голов именованных списков.
#[derive(Debug, Clone, Default)]
pub struct MultiList {
    heads: Vec<ListHead>,
}

impl MultiList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Завести новый список; имя должно быть уникальным.
    pub fn define(&mut self, name: &str) -> Option<ListId> {
        if self.lookup(name).is_some() {
            return None;
        }
        self.heads.push(ListHead {
            name: name.to_string(),
            first: None,
            tail: None,
            len: 0,
        });
        Some((self.heads.len() - 1) as ListId)
    }

    pub fn lookup(&self, name: &str) -> Option<ListId> {
        self.heads
            .iter()
            .position(|h| h.name == name)
            .map(|i| i as ListId)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub fn head(&self, list: ListId) -> &ListHead {
        &self.heads[list as usize]
    }

    #[inline]
    pub fn len(&self, list: ListId) -> usize {
        self.heads[list as usize].len
    }

    /// Записать `next` в слот, на который указывает prev.
    fn publish<S: AnchorStore>(&mut self, store: &mut S, prev: PrevSlot, next: Option<RowId>) {
        match prev {
            PrevSlot::ListHead(l) => self.heads[l as usize].first = next,
            PrevSlot::RowSlot(r, l) => store.anchor_mut(r, l).next = next,
        }
    }

    fn ensure_unlinked<S: AnchorLinks>(store: &S, list: ListId, row: RowId) -> bool {
        !store.anchor(row, list).is_linked()
    }

    fn ensure_member<S: AnchorLinks>(store: &S, list: ListId, row: RowId) -> bool {
        store.anchor(row, list).head == Some(list)
    }

    /// Вставить строку в начало списка. false — строка уже в списке.
    pub fn insert_head<S: AnchorStore>(&mut self, store: &mut S, list: ListId, row: RowId) -> bool {
        if !Self::ensure_unlinked(store, list, row) {
            return false;
        }
        let first = self.heads[list as usize].first;
        {
            let a = store.anchor_mut(row, list);
            a.next = first;
            a.prev = Some(PrevSlot::ListHead(list));
            a.head = Some(list);
        }
        match first {
            Some(f) => store.anchor_mut(f, list).prev = Some(PrevSlot::RowSlot(row, list)),
            None => self.heads[list as usize].tail = Some(row),
        }
        self.publish(store, PrevSlot::ListHead(list), Some(row));
        self.heads[list as usize].len += 1;
        record_list_insert();
        true
    }

    /// Вставить в конец списка (через tail).
    pub fn insert_tail<S: AnchorStore>(&mut self, store: &mut S, list: ListId, row: RowId) -> bool {
        match self.heads[list as usize].tail {
            Some(t) => self.insert_after(store, list, t, row),
            None => self.insert_head(store, list, row),
        }
    }

    /// Вставить `new` перед `existing`. false — existing не в списке или new уже связан.
    pub fn insert_before<S: AnchorStore>(
        &mut self,
        store: &mut S,
        list: ListId,
        existing: RowId,
        new: RowId,
    ) -> bool {
        if !Self::ensure_member(store, list, existing) || !Self::ensure_unlinked(store, list, new) {
            return false;
        }
        let prev = match store.anchor(existing, list).prev {
            Some(p) => p,
            None => panic!("list: member row {} of list {} has no predecessor slot", existing, list),
        };
        {
            let a = store.anchor_mut(new, list);
            a.next = Some(existing);
            a.prev = Some(prev);
            a.head = Some(list);
        }
        store.anchor_mut(existing, list).prev = Some(PrevSlot::RowSlot(new, list));
        self.publish(store, prev, Some(new));
        self.heads[list as usize].len += 1;
        record_list_insert();
        true
    }

    /// Вставить `new` после `existing`.
    pub fn insert_after<S: AnchorStore>(
        &mut self,
        store: &mut S,
        list: ListId,
        existing: RowId,
        new: RowId,
    ) -> bool {
        if !Self::ensure_member(store, list, existing) || !Self::ensure_unlinked(store, list, new) {
            return false;
        }
        let next = store.anchor(existing, list).next;
        {
            let a = store.anchor_mut(new, list);
            a.next = next;
            a.prev = Some(PrevSlot::RowSlot(existing, list));
            a.head = Some(list);
        }
        match next {
            Some(n) => store.anchor_mut(n, list).prev = Some(PrevSlot::RowSlot(new, list)),
            None => self.heads[list as usize].tail = Some(new),
        }
        self.publish(store, PrevSlot::RowSlot(existing, list), Some(new));
        self.heads[list as usize].len += 1;
        record_list_insert();
        true
    }

    /// Удалить строку из списка за O(1).
    pub fn remove<S: AnchorStore>(&mut self, store: &mut S, list: ListId, row: RowId) -> ListRemoval {
        let anchor = store.anchor(row, list).clone();
        match anchor.head {
            Some(l) if l == list => {}
            Some(other) => {
                panic!("list: row {} anchor for list {} claims list {}", row, list, other)
            }
            None => return ListRemoval::NotMember,
        }
        let prev = match anchor.prev {
            Some(p) => p,
            None => panic!("list: member row {} of list {} has no predecessor slot", row, list),
        };

        self.publish(store, prev, anchor.next);
        let was_last = anchor.next.is_none();
        match anchor.next {
            Some(n) => store.anchor_mut(n, list).prev = Some(prev),
            None => {
                self.heads[list as usize].tail = match prev {
                    PrevSlot::RowSlot(r, _) => Some(r),
                    PrevSlot::ListHead(_) => None,
                }
            }
        }
        *store.anchor_mut(row, list) = ListAnchor::default();
        self.heads[list as usize].len -= 1;
        record_list_remove();
        ListRemoval::Removed { was_last }
    }

    /// Удалить строку из всех списков, где она состоит.
    pub fn remove_everywhere<S: AnchorStore>(&mut self, store: &mut S, row: RowId) -> usize {
        let mut n = 0;
        for l in 0..self.heads.len() as ListId {
            if self.remove(store, l, row).removed() {
                n += 1;
            }
        }
        n
    }

    /// Члены списка от головы к хвосту.
    pub fn members<S: AnchorLinks>(&self, store: &S, list: ListId) -> Vec<RowId> {
        let mut out = Vec::with_capacity(self.heads[list as usize].len);
        let mut cur = self.heads[list as usize].first;
        while let Some(r) = cur {
            out.push(r);
            cur = store.anchor(r, list).next;
        }
        out
    }

    /// Проверка структурной согласованности head/forward/prev/tail/len.
    pub fn check<S: AnchorLinks>(&self, store: &S, list: ListId) -> Result<(), String> {
        let h = &self.heads[list as usize];
        let mut expected_prev = PrevSlot::ListHead(list);
        let mut cur = h.first;
        let mut last = None;
        let mut n = 0usize;
        while let Some(r) = cur {
            let a = store.anchor(r, list);
            if a.head != Some(list) {
                return Err(format!("row {} reachable from list {} but head={:?}", r, list, a.head));
            }
            if a.prev != Some(expected_prev) {
                return Err(format!(
                    "row {} prev={:?}, expected {:?}",
                    r, a.prev, expected_prev
                ));
            }
            n += 1;
            if n > h.len {
                return Err(format!("list {} longer than len {} (cycle?)", list, h.len));
            }
            expected_prev = PrevSlot::RowSlot(r, list);
            last = Some(r);
            cur = a.next;
        }
        if n != h.len {
            return Err(format!("list {} has {} members, len says {}", list, n, h.len));
        }
        if last != h.tail {
            return Err(format!("list {} tail {:?}, actual last {:?}", list, h.tail, last));
        }
        Ok(())
    }
}
