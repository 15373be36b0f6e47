//! skiplist — упорядоченный вторичный индекс (вероятностный).
//!
//! Раскладка:
//! - mod.rs        — SkipIndex: header, fix-массив, поиск/вставка/удаление, курсор; трейты SkipLinks/SkipStore
//! - height.rs     — случайная высота (1/2, вариант 1/3)
//! - standalone.rs — SkipList<T>: узлы принадлежат списку (item + forward-массив)
//!
//! Два режима хранения forward-ссылок:
//! - standalone: узел = item + forward[] по высоте узла (NodeArena внутри SkipList<T>);
//! - embedded: forward[] лежат в слоте самой строки таблицы (см. table::index), без отдельной аллокации.
//! SkipIndex не знает, где лежат ссылки: он читает их через SkipLinks и пишет через SkipStore.
//!
//! Инварианты:
//! - на каждом уровне forward-цепочка строго упорядочена (для insert_unique) / неубывающая (duplicates);
//! - узел на уровне i присутствует на всех уровнях ниже i.
//!
//! Курсор: reset → первый элемент; current; advance. Любой erase инвалидирует курсор,
//! вызывающий обязан сделать reset.

use std::cmp::Ordering;

use crate::metrics::{record_skip_erase, record_skip_insert};

pub mod height;
pub mod standalone;

pub use height::HeightScheme;
pub use standalone::SkipList;

use height::HeightGen;

/// Handle of a node inside its store.
pub type NodeId = u32;

/// Чтение forward-ссылок узлов (поиск, обход, курсор).
pub trait SkipLinks {
    /// Forward-ссылка узла на уровне `level` (level < height(node)).
    fn forward(&self, node: NodeId, level: usize) -> Option<NodeId>;
    /// Высота узла; 0 — узел не состоит в индексе.
    fn height(&self, node: NodeId) -> usize;
}

/// Хранилище forward-ссылок с правом записи (вставка, удаление).
pub trait SkipStore: SkipLinks {
    fn set_forward(&mut self, node: NodeId, level: usize, next: Option<NodeId>);
    /// Подготовить `height` пустых forward-слотов для вставляемого узла.
    fn init_links(&mut self, node: NodeId, height: usize);
    /// Сбросить ссылки узла после удаления из индекса.
    fn clear_links(&mut self, node: NodeId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Invalid,
    At(Option<NodeId>),
}

/// Ядро skip list: header-узел, fix-массив, активная высота, курсор.
#[derive(Debug)]
pub struct SkipIndex {
    header: Vec<Option<NodeId>>,
    level: usize,
    max_height: usize,
    /// fix[i] — последний узел перед позицией поиска на уровне i (None = header).
    fix: Vec<Option<NodeId>>,
    cursor: CursorState,
    heights: HeightGen,
    len: usize,
}

impl SkipIndex {
    pub fn new(max_height: usize, scheme: HeightScheme) -> Self {
        let max_height = max_height.max(1);
        Self::with_gen(max_height, HeightGen::new(scheme, max_height))
    }

    /// Детерминированные высоты (тесты, бенчи).
    pub fn with_seed(max_height: usize, scheme: HeightScheme, seed: u64) -> Self {
        let max_height = max_height.max(1);
        Self::with_gen(max_height, HeightGen::with_seed(scheme, max_height, seed))
    }

    fn with_gen(max_height: usize, heights: HeightGen) -> Self {
        Self {
            header: vec![None; max_height],
            level: 0,
            max_height,
            fix: vec![None; max_height],
            cursor: CursorState::Invalid,
            heights,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Текущая активная высота (число непустых уровней header).
    #[inline]
    pub fn active_height(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn max_height(&self) -> usize {
        self.max_height
    }

    /// Первый узел на уровне 0.
    #[inline]
    pub fn first(&self) -> Option<NodeId> {
        self.header[0]
    }

    #[inline]
    fn next_of<S: SkipLinks>(&self, store: &S, at: Option<NodeId>, level: usize) -> Option<NodeId> {
        match at {
            None => self.header[level],
            Some(n) => store.forward(n, level),
        }
    }

    #[inline]
    fn set_next<S: SkipStore>(
        &mut self,
        store: &mut S,
        at: Option<NodeId>,
        level: usize,
        next: Option<NodeId>,
    ) {
        match at {
            None => self.header[level] = next,
            Some(n) => store.set_forward(n, level, next),
        }
    }

    /// Read-only поиск: первый узел, для которого probe != Less.
    /// `probe(store, n)` — сравнение узла n с искомым значением.
    pub fn lower_bound<S, P>(&self, store: &S, probe: P) -> Option<NodeId>
    where
        S: SkipLinks,
        P: Fn(&S, NodeId) -> Ordering,
    {
        let mut x: Option<NodeId> = None;
        for level in (0..self.level).rev() {
            while let Some(n) = self.next_of(store, x, level) {
                if probe(store, n) == Ordering::Less {
                    x = Some(n);
                } else {
                    break;
                }
            }
        }
        self.next_of(store, x, 0)
    }

    /// Найти узел, равный искомому значению.
    pub fn find<S, P>(&self, store: &S, probe: P) -> Option<NodeId>
    where
        S: SkipLinks,
        P: Fn(&S, NodeId) -> Ordering,
    {
        let cand = self.lower_bound(store, &probe)?;
        if probe(store, cand) == Ordering::Equal {
            Some(cand)
        } else {
            None
        }
    }

    /// Заполнить fix-массив для позиции перед первым узлом >= искомого.
    fn locate<S, P>(&mut self, store: &S, probe: &P) -> Option<NodeId>
    where
        S: SkipLinks,
        P: Fn(&S, NodeId) -> Ordering,
    {
        let mut x: Option<NodeId> = None;
        for level in (0..self.level).rev() {
            while let Some(n) = self.next_of(store, x, level) {
                if probe(store, n) == Ordering::Less {
                    x = Some(n);
                } else {
                    break;
                }
            }
            self.fix[level] = x;
        }
        for level in self.level..self.max_height {
            self.fix[level] = None;
        }
        self.next_of(store, x, 0)
    }

    /// Вставить узел, если равного ещё нет. false — равный уже есть.
    pub fn insert_unique<S, P>(&mut self, store: &mut S, node: NodeId, probe: P) -> bool
    where
        S: SkipStore,
        P: Fn(&S, NodeId) -> Ordering,
    {
        if let Some(cand) = self.locate(&*store, &probe) {
            if probe(&*store, cand) == Ordering::Equal {
                return false;
            }
        }
        self.splice(store, node);
        true
    }

    /// Вставить узел, допуская равные ключи (порядок среди равных не определён).
    pub fn insert_allow_duplicates<S, P>(&mut self, store: &mut S, node: NodeId, probe: P)
    where
        S: SkipStore,
        P: Fn(&S, NodeId) -> Ordering,
    {
        self.locate(&*store, &probe);
        self.splice(store, node);
    }

    /// Вклейка после locate(): сначала заполняем forward[] самого узла,
    /// затем публикуем его через предшественников (снизу вверх).
    fn splice<S: SkipStore>(&mut self, store: &mut S, node: NodeId) {
        let h = self.heights.roll();
        store.init_links(node, h);
        if h > self.level {
            for level in self.level..h {
                self.fix[level] = None;
            }
            self.level = h;
        }
        for level in 0..h {
            let next = self.next_of(&*store, self.fix[level], level);
            store.set_forward(node, level, next);
        }
        for level in 0..h {
            let at = self.fix[level];
            self.set_next(store, at, level, Some(node));
        }
        self.len += 1;
        record_skip_insert();
    }

    /// Удалить конкретный узел. false — узел не состоит в индексе.
    pub fn erase<S, P>(&mut self, store: &mut S, node: NodeId, probe: P) -> bool
    where
        S: SkipStore,
        P: Fn(&S, NodeId) -> Ordering,
    {
        let h = store.height(node);
        if h == 0 || h > self.level {
            return false;
        }

        // Среди равных ключей идём до самого узла только на уровнях, где он присутствует.
        let mut x: Option<NodeId> = None;
        for level in (0..self.level).rev() {
            while let Some(n) = self.next_of(&*store, x, level) {
                if n == node {
                    break;
                }
                let ord = probe(&*store, n);
                if ord == Ordering::Less || (level < h && ord == Ordering::Equal) {
                    x = Some(n);
                } else {
                    break;
                }
            }
            self.fix[level] = x;
        }

        if self.next_of(&*store, self.fix[0], 0) != Some(node) {
            return false;
        }

        for level in 0..h {
            let at = self.fix[level];
            if self.next_of(&*store, at, level) != Some(node) {
                panic!(
                    "skiplist: node {} of height {} missing from level {} chain",
                    node, h, level
                );
            }
            let next = store.forward(node, level);
            self.set_next(store, at, level, next);
        }
        store.clear_links(node);

        while self.level > 0 && self.header[self.level - 1].is_none() {
            self.level -= 1;
        }
        self.len -= 1;
        self.cursor = CursorState::Invalid;
        record_skip_erase();
        true
    }

    // -------------------- курсор --------------------

    /// Поставить курсор на первый элемент.
    pub fn reset(&mut self) -> Option<NodeId> {
        self.cursor = CursorState::At(self.header[0]);
        self.header[0]
    }

    /// Текущий элемент курсора; None после конца или после erase (нужен reset).
    pub fn current(&self) -> Option<NodeId> {
        match self.cursor {
            CursorState::At(n) => n,
            CursorState::Invalid => None,
        }
    }

    /// Сдвинуть курсор и вернуть новый текущий элемент.
    pub fn advance<S: SkipLinks>(&mut self, store: &S) -> Option<NodeId> {
        match self.cursor {
            CursorState::At(Some(n)) => {
                let next = store.forward(n, 0);
                self.cursor = CursorState::At(next);
                next
            }
            _ => None,
        }
    }

    /// true, если курсор был инвалидирован удалением.
    pub fn cursor_invalidated(&self) -> bool {
        self.cursor == CursorState::Invalid
    }

    /// Все узлы уровня 0 в порядке индекса.
    pub fn nodes<S: SkipLinks>(&self, store: &S) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.header[0];
        while let Some(n) = cur {
            out.push(n);
            cur = store.forward(n, 0);
        }
        out
    }

    /// Полная проверка структурных инвариантов (тесты / doctor).
    pub fn check<S, C>(&self, store: &S, cmp: C) -> Result<(), String>
    where
        S: SkipLinks,
        C: Fn(&S, NodeId, NodeId) -> Ordering,
    {
        for level in 0..self.max_height {
            if level >= self.level && self.header[level].is_some() {
                return Err(format!("level {} above active height {} is not empty", level, self.level));
            }
        }
        let mut count = 0usize;
        for level in 0..self.level {
            let mut prev: Option<NodeId> = None;
            let mut cur = self.header[level];
            while let Some(n) = cur {
                if store.height(n) <= level {
                    return Err(format!("node {} linked at level {} above its height", n, level));
                }
                if let Some(p) = prev {
                    if cmp(store, p, n) == Ordering::Greater {
                        return Err(format!("level {} out of order at {} -> {}", level, p, n));
                    }
                }
                if level == 0 {
                    count += 1;
                }
                prev = Some(n);
                cur = store.forward(n, level);
            }
        }
        if count != self.len {
            return Err(format!("level 0 has {} nodes, len says {}", count, self.len));
        }
        Ok(())
    }

    /// Сбросить индекс (ссылки узлов вызывающий чистит сам).
    pub fn clear(&mut self) {
        for h in self.header.iter_mut() {
            *h = None;
        }
        self.level = 0;
        self.len = 0;
        self.cursor = CursorState::Invalid;
    }
}
