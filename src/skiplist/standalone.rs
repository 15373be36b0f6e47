//! SkipList<T> — standalone-режим: список владеет узлами (item + forward[] по высоте узла).

use std::cmp::Ordering;

use super::{HeightScheme, NodeId, SkipIndex, SkipLinks, SkipStore};

struct Node<T> {
    item: T,
    forward: Vec<Option<NodeId>>,
}

/// Slab узлов standalone-списка.
pub(crate) struct NodeArena<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<NodeId>,
}

impl<T> NodeArena<T> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, item: T) -> NodeId {
        let node = Node {
            item,
            forward: Vec::new(),
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<T> {
        let node = self.nodes.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(node.item)
    }

    #[inline]
    fn item(&self, id: NodeId) -> &T {
        match self.nodes.get(id as usize).and_then(|n| n.as_ref()) {
            Some(n) => &n.item,
            None => panic!("skiplist: dangling node {}", id),
        }
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.nodes.get_mut(id as usize).and_then(|n| n.as_mut()) {
            Some(n) => n,
            None => panic!("skiplist: dangling node {}", id),
        }
    }
}

impl<T> SkipLinks for NodeArena<T> {
    fn forward(&self, node: NodeId, level: usize) -> Option<NodeId> {
        self.nodes[node as usize]
            .as_ref()
            .and_then(|n| n.forward.get(level).copied().flatten())
    }

    fn height(&self, node: NodeId) -> usize {
        self.nodes
            .get(node as usize)
            .and_then(|n| n.as_ref())
            .map(|n| n.forward.len())
            .unwrap_or(0)
    }
}

impl<T> SkipStore for NodeArena<T> {
    fn set_forward(&mut self, node: NodeId, level: usize, next: Option<NodeId>) {
        self.node_mut(node).forward[level] = next;
    }

    fn init_links(&mut self, node: NodeId, height: usize) {
        self.node_mut(node).forward = vec![None; height];
    }

    fn clear_links(&mut self, node: NodeId) {
        self.node_mut(node).forward.clear();
    }
}

type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering>;
type Release<T> = Box<dyn FnMut(T)>;

/// Skip list, владеющий своими элементами.
pub struct SkipList<T> {
    index: SkipIndex,
    arena: NodeArena<T>,
    cmp: Comparator<T>,
    release: Option<Release<T>>,
}

impl<T> SkipList<T> {
    pub fn new<C>(max_height: usize, cmp: C) -> Self
    where
        C: Fn(&T, &T) -> Ordering + 'static,
    {
        Self::with_index(SkipIndex::new(max_height, HeightScheme::Half), cmp)
    }

    /// Как new(), но с фиксированным seed генератора высот.
    pub fn with_seed<C>(max_height: usize, seed: u64, cmp: C) -> Self
    where
        C: Fn(&T, &T) -> Ordering + 'static,
    {
        Self::with_index(SkipIndex::with_seed(max_height, HeightScheme::Half, seed), cmp)
    }

    pub fn with_index<C>(index: SkipIndex, cmp: C) -> Self
    where
        C: Fn(&T, &T) -> Ordering + 'static,
    {
        Self {
            index,
            arena: NodeArena::new(),
            cmp: Box::new(cmp),
            release: None,
        }
    }

    /// Колбэк, получающий элементы, покидающие список (erase, clear, drop).
    pub fn set_release<F>(&mut self, f: F)
    where
        F: FnMut(T) + 'static,
    {
        self.release = Some(Box::new(f));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn active_height(&self) -> usize {
        self.index.active_height()
    }

    pub fn find(&self, item: &T) -> Option<&T> {
        let cmp = &self.cmp;
        let id = self
            .index
            .find(&self.arena, |a: &NodeArena<T>, n| cmp(a.item(n), item))?;
        Some(self.arena.item(id))
    }

    pub fn insert_unique(&mut self, item: T) -> bool {
        let cmp = &self.cmp;
        if self
            .index
            .find(&self.arena, |a: &NodeArena<T>, n| cmp(a.item(n), &item))
            .is_some()
        {
            return false;
        }
        let id = self.arena.alloc(item);
        let inserted = self.index.insert_unique(&mut self.arena, id, |a: &NodeArena<T>, n| {
            cmp(a.item(n), a.item(id))
        });
        debug_assert!(inserted);
        inserted
    }

    pub fn insert_allow_duplicates(&mut self, item: T) {
        let cmp = &self.cmp;
        let id = self.arena.alloc(item);
        self.index
            .insert_allow_duplicates(&mut self.arena, id, |a: &NodeArena<T>, n| {
                cmp(a.item(n), a.item(id))
            });
    }

    /// Удалить один элемент, равный `item`. false — такого нет.
    pub fn erase(&mut self, item: &T) -> bool {
        let cmp = &self.cmp;
        let id = match self
            .index
            .find(&self.arena, |a: &NodeArena<T>, n| cmp(a.item(n), item))
        {
            Some(id) => id,
            None => return false,
        };
        if !self
            .index
            .erase(&mut self.arena, id, |a: &NodeArena<T>, n| cmp(a.item(n), item))
        {
            return false;
        }
        if let Some(it) = self.arena.release(id) {
            match self.release.as_mut() {
                Some(f) => f(it),
                None => drop(it),
            }
        }
        true
    }

    // -------------------- курсор --------------------

    pub fn reset(&mut self) -> Option<&T> {
        let id = self.index.reset()?;
        Some(self.arena.item(id))
    }

    pub fn current(&self) -> Option<&T> {
        self.index.current().map(|id| self.arena.item(id))
    }

    pub fn advance(&mut self) -> Option<&T> {
        let id = self.index.advance(&self.arena)?;
        Some(self.arena.item(id))
    }

    /// Обход без участия курсора.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cur = self.index.first();
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.arena.forward(id, 0);
            Some(self.arena.item(id))
        })
    }

    /// Проверка инвариантов уровня/порядка.
    pub fn check(&self) -> Result<(), String> {
        let cmp = &self.cmp;
        self.index
            .check(&self.arena, |a: &NodeArena<T>, x, y| cmp(a.item(x), a.item(y)))
    }

    /// Удалить все элементы (release-колбэк вызывается для каждого).
    pub fn clear(&mut self) {
        let ids = self.index.nodes(&self.arena);
        self.index.clear();
        for id in ids {
            if let Some(it) = self.arena.release(id) {
                match self.release.as_mut() {
                    Some(f) => f(it),
                    None => drop(it),
                }
            }
        }
    }
}

impl<T> Drop for SkipList<T> {
    fn drop(&mut self) {
        if self.release.is_some() {
            self.clear();
        }
    }
}
