//! table — row store: владеет строками и связывает их со всеми структурами.
//!
//! Раскладка:
//! - mod.rs    — Table, Row/RowSlot, set/get/delete, именованные списки
//! - schema.rs — Schema (capability), DynamicSchema, Value
//! - index.rs  — embedded skip-list индексы по полям (ссылки в слотах строк)
//! - mirror.rs — публикация строк в share и SharedTableReader
//!
//! Строки живут в слабе HashTable<Row>: EntryId хэш-таблицы и есть RowId, на него ссылаются
//! списки и индексы. У каждой строки одинаковый массив слотов: по одному на каждый список
//! (якорь) и на каждый индекс (forward-ссылки skip list).
//!
//! Если таблица shared, каждое изменение публикуется в share внутри скобки записи: либо
//! явной (write_lock/write_unlock), либо автоматической на одну операцию.

use log::info;
use thiserror::Error;

use crate::config::TableConfig;
use crate::consts::CYCLE_UNLOCKED;
use crate::hashtable::{HashStats, HashTable};
use crate::list::{AnchorLinks, AnchorStore, ListAnchor, ListId, MultiList, RowId};
use crate::share::{Share, ShareError};
use crate::skiplist::{HeightScheme, SkipIndex};

pub mod index;
pub mod mirror;
pub mod schema;

pub use mirror::{ReadGuard, SharedRow, SharedTableReader};
pub use schema::{DynamicSchema, FieldDef, FieldId, FieldType, Schema, Value};

use index::FieldIndex;
use mirror::SharedMirror;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' ({ty}) cannot hold {value:?}")]
    TypeMismatch {
        field: String,
        ty: FieldType,
        value: Value,
    },

    #[error("unknown list '{0}'")]
    UnknownList(String),

    #[error("list '{0}' already defined")]
    DuplicateList(String),

    #[error("field '{0}' is already indexed")]
    DuplicateIndex(String),

    #[error("field '{0}' is not indexed")]
    NotIndexed(String),

    #[error("no row with key '{0}'")]
    UnknownKey(String),

    #[error("table '{table}': share heap exhausted ({bytes} bytes requested)")]
    ShareFull { table: String, bytes: u64 },

    #[error(transparent)]
    Share(#[from] ShareError),
}

/// Слот строки: якорь именованного списка или forward-ссылки индекса.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSlot {
    List(ListAnchor),
    Skip(Vec<Option<RowId>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    List,
    Skip,
}

impl SlotKind {
    fn empty(self) -> RowSlot {
        match self {
            SlotKind::List => RowSlot::List(ListAnchor::default()),
            SlotKind::Skip => RowSlot::Skip(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) values: Vec<Value>,
    pub(crate) slots: Vec<RowSlot>,
    pub(crate) cycle: u64,
}

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Строка глазами вызывающего.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    id: RowId,
    key: &'a str,
    row: &'a Row,
    schema: &'a dyn Schema,
}

impl<'a> RowView<'a> {
    #[inline]
    pub fn id(&self) -> RowId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &'a str {
        self.key
    }

    #[inline]
    pub fn values(&self) -> &'a [Value] {
        &self.row.values
    }

    #[inline]
    pub fn value(&self, field: FieldId) -> Option<&'a Value> {
        self.row.values.get(field)
    }

    /// Значение по имени поля.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.value(self.schema.resolve(name)?)
    }

    /// Цикл share, в котором строка изменена последний раз (None — таблица не shared).
    pub fn cycle(&self) -> Option<u64> {
        (self.row.cycle != CYCLE_UNLOCKED).then_some(self.row.cycle)
    }
}

impl std::fmt::Debug for RowView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowView")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("values", &self.row.values)
            .finish()
    }
}

/// Якоря списков в слотах строк.
struct RowAnchors<'a> {
    rows: &'a mut HashTable<Row>,
    list_slots: &'a [usize],
}

struct RowAnchorsRef<'a> {
    rows: &'a HashTable<Row>,
    list_slots: &'a [usize],
}

fn anchor_in<'r>(rows: &'r HashTable<Row>, list_slots: &[usize], row: RowId, list: ListId) -> &'r ListAnchor {
    let slot = list_slots[list as usize];
    match rows.get(row).and_then(|r| r.slots.get(slot)) {
        Some(RowSlot::List(a)) => a,
        Some(RowSlot::Skip(_)) => panic!("table: slot {} of row {} is not a list anchor", slot, row),
        None => panic!("table: dangling row {} in list {}", row, list),
    }
}

impl AnchorLinks for RowAnchors<'_> {
    fn anchor(&self, row: RowId, list: ListId) -> &ListAnchor {
        anchor_in(self.rows, self.list_slots, row, list)
    }
}

impl AnchorStore for RowAnchors<'_> {
    fn anchor_mut(&mut self, row: RowId, list: ListId) -> &mut ListAnchor {
        let slot = self.list_slots[list as usize];
        match self.rows.get_mut(row).and_then(|r| r.slots.get_mut(slot)) {
            Some(RowSlot::List(a)) => a,
            Some(RowSlot::Skip(_)) => {
                panic!("table: slot {} of row {} is not a list anchor", slot, row)
            }
            None => panic!("table: dangling row {} in list {}", row, list),
        }
    }
}

impl AnchorLinks for RowAnchorsRef<'_> {
    fn anchor(&self, row: RowId, list: ListId) -> &ListAnchor {
        anchor_in(self.rows, self.list_slots, row, list)
    }
}

pub struct Table {
    name: String,
    schema: Box<dyn Schema>,
    cfg: TableConfig,
    rows: HashTable<Row>,
    slot_kinds: Vec<SlotKind>,
    lists: MultiList,
    list_slots: Vec<usize>,
    indices: Vec<FieldIndex>,
    mirror: Option<SharedMirror>,
}

impl Table {
    /// Локальная таблица (без share).
    pub fn new<S: Schema + 'static>(name: &str, schema: S, cfg: TableConfig) -> Self {
        Self {
            name: name.to_string(),
            schema: Box::new(schema),
            cfg,
            rows: HashTable::new(),
            slot_kinds: Vec::new(),
            lists: MultiList::new(),
            list_slots: Vec::new(),
            indices: Vec::new(),
            mirror: None,
        }
    }

    /// Таблица, публикующая строки в share `name` для читателей других процессов.
    pub fn new_shared<S: Schema + 'static>(
        name: &str,
        schema: S,
        cfg: TableConfig,
    ) -> anyhow::Result<Self> {
        let mirror = SharedMirror::create(name, &cfg, &schema)?;
        let mut t = Self::new(name, schema, cfg);
        t.mirror = Some(mirror);
        Ok(t)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn schema(&self) -> &dyn Schema {
        &*self.schema
    }

    #[inline]
    pub fn config(&self) -> &TableConfig {
        &self.cfg
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_shared(&self) -> bool {
        self.mirror.is_some()
    }

    pub fn share(&self) -> Option<&Share> {
        self.mirror.as_ref().map(|m| m.share())
    }

    /// Число строк, опубликованных в share (0 у локальной таблицы).
    pub fn published_len(&self) -> u64 {
        self.mirror.as_ref().map(|m| m.published_len()).unwrap_or(0)
    }

    pub fn hash_stats(&self) -> HashStats {
        self.rows.stats()
    }

    // -------------------- скобки записи --------------------

    /// Открыть явную скобку записи (несколько изменений — один цикл для читателей).
    pub fn write_lock(&mut self) -> Result<u64, TableError> {
        match self.mirror.as_mut() {
            Some(m) => Ok(m.share_mut().write_lock()?),
            None => Ok(CYCLE_UNLOCKED),
        }
    }

    /// Закрыть скобку; возвращает число освобождённых GC блоков.
    pub fn write_unlock(&mut self) -> Result<usize, TableError> {
        match self.mirror.as_mut() {
            Some(m) => Ok(m.share_mut().write_unlock()?),
            None => Ok(0),
        }
    }

    /// Выполнить изменение share внутри скобки; вне явной скобки — в автоматической.
    /// Возвращает цикл изменения (CYCLE_UNLOCKED у локальной таблицы).
    fn in_bracket<T, F>(&mut self, f: F) -> Result<(Option<T>, u64), TableError>
    where
        F: FnOnce(&mut SharedMirror) -> Result<T, TableError>,
    {
        let m = match self.mirror.as_mut() {
            Some(m) => m,
            None => return Ok((None, CYCLE_UNLOCKED)),
        };
        let auto = !m.share().in_write();
        if auto {
            m.share_mut().write_lock()?;
        }
        let cycle = m.share().cycle();
        let res = f(m);
        if auto {
            m.share_mut().write_unlock()?;
        }
        res.map(|v| (Some(v), cycle))
    }

    fn slot_template(&self) -> Vec<RowSlot> {
        self.slot_kinds.iter().map(|k| k.empty()).collect()
    }

    fn row_ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|(id, _, _)| id).collect()
    }

    fn view(&self, id: RowId) -> Option<RowView<'_>> {
        Some(RowView {
            id,
            key: self.rows.key(id)?,
            row: self.rows.get(id)?,
            schema: &*self.schema,
        })
    }

    // -------------------- строки --------------------

    /// Создать строку или обновить перечисленные поля существующей.
    pub fn set(&mut self, key: &str, fields: &[(&str, Value)]) -> Result<RowId, TableError> {
        let mut updates = Vec::with_capacity(fields.len());
        for (name, v) in fields {
            let id = self
                .schema
                .resolve(name)
                .ok_or_else(|| TableError::UnknownField(name.to_string()))?;
            let cv = self
                .schema
                .coerce(id, v.clone())
                .ok_or_else(|| TableError::TypeMismatch {
                    field: name.to_string(),
                    ty: self.schema.fields()[id].ty,
                    value: v.clone(),
                })?;
            updates.push((id, cv));
        }

        let existing = self.rows.find(key);
        let mut values = existing
            .and_then(|id| self.rows.get(id))
            .map(|r| r.values.clone())
            .unwrap_or_else(|| self.schema.new_row());
        for (f, v) in &updates {
            values[*f] = v.clone();
        }

        // сначала share: при нехватке кучи локальная строка не меняется
        let (_, cycle) = self.in_bracket(|m| m.publish(key, &values))?;

        match existing {
            Some(id) => {
                let touched: Vec<usize> = (0..self.indices.len())
                    .filter(|&i| updates.iter().any(|(f, _)| *f == self.indices[i].field))
                    .collect();
                for &i in &touched {
                    self.indices[i].erase(&*self.schema, &mut self.rows, id);
                }
                if let Some(row) = self.rows.get_mut(id) {
                    row.values = values;
                    row.cycle = cycle;
                }
                for &i in &touched {
                    self.indices[i].insert(&*self.schema, &mut self.rows, id);
                }
                Ok(id)
            }
            None => {
                let slots = self.slot_template();
                let (id, _) = self.rows.find_or_insert(key, || Row {
                    values,
                    slots,
                    cycle,
                });
                for ix in self.indices.iter_mut() {
                    ix.insert(&*self.schema, &mut self.rows, id);
                }
                Ok(id)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<RowView<'_>> {
        self.view(self.rows.find(key)?)
    }

    pub fn row(&self, id: RowId) -> Option<RowView<'_>> {
        self.view(id)
    }

    /// Удалить строку: из share, всех списков и индексов. false — ключа нет.
    pub fn delete(&mut self, key: &str) -> Result<bool, TableError> {
        let id = match self.rows.find(key) {
            Some(id) => id,
            None => return Ok(false),
        };
        self.in_bracket(|m| m.unpublish(key))?;

        {
            let mut store = RowAnchors {
                rows: &mut self.rows,
                list_slots: &self.list_slots,
            };
            self.lists.remove_everywhere(&mut store, id);
        }
        for ix in self.indices.iter_mut() {
            ix.erase(&*self.schema, &mut self.rows, id);
        }
        self.rows.delete(id);
        Ok(true)
    }

    /// Ключи в порядке хэш-таблицы.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|(_, k, _)| k)
    }

    /// Строки в порядке хэш-таблицы.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        let schema = &*self.schema;
        self.rows.iter().map(move |(id, key, row)| RowView {
            id,
            key,
            row,
            schema,
        })
    }

    // -------------------- индексы --------------------

    fn resolve_field(&self, name: &str) -> Result<FieldId, TableError> {
        self.schema
            .resolve(name)
            .ok_or_else(|| TableError::UnknownField(name.to_string()))
    }

    fn index_of(&self, name: &str) -> Result<&FieldIndex, TableError> {
        let field = self.resolve_field(name)?;
        self.indices
            .iter()
            .find(|ix| ix.field == field)
            .ok_or_else(|| TableError::NotIndexed(name.to_string()))
    }

    /// Построить skip-list индекс по полю (с заполнением по существующим строкам).
    pub fn index_field(&mut self, name: &str) -> Result<(), TableError> {
        let field = self.resolve_field(name)?;
        if self.indices.iter().any(|ix| ix.field == field) {
            return Err(TableError::DuplicateIndex(name.to_string()));
        }
        let slot = self.slot_kinds.len();
        self.slot_kinds.push(SlotKind::Skip);
        let ids = self.row_ids();
        for &id in &ids {
            if let Some(r) = self.rows.get_mut(id) {
                r.slots.push(SlotKind::Skip.empty());
            }
        }

        let scheme = if self.cfg.skip_third {
            HeightScheme::Third
        } else {
            HeightScheme::Half
        };
        let mut ix = FieldIndex {
            field,
            slot,
            skip: SkipIndex::new(self.cfg.skip_max_height, scheme),
        };
        for &id in &ids {
            ix.insert(&*self.schema, &mut self.rows, id);
        }
        info!(
            "table '{}': index on '{}' built over {} rows (active height {})",
            self.name,
            name,
            ids.len(),
            ix.skip.active_height()
        );
        self.indices.push(ix);
        Ok(())
    }

    /// Строки в порядке индексированного поля.
    pub fn index_scan(&self, name: &str) -> Result<Vec<RowView<'_>>, TableError> {
        let ix = self.index_of(name)?;
        Ok(ix
            .scan_from(&*self.schema, &self.rows, None)
            .into_iter()
            .filter_map(|id| self.view(id))
            .collect())
    }

    /// Строки с lo <= поле < hi в порядке индекса.
    pub fn index_range(
        &self,
        name: &str,
        lo: &Value,
        hi: &Value,
    ) -> Result<Vec<RowView<'_>>, TableError> {
        let ix = self.index_of(name)?;
        let field = ix.field;
        let mut out = Vec::new();
        for id in ix.scan_from(&*self.schema, &self.rows, Some(lo)) {
            let v = match self.view(id) {
                Some(v) => v,
                None => continue,
            };
            if self.schema.compare(field, &v.values()[field], hi) != std::cmp::Ordering::Less {
                break;
            }
            out.push(v);
        }
        Ok(out)
    }

    // -------------------- именованные списки --------------------

    pub fn define_list(&mut self, name: &str) -> Result<(), TableError> {
        let list = self
            .lists
            .define(name)
            .ok_or_else(|| TableError::DuplicateList(name.to_string()))?;
        let slot = self.slot_kinds.len();
        self.slot_kinds.push(SlotKind::List);
        debug_assert_eq!(list as usize, self.list_slots.len());
        self.list_slots.push(slot);
        for id in self.row_ids() {
            if let Some(r) = self.rows.get_mut(id) {
                r.slots.push(SlotKind::List.empty());
            }
        }
        info!("table '{}': list '{}' defined", self.name, name);
        Ok(())
    }

    fn list_id(&self, name: &str) -> Result<ListId, TableError> {
        self.lists
            .lookup(name)
            .ok_or_else(|| TableError::UnknownList(name.to_string()))
    }

    fn row_id(&self, key: &str) -> Result<RowId, TableError> {
        self.rows
            .find(key)
            .ok_or_else(|| TableError::UnknownKey(key.to_string()))
    }

    fn anchors(&mut self) -> (RowAnchors<'_>, &mut MultiList) {
        (
            RowAnchors {
                rows: &mut self.rows,
                list_slots: &self.list_slots,
            },
            &mut self.lists,
        )
    }

    /// В начало списка. false — строка уже в нём.
    pub fn list_push_front(&mut self, list: &str, key: &str) -> Result<bool, TableError> {
        let (l, id) = (self.list_id(list)?, self.row_id(key)?);
        let (mut store, lists) = self.anchors();
        Ok(lists.insert_head(&mut store, l, id))
    }

    /// В конец списка.
    pub fn list_push_back(&mut self, list: &str, key: &str) -> Result<bool, TableError> {
        let (l, id) = (self.list_id(list)?, self.row_id(key)?);
        let (mut store, lists) = self.anchors();
        Ok(lists.insert_tail(&mut store, l, id))
    }

    /// Вставить `key` перед `existing`. false — existing не в списке или key уже в нём.
    pub fn list_insert_before(
        &mut self,
        list: &str,
        existing: &str,
        key: &str,
    ) -> Result<bool, TableError> {
        let l = self.list_id(list)?;
        let (at, id) = (self.row_id(existing)?, self.row_id(key)?);
        let (mut store, lists) = self.anchors();
        Ok(lists.insert_before(&mut store, l, at, id))
    }

    pub fn list_insert_after(
        &mut self,
        list: &str,
        existing: &str,
        key: &str,
    ) -> Result<bool, TableError> {
        let l = self.list_id(list)?;
        let (at, id) = (self.row_id(existing)?, self.row_id(key)?);
        let (mut store, lists) = self.anchors();
        Ok(lists.insert_after(&mut store, l, at, id))
    }

    /// Убрать строку из списка. false — не состояла (или ключа нет).
    pub fn list_remove(&mut self, list: &str, key: &str) -> Result<bool, TableError> {
        let l = self.list_id(list)?;
        let id = match self.rows.find(key) {
            Some(id) => id,
            None => return Ok(false),
        };
        let (mut store, lists) = self.anchors();
        Ok(lists.remove(&mut store, l, id).removed())
    }

    /// Ключи членов списка от головы к хвосту.
    pub fn list_keys(&self, list: &str) -> Result<Vec<String>, TableError> {
        let l = self.list_id(list)?;
        let store = RowAnchorsRef {
            rows: &self.rows,
            list_slots: &self.list_slots,
        };
        Ok(self
            .lists
            .members(&store, l)
            .into_iter()
            .filter_map(|id| self.rows.key(id).map(str::to_string))
            .collect())
    }

    pub fn list_len(&self, list: &str) -> Result<usize, TableError> {
        Ok(self.lists.len(self.list_id(list)?))
    }

    /// Имена списков в порядке определения.
    pub fn list_names(&self) -> Vec<String> {
        (0..self.lists.count() as ListId)
            .map(|l| self.lists.head(l).name.clone())
            .collect()
    }

    /// Структурная проверка всех списков и индексов.
    pub fn check(&self) -> Result<(), String> {
        let store = RowAnchorsRef {
            rows: &self.rows,
            list_slots: &self.list_slots,
        };
        for l in 0..self.lists.count() as ListId {
            self.lists.check(&store, l)?;
        }
        for ix in &self.indices {
            ix.check(&*self.schema, &self.rows)?;
        }
        Ok(())
    }
}
