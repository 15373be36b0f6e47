//! Shared-зеркало строк таблицы.
//!
//! Писатель публикует каждую строку записью в куче региона; записи связаны в цепочки
//! shared bucket index. Корень индекса и описание схемы публикуются в каталоге символов
//! ("rows", "schema"). Все ссылки — смещения.
//!
//! Корень:  [buckets u32][hash_kind u32][count u64][heads u64 * buckets]
//! Запись:  [next u64][cycle u64][key_len u32][data_len u32][key][data]
//! data:    [n u32] + n * ([tag u8] + payload)
//!          tag: 0 null, 1 int(i64), 2 float(f64), 3 str(u32 len + bytes), 4 bool(u8)
//! Схема:   [len u32][json]
//!
//! Публикация: запись заполняется целиком (включая next), затем одна Release-запись в слот
//! предшественника (голова бакета или next предыдущей записи). Заменённая/удалённая запись
//! уходит в очередь мусора share.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use std::cell::Cell;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TableConfig;
use crate::consts::{NO_OFFSET, ROWS_SYMBOL};
use crate::hash::{bucket_of, key_hash, HashKind};
use crate::share::{Share, SymbolKind};

use super::schema::{DynamicSchema, FieldDef, FieldId, Schema, Value};
use super::TableError;

pub const SCHEMA_SYMBOL: &str = "schema";

const ROOT_HDR: u64 = 16;
const REC_HDR: u64 = 24;

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_BOOL: u8 = 4;

pub(crate) fn encode_values(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + values.len() * 9);
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        match v {
            Value::Null => out.push(TAG_NULL),
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
        }
    }
    out
}

pub(crate) fn decode_values(data: &[u8]) -> Option<Vec<Value>> {
    let mut rd = Cursor::new(data);
    let n = rd.read_u32::<LittleEndian>().ok()? as usize;
    let mut out = Vec::with_capacity(n.min(1024));
    for _ in 0..n {
        let v = match rd.read_u8().ok()? {
            TAG_NULL => Value::Null,
            TAG_INT => Value::Int(rd.read_i64::<LittleEndian>().ok()?),
            TAG_FLOAT => Value::Float(rd.read_f64::<LittleEndian>().ok()?),
            TAG_STR => {
                let len = rd.read_u32::<LittleEndian>().ok()? as usize;
                let start = rd.position() as usize;
                let bytes = data.get(start..start.checked_add(len)?)?;
                rd.set_position((start + len) as u64);
                Value::Str(String::from_utf8(bytes.to_vec()).ok()?)
            }
            TAG_BOOL => Value::Bool(rd.read_u8().ok()? != 0),
            _ => return None,
        };
        out.push(v);
    }
    Some(out)
}

/// Разобранная запись строки.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedRow {
    pub key: String,
    /// Цикл, в котором запись опубликована.
    pub cycle: u64,
    pub values: Vec<Value>,
}

impl SharedRow {
    pub fn value(&self, field: FieldId) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Доступ к опубликованному индексу (общий для писателя и читателя).
struct RowIndexView<'a> {
    share: &'a Share,
    root: u64,
    buckets: u32,
}

impl<'a> RowIndexView<'a> {
    fn link(&self, off: u64) -> &'a AtomicU64 {
        self.share.region().atomic_u64(off)
    }

    fn head_slot(&self, bucket: u32) -> u64 {
        self.root + ROOT_HDR + bucket as u64 * 8
    }

    fn count(&self) -> &'a AtomicU64 {
        self.link(self.root + 8)
    }

    /// (key, cycle, data) записи; None — запись выходит за регион.
    fn record(&self, rec: u64) -> Option<(&'a [u8], u64, &'a [u8])> {
        let share = self.share;
        let hdr = share.bytes(rec, REC_HDR)?;
        let cycle = LittleEndian::read_u64(&hdr[8..16]);
        let key_len = LittleEndian::read_u32(&hdr[16..20]) as u64;
        let data_len = LittleEndian::read_u32(&hdr[20..24]) as u64;
        let key = share.bytes(rec + REC_HDR, key_len)?;
        let data = share.bytes(rec + REC_HDR + key_len, data_len)?;
        Some((key, cycle, data))
    }

    /// Слот, указывающий на запись с ключом (или на конец цепочки), и сама запись.
    fn locate(&self, key: &str) -> (u64, u64) {
        let b = bucket_of(key_hash(key.as_bytes()), self.buckets);
        let mut slot = self.head_slot(b);
        loop {
            let rec = self.link(slot).load(Ordering::Acquire);
            if rec == NO_OFFSET {
                return (slot, NO_OFFSET);
            }
            match self.record(rec) {
                Some((k, _, _)) if k == key.as_bytes() => return (slot, rec),
                Some(_) => slot = rec,
                None => return (slot, NO_OFFSET),
            }
        }
    }

    fn decode(&self, rec: u64) -> Option<SharedRow> {
        let (key, cycle, data) = self.record(rec)?;
        Some(SharedRow {
            key: String::from_utf8(key.to_vec()).ok()?,
            cycle,
            values: decode_values(data)?,
        })
    }

    fn for_each<F: FnMut(SharedRow)>(&self, mut f: F) {
        for b in 0..self.buckets {
            let mut rec = self.link(self.head_slot(b)).load(Ordering::Acquire);
            while rec != NO_OFFSET {
                match self.decode(rec) {
                    Some(row) => f(row),
                    None => break,
                }
                rec = self.link(rec).load(Ordering::Acquire);
            }
        }
    }
}

/// Сторона писателя: владеет share и публикует строки.
pub(crate) struct SharedMirror {
    share: Share,
    root: u64,
    buckets: u32,
}

impl SharedMirror {
    pub(crate) fn create(name: &str, cfg: &TableConfig, schema: &dyn Schema) -> Result<Self> {
        let buckets = cfg.share_buckets.max(1).next_power_of_two();
        let mut share = Share::create(name, cfg)?;
        share.write_lock()?;

        let root_len = ROOT_HDR + buckets as u64 * 8;
        let root = share
            .alloc(root_len)
            .ok_or_else(|| anyhow!("share '{}': no room for row index root", name))?;
        let mut root_bytes = vec![0u8; root_len as usize];
        LittleEndian::write_u32(&mut root_bytes[0..4], buckets);
        LittleEndian::write_u32(&mut root_bytes[4..8], HashKind::Poly9.to_u32());
        share.write(root, &root_bytes)?;

        let json = serde_json::to_string(schema.fields()).context("encode schema")?;
        let schema_off = share
            .alloc(4 + json.len() as u64)
            .ok_or_else(|| anyhow!("share '{}': no room for schema", name))?;
        let mut blob = Vec::with_capacity(4 + json.len());
        blob.write_u32::<LittleEndian>(json.len() as u32)?;
        blob.extend_from_slice(json.as_bytes());
        share.write(schema_off, &blob)?;

        share.publish_symbol(SCHEMA_SYMBOL, SymbolKind::Offset, schema_off)?;
        share.publish_symbol(ROWS_SYMBOL, SymbolKind::Offset, root)?;
        share.write_unlock()?;

        info!(
            "table '{}': shared row index published ({} buckets, root at {})",
            name, buckets, root
        );
        Ok(Self {
            share,
            root,
            buckets,
        })
    }

    fn view(&self) -> RowIndexView<'_> {
        RowIndexView {
            share: &self.share,
            root: self.root,
            buckets: self.buckets,
        }
    }

    pub(crate) fn share(&self) -> &Share {
        &self.share
    }

    pub(crate) fn share_mut(&mut self) -> &mut Share {
        &mut self.share
    }

    /// Опубликовать (или заменить) запись строки.
    pub(crate) fn publish(&mut self, key: &str, values: &[Value]) -> Result<(), TableError> {
        let data = encode_values(values);
        let len = REC_HDR + key.len() as u64 + data.len() as u64;
        let rec = self.share.alloc(len).ok_or_else(|| TableError::ShareFull {
            table: self.share.name().to_string(),
            bytes: len,
        })?;

        let (slot, old) = self.view().locate(key);
        let next = if old != NO_OFFSET {
            self.view().link(old).load(Ordering::Acquire)
        } else {
            self.view().link(slot).load(Ordering::Acquire)
        };

        let mut buf = Vec::with_capacity(len as usize);
        buf.extend_from_slice(&next.to_le_bytes());
        buf.extend_from_slice(&self.share.cycle().to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&data);
        self.share.write(rec, &buf).map_err(TableError::Share)?;

        self.view().link(slot).store(rec, Ordering::Release);
        if old != NO_OFFSET {
            self.share.free(old).map_err(TableError::Share)?;
        } else {
            self.view().count().fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Снять запись строки. false — записи не было.
    pub(crate) fn unpublish(&mut self, key: &str) -> Result<bool, TableError> {
        let (slot, old) = self.view().locate(key);
        if old == NO_OFFSET {
            return Ok(false);
        }
        let next = self.view().link(old).load(Ordering::Acquire);
        self.view().link(slot).store(next, Ordering::Release);
        self.view().count().fetch_sub(1, Ordering::AcqRel);
        self.share.free(old).map_err(TableError::Share)?;
        Ok(true)
    }

    pub(crate) fn published_len(&self) -> u64 {
        self.view().count().load(Ordering::Acquire)
    }
}

/// Читатель опубликованной таблицы в другом процессе (или в этом же).
pub struct SharedTableReader {
    share: Share,
    root: u64,
    buckets: u32,
    schema: DynamicSchema,
    // слот читателя один на всех: глубина вложенных read_lock и закреплённый цикл
    pins: Cell<u32>,
    pinned: Cell<u64>,
}

/// Закреплённый read_lock; снимается при drop.
pub struct ReadGuard<'a> {
    reader: &'a SharedTableReader,
    cycle: u64,
}

impl ReadGuard<'_> {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn get(&self, key: &str) -> Option<SharedRow> {
        self.reader.get(key)
    }

    pub fn rows(&self) -> Vec<SharedRow> {
        self.reader.rows()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.reader.read_unlock();
    }
}

impl SharedTableReader {
    pub fn attach(name: &str, cfg: &TableConfig) -> Result<Self> {
        let share = Share::attach(name, cfg)?;
        let root = share
            .lookup_symbol(ROWS_SYMBOL)
            .filter(|s| s.kind == SymbolKind::Offset)
            .ok_or_else(|| anyhow!("share '{}' has no published row index", name))?
            .value;
        let schema_off = share
            .lookup_symbol(SCHEMA_SYMBOL)
            .filter(|s| s.kind == SymbolKind::Offset)
            .ok_or_else(|| anyhow!("share '{}' has no published schema", name))?
            .value;

        let len = share
            .bytes(schema_off, 4)
            .map(LittleEndian::read_u32)
            .ok_or_else(|| anyhow!("share '{}': schema offset {} out of region", name, schema_off))?;
        let json = share
            .bytes(schema_off + 4, len as u64)
            .ok_or_else(|| anyhow!("share '{}': schema blob out of region", name))?;
        let fields: Vec<FieldDef> = serde_json::from_slice(json).context("decode shared schema")?;
        let schema = DynamicSchema::new(fields)?;

        let buckets = share
            .bytes(root, 4)
            .map(LittleEndian::read_u32)
            .ok_or_else(|| anyhow!("share '{}': row index root out of region", name))?;
        if buckets == 0 || !buckets.is_power_of_two() {
            return Err(anyhow!("share '{}': bad bucket count {}", name, buckets));
        }

        Ok(Self {
            share,
            root,
            buckets,
            schema,
            pins: Cell::new(0),
            pinned: Cell::new(0),
        })
    }

    fn view(&self) -> RowIndexView<'_> {
        RowIndexView {
            share: &self.share,
            root: self.root,
            buckets: self.buckets,
        }
    }

    pub fn schema(&self) -> &DynamicSchema {
        &self.schema
    }

    pub fn share(&self) -> &Share {
        &self.share
    }

    /// Закрепить цикл. Вложенный вызов цикл не меняет: действует самый внешний.
    pub fn read_lock(&self) -> u64 {
        let depth = self.pins.get();
        if depth == 0 {
            self.pinned.set(self.share.read_lock());
        }
        self.pins.set(depth + 1);
        self.pinned.get()
    }

    /// Снять одно закрепление; слот освобождается вместе с самым внешним.
    pub fn read_unlock(&self) {
        match self.pins.get() {
            0 => {}
            1 => {
                self.pins.set(0);
                self.share.read_unlock();
            }
            n => self.pins.set(n - 1),
        }
    }

    /// Глубина вложенных read_lock/pin.
    pub fn pin_depth(&self) -> u32 {
        self.pins.get()
    }

    /// read_lock на время жизни guard.
    pub fn pin(&self) -> ReadGuard<'_> {
        let cycle = self.read_lock();
        ReadGuard {
            reader: self,
            cycle,
        }
    }

    pub fn get(&self, key: &str) -> Option<SharedRow> {
        let view = self.view();
        let (_, rec) = view.locate(key);
        if rec == NO_OFFSET {
            return None;
        }
        view.decode(rec)
    }

    /// Значение поля по имени.
    pub fn field(&self, row: &SharedRow, name: &str) -> Option<Value> {
        let id = self.schema.resolve(name)?;
        row.value(id).cloned()
    }

    pub fn for_each<F: FnMut(SharedRow)>(&self, f: F) {
        self.view().for_each(f)
    }

    pub fn rows(&self) -> Vec<SharedRow> {
        let mut out = Vec::new();
        self.for_each(|r| out.push(r));
        out
    }

    /// Число опубликованных строк.
    pub fn len(&self) -> u64 {
        self.view().count().load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_codec_handles_every_tag() {
        let vals = vec![
            Value::Null,
            Value::Int(-7),
            Value::Float(2.5),
            Value::from("héllo"),
            Value::Bool(true),
        ];
        let enc = encode_values(&vals);
        assert_eq!(decode_values(&enc), Some(vals));
        // обрезанная строка не декодируется
        assert_eq!(decode_values(&enc[..enc.len() - 3]), None);
    }
}
