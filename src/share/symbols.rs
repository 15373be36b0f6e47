//! Append-only каталог символов: [name 48][kind u32][reserved u32][value u64].
//!
//! Запись пишется целиком, затем symbol_count публикуется с Release; читатель берёт count с
//! Acquire и видит только завершённые записи. Записи не удаляются; при повторной публикации
//! имени побеждает последняя.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::Ordering;

use crate::consts::{SYMBOL_ENTRY_SIZE, SYMBOL_NAME_LEN};

use super::header::OFF_SYMBOL_COUNT;
use super::{Region, Share, ShareError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Смещение внутри региона.
    Offset,
    /// Произвольное значение.
    Value,
}

impl SymbolKind {
    fn to_u32(self) -> u32 {
        match self {
            SymbolKind::Offset => 1,
            SymbolKind::Value => 2,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(SymbolKind::Offset),
            2 => Some(SymbolKind::Value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub value: u64,
}

fn validate_symbol_name(name: &str) -> Result<(), ShareError> {
    if name.is_empty() || name.len() > SYMBOL_NAME_LEN || name.as_bytes().contains(&0) {
        return Err(ShareError::SymbolName(name.to_string()));
    }
    Ok(())
}

impl Region {
    fn symbol_count(&self) -> u64 {
        self.atomic_u64(OFF_SYMBOL_COUNT as u64)
            .load(Ordering::Acquire)
            .min(self.layout.max_symbols as u64)
    }

    fn symbol_at(&self, i: u64) -> Option<Symbol> {
        let raw = self.bytes(self.layout.symbol_off + i * SYMBOL_ENTRY_SIZE, SYMBOL_ENTRY_SIZE)?;
        let name_end = raw[..SYMBOL_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SYMBOL_NAME_LEN);
        let name = std::str::from_utf8(&raw[..name_end]).ok()?.to_string();
        let kind = SymbolKind::from_u32(LittleEndian::read_u32(
            &raw[SYMBOL_NAME_LEN..SYMBOL_NAME_LEN + 4],
        ))?;
        let value = LittleEndian::read_u64(&raw[SYMBOL_NAME_LEN + 8..SYMBOL_NAME_LEN + 16]);
        Some(Symbol { name, kind, value })
    }

    pub(crate) fn lookup_symbol(&self, name: &str) -> Option<Symbol> {
        let n = self.symbol_count();
        (0..n)
            .rev()
            .filter_map(|i| self.symbol_at(i))
            .find(|s| s.name == name)
    }
}

impl Share {
    /// Опубликовать корень для читателей.
    pub fn publish_symbol(
        &mut self,
        name: &str,
        kind: SymbolKind,
        value: u64,
    ) -> Result<(), ShareError> {
        validate_symbol_name(name)?;
        if !self.is_writer() {
            return Err(ShareError::NotWriter {
                name: self.name().to_string(),
            });
        }
        let region = self.region();
        let count_slot = region.atomic_u64(OFF_SYMBOL_COUNT as u64);
        let count = count_slot.load(Ordering::Acquire);
        let capacity = region.layout().max_symbols;
        if count >= capacity as u64 {
            return Err(ShareError::SymbolTableFull {
                name: self.name().to_string(),
                capacity,
            });
        }

        let mut entry = [0u8; SYMBOL_ENTRY_SIZE as usize];
        entry[..name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut entry[SYMBOL_NAME_LEN..SYMBOL_NAME_LEN + 4], kind.to_u32());
        LittleEndian::write_u64(&mut entry[SYMBOL_NAME_LEN + 8..SYMBOL_NAME_LEN + 16], value);
        region.write_bytes(region.layout().symbol_off + count * SYMBOL_ENTRY_SIZE, &entry);
        count_slot.store(count + 1, Ordering::Release);
        Ok(())
    }

    /// Последняя запись с данным именем.
    pub fn lookup_symbol(&self, name: &str) -> Option<Symbol> {
        self.region().lookup_symbol(name)
    }

    /// Все записи каталога в порядке публикации.
    pub fn symbols(&self) -> Vec<Symbol> {
        let region = self.region();
        (0..region.symbol_count())
            .filter_map(|i| region.symbol_at(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_names_are_bounded() {
        assert!(validate_symbol_name("rows").is_ok());
        assert!(validate_symbol_name("").is_err());
        assert!(validate_symbol_name(&"x".repeat(SYMBOL_NAME_LEN + 1)).is_err());
        assert!(validate_symbol_name("a\0b").is_err());
    }
}
