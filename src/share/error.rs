//! Типизированные отказы shared-региона (вызывающий может сделать downcast из anyhow::Error).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("share '{name}': bad magic")]
    BadMagic { name: String },

    #[error("share '{name}': unsupported version {found}")]
    BadVersion { name: String, found: u32 },

    #[error("share '{name}': header size {found}, expected {expected}")]
    HeaderSize {
        name: String,
        found: u32,
        expected: u32,
    },

    #[error("share '{name}': header checksum mismatch")]
    HeaderChecksum { name: String },

    #[error("share '{name}': region too small ({size} < {need} bytes)")]
    Undersized { name: String, size: u64, need: u64 },

    #[error("share '{name}': reader table full ({capacity} slots)")]
    ReaderTableFull { name: String, capacity: u32 },

    #[error("share '{name}': writer-only operation")]
    NotWriter { name: String },

    #[error("share '{name}': another writer holds {lock}")]
    WriterBusy { name: String, lock: String },

    #[error("share '{name}': symbol directory full ({capacity} entries)")]
    SymbolTableFull { name: String, capacity: u32 },

    #[error("bad symbol name '{0}'")]
    SymbolName(String),

    #[error("share '{name}': offset {off} is not a live block")]
    BadBlock { name: String, off: u64 },
}
