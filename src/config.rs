//! Centralized configuration and builder for SpeedTable.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - TableConfig::from_env() reads ST_* env vars; TableBuilder starts from env and allows overrides.
//!
//! Env:
//! - ST_SHARE_DIR      — каталог с файлами shared-регионов (default: /dev/shm или temp_dir)
//! - ST_SHARE_SIZE     — размер региона, литерал с суффиксом K/M/G (default 4M)
//! - ST_SHARE_READERS  — ёмкость таблицы читателей (default 64)
//! - ST_SHARE_SYMBOLS  — ёмкость каталога символов (default 64)
//! - ST_SHARE_BUCKETS  — число бакетов shared row index (default 1024)
//! - ST_GRACE_WINDOW   — grace window GC в циклах (default 2)
//! - ST_SKIP_MAX_HEIGHT — максимальная высота skip list (default 16)
//! - ST_SKIP_THIRD     — схема высот 1/3 вместо 1/2 (default off)

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;

use crate::consts::{
    DEFAULT_GRACE_WINDOW, DEFAULT_SHARE_BUCKETS, DEFAULT_SHARE_READERS, DEFAULT_SHARE_SIZE,
    DEFAULT_SHARE_SYMBOLS, SKIP_DEFAULT_MAX_HEIGHT, SKIP_HARD_MAX_HEIGHT,
};

/// Top-level configuration for a table and its optional share.
#[derive(Clone, Debug)]
pub struct TableConfig {
    /// Directory for share files. None => /dev/shm if present, else std::env::temp_dir().
    pub share_dir: Option<String>,

    /// Region size in bytes (header + reader table + symbols + heap).
    pub share_size: u64,

    /// Reader table capacity (max concurrently attached readers).
    pub share_readers: u32,

    /// Symbol directory capacity (append-only).
    pub share_symbols: u32,

    /// Bucket count of the shared row index published by a sharing table.
    pub share_buckets: u32,

    /// Freed blocks are reclaimed only when their deletion cycle is more than
    /// `grace_window` cycles behind the reader horizon.
    pub grace_window: u64,

    /// Skip list height cap.
    pub skip_max_height: usize,

    /// Use the 1/3 promotion probability instead of 1/2.
    pub skip_third: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            share_dir: None,
            share_size: DEFAULT_SHARE_SIZE,
            share_readers: DEFAULT_SHARE_READERS,
            share_symbols: DEFAULT_SHARE_SYMBOLS,
            share_buckets: DEFAULT_SHARE_BUCKETS,
            grace_window: DEFAULT_GRACE_WINDOW,
            skip_max_height: SKIP_DEFAULT_MAX_HEIGHT,
            skip_third: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl TableConfig {
    /// Load configuration from environment variables. Невалидные значения игнорируются.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ST_SHARE_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.share_dir = Some(s.to_string());
            }
        }

        if let Ok(v) = std::env::var("ST_SHARE_SIZE") {
            match parse_size(&v) {
                Ok(n) => cfg.share_size = n,
                Err(e) => log::warn!("ST_SHARE_SIZE ignored: {e}"),
            }
        }

        if let Ok(v) = std::env::var("ST_SHARE_READERS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.share_readers = n;
            }
        }

        if let Ok(v) = std::env::var("ST_SHARE_SYMBOLS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.share_symbols = n;
            }
        }

        if let Ok(v) = std::env::var("ST_SHARE_BUCKETS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.share_buckets = n;
            }
        }

        if let Ok(v) = std::env::var("ST_GRACE_WINDOW") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.grace_window = n;
            }
        }

        if let Ok(v) = std::env::var("ST_SKIP_MAX_HEIGHT") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.skip_max_height = n.clamp(1, SKIP_HARD_MAX_HEIGHT);
            }
        }

        if let Ok(v) = std::env::var("ST_SKIP_THIRD") {
            cfg.skip_third = env_flag(&v);
        }

        cfg
    }

    pub fn with_share_dir<S: Into<String>>(mut self, dir: Option<S>) -> Self {
        self.share_dir = dir.map(Into::into);
        self
    }

    pub fn with_share_size(mut self, bytes: u64) -> Self {
        self.share_size = bytes;
        self
    }

    pub fn with_share_readers(mut self, n: u32) -> Self {
        self.share_readers = n;
        self
    }

    pub fn with_share_symbols(mut self, n: u32) -> Self {
        self.share_symbols = n;
        self
    }

    pub fn with_share_buckets(mut self, n: u32) -> Self {
        self.share_buckets = n;
        self
    }

    pub fn with_grace_window(mut self, cycles: u64) -> Self {
        self.grace_window = cycles;
        self
    }

    pub fn with_skip_max_height(mut self, h: usize) -> Self {
        self.skip_max_height = h.clamp(1, SKIP_HARD_MAX_HEIGHT);
        self
    }

    pub fn with_skip_third(mut self, on: bool) -> Self {
        self.skip_third = on;
        self
    }

    /// Каталог для share-файлов с учётом дефолта.
    pub fn resolved_share_dir(&self) -> PathBuf {
        match &self.share_dir {
            Some(d) => PathBuf::from(d),
            None => {
                let shm = PathBuf::from("/dev/shm");
                if shm.is_dir() {
                    shm
                } else {
                    std::env::temp_dir()
                }
            }
        }
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for TableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableConfig {{ \
             share_dir: {}, \
             share_size: {}, \
             share_readers: {}, \
             share_symbols: {}, \
             share_buckets: {}, \
             grace_window: {}, \
             skip_max_height: {}, \
             skip_third: {} \
             }}",
            self.share_dir
                .as_deref()
                .unwrap_or("default(/dev/shm|tmp)"),
            self.share_size,
            self.share_readers,
            self.share_symbols,
            self.share_buckets,
            self.grace_window,
            self.skip_max_height,
            self.skip_third,
        )
    }
}

/// Builder that produces a TableConfig (starts from env, like `TableConfig::from_env`).
#[derive(Clone, Debug)]
pub struct TableBuilder {
    cfg: TableConfig,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self {
            cfg: TableConfig::from_env(),
        }
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: TableConfig::default(),
        }
    }

    pub fn share_dir<S: Into<String>>(mut self, dir: Option<S>) -> Self {
        self.cfg.share_dir = dir.map(Into::into);
        self
    }

    pub fn share_size(mut self, bytes: u64) -> Self {
        self.cfg.share_size = bytes;
        self
    }

    pub fn share_readers(mut self, n: u32) -> Self {
        self.cfg.share_readers = n;
        self
    }

    pub fn share_buckets(mut self, n: u32) -> Self {
        self.cfg.share_buckets = n;
        self
    }

    pub fn grace_window(mut self, cycles: u64) -> Self {
        self.cfg.grace_window = cycles;
        self
    }

    pub fn skip_max_height(mut self, h: usize) -> Self {
        self.cfg.skip_max_height = h.clamp(1, SKIP_HARD_MAX_HEIGHT);
        self
    }

    pub fn build(self) -> TableConfig {
        self.cfg
    }
}

/// Разобрать литерал размера: десятичное число с опциональным суффиксом K/M/G (2^10/2^20/2^30).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("empty size literal"));
    }
    let (digits, mult) = match s.as_bytes()[s.len() - 1] {
        b'k' | b'K' => (&s[..s.len() - 1], 1u64 << 10),
        b'm' | b'M' => (&s[..s.len() - 1], 1u64 << 20),
        b'g' | b'G' => (&s[..s.len() - 1], 1u64 << 30),
        _ => (s, 1u64),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("bad size literal '{}'", s));
    }
    let n: u64 = digits
        .parse()
        .map_err(|e| anyhow!("bad size literal '{}': {}", s, e))?;
    n.checked_mul(mult)
        .ok_or_else(|| anyhow!("size literal '{}' overflows u64", s))
}
