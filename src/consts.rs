//! Общие константы: hash table, skip list, shared region (header, reader table, symbols, heap).

// -------- Hash table --------
/// Размер inline-массива бакетов (без аллокации для маленьких таблиц).
pub const HASH_INLINE_BUCKETS: usize = 16;
/// Рост, когда entries / buckets превышает это значение.
pub const HASH_REBUILD_MULTIPLIER: usize = 3;
/// Во сколько раз растёт массив бакетов (log2).
pub const HASH_GROWTH_SHIFT: u32 = 4;
/// Начальный downshift: 32 - log2(HASH_INLINE_BUCKETS).
pub const HASH_INITIAL_DOWNSHIFT: u32 = 28;
/// Мультипликатор для выбора бакета (старшие биты произведения).
pub const HASH_RANDOM_MULT: u32 = 1_103_515_245;

// -------- Skip list --------
pub const SKIP_DEFAULT_MAX_HEIGHT: usize = 16;
pub const SKIP_HARD_MAX_HEIGHT: usize = 32;

// -------- Shared region --------
pub const SHARE_MAGIC: &[u8; 8] = b"STSHARE1";
pub const SHARE_VERSION: u32 = 1;
pub const SHARE_FILE_EXT: &str = "shm";
pub const SHARE_LOCK_EXT: &str = "lock";

/// Значение cycle, означающее "читатель не держит lock".
pub const CYCLE_UNLOCKED: u64 = 0;
/// Первый cycle, который выдаёт writer.
pub const CYCLE_FIRST: u64 = 1;

/// Выравнивание всех блоков и полей региона.
pub const SHARE_ALIGN: u64 = 8;
/// Длина имени символа (байт, zero-padded).
pub const SYMBOL_NAME_LEN: usize = 48;
/// Размер записи символа: [name 48][kind u32][reserved u32][value u64]
pub const SYMBOL_ENTRY_SIZE: u64 = 64;
/// Размер записи читателя: [pid u32][reserved u32][cycle u64]
pub const READER_ENTRY_SIZE: u64 = 16;
/// Заголовок блока кучи: [class u32][magic u32]
pub const BLOCK_HDR_SIZE: u64 = 8;
pub const BLOCK_MAGIC_LIVE: u32 = 0x5354_424B; // "STBK"
pub const BLOCK_MAGIC_FREE: u32 = 0x5354_4652; // "STFR"
/// Блок в очереди мусора: ждёт grace window, повторный free запрещён.
pub const BLOCK_MAGIC_QUEUED: u32 = 0x5354_5155; // "STQU"
/// Минимальный класс блока (2^4 = 16 байт payload).
pub const HEAP_MIN_CLASS: u32 = 4;
/// Число size-классов (2^4 .. 2^(4+HEAP_CLASSES-1)).
pub const HEAP_CLASSES: usize = 36;

/// Смещение "никуда" для offset-ссылок внутри региона.
pub const NO_OFFSET: u64 = 0;

// -------- Defaults (config) --------
pub const DEFAULT_SHARE_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_SHARE_READERS: u32 = 64;
pub const DEFAULT_SHARE_SYMBOLS: u32 = 64;
pub const DEFAULT_SHARE_BUCKETS: u32 = 1024;
pub const DEFAULT_GRACE_WINDOW: u64 = 2;

/// Имя символа, под которым writer публикует корень shared row index.
pub const ROWS_SYMBOL: &str = "rows";
