#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod config;
pub mod metrics;
pub mod hash;

// Структуры индексов
pub mod hashtable; // src/hashtable/{mod,cursor,stats}.rs
pub mod skiplist;  // src/skiplist/{mod,height,standalone}.rs
pub mod list;      // src/list/mod.rs

// Shared-memory регион: epoch GC, куча, читатели, символы
pub mod share;     // src/share/{mod,header,lock,readers,heap,gc,symbols,error}.rs

// Таблица и поиск
pub mod table;     // src/table/{mod,schema,index,mirror}.rs
pub mod search;    // src/search/{mod,request,plan,exec,glob,sink}.rs

// Boyer–Moore
pub mod matcher;

// Утилиты (pid_alive, unique_suffix)
pub mod util;

// Удобные реэкспорты
pub use config::{parse_size, TableBuilder, TableConfig};
pub use hashtable::{HashStats, HashTable};
pub use list::{ListAnchor, MultiList, PrevSlot};
pub use matcher::BoyerMoore;
pub use search::{
    Component, DelimitedSink, Op, SearchError, SearchOutcome, SearchRequest, SnippetOutcome,
    SortKey,
};
pub use share::{Share, ShareError};
pub use skiplist::SkipList;
pub use table::{
    DynamicSchema, FieldType, RowView, Schema, SharedTableReader, Table, TableError, Value,
};
