//! search — поисковый движок над Table.
//!
//! Раскладка:
//! - request.rs — SearchRequest (плоский набор опций), Component/Op, SortKey, Projection
//! - plan.rs    — validate(): проверка запроса до касания строк → SearchPlan
//! - exec.rs    — on-the-fly / sort-then-page, окно offset/limit, доставка
//! - glob.rs    — glob → regex для key glob и match-операторов
//! - sink.rs    — RecordSink и DelimitedSink (delimited-text поток)
//!
//! Компоненты предиката объединяются по AND. Доставка взаимоисключающая: collect, snippet
//! или stream; count_only отменяет доставку и несовместим с сортировкой.

use std::io;

use thiserror::Error;

use crate::table::Table;

pub mod exec;
pub mod glob;
pub mod plan;
pub mod request;
pub mod sink;

pub use exec::{SearchOutcome, SearchRow};
pub use plan::{validate, Delivery, SearchPlan};
pub use request::{
    Arity, Bindings, Component, Op, Projection, SearchRequest, SnippetOutcome, SortKey,
};
pub use sink::{DelimitedSink, RecordSink};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown operator '{0}'")]
    BadOperator(String),

    #[error("field '{field}': bad value '{value}'")]
    BadValue { field: String, value: String },

    #[error("operator '{op}' takes {expected}, got {got}")]
    Arity { op: Op, expected: Arity, got: usize },

    #[error("options '{0}' and '{1}' are mutually exclusive")]
    Conflict(&'static str, &'static str),

    #[error("no delivery chosen (collect, snippet or stream) and count_only not set")]
    NoDelivery,

    #[error("bad pattern '{pattern}'")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("snippet failed: {0}")]
    Snippet(String),

    #[error("sink write failed")]
    Sink(#[from] io::Error),
}

/// Проверить и исполнить запрос. Запрос потребляется.
pub fn run(table: &Table, mut req: SearchRequest<'_>) -> Result<SearchOutcome, SearchError> {
    let plan = validate(table.schema(), &req)?;
    exec::execute(table, &plan, &mut req)
}

impl Table {
    /// Поиск по строкам таблицы (см. SearchRequest).
    pub fn search(&self, req: SearchRequest<'_>) -> Result<SearchOutcome, SearchError> {
        run(self, req)
    }
}
