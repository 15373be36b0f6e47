//! Исполнение проверенного плана: on-the-fly (без сортировки) или sort-then-page.

use log::debug;

use crate::metrics::record_search;
use crate::table::{RowView, Table, Value};

use super::plan::{field_value, Delivery, SearchPlan};
use super::request::{Bindings, SearchRequest, SnippetOutcome};
use super::SearchError;

/// Одна доставленная строка (режим collect).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRow {
    /// None, если ключ исключён из проекции.
    pub key: Option<String>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Просмотрено совпавших строк (до отсечения окном).
    pub matched: u64,
    /// Доставлено (collect / snippet / stream).
    pub delivered: u64,
    /// Строк в окне [offset, offset+limit): для count_only — результат, иначе == delivered.
    pub count: u64,
    /// Сниппет вернул Stop.
    pub stopped: bool,
    pub columns: Vec<String>,
    pub rows: Vec<SearchRow>,
}

enum Step {
    Next,
    Stop,
}

struct Executor<'p, 'r, 'a> {
    plan: &'p SearchPlan,
    req: &'r mut SearchRequest<'a>,
    out: SearchOutcome,
}

impl Executor<'_, '_, '_> {
    fn deliver(&mut self, row: &RowView<'_>) -> Result<Step, SearchError> {
        self.out.count += 1;
        let plan = self.plan;
        match plan.delivery {
            Delivery::Count => return Ok(Step::Next),
            Delivery::Collect => {
                self.out.rows.push(SearchRow {
                    key: plan.include_key.then(|| row.key().to_string()),
                    values: plan
                        .columns
                        .iter()
                        .map(|&f| field_value(row, f).clone())
                        .collect(),
                });
            }
            Delivery::Snippet => {
                let bindings = Bindings {
                    key: plan.include_key.then(|| row.key()),
                    names: &plan.names,
                    values: plan.columns.iter().map(|&f| field_value(row, f)).collect(),
                };
                let snippet = match self.req.snippet.as_mut() {
                    Some(s) => s,
                    None => return Err(SearchError::NoDelivery),
                };
                match (snippet.as_mut())(&bindings) {
                    SnippetOutcome::Continue => {}
                    SnippetOutcome::Stop => {
                        self.out.delivered += 1;
                        self.out.stopped = true;
                        return Ok(Step::Stop);
                    }
                    SnippetOutcome::Error(msg) => return Err(SearchError::Snippet(msg)),
                }
            }
            Delivery::Sink => {
                let mut texts: Vec<String> = Vec::with_capacity(plan.columns.len() + 1);
                if plan.include_key {
                    texts.push(row.key().to_string());
                }
                texts.extend(plan.columns.iter().map(|&f| field_value(row, f).to_text()));
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let sink = match self.req.sink.as_mut() {
                    Some(s) => s,
                    None => return Err(SearchError::NoDelivery),
                };
                sink.write_record(&refs)?;
            }
        }
        self.out.delivered += 1;
        Ok(Step::Next)
    }

    /// Без сортировки: строки в порядке хэш-таблицы, окно применяется на лету.
    fn on_the_fly(&mut self, table: &Table) -> Result<(), SearchError> {
        let schema = table.schema();
        let end = self.plan.window_end();
        let mut seen = 0usize;
        for row in table.rows() {
            if !self.plan.key_matches(row.key()) || !self.plan.matches(schema, &row) {
                continue;
            }
            self.out.matched += 1;
            seen += 1;
            if seen <= self.plan.offset {
                continue;
            }
            if let Step::Stop = self.deliver(&row)? {
                break;
            }
            if end.map_or(false, |e| seen >= e) {
                break;
            }
        }
        Ok(())
    }

    /// Все совпадения, сортировка, затем окно.
    fn sort_then_page(&mut self, table: &Table) -> Result<(), SearchError> {
        let schema = table.schema();
        let mut hits: Vec<RowView<'_>> = table
            .rows()
            .filter(|r| self.plan.key_matches(r.key()) && self.plan.matches(schema, r))
            .collect();
        self.out.matched = hits.len() as u64;
        hits.sort_by(|a, b| self.plan.compare_rows(schema, a, b));

        let take = if self.plan.limit == 0 {
            usize::MAX
        } else {
            self.plan.limit
        };
        for row in hits.iter().skip(self.plan.offset).take(take) {
            if let Step::Stop = self.deliver(row)? {
                break;
            }
        }
        Ok(())
    }
}

/// Исполнить план над таблицей. Ошибка сниппета или sink прерывает поиск сразу.
pub fn execute(
    table: &Table,
    plan: &SearchPlan,
    req: &mut SearchRequest<'_>,
) -> Result<SearchOutcome, SearchError> {
    let mut ex = Executor {
        plan,
        req,
        out: SearchOutcome {
            columns: plan.names.clone(),
            ..SearchOutcome::default()
        },
    };
    if plan.is_sorted() {
        ex.sort_then_page(table)?;
    } else {
        ex.on_the_fly(table)?;
    }
    if let Some(sink) = ex.req.sink.as_mut() {
        sink.finish()?;
    }

    let out = ex.out;
    record_search(out.matched, out.delivered);
    debug!(
        "search on '{}': matched {}, delivered {}, count {}{}",
        table.name(),
        out.matched,
        out.delivered,
        out.count,
        if out.stopped { " (stopped)" } else { "" }
    );
    Ok(out)
}
