//! Проверка запроса: один раз, до касания строк. Результат — SearchPlan с резолвленными
//! полями, приведёнными значениями и скомпилированными шаблонами.

use std::borrow::Cow;
use std::cmp::Ordering;

use regex::Regex;

use crate::matcher::BoyerMoore;
use crate::table::{FieldId, RowView, Schema, Value};

use super::glob::compile_glob;
use super::request::{Component, Op, Projection, SearchRequest};
use super::SearchError;

/// Куда уходят совпавшие строки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Count,
    Collect,
    Snippet,
    Sink,
}

pub(crate) enum Test {
    Const(bool),
    Null,
    NotNull,
    Cmp(Op, Value),
    Glob { re: Regex, negate: bool },
    Contains(BoyerMoore),
    Range(Value, Value),
    In(Vec<Value>),
}

pub(crate) struct Predicate {
    field: FieldId,
    test: Test,
}

pub struct SearchPlan {
    pub(crate) key_glob: Option<Regex>,
    pub(crate) predicates: Vec<Predicate>,
    /// (поле, по убыванию) в порядке приоритета
    pub(crate) sort: Vec<(FieldId, bool)>,
    pub(crate) offset: usize,
    pub(crate) limit: usize,
    pub(crate) columns: Vec<FieldId>,
    pub(crate) names: Vec<String>,
    pub(crate) include_key: bool,
    pub(crate) delivery: Delivery,
}

impl SearchPlan {
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Имена выдаваемых полей (без ключа).
    pub fn columns(&self) -> &[String] {
        &self.names
    }

    pub fn is_sorted(&self) -> bool {
        !self.sort.is_empty()
    }

    /// Конец окна (offset + limit); None — без ограничения.
    pub(crate) fn window_end(&self) -> Option<usize> {
        (self.limit > 0).then(|| self.offset.saturating_add(self.limit))
    }

    pub(crate) fn key_matches(&self, key: &str) -> bool {
        self.key_glob.as_ref().map_or(true, |re| re.is_match(key))
    }

    /// Все компоненты (AND).
    pub(crate) fn matches(&self, schema: &dyn Schema, row: &RowView<'_>) -> bool {
        self.predicates.iter().all(|p| p.eval(schema, row))
    }

    /// Многоключевое сравнение для sort-then-page.
    pub(crate) fn compare_rows(&self, schema: &dyn Schema, a: &RowView<'_>, b: &RowView<'_>) -> Ordering {
        for &(field, descending) in &self.sort {
            let (va, vb) = (field_value(a, field), field_value(b, field));
            let ord = schema.compare(field, va, vb);
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

static NULL: Value = Value::Null;

#[inline]
pub(crate) fn field_value<'r>(row: &RowView<'r>, field: FieldId) -> &'r Value {
    row.value(field).unwrap_or(&NULL)
}

fn text_of(v: &Value) -> Cow<'_, str> {
    match v {
        Value::Str(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_text()),
    }
}

impl Predicate {
    fn eval(&self, schema: &dyn Schema, row: &RowView<'_>) -> bool {
        let v = field_value(row, self.field);
        match &self.test {
            Test::Const(b) => *b,
            Test::Null => v.is_null(),
            Test::NotNull => !v.is_null(),
            // Null не проходит ни одно сравнение
            _ if v.is_null() && !matches!(self.test, Test::Glob { .. } | Test::Contains(_)) => false,
            Test::Cmp(op, want) => {
                let ord = schema.compare(self.field, v, want);
                match op {
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                    Op::Eq => ord == Ordering::Equal,
                    Op::Ne => ord != Ordering::Equal,
                    Op::Ge => ord != Ordering::Less,
                    Op::Gt => ord == Ordering::Greater,
                    _ => false,
                }
            }
            Test::Glob { re, negate } => re.is_match(&text_of(v)) != *negate,
            Test::Contains(bm) => bm.is_match(text_of(v).as_bytes()),
            Test::Range(lo, hi) => {
                schema.compare(self.field, v, lo) != Ordering::Less
                    && schema.compare(self.field, v, hi) == Ordering::Less
            }
            Test::In(set) => set
                .iter()
                .any(|w| schema.compare(self.field, v, w) == Ordering::Equal),
        }
    }
}

fn resolve(schema: &dyn Schema, name: &str) -> Result<FieldId, SearchError> {
    schema
        .resolve(name)
        .ok_or_else(|| SearchError::UnknownField(name.to_string()))
}

/// Значение компонента под тип поля.
fn coerce(schema: &dyn Schema, field: FieldId, v: &Value) -> Result<Value, SearchError> {
    let bad = || SearchError::BadValue {
        field: schema.field_name(field).to_string(),
        value: v.to_string(),
    };
    if v.is_null() {
        return Err(bad());
    }
    schema.coerce(field, v.clone()).ok_or_else(bad)
}

fn plan_component(schema: &dyn Schema, c: &Component) -> Result<Predicate, SearchError> {
    let arity = c.op.arity();
    if !arity.accepts(c.values.len()) {
        return Err(SearchError::Arity {
            op: c.op,
            expected: arity,
            got: c.values.len(),
        });
    }
    if c.op.is_constant() {
        return Ok(Predicate {
            field: 0,
            test: Test::Const(c.op == Op::True),
        });
    }
    let field = resolve(schema, &c.field)?;
    let test = match c.op {
        Op::Null => Test::Null,
        Op::NotNull => Test::NotNull,
        Op::Lt | Op::Le | Op::Eq | Op::Ne | Op::Ge | Op::Gt => {
            Test::Cmp(c.op, coerce(schema, field, &c.values[0])?)
        }
        Op::Match | Op::NotMatch | Op::MatchCase | Op::NotMatchCase => {
            let pattern = c.values[0].to_text();
            let nocase = matches!(c.op, Op::Match | Op::NotMatch);
            let re = compile_glob(&pattern, nocase)
                .map_err(|source| SearchError::BadPattern { pattern, source })?;
            Test::Glob {
                re,
                negate: matches!(c.op, Op::NotMatch | Op::NotMatchCase),
            }
        }
        Op::Contains | Op::ContainsNocase => {
            let needle = c.values[0].to_text();
            Test::Contains(BoyerMoore::new(needle.as_bytes(), c.op == Op::ContainsNocase))
        }
        Op::Range => Test::Range(
            coerce(schema, field, &c.values[0])?,
            coerce(schema, field, &c.values[1])?,
        ),
        Op::In => Test::In(
            c.values
                .iter()
                .map(|v| coerce(schema, field, v))
                .collect::<Result<_, _>>()?,
        ),
        Op::False | Op::True => unreachable!("constant operators handled above"),
    };
    Ok(Predicate { field, test })
}

/// Проверить запрос против схемы. Ни одна строка не читается.
pub fn validate(schema: &dyn Schema, req: &SearchRequest<'_>) -> Result<SearchPlan, SearchError> {
    // взаимоисключающие опции
    if req.count_only && !req.sort.is_empty() {
        return Err(SearchError::Conflict("count_only", "sort"));
    }
    if req.sink.is_some() && req.snippet.is_some() {
        return Err(SearchError::Conflict("stream", "snippet"));
    }
    if req.collect && req.snippet.is_some() {
        return Err(SearchError::Conflict("collect", "snippet"));
    }
    if req.collect && req.sink.is_some() {
        return Err(SearchError::Conflict("collect", "stream"));
    }
    let delivery = if req.count_only {
        Delivery::Count
    } else if req.snippet.is_some() {
        Delivery::Snippet
    } else if req.sink.is_some() {
        Delivery::Sink
    } else if req.collect {
        Delivery::Collect
    } else {
        return Err(SearchError::NoDelivery);
    };

    let key_glob = match &req.key_glob {
        Some(p) => Some(compile_glob(p, false).map_err(|source| SearchError::BadPattern {
            pattern: p.clone(),
            source,
        })?),
        None => None,
    };

    let predicates = req
        .components
        .iter()
        .map(|c| plan_component(schema, c))
        .collect::<Result<Vec<_>, _>>()?;

    let sort = req
        .sort
        .iter()
        .map(|k| Ok((resolve(schema, &k.field)?, k.descending)))
        .collect::<Result<Vec<_>, SearchError>>()?;

    let columns: Vec<FieldId> = match &req.fields {
        Projection::All => (0..schema.fields().len()).collect(),
        Projection::Nothing => Vec::new(),
        Projection::Fields(names) => names
            .iter()
            .map(|n| resolve(schema, n))
            .collect::<Result<_, _>>()?,
    };
    let names = columns
        .iter()
        .map(|&f| schema.field_name(f).to_string())
        .collect();

    Ok(SearchPlan {
        key_glob,
        predicates,
        sort,
        offset: req.offset,
        limit: req.limit,
        columns,
        names,
        include_key: req.include_key,
        delivery,
    })
}
