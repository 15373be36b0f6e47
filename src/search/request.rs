//! SearchRequest — плоский набор опций одного поиска.
//!
//! Собирается вызывающим, проверяется один раз (plan::validate) до касания строк,
//! исполняется одним проходом и выбрасывается.

use std::fmt;
use std::str::FromStr;

use crate::table::Value;

use super::sink::RecordSink;
use super::SearchError;

/// Оператор компонента предиката.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    False,
    True,
    Null,
    NotNull,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    /// glob без учёта регистра
    Match,
    NotMatch,
    /// glob с учётом регистра
    MatchCase,
    NotMatchCase,
    /// подстрока (Boyer–Moore)
    Contains,
    ContainsNocase,
    /// lo <= v < hi
    Range,
    /// v ∈ {values}
    In,
}

/// Сколько значений требует оператор.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Zero,
    One,
    Two,
    AtLeastOne,
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Zero => n == 0,
            Arity::One => n == 1,
            Arity::Two => n == 2,
            Arity::AtLeastOne => n >= 1,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Arity::Zero => "no values",
            Arity::One => "1 value",
            Arity::Two => "2 values",
            Arity::AtLeastOne => "at least 1 value",
        };
        f.write_str(s)
    }
}

impl Op {
    pub fn arity(self) -> Arity {
        match self {
            Op::False | Op::True | Op::Null | Op::NotNull => Arity::Zero,
            Op::Range => Arity::Two,
            Op::In => Arity::AtLeastOne,
            _ => Arity::One,
        }
    }

    /// Оператор без поля (false/true).
    pub fn is_constant(self) -> bool {
        matches!(self, Op::False | Op::True)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::False => "false",
            Op::True => "true",
            Op::Null => "null",
            Op::NotNull => "notnull",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Gt => ">",
            Op::Match => "match",
            Op::NotMatch => "notmatch",
            Op::MatchCase => "match_case",
            Op::NotMatchCase => "notmatch_case",
            Op::Contains => "contains",
            Op::ContainsNocase => "contains_nocase",
            Op::Range => "range",
            Op::In => "in",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "false" => Op::False,
            "true" => Op::True,
            "null" => Op::Null,
            "notnull" => Op::NotNull,
            "<" => Op::Lt,
            "<=" => Op::Le,
            "=" | "==" => Op::Eq,
            "!=" | "<>" => Op::Ne,
            ">=" => Op::Ge,
            ">" => Op::Gt,
            "match" => Op::Match,
            "notmatch" => Op::NotMatch,
            "match_case" => Op::MatchCase,
            "notmatch_case" => Op::NotMatchCase,
            "contains" => Op::Contains,
            "contains_nocase" => Op::ContainsNocase,
            "range" => Op::Range,
            "in" => Op::In,
            other => return Err(SearchError::BadOperator(other.to_string())),
        };
        Ok(op)
    }
}

/// Один компонент предиката: (field, op, values). Компоненты объединяются по AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub field: String,
    pub op: Op,
    /// Текстовые значения (Value::Str) приводятся к типу поля при проверке запроса.
    pub values: Vec<Value>,
}

impl Component {
    pub fn new(field: &str, op: Op, values: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            values,
        }
    }

    /// field op value
    pub fn cmp<V: Into<Value>>(field: &str, op: Op, value: V) -> Self {
        Self::new(field, op, vec![value.into()])
    }

    pub fn constant(truth: bool) -> Self {
        let op = if truth { Op::True } else { Op::False };
        Self::new("", op, Vec::new())
    }

    /// Разбор списочной формы `op field value...` (false/true — без поля).
    pub fn from_words(words: &[&str]) -> Result<Self, SearchError> {
        let (op_word, rest) = words
            .split_first()
            .ok_or_else(|| SearchError::BadOperator(String::new()))?;
        let op: Op = op_word.parse()?;
        if op.is_constant() {
            if !rest.is_empty() {
                return Err(SearchError::Arity {
                    op,
                    expected: Arity::Zero,
                    got: rest.len(),
                });
            }
            return Ok(Self::new("", op, Vec::new()));
        }
        let (field, values) = rest.split_first().ok_or(SearchError::Arity {
            op,
            expected: op.arity(),
            got: 0,
        })?;
        Ok(Self::new(
            field,
            op,
            values.iter().map(|v| Value::from(*v)).collect(),
        ))
    }
}

/// Ключ сортировки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }

    /// "field" — по возрастанию, "-field" — по убыванию.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(f) => Self::desc(f),
            None => Self::asc(s),
        }
    }
}

/// Какие поля выдавать.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    /// Только ключи.
    Nothing,
    Fields(Vec<String>),
}

/// Результат вызова сниппета на одной строке.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetOutcome {
    Continue,
    /// Завершить поиск успешно.
    Stop,
    /// Прервать поиск с ошибкой.
    Error(String),
}

/// Значения строки, связанные для сниппета: по имени поля и по позиции.
pub struct Bindings<'r> {
    pub(crate) key: Option<&'r str>,
    pub(crate) names: &'r [String],
    pub(crate) values: Vec<&'r Value>,
}

impl<'r> Bindings<'r> {
    pub fn key(&self) -> Option<&'r str> {
        self.key
    }

    pub fn get(&self, name: &str) -> Option<&'r Value> {
        let i = self.names.iter().position(|n| n == name)?;
        self.values.get(i).copied()
    }

    pub fn positional(&self, i: usize) -> Option<&'r Value> {
        self.values.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> &'r [String] {
        self.names
    }
}

pub type Snippet<'a> = Box<dyn FnMut(&Bindings<'_>) -> SnippetOutcome + 'a>;

/// Плоский набор опций поиска.
pub struct SearchRequest<'a> {
    pub key_glob: Option<String>,
    pub components: Vec<Component>,
    pub sort: Vec<SortKey>,
    pub offset: usize,
    /// 0 — без ограничения.
    pub limit: usize,
    pub count_only: bool,
    pub fields: Projection,
    pub include_key: bool,
    /// Доставка массивом: строки возвращаются в SearchOutcome::rows.
    pub collect: bool,
    pub snippet: Option<Snippet<'a>>,
    pub sink: Option<Box<dyn RecordSink + 'a>>,
}

impl Default for SearchRequest<'_> {
    fn default() -> Self {
        Self {
            key_glob: None,
            components: Vec::new(),
            sort: Vec::new(),
            offset: 0,
            limit: 0,
            count_only: false,
            fields: Projection::All,
            include_key: true,
            collect: false,
            snippet: None,
            sink: None,
        }
    }
}

impl<'a> SearchRequest<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_glob(mut self, pattern: &str) -> Self {
        self.key_glob = Some(pattern.to_string());
        self
    }

    pub fn filter(mut self, c: Component) -> Self {
        self.components.push(c);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn fields(mut self, names: &[&str]) -> Self {
        self.fields = Projection::Fields(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.fields = Projection::Nothing;
        self
    }

    pub fn include_key(mut self, on: bool) -> Self {
        self.include_key = on;
        self
    }

    pub fn collect(mut self) -> Self {
        self.collect = true;
        self
    }

    pub fn snippet<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Bindings<'_>) -> SnippetOutcome + 'a,
    {
        self.snippet = Some(Box::new(f));
        self
    }

    pub fn stream<S: RecordSink + 'a>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }
}

impl fmt::Debug for SearchRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRequest")
            .field("key_glob", &self.key_glob)
            .field("components", &self.components)
            .field("sort", &self.sort)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("count_only", &self.count_only)
            .field("fields", &self.fields)
            .field("include_key", &self.include_key)
            .field("collect", &self.collect)
            .field("snippet", &self.snippet.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
