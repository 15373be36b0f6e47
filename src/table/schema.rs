//! Schema — capability-интерфейс таблицы: резолв имён полей, сравнение значений,
//! разбор литералов, заготовка новой строки.
//!
//! DynamicSchema — реализация по списку FieldDef (описание сериализуется в JSON и публикуется
//! в share для читателей).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Индекс поля в строке.
pub type FieldId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Str,
    Bool,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Bool => "bool",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl FieldDef {
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

/// Значение поля строки.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Текстовое представление для glob/substring-предикатов и delimited-вывода.
    /// Null — пустая строка.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Общий порядок значений: Null < Bool < числа < строки; числа сравниваются как f64
/// (Int/Int — точно), строки — побайтно.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (x, y) if x.rank() == 2 && y.rank() == 2 => {
            let (fx, fy) = (x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0));
            fx.total_cmp(&fy)
        }
        (x, y) => x.rank().cmp(&y.rank()),
    }
}

/// Что таблица и поисковый движок знают о полях строки.
pub trait Schema {
    fn fields(&self) -> &[FieldDef];

    /// Имя поля → индекс.
    fn resolve(&self, name: &str) -> Option<FieldId>;

    /// Сравнение двух значений поля.
    fn compare(&self, field: FieldId, a: &Value, b: &Value) -> Ordering;

    /// Разбор текстового литерала под тип поля. None — литерал не подходит.
    fn parse_value(&self, field: FieldId, text: &str) -> Option<Value>;

    /// Значения новой строки (все поля пустые).
    fn new_row(&self) -> Vec<Value> {
        vec![Value::Null; self.fields().len()]
    }

    /// Привести значение к типу поля (Int → Float, текст → по parse_value). None — несовместимо.
    fn coerce(&self, field: FieldId, value: Value) -> Option<Value> {
        let ty = self.fields().get(field)?.ty;
        match (ty, value) {
            (_, Value::Null) => Some(Value::Null),
            (FieldType::Int, v @ Value::Int(_)) => Some(v),
            (FieldType::Float, v @ Value::Float(_)) => Some(v),
            (FieldType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldType::Bool, v @ Value::Bool(_)) => Some(v),
            (FieldType::Str, v @ Value::Str(_)) => Some(v),
            (FieldType::Str, v) => Some(Value::Str(v.to_string())),
            (_, Value::Str(s)) => self.parse_value(field, &s),
            _ => None,
        }
    }

    fn field_name(&self, field: FieldId) -> &str {
        self.fields()
            .get(field)
            .map(|f| f.name.as_str())
            .unwrap_or("?")
    }
}

/// Схема, собранная в рантайме из списка полей.
#[derive(Debug, Clone)]
pub struct DynamicSchema {
    fields: Vec<FieldDef>,
    by_name: HashMap<String, FieldId>,
}

impl DynamicSchema {
    pub fn new(fields: Vec<FieldDef>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if f.name.is_empty() || f.name.contains(['\t', '\n']) {
                return Err(anyhow!("invalid field name {:?}", f.name));
            }
            if by_name.insert(f.name.clone(), i).is_some() {
                return Err(anyhow!("duplicate field '{}'", f.name));
            }
        }
        Ok(Self { fields, by_name })
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new() }
    }

    /// Описание полей в JSON (публикуется в share).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let fields: Vec<FieldDef> = serde_json::from_str(s)?;
        Self::new(fields)
    }
}

pub struct SchemaBuilder {
    fields: Vec<FieldDef>,
}

impl SchemaBuilder {
    pub fn field(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.push(FieldDef::new(name, ty));
        self
    }

    pub fn int(self, name: &str) -> Self {
        self.field(name, FieldType::Int)
    }

    pub fn float(self, name: &str) -> Self {
        self.field(name, FieldType::Float)
    }

    pub fn string(self, name: &str) -> Self {
        self.field(name, FieldType::Str)
    }

    pub fn boolean(self, name: &str) -> Self {
        self.field(name, FieldType::Bool)
    }

    pub fn build(self) -> Result<DynamicSchema> {
        DynamicSchema::new(self.fields)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Schema for DynamicSchema {
    fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn resolve(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    fn compare(&self, _field: FieldId, a: &Value, b: &Value) -> Ordering {
        compare_values(a, b)
    }

    fn parse_value(&self, field: FieldId, text: &str) -> Option<Value> {
        match self.fields.get(field)?.ty {
            FieldType::Int => text.trim().parse::<i64>().ok().map(Value::Int),
            FieldType::Float => text.trim().parse::<f64>().ok().map(Value::Float),
            FieldType::Str => Some(Value::Str(text.to_string())),
            FieldType::Bool => parse_bool(text).map(Value::Bool),
        }
    }
}
