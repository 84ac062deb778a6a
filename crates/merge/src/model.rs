use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use ordered_float::OrderedFloat;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Values + records
// ---------------------------------------------------------------------------

/// A single field value. Totally ordered so it can sit in keys and sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(String),
    Timestamp(DateTime<Utc>),
    Sequence(Vec<Value>),
    Set(BTreeSet<Value>),
}

impl Value {
    pub fn number(n: f64) -> Self {
        Self::Number(OrderedFloat(n))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Sequence(_) | Self::Set(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with optional case folding of string values.
    pub fn matches(&self, other: &Value, case_sensitive: bool) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) if !case_sensitive => {
                a.to_lowercase() == b.to_lowercase()
            }
            _ => self == other,
        }
    }

    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Sequence(_) => "sequence",
            Self::Set(_) => "set",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", n.0),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(OrderedFloat(n as f64))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(OrderedFloat(n))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

/// JSON has no timestamp or set type: strings stay strings, arrays become
/// sequences. Nested objects are kept as their JSON text.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Value::from).collect())
            }
            obj @ serde_json::Value::Object(_) => Self::String(obj.to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => {
                let n = n.0;
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serializer.serialize_i64(n as i64)
                } else {
                    serializer.serialize_f64(n)
                }
            }
            Self::String(s) => serializer.serialize_str(s),
            Self::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// One record: field name to value, in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields holding a non-null value.
    pub fn non_null_count(&self) -> usize {
        self.fields.values().filter(|v| !v.is_null()).count()
    }

    /// Build a record from a JSON object. Returns `None` for any other JSON shape.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self {
                fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            }),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Ordered tuple of key-field values. Missing fields appear as `Value::Null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Key(pub Vec<Value>);

impl Key {
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// A pairing of source A record `a_index` with source B record `b_index`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedPair {
    pub a_index: usize,
    pub b_index: usize,
    pub kind: MatchKind,
    /// 1.0 for exact matches.
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct PairMatchOutput {
    pub matched: Vec<MatchedPair>,
    pub a_only: Vec<usize>,
    pub b_only: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Conflicts + resolution
// ---------------------------------------------------------------------------

/// Field-level disagreement between two matched records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub field: String,
    pub value_a: Value,
    pub value_b: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    SourceA,
    SourceB,
    Combined,
    Custom,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceA => write!(f, "source_a"),
            Self::SourceB => write!(f, "source_b"),
            Self::Combined => write!(f, "combined"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Output of resolving one matched pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub record: Record,
    /// Which source supplied each conflicting field.
    pub trace: BTreeMap<String, ResolutionSource>,
}

/// One line of the conflict log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictEntry {
    pub key: Key,
    pub a_index: usize,
    pub b_index: usize,
    pub match_kind: MatchKind,
    pub score: f64,
    pub field: String,
    pub value_a: Value,
    pub value_b: Value,
    /// `None` when the resolved record dropped the field.
    pub resolved: Option<Value>,
    pub source: ResolutionSource,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStatistics {
    pub total_records: usize,
    pub matches_found: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub conflicts_resolved: usize,
    pub source_a_only: usize,
    pub source_b_only: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeMeta {
    pub engine_version: String,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    /// Absent whenever `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_records: Option<Vec<Record>>,
    pub conflicts: Vec<ConflictEntry>,
    pub stats: MergeStatistics,
    pub errors: Vec<OutcomeError>,
    pub warnings: Vec<String>,
    pub meta: MergeMeta,
}
