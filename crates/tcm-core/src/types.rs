//! Core domain types shared by the engine, graph client, and ingestion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

// ── Query Parameters ──────────────────────────────────────────────

/// A value bound to a `$name` query parameter.
///
/// Entity names are opaque strings: they are compared by equality or list
/// membership and never normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    List(Vec<String>),
}

/// Parameters keyed by name. Ordered so generated queries are reproducible.
pub type QueryParams = BTreeMap<String, ParamValue>;

// ── Result Rows ───────────────────────────────────────────────────

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("-"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A result cell: a scalar or a flat list of scalars, never deeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(value.into()))
    }

    pub fn integer(value: i64) -> Self {
        Self::Scalar(Scalar::Integer(value))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Every text value carried by this cell, in order.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Scalar(s) => s.as_text().into_iter().collect(),
            Self::List(items) => items.iter().filter_map(Scalar::as_text).collect(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join("、"))
            }
        }
    }
}

/// One result row: column name to value, in the order the query returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    cells: Vec<(String, CellValue)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. A repeated column name replaces the earlier value.
    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Shaped rows of one executed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct text values of one column, in first-seen order.
    pub fn column_texts(&self, column: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for row in &self.rows {
            if let Some(cell) = row.get(column) {
                for value in cell.texts() {
                    if !seen.iter().any(|s: &String| s == value) {
                        seen.push(value.to_string());
                    }
                }
            }
        }
        seen
    }
}

// ── Sessions ──────────────────────────────────────────────────────

/// Where a binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingOrigin {
    /// Named explicitly in the question (e.g. "中药为白芍").
    Filter,
    /// Listed in the turn's result (e.g. the herb names returned).
    Result,
}

/// An entity or entity set a turn bound, carried into the next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Owning label; for relationship properties, the relationship's target label.
    pub label: String,
    pub property: String,
    /// Set when the property lives on this relationship type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    pub values: Vec<String>,
    pub origin: BindingOrigin,
}

/// One answered question recorded in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub raw_question: String,
    pub generated_query: String,
    pub result_row_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub uses_prior_context: bool,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// Persisted form of a session: `{session_id, history}` plus its last access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub history: Vec<Turn>,
    #[serde(default = "Utc::now")]
    pub last_access: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            history: Vec::new(),
            last_access: now,
        }
    }

    /// Append a turn and evict the oldest turns past `cap`.
    /// Returns how many turns were evicted.
    pub fn push_turn(&mut self, turn: Turn, cap: usize) -> usize {
        self.last_access = turn.timestamp.max(self.last_access);
        self.history.push(turn);
        let overflow = self.history.len().saturating_sub(cap);
        self.history.drain(..overflow);
        overflow
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str) -> Turn {
        Turn {
            raw_question: q.to_string(),
            generated_query: format!("MATCH (h:Herb) RETURN h.name LIMIT 1 // {q}"),
            result_row_count: 1,
            timestamp: Utc::now(),
            uses_prior_context: false,
            bindings: vec![],
        }
    }

    #[test]
    fn push_turn_evicts_oldest_first() {
        let mut record = SessionRecord::new("s1", Utc::now());
        for i in 0..7 {
            record.push_turn(turn(&format!("q{i}")), 5);
        }
        assert_eq!(record.history.len(), 5);
        let questions: Vec<_> = record.history.iter().map(|t| t.raw_question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4", "q5", "q6"]);
        assert_eq!(record.last_turn().unwrap().raw_question, "q6");
    }

    #[test]
    fn result_row_keeps_column_order_in_json() {
        let mut row = ResultRow::new();
        row.push("中药", CellValue::text("白芍"));
        row.push("频次", CellValue::integer(3));
        row.push("别名", CellValue::List(vec![Scalar::Text("芍药".into())]));

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"中药":"白芍","频次":3,"别名":["芍药"]}"#);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["中药", "频次", "别名"]);
    }

    #[test]
    fn column_texts_are_distinct_and_ordered() {
        let mut rows = Vec::new();
        for name in ["杏仁", "白芍", "杏仁"] {
            let mut row = ResultRow::new();
            row.push("中药", CellValue::text(name));
            rows.push(row);
        }
        let set = ResultSet {
            columns: vec!["中药".into()],
            rows,
        };
        assert_eq!(set.column_texts("中药"), vec!["杏仁", "白芍"]);
        assert!(set.column_texts("剂量").is_empty());
    }

    #[test]
    fn session_record_round_trips_without_last_access() {
        let json = r#"{"session_id":"s1","history":[]}"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.session_id, "s1");
        assert!(record.history.is_empty());
    }
}
