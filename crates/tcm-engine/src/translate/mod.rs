//! Question translation: free text (plus prior turns) to a candidate query.
//!
//! Strategies implement [`Translator`]. Whatever a strategy produces, the
//! safety-relevant facts of a [`CandidateQuery`] (read-only flag, referenced
//! labels and relationship types, projected columns) come from inspecting
//! the query text itself, never from the strategy.

pub mod chain;
pub mod inspect;
pub mod lexicon;
pub mod llm;
pub mod rules;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;
use tcm_core::{Binding, BindingOrigin, QueryParams, ResultSet, SchemaDescription, Turn};

pub use chain::ChainTranslator;
pub use inspect::Inspection;
pub use llm::LlmTranslator;
pub use rules::RuleTranslator;

/// Values carried into the next turn from one result column are capped.
pub const MAX_RESULT_BINDING_VALUES: usize = 50;

/// The question cannot be grounded in the schema. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Untranslatable {
    pub reason: String,
}

impl Untranslatable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A graph property addressed by owner: a node label, or a relationship type
/// (in which case `label` is the relationship's target label).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FieldRef {
    pub label: String,
    pub property: String,
    pub relationship: Option<String>,
}

impl FieldRef {
    pub fn node(label: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            property: property.into(),
            relationship: None,
        }
    }

    pub fn edge(
        relationship: impl Into<String>,
        target: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            label: target.into(),
            property: property.into(),
            relationship: Some(relationship.into()),
        }
    }

    pub fn of_binding(binding: &Binding) -> Self {
        Self {
            label: binding.label.clone(),
            property: binding.property.clone(),
            relationship: binding.relationship.clone(),
        }
    }

    pub fn bind(&self, values: Vec<String>, origin: BindingOrigin) -> Binding {
        Binding {
            label: self.label.clone(),
            property: self.property.clone(),
            relationship: self.relationship.clone(),
            values,
            origin,
        }
    }
}

/// The result column whose values the next turn may refer back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFocus {
    pub column: String,
    pub field: FieldRef,
}

/// A query proposed by a translator, not yet validated.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    text: String,
    params: QueryParams,
    inspection: Inspection,
    uses_prior_context: bool,
    focus: Option<ResultFocus>,
    filter_bindings: Vec<Binding>,
}

impl CandidateQuery {
    /// Inspect `text` and wrap it. Safety facts are fixed here.
    pub fn new(text: impl Into<String>, params: QueryParams) -> Self {
        let text = text.into();
        let inspection = inspect::inspect(&text);
        Self {
            text,
            params,
            inspection,
            uses_prior_context: false,
            focus: None,
            filter_bindings: Vec::new(),
        }
    }

    pub fn with_prior_context(mut self, uses_prior_context: bool) -> Self {
        self.uses_prior_context = uses_prior_context;
        self
    }

    pub fn with_focus(mut self, focus: ResultFocus) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Entities the question named explicitly, kept for follow-up turns.
    pub fn with_filter_bindings(mut self, bindings: Vec<Binding>) -> Self {
        self.filter_bindings = bindings;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn read_only(&self) -> bool {
        self.inspection.is_read_only()
    }

    pub fn referenced_labels(&self) -> &BTreeSet<String> {
        &self.inspection.labels
    }

    pub fn referenced_relationships(&self) -> &BTreeSet<String> {
        &self.inspection.relationships
    }

    pub fn columns(&self) -> Vec<String> {
        self.inspection.columns()
    }

    pub fn uses_prior_context(&self) -> bool {
        self.uses_prior_context
    }

    pub fn inspection(&self) -> &Inspection {
        &self.inspection
    }

    pub fn filter_bindings(&self) -> &[Binding] {
        &self.filter_bindings
    }

    /// The focus set by the translator, or else the first returned column
    /// that reads a property straight off a labelled node or typed
    /// relationship.
    pub fn focus(&self, schema: &SchemaDescription) -> Option<ResultFocus> {
        if self.focus.is_some() {
            return self.focus.clone();
        }
        self.inspection.returns.iter().find_map(|item| {
            let (var, property) = item.source.as_ref()?;
            let bound = self.inspection.variables.get(var)?;
            if let Some(label) = bound.labels.iter().find(|l| {
                schema
                    .label(l)
                    .is_some_and(|def| def.has_property(property))
            }) {
                return Some(ResultFocus {
                    column: item.column.clone(),
                    field: FieldRef::node(label.clone(), property.clone()),
                });
            }
            let rel = bound.relationships.iter().find_map(|r| {
                schema.relationship(r).filter(|def| def.has_property(property))
            })?;
            Some(ResultFocus {
                column: item.column.clone(),
                field: FieldRef::edge(rel.name.clone(), rel.target.clone(), property.clone()),
            })
        })
    }

    /// Bindings a turn answered by this query carries forward: the explicit
    /// filters, then the focus column's values.
    pub fn bindings(&self, schema: &SchemaDescription, result: &ResultSet) -> Vec<Binding> {
        let mut bindings = self.filter_bindings.clone();
        if let Some(focus) = self.focus(schema) {
            let mut values = result.column_texts(&focus.column);
            values.truncate(MAX_RESULT_BINDING_VALUES);
            if !values.is_empty() {
                bindings.push(focus.field.bind(values, BindingOrigin::Result));
            }
        }
        bindings
    }
}

/// A translation strategy.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Whether the strategy can currently produce queries.
    fn is_ready(&self) -> bool {
        true
    }

    /// Translate a question. `history` is chronological (oldest first).
    async fn translate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<CandidateQuery, Untranslatable>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::{CellValue, ResultRow, SchemaCatalog};

    fn herbs(names: &[&str]) -> ResultSet {
        let rows = names
            .iter()
            .map(|n| {
                let mut row = ResultRow::new();
                row.push("中药", CellValue::text(*n));
                row
            })
            .collect();
        ResultSet {
            columns: vec!["中药".into()],
            rows,
        }
    }

    #[test]
    fn test_safety_facts_come_from_text() {
        let q = CandidateQuery::new("MATCH (h:Herb) DETACH DELETE h", QueryParams::new());
        assert!(!q.read_only());
        assert!(q.referenced_labels().contains("Herb"));
    }

    #[test]
    fn test_focus_derived_from_projection() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let q = CandidateQuery::new(
            "MATCH (p:Prescription)-[r:CONTAINS_HERB]->(h:Herb) RETURN r.dose AS 剂量, h.name AS 中药 LIMIT 5",
            QueryParams::new(),
        );
        let focus = q.focus(&schema).unwrap();
        assert_eq!(focus.column, "剂量");
        assert_eq!(focus.field, FieldRef::edge("CONTAINS_HERB", "Herb", "dose"));
    }

    #[test]
    fn test_result_bindings_are_capped() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let q = CandidateQuery::new(
            "MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 LIMIT 200",
            QueryParams::new(),
        );
        let names: Vec<String> = (0..80).map(|i| format!("药{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let bindings = q.bindings(&schema, &herbs(&refs));
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].values.len(), MAX_RESULT_BINDING_VALUES);
        assert_eq!(bindings[0].origin, BindingOrigin::Result);
    }

    #[test]
    fn test_empty_result_binds_nothing() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let q = CandidateQuery::new(
            "MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 LIMIT 200",
            QueryParams::new(),
        );
        assert!(q.bindings(&schema, &herbs(&[])).is_empty());
    }
}
