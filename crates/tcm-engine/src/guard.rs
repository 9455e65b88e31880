//! Query guard: the only way to obtain a [`ValidatedQuery`].
//!
//! Checks run in a fixed order and stop at the first failure:
//! writes, then schema references, then result bounds. The guard never
//! edits a candidate.

use std::sync::Arc;

use tcm_core::{QueryParams, SchemaDescription};

use crate::error::AskError;
use crate::translate::{CandidateQuery, Inspection};

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("writing clause {0}")]
    MutationForbidden(String),

    #[error("{0}")]
    UnknownSchemaReference(String),

    #[error("{0}")]
    UnboundedResult(String),
}

impl From<Rejection> for AskError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::MutationForbidden(m) => AskError::MutationForbidden(m),
            Rejection::UnknownSchemaReference(m) => AskError::UnknownSchemaReference(m),
            Rejection::UnboundedResult(m) => AskError::UnboundedResult(m),
        }
    }
}

/// A candidate that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    candidate: CandidateQuery,
    max_rows: u64,
}

impl ValidatedQuery {
    pub fn text(&self) -> &str {
        self.candidate.text()
    }

    pub fn params(&self) -> &QueryParams {
        self.candidate.params()
    }

    pub fn columns(&self) -> Vec<String> {
        self.candidate.columns()
    }

    pub fn candidate(&self) -> &CandidateQuery {
        &self.candidate
    }

    /// Upper bound on returned rows.
    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }
}

pub struct Guard {
    schema: Arc<SchemaDescription>,
    max_rows: u64,
}

impl Guard {
    pub fn new(schema: Arc<SchemaDescription>, max_rows: u64) -> Self {
        Self { schema, max_rows }
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    pub fn validate(&self, candidate: CandidateQuery) -> Result<ValidatedQuery, Rejection> {
        let inspection = candidate.inspection();

        if let Some(keyword) = &inspection.mutating_keyword {
            return Err(Rejection::MutationForbidden(keyword.clone()));
        }
        self.check_schema(inspection)?;
        let limit = self.check_bounds(inspection)?;

        Ok(ValidatedQuery {
            candidate,
            max_rows: limit,
        })
    }

    fn check_schema(&self, inspection: &Inspection) -> Result<(), Rejection> {
        if let Some(label) = inspection.labels.iter().find(|l| !self.schema.has_label(l)) {
            return Err(Rejection::UnknownSchemaReference(format!("label {label}")));
        }
        if let Some(rel) = inspection
            .relationships
            .iter()
            .find(|r| !self.schema.has_relationship(r))
        {
            return Err(Rejection::UnknownSchemaReference(format!(
                "relationship type {rel}"
            )));
        }

        for reference in &inspection.property_refs {
            let mut labels: Vec<&str> = Vec::new();
            let mut rels: Vec<&str> = Vec::new();
            if let Some(bound) = reference
                .variable
                .as_ref()
                .and_then(|v| inspection.variables.get(v))
            {
                labels.extend(bound.labels.iter().map(String::as_str));
                rels.extend(bound.relationships.iter().map(String::as_str));
            }
            for owner in &reference.inline_owners {
                if self.schema.has_label(owner) {
                    labels.push(owner);
                } else {
                    rels.push(owner);
                }
            }
            // Unlabelled variables (aliases, UNWIND items) cannot be checked.
            if labels.is_empty() && rels.is_empty() {
                continue;
            }

            let declared = labels
                .iter()
                .filter_map(|l| self.schema.label(l))
                .any(|l| l.has_property(&reference.property))
                || rels
                    .iter()
                    .filter_map(|r| self.schema.relationship(r))
                    .any(|r| r.has_property(&reference.property));
            if !declared {
                let owners: Vec<&str> = labels.iter().chain(rels.iter()).copied().collect();
                return Err(Rejection::UnknownSchemaReference(format!(
                    "property {} on {}",
                    reference.property,
                    owners.join("|")
                )));
            }
        }
        Ok(())
    }

    fn check_bounds(&self, inspection: &Inspection) -> Result<u64, Rejection> {
        match inspection.limit {
            None => Err(Rejection::UnboundedResult(
                "final projection has no literal LIMIT".to_string(),
            )),
            Some(n) if n > self.max_rows => Err(Rejection::UnboundedResult(format!(
                "LIMIT {n} exceeds the maximum of {}",
                self.max_rows
            ))),
            Some(n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::SchemaCatalog;

    fn guard() -> Guard {
        Guard::new(SchemaCatalog::builtin().unwrap().describe(), 200)
    }

    fn check(text: &str) -> Result<ValidatedQuery, Rejection> {
        guard().validate(CandidateQuery::new(text, QueryParams::new()))
    }

    #[test]
    fn test_accepts_bounded_read() {
        let q = check("MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 ORDER BY 中药 LIMIT 200").unwrap();
        assert_eq!(q.columns(), vec!["中药".to_string()]);
        assert_eq!(q.max_rows(), 200);
    }

    #[test]
    fn test_mutation_checked_first() {
        // Also unknown and unbounded, but the write wins.
        let err = check("MATCH (x:Doctor) DETACH DELETE x").unwrap_err();
        assert_eq!(err, Rejection::MutationForbidden("DETACH".into()));
        assert!(matches!(
            check("CALL db.labels() YIELD label RETURN label LIMIT 5"),
            Err(Rejection::MutationForbidden(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb) SET h.name = 'x' RETURN h LIMIT 1"),
            Err(Rejection::MutationForbidden(_))
        ));
    }

    #[test]
    fn test_unknown_schema_references() {
        assert!(matches!(
            check("MATCH (d:Doctor) RETURN d.name LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
        assert!(matches!(
            check("MATCH (c:Case)-[:TREATED_BY]->(h:Herb) RETURN h.name LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb) RETURN h.price LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb {price: '1'}) RETURN h.name LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
    }

    #[test]
    fn test_unknown_labels_inside_subqueries() {
        assert!(matches!(
            check("MATCH (h:Herb) WHERE EXISTS { MATCH (h) WHERE h:Doctor } RETURN h.name AS 中药 LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb) WHERE COUNT { (h) WHERE h:Doctor } > 0 RETURN h.name AS 中药 LIMIT 5"),
            Err(Rejection::UnknownSchemaReference(_))
        ));
        assert!(check(
            "MATCH (c:Case) WHERE EXISTS { (c)-[:HAS_DIAGNOSIS]->(:Diagnosis) } RETURN c.case_id AS 案例号 LIMIT 5"
        )
        .is_ok());
    }

    #[test]
    fn test_union_branches_share_the_bound() {
        assert!(matches!(
            check(
                "MATCH (h:Herb) RETURN h.name AS n LIMIT 200 \
                 UNION ALL MATCH (d:Diagnosis) RETURN d.name AS n LIMIT 200"
            ),
            Err(Rejection::UnboundedResult(_))
        ));
        let q = check(
            "MATCH (h:Herb) RETURN h.name AS n LIMIT 100 \
             UNION MATCH (d:Diagnosis) RETURN d.name AS n LIMIT 100",
        )
        .unwrap();
        assert_eq!(q.max_rows(), 200);
    }

    #[test]
    fn test_relationship_and_alias_properties() {
        assert!(check(
            "MATCH (p:Prescription)-[r:CONTAINS_HERB]->(h:Herb) RETURN h.name AS 中药, r.dose AS 剂量 LIMIT 20"
        )
        .is_ok());
        assert!(check(
            "MATCH (c:Case) UNWIND c.symptoms AS s RETURN s AS 症状, count(DISTINCT c) AS 频次 ORDER BY 频次 DESC LIMIT 200"
        )
        .is_ok());
    }

    #[test]
    fn test_bounds() {
        assert!(matches!(
            check("MATCH (h:Herb) RETURN h.name"),
            Err(Rejection::UnboundedResult(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb) RETURN h.name LIMIT 500"),
            Err(Rejection::UnboundedResult(_))
        ));
        assert!(matches!(
            check("MATCH (h:Herb) RETURN h.name LIMIT $n"),
            Err(Rejection::UnboundedResult(_))
        ));
    }

    #[test]
    fn test_catalog_examples_pass() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let guard = Guard::new(schema.clone(), 200);
        for example in schema.examples() {
            let result = guard.validate(CandidateQuery::new(example.as_str(), QueryParams::new()));
            assert!(result.is_ok(), "{example}: {:?}", result.err());
        }
    }

    #[test]
    fn test_rejection_codes() {
        let err: AskError = Rejection::UnboundedResult("x".into()).into();
        assert_eq!(err.code(), "UNBOUNDED_RESULT");
    }
}
