//! Write operations for the case graph.
//!
//! Only the ingestion pipeline calls these. All node writes use MERGE
//! (upsert) semantics so re-importing a case is idempotent. Cases are keyed
//! by `case_id`, prescriptions by `(case_id, idx)`, and diagnoses, patterns
//! and herbs by `name`.

use neo4rs::{query, BoltNull, BoltType, Query};

use tcm_core::{CaseRecord, HerbRecord};

use crate::client::{GraphClient, GraphError};

/// Uniqueness constraints backing the catalog's key properties.
const CONSTRAINTS: &[&str] = &[
    "CREATE CONSTRAINT case_id_unique IF NOT EXISTS FOR (c:Case) REQUIRE c.case_id IS UNIQUE",
    "CREATE CONSTRAINT diag_name_unique IF NOT EXISTS FOR (d:Diagnosis) REQUIRE d.name IS UNIQUE",
    "CREATE CONSTRAINT zhengxing_name_unique IF NOT EXISTS FOR (z:ZhengXing) REQUIRE z.name IS UNIQUE",
    "CREATE CONSTRAINT herb_name_unique IF NOT EXISTS FOR (h:Herb) REQUIRE h.name IS UNIQUE",
];

impl GraphClient {
    /// Create the uniqueness constraints if they do not exist yet.
    pub async fn ensure_constraints(&self) -> Result<(), GraphError> {
        for statement in CONSTRAINTS {
            self.execute(query(statement)).await?;
        }
        tracing::debug!(count = CONSTRAINTS.len(), "Constraints ensured");
        Ok(())
    }

    /// Upsert a case with its diagnoses, patterns, prescriptions and herbs
    /// in a single transaction.
    pub async fn upsert_case(&self, record: &CaseRecord) -> Result<(), GraphError> {
        let mut txn = self.begin().await?;
        for q in case_statements(record) {
            txn.run(q).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Replace a case: remove it and its prescriptions, then upsert it again.
    ///
    /// Shared nodes (diagnoses, patterns, herbs) are left in place.
    pub async fn replace_case(&self, record: &CaseRecord) -> Result<(), GraphError> {
        let mut txn = self.begin().await?;
        txn.run(delete_case_statement(&record.case_id)).await?;
        for q in case_statements(record) {
            txn.run(q).await?;
        }
        txn.commit().await?;
        tracing::info!(case_id = %record.case_id, "Case replaced");
        Ok(())
    }

    /// Delete a case and its prescriptions. Fails if the case does not exist.
    pub async fn delete_case(&self, case_id: &str) -> Result<(), GraphError> {
        if !self.case_exists(case_id).await? {
            return Err(GraphError::CaseNotFound {
                case_id: case_id.to_string(),
            });
        }
        self.execute(delete_case_statement(case_id)).await
    }
}

fn delete_case_statement(case_id: &str) -> Query {
    query(
        "MATCH (c:Case {case_id: $case_id})
         OPTIONAL MATCH (c)-[:HAS_PRESCRIPTION]->(p:Prescription)
         DETACH DELETE p, c",
    )
    .param("case_id", case_id.to_string())
}

/// Every statement needed to upsert one case, in dependency order.
fn case_statements(record: &CaseRecord) -> Vec<Query> {
    let cid = record.case_id.clone();
    let mut statements = vec![query(
        "MERGE (c:Case {case_id: $case_id})
         SET c.symptoms = $symptoms,
             c.tongue = $tongue,
             c.pulse = $pulse,
             c.zhengxing = $zhengxing,
             c.original_text = $original_text",
    )
    .param("case_id", cid.clone())
    .param("symptoms", record.symptoms.clone())
    .param("tongue", record.tongue.clone())
    .param("pulse", record.pulse.clone())
    .param("zhengxing", record.zhengxing.clone())
    .param("original_text", opt_param(&record.original_text))];

    for name in &record.diagnosis {
        statements.push(
            query(
                "MERGE (d:Diagnosis {name: $name})
                 WITH d
                 MATCH (c:Case {case_id: $case_id})
                 MERGE (c)-[:HAS_DIAGNOSIS]->(d)",
            )
            .param("case_id", cid.clone())
            .param("name", name.clone()),
        );
    }

    for name in &record.zhengxing {
        statements.push(
            query(
                "MERGE (z:ZhengXing {name: $name})
                 WITH z
                 MATCH (c:Case {case_id: $case_id})
                 MERGE (c)-[:HAS_ZHENGXING]->(z)",
            )
            .param("case_id", cid.clone())
            .param("name", name.clone()),
        );
    }

    for (idx, prescription) in record.prescriptions.iter().enumerate() {
        statements.push(
            query(
                "MERGE (p:Prescription {case_id: $case_id, idx: $idx})
                 SET p.formula = $formula, p.method = $method
                 WITH p
                 MATCH (c:Case {case_id: $case_id})
                 MERGE (c)-[:HAS_PRESCRIPTION]->(p)",
            )
            .param("case_id", cid.clone())
            .param("idx", idx as i64)
            .param("formula", CaseRecord::formula_name(prescription).to_string())
            .param("method", opt_param(&prescription.method)),
        );

        for herb in &prescription.herbs {
            statements.push(herb_statement(&cid, idx, herb));
        }
    }

    statements
}

fn herb_statement(case_id: &str, idx: usize, herb: &HerbRecord) -> Query {
    query(
        "MERGE (h:Herb {name: $name})
         ON CREATE SET h.first_seen = date()
         WITH h
         MATCH (p:Prescription {case_id: $case_id, idx: $idx})
         MERGE (p)-[r:CONTAINS_HERB]->(h)
         SET r.dose = $dose, r.prep = $prep",
    )
    .param("name", herb.name.clone())
    .param("case_id", case_id.to_string())
    .param("idx", idx as i64)
    .param("dose", opt_param(&herb.dose))
    .param("prep", opt_param(&herb.prep))
}

/// Optional strings are stored as null, not as empty strings, so
/// `IS NULL` checks in read queries stay meaningful.
fn opt_param(value: &Option<String>) -> BoltType {
    match value {
        Some(v) => v.clone().into(),
        None => BoltType::Null(BoltNull),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::PrescriptionRecord;

    fn sample_case() -> CaseRecord {
        CaseRecord {
            case_id: "f001".into(),
            symptoms: vec!["咳嗽".into()],
            tongue: vec![],
            pulse: vec!["脉浮".into()],
            original_text: None,
            diagnosis: vec!["哮喘".into(), "咳嗽".into()],
            zhengxing: vec!["风寒束肺".into()],
            prescriptions: vec![PrescriptionRecord {
                formula: None,
                method: Some("水煎服".into()),
                herbs: vec![
                    HerbRecord {
                        name: "麻黄".into(),
                        dose: Some("9g".into()),
                        prep: None,
                    },
                    HerbRecord {
                        name: "杏仁".into(),
                        dose: None,
                        prep: None,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_statement_count_covers_every_entity() {
        // case + 2 diagnoses + 1 pattern + 1 prescription + 2 herbs
        assert_eq!(case_statements(&sample_case()).len(), 7);
    }

    #[test]
    fn test_empty_case_only_writes_case_node() {
        let record = CaseRecord {
            case_id: "f999".into(),
            symptoms: vec![],
            tongue: vec![],
            pulse: vec![],
            original_text: None,
            diagnosis: vec![],
            zhengxing: vec![],
            prescriptions: vec![],
        };
        assert_eq!(case_statements(&record).len(), 1);
    }

    #[test]
    fn test_missing_optional_is_null() {
        assert!(matches!(opt_param(&None), BoltType::Null(_)));
        assert!(matches!(opt_param(&Some("9g".into())), BoltType::String(_)));
    }
}
