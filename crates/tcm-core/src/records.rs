//! Editable JSON case records, the source of truth for the case graph.

use serde::{Deserialize, Serialize};

/// Formula name stored when a prescription does not name one.
pub const UNNAMED_FORMULA: &str = "（未明示方名/加减方）";

/// One clinical case as kept in the JSON source directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub tongue: Vec<String>,
    #[serde(default)]
    pub pulse: Vec<String>,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub diagnosis: Vec<String>,
    #[serde(default)]
    pub zhengxing: Vec<String>,
    #[serde(default)]
    pub prescriptions: Vec<PrescriptionRecord>,
}

/// A prescription within a case. Identified in the graph by `(case_id, idx)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub herbs: Vec<HerbRecord>,
}

/// An herb within a prescription. Dose and preparation live on the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerbRecord {
    pub name: String,
    #[serde(default)]
    pub dose: Option<String>,
    #[serde(default)]
    pub prep: Option<String>,
}

impl CaseRecord {
    /// Check the fields the graph relies on as keys.
    pub fn validate(&self) -> Result<(), String> {
        if self.case_id.trim().is_empty() {
            return Err("case_id is empty".to_string());
        }
        for (idx, prescription) in self.prescriptions.iter().enumerate() {
            if prescription.herbs.iter().any(|h| h.name.trim().is_empty()) {
                return Err(format!(
                    "prescription {idx} of case {} has an herb without a name",
                    self.case_id
                ));
            }
        }
        Ok(())
    }

    /// Formula name as stored, substituting the placeholder for unnamed ones.
    pub fn formula_name(prescription: &PrescriptionRecord) -> &str {
        prescription
            .formula
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(UNNAMED_FORMULA)
    }
}
