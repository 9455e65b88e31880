//! Schema catalog for the case graph.
//!
//! The catalog is loaded once at startup, validated, and then shared as an
//! immutable [`SchemaDescription`]. Label or property additions made by the
//! ingestion pipeline are only picked up after a process restart.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Built-in catalog definition for the TCM case graph.
const BUILTIN_SCHEMA: &str = include_str!("../schema/tcm_schema.json");

/// A property declared on a label or relationship type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    /// True for list-valued properties (e.g. `Case.symptoms`).
    #[serde(default)]
    pub list: bool,
}

/// A node label with its properties and designated key property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeLabel {
    pub name: String,
    pub key: String,
    pub properties: Vec<PropertyDef>,
}

impl NodeLabel {
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }
}

/// A directed relationship type between two labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipType {
    pub name: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

impl RelationshipType {
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }
}

/// Raw catalog definition as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Hub label that every other label can be reached from.
    #[serde(default)]
    pub anchor: Option<String>,
    pub labels: Vec<NodeLabel>,
    pub relationships: Vec<RelationshipType>,
    /// Example read queries shown to prompt-based translators.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Questions offered to users as starting points.
    #[serde(default)]
    pub recommended_questions: Vec<String>,
}

/// One traversal step between two labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub relationship: String,
    pub from: String,
    pub to: String,
    /// True when the hop follows the stored direction (`from` is the source).
    pub forward: bool,
}

/// Validated, immutable view over the catalog.
#[derive(Debug)]
pub struct SchemaDescription {
    definition: SchemaDefinition,
    label_index: BTreeMap<String, usize>,
    rel_index: BTreeMap<String, usize>,
}

impl SchemaDescription {
    fn build(definition: SchemaDefinition) -> Result<Self, CatalogError> {
        let mut label_index = BTreeMap::new();
        for (i, label) in definition.labels.iter().enumerate() {
            if label_index.insert(label.name.clone(), i).is_some() {
                return Err(CatalogError::Invalid(format!(
                    "duplicate label: {}",
                    label.name
                )));
            }
            if !label.has_property(&label.key) {
                return Err(CatalogError::Invalid(format!(
                    "key property {} is not declared on label {}",
                    label.key, label.name
                )));
            }
        }

        let mut rel_index = BTreeMap::new();
        for (i, rel) in definition.relationships.iter().enumerate() {
            if rel_index.insert(rel.name.clone(), i).is_some() {
                return Err(CatalogError::Invalid(format!(
                    "duplicate relationship type: {}",
                    rel.name
                )));
            }
            for endpoint in [&rel.source, &rel.target] {
                if !label_index.contains_key(endpoint) {
                    return Err(CatalogError::Invalid(format!(
                        "relationship {} references undeclared label {endpoint}",
                        rel.name
                    )));
                }
            }
        }

        if let Some(anchor) = &definition.anchor {
            if !label_index.contains_key(anchor) {
                return Err(CatalogError::Invalid(format!(
                    "anchor label {anchor} is not declared"
                )));
            }
        }

        Ok(Self {
            definition,
            label_index,
            rel_index,
        })
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn labels(&self) -> &[NodeLabel] {
        &self.definition.labels
    }

    pub fn relationships(&self) -> &[RelationshipType] {
        &self.definition.relationships
    }

    pub fn label(&self, name: &str) -> Option<&NodeLabel> {
        self.label_index
            .get(name)
            .map(|&i| &self.definition.labels[i])
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipType> {
        self.rel_index
            .get(name)
            .map(|&i| &self.definition.relationships[i])
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.label_index.contains_key(name)
    }

    pub fn has_relationship(&self, name: &str) -> bool {
        self.rel_index.contains_key(name)
    }

    pub fn anchor(&self) -> Option<&str> {
        self.definition.anchor.as_deref()
    }

    pub fn examples(&self) -> &[String] {
        &self.definition.examples
    }

    pub fn recommended_questions(&self) -> &[String] {
        &self.definition.recommended_questions
    }

    /// Shortest traversal from one label to another, ignoring stored direction.
    ///
    /// Neighbors are explored in declaration order so the result is stable.
    pub fn path(&self, from: &str, to: &str) -> Option<Vec<Hop>> {
        if !self.has_label(from) || !self.has_label(to) {
            return None;
        }
        if from == to {
            return Some(Vec::new());
        }

        let mut visited = BTreeSet::new();
        let mut came_from: BTreeMap<String, Hop> = BTreeMap::new();
        let mut queue = VecDeque::new();
        visited.insert(from.to_string());
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            for rel in self.relationships() {
                let (next, forward) = if rel.source == current {
                    (&rel.target, true)
                } else if rel.target == current {
                    (&rel.source, false)
                } else {
                    continue;
                };
                if !visited.insert(next.clone()) {
                    continue;
                }
                came_from.insert(
                    next.clone(),
                    Hop {
                        relationship: rel.name.clone(),
                        from: current.clone(),
                        to: next.clone(),
                        forward,
                    },
                );
                if next == to {
                    let mut hops = Vec::new();
                    let mut cursor = to.to_string();
                    while let Some(hop) = came_from.get(&cursor) {
                        cursor = hop.from.clone();
                        hops.push(hop.clone());
                    }
                    hops.reverse();
                    return Some(hops);
                }
                queue.push_back(next.clone());
            }
        }

        None
    }
}

/// Process-wide schema catalog. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    description: Arc<SchemaDescription>,
}

impl SchemaCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_SCHEMA)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definition: SchemaDefinition = serde_json::from_str(json)?;
        Self::from_definition(definition)
    }

    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, CatalogError> {
        let description = SchemaDescription::build(definition)?;
        Ok(Self {
            description: Arc::new(description),
        })
    }

    /// Load from a file, or the built-in definition when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            labels = catalog.description.labels().len(),
            relationships = catalog.description.relationships().len(),
            "Schema catalog loaded"
        );
        Ok(catalog)
    }

    pub fn describe(&self) -> Arc<SchemaDescription> {
        Arc::clone(&self.description)
    }
}
