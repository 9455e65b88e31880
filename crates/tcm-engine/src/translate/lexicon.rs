//! Chinese vocabulary for the case graph.
//!
//! Each facet names one graph field (a label property or a relationship
//! property), the column alias it is returned under, and the surface terms
//! that refer to it. The lexicon is checked against the catalog when it is
//! built; facets whose field the catalog does not declare are dropped.

use tcm_core::SchemaDescription;

use super::FieldRef;

/// Index of a facet inside a [`Lexicon`].
pub type FacetId = usize;

#[derive(Clone, Copy)]
enum Owner {
    Label(&'static str),
    Edge(&'static str),
}

struct FacetSpec {
    column: &'static str,
    owner: Owner,
    property: &'static str,
    terms: &'static [&'static str],
    show_owner: bool,
}

const FACETS: &[FacetSpec] = &[
    FacetSpec {
        column: "症状",
        owner: Owner::Label("Case"),
        property: "symptoms",
        terms: &["症状"],
        show_owner: false,
    },
    FacetSpec {
        column: "舌象",
        owner: Owner::Label("Case"),
        property: "tongue",
        terms: &["舌象", "舌苔", "舌质"],
        show_owner: false,
    },
    FacetSpec {
        column: "脉象",
        owner: Owner::Label("Case"),
        property: "pulse",
        terms: &["脉象"],
        show_owner: false,
    },
    FacetSpec {
        column: "证型",
        owner: Owner::Label("ZhengXing"),
        property: "name",
        terms: &["证型", "证候", "辨证"],
        show_owner: false,
    },
    FacetSpec {
        column: "疾病",
        owner: Owner::Label("Diagnosis"),
        property: "name",
        terms: &["疾病", "病名", "诊断"],
        show_owner: false,
    },
    FacetSpec {
        column: "处方",
        owner: Owner::Label("Prescription"),
        property: "formula",
        terms: &["处方", "药方", "方剂", "方名"],
        show_owner: false,
    },
    FacetSpec {
        column: "煎服方法",
        owner: Owner::Label("Prescription"),
        property: "method",
        terms: &["煎服方法", "煎服法", "煎服", "服用方法"],
        show_owner: false,
    },
    FacetSpec {
        column: "中药",
        owner: Owner::Label("Herb"),
        property: "name",
        terms: &["中药", "药物", "草药", "单味药", "药材"],
        show_owner: false,
    },
    FacetSpec {
        column: "剂量",
        owner: Owner::Edge("CONTAINS_HERB"),
        property: "dose",
        terms: &["剂量", "用量"],
        show_owner: true,
    },
    FacetSpec {
        column: "炮制方法",
        owner: Owner::Edge("CONTAINS_HERB"),
        property: "prep",
        terms: &["炮制方法", "炮制"],
        show_owner: true,
    },
    FacetSpec {
        column: "案例号",
        owner: Owner::Label("Case"),
        property: "case_id",
        terms: &["案例号", "病例号", "案例编号", "案例", "病例", "医案"],
        show_owner: false,
    },
    FacetSpec {
        column: "原始文献",
        owner: Owner::Label("Case"),
        property: "original_text",
        terms: &["原始文献", "原文", "原始记录"],
        show_owner: true,
    },
];

/// A queryable field with its display column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub column: &'static str,
    pub field: FieldRef,
    /// List-valued property.
    pub list: bool,
    /// Plain listings also return the owning entity's key column.
    pub show_owner: bool,
}

/// Facets plus a longest-first term table.
#[derive(Debug, Clone)]
pub struct Lexicon {
    facets: Vec<Facet>,
    terms: Vec<(Vec<char>, FacetId)>,
}

impl Lexicon {
    pub fn new(schema: &SchemaDescription) -> Self {
        let mut facets = Vec::new();
        let mut terms = Vec::new();

        for spec in FACETS {
            let Some((field, list)) = resolve(schema, spec) else {
                tracing::debug!(column = spec.column, "Facet disabled: field not in catalog");
                continue;
            };
            let id = facets.len();
            facets.push(Facet {
                column: spec.column,
                field,
                list,
                show_owner: spec.show_owner,
            });
            terms.extend(spec.terms.iter().map(|t| (t.chars().collect::<Vec<_>>(), id)));
        }

        // Longest first so "案例号" wins over "案例".
        terms.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { facets, terms }
    }

    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    pub fn facet(&self, id: FacetId) -> &Facet {
        &self.facets[id]
    }

    /// Facet whose field is exactly `field`.
    pub fn facet_for_field(&self, field: &FieldRef) -> Option<FacetId> {
        self.facets.iter().position(|f| &f.field == field)
    }

    /// Longest term starting at `at`, skipping positions already consumed.
    /// Returns the facet and the term length in chars.
    pub fn match_at(&self, chars: &[char], used: &[bool], at: usize) -> Option<(FacetId, usize)> {
        self.terms.iter().find_map(|(term, id)| {
            let end = at + term.len();
            (end <= chars.len()
                && chars[at..end] == term[..]
                && !used[at..end].iter().any(|&u| u))
            .then_some((*id, term.len()))
        })
    }

    /// Longest term ending exactly at `end`. Returns the facet and the
    /// term's start position.
    pub fn match_ending_at(
        &self,
        chars: &[char],
        used: &[bool],
        end: usize,
    ) -> Option<(FacetId, usize)> {
        self.terms.iter().find_map(|(term, id)| {
            let start = end.checked_sub(term.len())?;
            (end <= chars.len()
                && chars[start..end] == term[..]
                && !used[start..end].iter().any(|&u| u))
            .then_some((*id, start))
        })
    }
}

fn resolve(schema: &SchemaDescription, spec: &FacetSpec) -> Option<(FieldRef, bool)> {
    match spec.owner {
        Owner::Label(label) => {
            let prop = schema.label(label)?.property(spec.property)?;
            Some((FieldRef::node(label, spec.property), prop.list))
        }
        Owner::Edge(rel) => {
            let def = schema.relationship(rel)?;
            def.has_property(spec.property)
                .then(|| (FieldRef::edge(rel, def.target.clone(), spec.property), false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::catalog::SchemaDefinition;
    use tcm_core::SchemaCatalog;

    #[test]
    fn test_builtin_catalog_enables_every_facet() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let lexicon = Lexicon::new(&schema);
        assert_eq!(lexicon.facets().len(), FACETS.len());
    }

    #[test]
    fn test_longest_term_wins() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let lexicon = Lexicon::new(&schema);
        let chars: Vec<char> = "案例号".chars().collect();
        let used = vec![false; chars.len()];
        let (id, len) = lexicon.match_at(&chars, &used, 0).unwrap();
        assert_eq!(len, 3);
        assert_eq!(lexicon.facet(id).column, "案例号");

        let chars: Vec<char> = "单味药剂量".chars().collect();
        let used = vec![false; chars.len()];
        let (id, start) = lexicon.match_ending_at(&chars, &used, chars.len()).unwrap();
        assert_eq!(start, 3);
        assert_eq!(lexicon.facet(id).column, "剂量");
    }

    #[test]
    fn test_facets_missing_from_catalog_are_dropped() {
        let json = r#"{
            "labels": [{"name": "Herb", "key": "name", "properties": [{"name": "name"}]}],
            "relationships": []
        }"#;
        let definition: SchemaDefinition = serde_json::from_str(json).unwrap();
        let schema = SchemaCatalog::from_definition(definition).unwrap().describe();
        let lexicon = Lexicon::new(&schema);
        assert_eq!(lexicon.facets().len(), 1);
        assert_eq!(lexicon.facets()[0].column, "中药");
    }
}
