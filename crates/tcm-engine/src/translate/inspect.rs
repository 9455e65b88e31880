//! Static inspection of Cypher text.
//!
//! A small tokenizer plus a single pass over the tokens is enough to answer
//! what the guard needs: does the text contain a writing clause, which labels,
//! relationship types and properties it touches, what the final projection
//! returns and how it is bounded. String literals, backticked names and
//! comments never count as keywords.

use std::collections::{BTreeMap, BTreeSet};

/// Clause keywords that write to (or reach outside of) the graph.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "SET", "DELETE", "DETACH", "REMOVE", "DROP", "LOAD", "FOREACH", "CALL",
];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    /// A backticked name.
    Quoted(String),
    Str,
    Number(String),
    Param(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

impl Token {
    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.tok, Tok::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn is_punct(&self, c: char) -> bool {
        self.tok == Tok::Punct(c)
    }

    /// Identifier or backticked name.
    fn name(&self) -> Option<&str> {
        match &self.tok {
            Tok::Ident(s) | Tok::Quoted(s) => Some(s),
            _ => None,
        }
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map_or(text.len(), |&(b, _)| b);
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i].1 == '*' && chars.get(i + 1).map(|p| p.1) == Some('/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
        } else if c == '\'' || c == '"' {
            i += 1;
            while i < chars.len() && chars[i].1 != c {
                if chars[i].1 == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(chars.len());
            tokens.push(Token {
                tok: Tok::Str,
                start,
                end: byte_at(i),
            });
        } else if c == '`' {
            let body_start = i + 1;
            i += 1;
            while i < chars.len() && chars[i].1 != '`' {
                i += 1;
            }
            let name = text[byte_at(body_start)..byte_at(i)].to_string();
            i = (i + 1).min(chars.len());
            tokens.push(Token {
                tok: Tok::Quoted(name),
                start,
                end: byte_at(i),
            });
        } else if c == '$' {
            i += 1;
            let name_start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Param(text[byte_at(name_start)..byte_at(i)].to_string()),
                start,
                end: byte_at(i),
            });
        } else if c.is_ascii_digit() {
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            // A fraction, but not a `..` range.
            if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            tokens.push(Token {
                tok: Tok::Number(text[start..byte_at(i)].to_string()),
                start,
                end: byte_at(i),
            });
        } else if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(text[start..byte_at(i)].to_string()),
                start,
                end: byte_at(i),
            });
        } else {
            i += 1;
            tokens.push(Token {
                tok: Tok::Punct(c),
                start,
                end: byte_at(i),
            });
        }
    }

    tokens
}

// ── Inspection ───────────────────────────────────────────────────

/// What a variable was bound to in a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarBinding {
    pub labels: BTreeSet<String>,
    pub relationships: BTreeSet<String>,
}

/// A `var.property` read, or a key inside an inline property map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PropertyRef {
    pub variable: Option<String>,
    /// Labels or relationship types written in the same pattern element.
    pub inline_owners: Vec<String>,
    pub property: String,
}

/// One item of the final `RETURN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnItem {
    /// Column name: the alias, or the expression text without one.
    pub column: String,
    /// Set when the expression is a bare `var.property`.
    pub source: Option<(String, String)>,
}

/// Facts derived from query text alone.
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    /// First writing keyword found, if any.
    pub mutating_keyword: Option<String>,
    pub labels: BTreeSet<String>,
    pub relationships: BTreeSet<String>,
    pub variables: BTreeMap<String, VarBinding>,
    pub property_refs: Vec<PropertyRef>,
    /// Names of `$parameters` the text expects.
    pub parameters: BTreeSet<String>,
    pub returns: Vec<ReturnItem>,
    /// Number of top-level `RETURN` clauses.
    pub return_clauses: usize,
    /// Literal `LIMIT` on the final projection. With `UNION`, the sum of the
    /// branch limits, and `None` if any branch is unbounded.
    pub limit: Option<u64>,
}

impl Inspection {
    pub fn is_read_only(&self) -> bool {
        self.mutating_keyword.is_none()
    }

    pub fn columns(&self) -> Vec<String> {
        self.returns.iter().map(|r| r.column.clone()).collect()
    }
}

/// Keywords after which `(` opens a pattern rather than a function call.
const PATTERN_CONTEXT: &[&str] = &[
    "MATCH", "OPTIONAL", "WHERE", "AND", "OR", "XOR", "NOT", "MERGE", "CREATE", "EXISTS", "WITH",
    "RETURN", "ON",
];

/// Keywords whose `{` opens a subquery rather than a map.
const SUBQUERY_KEYWORDS: &[&str] = &["EXISTS", "COUNT", "COLLECT", "CALL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Brace {
    Subquery,
    /// Map literal or map projection.
    Map,
}

pub fn inspect(text: &str) -> Inspection {
    let tokens = tokenize(text);
    let mut out = Inspection::default();
    let mut braces: Vec<Brace> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let tok = &tokens[i];
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let after_dot = prev.is_some_and(|p| p.is_punct('.'));

        match &tok.tok {
            Tok::Ident(word) if !after_dot => {
                let upper = word.to_ascii_uppercase();
                let is_label_position = prev.is_some_and(|p| p.is_punct(':'));
                if !is_label_position
                    && out.mutating_keyword.is_none()
                    && FORBIDDEN_KEYWORDS.contains(&upper.as_str())
                {
                    out.mutating_keyword = Some(upper.clone());
                }

                // var.prop
                if tokens.get(i + 1).is_some_and(|t| t.is_punct('.')) {
                    if let Some(prop) = tokens.get(i + 2).and_then(Token::name) {
                        out.property_refs.push(PropertyRef {
                            variable: Some(word.clone()),
                            inline_owners: Vec::new(),
                            property: prop.to_string(),
                        });
                    }
                }

                // Label predicate outside patterns: `WHERE n:Label`. Inside a
                // map, `key: value` pairs are skipped.
                let map_key = braces.last() == Some(&Brace::Map)
                    && prev.is_some_and(|p| p.is_punct('{') || p.is_punct(','));
                if !map_key && tokens.get(i + 1).is_some_and(|t| t.is_punct(':')) {
                    if let Some(label) = tokens.get(i + 2).and_then(Token::name) {
                        out.labels.insert(label.to_string());
                        out.variables
                            .entry(word.clone())
                            .or_default()
                            .labels
                            .insert(label.to_string());
                        i += 3;
                        continue;
                    }
                }
                i += 1;
            }
            Tok::Punct('(') if opens_node_pattern(&tokens, i) => {
                i = parse_element(&tokens, i, ')', &mut out, ElementKind::Node);
            }
            Tok::Punct('[') if prev.is_some_and(|p| p.is_punct('-')) => {
                i = parse_element(&tokens, i, ']', &mut out, ElementKind::Relationship);
            }
            Tok::Param(name) => {
                out.parameters.insert(name.clone());
                i += 1;
            }
            Tok::Punct('{') => {
                let subquery = prev.is_some_and(|p| {
                    SUBQUERY_KEYWORDS.iter().any(|kw| p.is_keyword(kw)) && !is_after_dot(&tokens, i - 1)
                });
                braces.push(if subquery { Brace::Subquery } else { Brace::Map });
                i += 1;
            }
            Tok::Punct('}') => {
                braces.pop();
                i += 1;
            }
            _ => i += 1,
        }
    }

    inspect_projection(text, &tokens, &mut out);
    out
}

fn opens_node_pattern(tokens: &[Token], i: usize) -> bool {
    if let Some(prev) = i.checked_sub(1).map(|p| &tokens[p]) {
        if let Tok::Ident(word) = &prev.tok {
            let upper = word.to_ascii_uppercase();
            if !PATTERN_CONTEXT.contains(&upper.as_str()) {
                // Function call such as `count(c)`.
                return false;
            }
        }
    }
    match tokens.get(i + 1).map(|t| &t.tok) {
        Some(Tok::Punct(':')) | Some(Tok::Punct(')')) => true,
        Some(Tok::Ident(_)) | Some(Tok::Quoted(_)) => matches!(
            tokens.get(i + 2).map(|t| &t.tok),
            Some(Tok::Punct(':')) | Some(Tok::Punct(')')) | Some(Tok::Punct('{'))
        ),
        _ => false,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Node,
    Relationship,
}

/// Parse `(var:Label {k: v})` or `[var:TYPE|OTHER *1..2 {k: v}]` starting at
/// the opening bracket. Returns the index after the closing bracket.
fn parse_element(
    tokens: &[Token],
    open: usize,
    close: char,
    out: &mut Inspection,
    kind: ElementKind,
) -> usize {
    let mut i = open + 1;
    let mut variable = None;
    let mut owners = Vec::new();

    if let Some(name) = tokens.get(i).and_then(Token::name) {
        if !tokens.get(i + 1).is_some_and(|t| t.is_punct('.')) {
            variable = Some(name.to_string());
            i += 1;
        }
    }

    while tokens.get(i).is_some_and(|t| t.is_punct(':') || t.is_punct('|') || t.is_punct('&')) {
        match tokens.get(i + 1).and_then(Token::name) {
            Some(name) => {
                owners.push(name.to_string());
                i += 2;
            }
            None => {
                i += 1;
                break;
            }
        }
    }

    match kind {
        ElementKind::Node => out.labels.extend(owners.iter().cloned()),
        ElementKind::Relationship => out.relationships.extend(owners.iter().cloned()),
    }
    if let Some(var) = &variable {
        let entry = out.variables.entry(var.clone()).or_default();
        match kind {
            ElementKind::Node => entry.labels.extend(owners.iter().cloned()),
            ElementKind::Relationship => entry.relationships.extend(owners.iter().cloned()),
        }
    }

    // Skip to the property map or the closing bracket.
    while let Some(tok) = tokens.get(i) {
        if tok.is_punct(close) {
            return i + 1;
        }
        if tok.is_punct('{') {
            i = parse_inline_map(tokens, i, variable.as_deref(), &owners, out);
            continue;
        }
        i += 1;
    }
    i
}

/// Record the keys of an inline property map. Values are scanned for
/// nested property reads but otherwise skipped.
fn parse_inline_map(
    tokens: &[Token],
    open: usize,
    variable: Option<&str>,
    owners: &[String],
    out: &mut Inspection,
) -> usize {
    let mut i = open + 1;
    let mut depth = 1usize;
    let mut expect_key = true;

    while let Some(tok) = tokens.get(i) {
        match &tok.tok {
            Tok::Punct('{') | Tok::Punct('[') | Tok::Punct('(') => depth += 1,
            Tok::Punct('}') | Tok::Punct(']') | Tok::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            Tok::Punct(',') if depth == 1 => expect_key = true,
            Tok::Param(name) => {
                out.parameters.insert(name.clone());
            }
            Tok::Ident(_) | Tok::Quoted(_)
                if expect_key
                    && depth == 1
                    && tokens.get(i + 1).is_some_and(|t| t.is_punct(':')) =>
            {
                if let Some(key) = tok.name() {
                    out.property_refs.push(PropertyRef {
                        variable: variable.map(str::to_string),
                        inline_owners: owners.to_vec(),
                        property: key.to_string(),
                    });
                }
                expect_key = false;
            }
            Tok::Ident(word) if tokens.get(i + 1).is_some_and(|t| t.is_punct('.')) => {
                if let Some(prop) = tokens.get(i + 2).and_then(Token::name) {
                    out.property_refs.push(PropertyRef {
                        variable: Some(word.clone()),
                        inline_owners: Vec::new(),
                        property: prop.to_string(),
                    });
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

/// Find top-level `RETURN` clauses, their limits, and the final item list.
fn inspect_projection(text: &str, tokens: &[Token], out: &mut Inspection) {
    let mut depth = 0usize;
    let mut returns = Vec::new();
    let mut unions = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        match &tok.tok {
            Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
            Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => depth = depth.saturating_sub(1),
            Tok::Ident(_) if depth == 0 && !is_after_dot(tokens, i) => {
                if tok.is_keyword("RETURN") {
                    returns.push(i);
                } else if tok.is_keyword("UNION") {
                    unions.push(i);
                }
            }
            _ => {}
        }
    }

    out.return_clauses = returns.len();
    let Some(&last) = returns.last() else {
        return;
    };

    // Each RETURN is bounded by the next UNION (or the end of the text).
    let mut limit: Option<u64> = None;
    for &ret in &returns {
        let branch_end = unions.iter().copied().find(|&u| u > ret).unwrap_or(tokens.len());
        match branch_limit(tokens, ret, branch_end) {
            Some(n) => limit = Some(limit.map_or(n, |m| m.saturating_add(n))),
            None => {
                limit = None;
                break;
            }
        }
    }
    out.limit = limit;

    let end = unions.iter().copied().find(|&u| u > last).unwrap_or(tokens.len());
    out.returns = return_items(text, tokens, last + 1, end);
}

fn is_after_dot(tokens: &[Token], i: usize) -> bool {
    i.checked_sub(1).is_some_and(|p| tokens[p].is_punct('.'))
}

fn branch_limit(tokens: &[Token], from: usize, to: usize) -> Option<u64> {
    let mut depth = 0usize;
    for i in from..to {
        match &tokens[i].tok {
            Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
            Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => depth = depth.saturating_sub(1),
            _ if depth == 0 && tokens[i].is_keyword("LIMIT") => {
                return match tokens.get(i + 1).map(|t| &t.tok) {
                    Some(Tok::Number(n)) => n.parse().ok(),
                    _ => None,
                };
            }
            _ => {}
        }
    }
    None
}

fn return_items(text: &str, tokens: &[Token], from: usize, to: usize) -> Vec<ReturnItem> {
    let mut start = from;
    if tokens.get(start).is_some_and(|t| t.is_keyword("DISTINCT")) {
        start += 1;
    }

    // The item list ends at ORDER / SKIP / LIMIT on the top level.
    let mut end = to;
    let mut depth = 0usize;
    for i in start..to {
        match &tokens[i].tok {
            Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
            Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => depth = depth.saturating_sub(1),
            _ if depth == 0
                && ["ORDER", "SKIP", "LIMIT"].iter().any(|kw| tokens[i].is_keyword(kw)) =>
            {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let mut items = Vec::new();
    let mut item_start = start;
    depth = 0;
    for i in start..end {
        match &tokens[i].tok {
            Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
            Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => depth = depth.saturating_sub(1),
            Tok::Punct(',') if depth == 0 => {
                items.extend(return_item(text, &tokens[item_start..i]));
                item_start = i + 1;
            }
            _ => {}
        }
    }
    if item_start < end {
        items.extend(return_item(text, &tokens[item_start..end]));
    }
    items
}

fn return_item(text: &str, item: &[Token]) -> Option<ReturnItem> {
    let first = item.first()?;
    if item.len() == 1 && first.is_punct('*') {
        return None;
    }
    let (expr, alias) = match item.iter().rposition(|t| t.is_keyword("AS")) {
        Some(pos) if pos + 1 < item.len() => (&item[..pos], item[pos + 1].name()),
        _ => (item, None),
    };
    let expr_text = match (expr.first(), expr.last()) {
        (Some(a), Some(b)) => text[a.start..b.end].trim().to_string(),
        _ => text[first.start..first.end].to_string(),
    };
    let source = match expr {
        [var, dot, prop] if dot.is_punct('.') => match (&var.tok, prop.name()) {
            (Tok::Ident(v), Some(p)) => Some((v.clone(), p.to_string())),
            _ => None,
        },
        _ => None,
    };
    Some(ReturnItem {
        column: alias.map(str::to_string).unwrap_or(expr_text),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_listing() {
        let ins = inspect("MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 ORDER BY 中药 LIMIT 200");
        assert!(ins.is_read_only());
        assert_eq!(ins.labels, BTreeSet::from(["Herb".to_string()]));
        assert_eq!(ins.limit, Some(200));
        assert_eq!(ins.columns(), vec!["中药"]);
        assert_eq!(
            ins.returns[0].source,
            Some(("h".to_string(), "name".to_string()))
        );
        assert!(ins.variables["h"].labels.contains("Herb"));
    }

    #[test]
    fn test_relationships_and_properties() {
        let ins = inspect(
            "MATCH (p:Prescription)-[r:CONTAINS_HERB]->(h:Herb) WHERE h.name IN $ctx0 \
             RETURN h.name AS 中药, r.dose AS 剂量 LIMIT 50",
        );
        assert!(ins.relationships.contains("CONTAINS_HERB"));
        assert!(ins.variables["r"].relationships.contains("CONTAINS_HERB"));
        assert!(ins.parameters.contains("ctx0"));
        let props: Vec<_> = ins.property_refs.iter().map(|p| p.property.as_str()).collect();
        assert!(props.contains(&"dose"));
        assert_eq!(ins.columns(), vec!["中药", "剂量"]);
    }

    #[test]
    fn test_mutations_detected() {
        for q in [
            "CREATE (n:Herb {name: 'x'})",
            "MATCH (n) DETACH DELETE n",
            "MATCH (h:Herb) SET h.name = 'x' RETURN h LIMIT 1",
            "match (h:Herb) merge (h)-[:X]->(h)",
            "LOAD CSV FROM 'file:///x' AS row RETURN row LIMIT 1",
            "CALL db.labels()",
            "MATCH (h:Herb) FOREACH (x IN [1] | REMOVE h.name)",
        ] {
            assert!(!inspect(q).is_read_only(), "{q}");
        }
    }

    #[test]
    fn test_keywords_in_literals_and_properties_ignored() {
        let ins = inspect(
            "MATCH (c:Case) WHERE c.original_text CONTAINS 'CREATE DELETE' \
             AND c.`set` IS NULL RETURN c.case_id AS 案例号 LIMIT 5",
        );
        assert!(ins.is_read_only());
        let ins = inspect("MATCH (p:Prescription) RETURN p.create AS x LIMIT 1 // DROP");
        assert!(ins.is_read_only());
    }

    #[test]
    fn test_function_call_is_not_a_pattern() {
        let ins = inspect("MATCH (c:Case) RETURN count(c) AS n LIMIT 1");
        assert_eq!(ins.labels.len(), 1);
        assert_eq!(ins.columns(), vec!["n"]);
    }

    #[test]
    fn test_inline_map_keys() {
        let ins = inspect("MATCH (h:Herb {name:'白芍'})<-[:CONTAINS_HERB]-(p) RETURN p.formula LIMIT 3");
        let inline: Vec<_> = ins
            .property_refs
            .iter()
            .filter(|p| !p.inline_owners.is_empty())
            .collect();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].property, "name");
        assert_eq!(inline[0].inline_owners, vec!["Herb"]);
        // Without an alias the column is the expression text.
        assert_eq!(ins.columns(), vec!["p.formula"]);
    }

    #[test]
    fn test_missing_or_parameter_limit() {
        assert_eq!(inspect("MATCH (h:Herb) RETURN h.name").limit, None);
        assert_eq!(inspect("MATCH (h:Herb) RETURN h.name LIMIT $n").limit, None);
        assert_eq!(
            inspect("MATCH (h:Herb) WITH h LIMIT 5 RETURN h.name").limit,
            None
        );
    }

    #[test]
    fn test_union_requires_every_branch_bounded() {
        let q = "MATCH (h:Herb) RETURN h.name AS n LIMIT 5 UNION MATCH (d:Diagnosis) RETURN d.name AS n";
        assert_eq!(inspect(q).limit, None);
        let q = "MATCH (h:Herb) RETURN h.name AS n LIMIT 5 UNION MATCH (d:Diagnosis) RETURN d.name AS n LIMIT 9";
        let ins = inspect(q);
        assert_eq!(ins.limit, Some(14));
        assert_eq!(ins.return_clauses, 2);
    }

    #[test]
    fn test_union_limits_add_up() {
        let q = "MATCH (h:Herb) RETURN h.name AS n LIMIT 200 \
                 UNION ALL MATCH (d:Diagnosis) RETURN d.name AS n LIMIT 200";
        assert_eq!(inspect(q).limit, Some(400));
    }

    #[test]
    fn test_labels_inside_subqueries() {
        let ins = inspect(
            "MATCH (h:Herb) WHERE EXISTS { MATCH (h) WHERE h:Doctor } RETURN h.name AS 中药 LIMIT 5",
        );
        assert!(ins.labels.contains("Doctor"));

        let ins = inspect(
            "MATCH (h:Herb) WHERE COUNT { (h) WHERE h:Doctor } > 0 RETURN h.name AS 中药 LIMIT 5",
        );
        assert!(ins.labels.contains("Doctor"));

        let ins = inspect(
            "MATCH (c:Case) WHERE EXISTS { (c)-[:HAS_DIAGNOSIS]->(:Disease) } RETURN c.case_id LIMIT 5",
        );
        assert!(ins.labels.contains("Disease"));
        assert_eq!(ins.limit, Some(5));
    }

    #[test]
    fn test_map_keys_are_not_labels() {
        let ins = inspect(
            "MATCH (h:Herb) RETURN {name: h.name, seen: h.first_seen} AS 中药 LIMIT 5",
        );
        assert_eq!(ins.labels, BTreeSet::from(["Herb".to_string()]));

        let ins = inspect("MATCH (h:Herb) RETURN h {.name, alias: h.name} AS 中药 LIMIT 5");
        assert_eq!(ins.labels, BTreeSet::from(["Herb".to_string()]));
    }

    #[test]
    fn test_unwind_and_aggregation_columns() {
        let ins = inspect(
            "MATCH (c:Case) UNWIND c.symptoms AS s RETURN s AS 症状, count(DISTINCT c) AS 频次 \
             ORDER BY 频次 DESC LIMIT 200",
        );
        assert_eq!(ins.columns(), vec!["症状", "频次"]);
        assert_eq!(ins.returns[0].source, None);
    }

    #[test]
    fn test_label_predicate_and_negated_pattern() {
        let ins = inspect(
            "MATCH (c) WHERE c:Case AND NOT (c)-[:HAS_ZHENGXING]->(:ZhengXing) \
             RETURN c.case_id AS 案例号 LIMIT 10",
        );
        assert!(ins.labels.contains("Case"));
        assert!(ins.labels.contains("ZhengXing"));
        assert!(ins.relationships.contains("HAS_ZHENGXING"));
        assert!(ins.variables["c"].labels.contains("Case"));
    }
}
