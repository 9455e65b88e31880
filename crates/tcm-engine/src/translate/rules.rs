//! Deterministic template translation.
//!
//! A question is read in passes over its characters. Each pass consumes what
//! it recognizes:
//!
//! 1. quoted values (`中药“白芍”`) and `X为Y` conditions, optionally scoped
//!    with `的案例中`, plus `X为空` / `X不为空`;
//! 2. references to the previous turn (`它们`, `这些中药`, `基于以上`);
//! 3. facet terms, split into targets and `A的B` modifiers;
//! 4. aggregation words (`频次`, `多少个`);
//! 5. filler words.
//!
//! Anything left over means the question mentions something the catalog
//! does not know, and translation fails rather than guess.
//!
//! The query pattern is assembled from catalog paths rooted at the anchor
//! label, then trimmed back to the labels actually needed. Values are always
//! passed as parameters.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tcm_core::catalog::Hop;
use tcm_core::{Binding, BindingOrigin, ParamValue, QueryParams, SchemaDescription, Turn};

use super::lexicon::{FacetId, Lexicon};
use super::{CandidateQuery, FieldRef, ResultFocus, Translator, Untranslatable};

const FREQUENCY_COLUMN: &str = "频次";
const COUNT_COLUMN: &str = "数量";

const QUOTES: &[(char, char)] = &[
    ('“', '”'),
    ('"', '"'),
    ('「', '」'),
    ('『', '』'),
    ('《', '》'),
    ('‘', '’'),
    ('\'', '\''),
];

/// Words between an entity term and a quoted value (`中药为“白芍”`).
const VALUE_CONNECTORS: &[&str] = &["名为", "叫做", "叫", "为", "是", "：", ":"];

/// Words between a quoted value and the entity term after it (`“白芍”这味中药`).
const DEMONSTRATIVES: &[&str] = &["这一", "这个", "这味", "这种", "这首", "这张", "这"];

/// Suffixes allowed after a condition's subject term (`中药名称为…`).
const SUBJECT_SUFFIXES: &[&str] = &["名称", "名字", "名", ""];

/// `的案例中` and friends after a condition.
const SCOPES: &[&str] = &[
    "的案例中", "的病例中", "的医案中", "的案例里", "的病例里", "的医案里",
];

const INTERROGATIVES: &[&str] = &["多少", "什么", "哪", "几", "怎"];

/// Consumed before reference detection so `其` inside them is not a pronoun.
const SHIELDED: &[&str] = &["及其", "以及", "其他", "其它", "尤其", "应该"];

/// Follow-up markers: refer to the previous turn without naming anything.
const FOLLOW_UP_MARKERS: &[&str] = &[
    "在此基础上",
    "在这基础上",
    "基于以上",
    "基于上述",
    "基于上面",
    "进一步",
    "继续",
    "接着",
];

const PLURAL_PRONOUNS: &[&str] = &[
    "上面的", "前面的", "刚才的", "它们", "这些", "那些", "上述", "上面", "以上", "其中", "刚才",
];

const SINGULAR_PRONOUNS: &[&str] = &["上一个", "这个", "那个", "这味", "这种", "它", "其", "该"];

/// Whether a question refers back to the previous turn: a follow-up marker
/// or a pronoun outside the shielded words.
pub(crate) fn refers_to_previous_turn(question: &str) -> bool {
    let unshielded = SHIELDED
        .iter()
        .fold(question.to_string(), |q, w| q.replace(w, " "));
    FOLLOW_UP_MARKERS
        .iter()
        .chain(PLURAL_PRONOUNS)
        .chain(SINGULAR_PRONOUNS)
        .any(|w| unshielded.contains(w))
}

const FREQUENCY_WORDS: &[&str] = &[
    "出现次数", "最常见", "最常用", "频次", "频率", "次数", "最多", "统计",
];

const COUNT_WORDS: &[&str] = &["总共有多少", "一共有多少", "数量", "总数"];

/// Measure words that turn `多少` / `几` into a count.
const MEASURES: &[char] = &['个', '种', '味', '条', '例', '首', '张', '位', '份', '项'];

const FILLERS: &[&str] = &[
    "我想知道", "知识图谱中", "知识图谱", "数据库中", "数据库里", "从高到低", "都有哪些",
    "告诉我", "想知道", "图谱中", "数据库", "系统中", "系统里", "系统内", "有哪些", "哪几种",
    "哪几个", "哪几味", "分别是", "所有的", "全部的", "出现的", "对应的", "相关的", "使用的",
    "所在的", "请问", "帮我", "给我", "图谱", "系统", "列出", "列举", "罗列", "查询", "查找",
    "查看", "显示", "展示", "给出", "看看", "找出", "返回", "哪些", "哪种", "哪个", "什么",
    "分别", "各自", "所有", "全部", "一共", "总共", "并且", "或者", "出现", "对应", "相关",
    "涉及", "包含", "含有", "使用", "用到", "用了", "所在", "开出", "当中", "里面", "之中",
    "降序", "排序", "排列", "情况", "信息", "列表", "多少", "请", "共", "各", "及", "和", "与",
    "跟", "同", "并", "且", "或", "、", "是", "为", "的", "有", "在", "中", "里", "了", "吗",
    "呢", "啊", "都", "还", "按", "几", "个", "种", "味", "条", "例", "首", "张", "份", "项",
    "次",
];

fn condition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<subject>[\p{Han}A-Za-z0-9_]+?)(?P<neg>不)?(?:等于|为|是)(?P<value>[^\s，,。；;：:！？!?|的为是且和与或并、]+)",
        )
        .unwrap_or_else(|e| unreachable!("condition pattern is valid: {e}"))
    })
}

// ── Question Model ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Equals(String),
    Empty,
    NotEmpty,
    /// Values carried over from the previous turn.
    AnyOf(Vec<String>),
}

#[derive(Debug, Clone)]
struct Filter {
    field: FieldRef,
    list: bool,
    condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    None,
    Frequency,
    Count,
}

#[derive(Debug, Clone, Copy)]
struct ContextRef {
    plural: bool,
    noun: Option<FacetId>,
}

/// A question with recognized parts consumed.
struct Scan {
    chars: Vec<char>,
    used: Vec<bool>,
}

impl Scan {
    fn new(question: &str) -> Self {
        let trimmed = question
            .trim()
            .trim_end_matches(['？', '?', '。', '.', '！', '!', ' ', '　']);
        let chars: Vec<char> = trimmed
            .chars()
            .map(|c| if c == '　' { ' ' } else { c })
            .collect();
        let used = vec![false; chars.len()];
        Self { chars, used }
    }

    fn is_empty(&self) -> bool {
        self.chars.iter().all(|c| c.is_whitespace())
    }

    fn free_at(&self, at: usize, word: &str) -> bool {
        let mut i = at;
        for c in word.chars() {
            if i >= self.chars.len() || self.used[i] || self.chars[i] != c {
                return false;
            }
            i += 1;
        }
        true
    }

    /// Like [`Scan::free_at`] but ignores consumption.
    fn raw_at(&self, at: usize, word: &str) -> bool {
        let mut i = at;
        for c in word.chars() {
            if i >= self.chars.len() || self.chars[i] != c {
                return false;
            }
            i += 1;
        }
        true
    }

    fn mask(&mut self, from: usize, to: usize) {
        for u in &mut self.used[from..to.min(self.chars.len())] {
            *u = true;
        }
    }

    /// Longest word from `words` free at `at`.
    fn word_at<'w>(&self, at: usize, words: &[&'w str]) -> Option<&'w str> {
        words
            .iter()
            .copied()
            .filter(|w| !w.is_empty() && self.free_at(at, w))
            .max_by_key(|w| w.chars().count())
    }

    /// Mask every free occurrence of the given words.
    fn mask_words(&mut self, words: &[&str]) {
        let mut i = 0;
        while i < self.chars.len() {
            match self.word_at(i, words) {
                Some(w) => {
                    let len = w.chars().count();
                    self.mask(i, i + len);
                    i += len;
                }
                None => i += 1,
            }
        }
    }

    /// The question with consumed characters replaced by `|`, and a map from
    /// byte offsets of that string back to char positions.
    fn masked(&self) -> (String, Vec<usize>) {
        let mut text = String::with_capacity(self.chars.len() * 3);
        let mut positions = Vec::with_capacity(self.chars.len() * 3 + 1);
        for (i, (&c, &used)) in self.chars.iter().zip(&self.used).enumerate() {
            let c = if used { '|' } else { c };
            for _ in 0..c.len_utf8() {
                positions.push(i);
            }
            text.push(c);
        }
        positions.push(self.chars.len());
        (text, positions)
    }

    /// Runs of unconsumed letters or digits.
    fn leftovers(&self) -> Vec<String> {
        let mut runs = Vec::new();
        let mut current = String::new();
        for (&c, &used) in self.chars.iter().zip(&self.used) {
            if !used && c.is_alphanumeric() {
                current.push(c);
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }

    fn text(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().collect()
    }
}

struct TermHit {
    facet: FacetId,
    start: usize,
    end: usize,
}

struct Parsed {
    filters: Vec<Filter>,
    targets: Vec<FacetId>,
    aggregate: Aggregate,
    context: Option<ContextRef>,
}

// ── Translator ───────────────────────────────────────────────────

/// Template grammar over the catalog's Chinese vocabulary.
pub struct RuleTranslator {
    lexicon: Lexicon,
    max_rows: u64,
}

impl RuleTranslator {
    /// Build the lexicon against the catalog. `max_rows` becomes the `LIMIT`
    /// of every listing.
    pub fn new(schema: &SchemaDescription, max_rows: u64) -> Self {
        Self {
            lexicon: Lexicon::new(schema),
            max_rows,
        }
    }

    /// Synchronous core of [`Translator::translate`].
    pub fn translate_question(
        &self,
        question: &str,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<CandidateQuery, Untranslatable> {
        let mut parsed = self.parse(question, schema)?;

        let uses_prior_context = match parsed.context {
            Some(context) => {
                let filter = self.resolve_context(context, schema, history)?;
                parsed.filters.push(filter);
                true
            }
            None => false,
        };

        let candidate = self.build(&parsed, schema)?;
        Ok(candidate.with_prior_context(uses_prior_context))
    }

    fn parse(&self, question: &str, schema: &SchemaDescription) -> Result<Parsed, Untranslatable> {
        let mut scan = Scan::new(question);
        if scan.is_empty() {
            return Err(Untranslatable::new("问题为空"));
        }

        let mut filters = self.take_quoted(&mut scan, schema)?;
        filters.extend(self.take_conditions(&mut scan, schema)?);

        scan.mask_words(SHIELDED);
        let context = self.take_references(&mut scan);

        let hits = self.take_terms(&mut scan);
        let aggregate = take_aggregate(&mut scan, &hits);

        scan.mask_words(FILLERS);
        let leftovers = scan.leftovers();
        if !leftovers.is_empty() {
            return Err(Untranslatable::new(format!(
                "无法识别问题中的“{}”",
                leftovers.join("”、“")
            )));
        }

        let targets = classify_targets(&scan, &hits);
        if targets.is_empty() {
            return Err(Untranslatable::new("无法识别要查询的内容"));
        }

        Ok(Parsed {
            filters,
            targets,
            aggregate,
            context,
        })
    }

    /// Quoted values bound to the entity term before or after the quote.
    fn take_quoted(
        &self,
        scan: &mut Scan,
        schema: &SchemaDescription,
    ) -> Result<Vec<Filter>, Untranslatable> {
        let mut filters = Vec::new();
        let mut i = 0;
        while i < scan.chars.len() {
            let Some(&(_, close)) = QUOTES.iter().find(|(open, _)| *open == scan.chars[i]) else {
                i += 1;
                continue;
            };
            let Some(len) = scan.chars[i + 1..].iter().position(|&c| c == close) else {
                i += 1;
                continue;
            };
            let (open_at, close_at) = (i, i + 1 + len);
            let value = scan.text(open_at + 1, close_at).trim().to_string();
            if value.is_empty() {
                i = close_at + 1;
                continue;
            }

            // Term before: skip connectors backwards.
            let mut before = open_at;
            while let Some(c) = VALUE_CONNECTORS.iter().find(|c| {
                let n = c.chars().count();
                before >= n && scan.raw_at(before - n, c)
            }) {
                before -= c.chars().count();
            }
            let preceding = self.lexicon.match_ending_at(&scan.chars, &scan.used, before);

            let (facet, start, mut end) = match preceding {
                Some((facet, start)) => (facet, start, close_at + 1),
                None => {
                    let mut after = close_at + 1;
                    if let Some(d) = scan.word_at(after, DEMONSTRATIVES) {
                        after += d.chars().count();
                    }
                    match self.lexicon.match_at(&scan.chars, &scan.used, after) {
                        Some((facet, len)) => (facet, open_at, after + len),
                        None => {
                            return Err(Untranslatable::new(format!(
                                "无法确定“{value}”指的是哪类实体"
                            )))
                        }
                    }
                }
            };
            if let Some(scope) = scan.word_at(end, SCOPES) {
                end += scope.chars().count();
            }
            scan.mask(start, end);
            filters.push(self.filter_for(facet, schema, Condition::Equals(value)));
            i = end;
        }
        Ok(filters)
    }

    /// `X为Y`, `X是Y`, `X为空`, `X不为空`.
    fn take_conditions(
        &self,
        scan: &mut Scan,
        schema: &SchemaDescription,
    ) -> Result<Vec<Filter>, Untranslatable> {
        let (masked, positions) = scan.masked();
        let mut found = Vec::new();

        for caps in condition_regex().captures_iter(&masked) {
            let (Some(subject), Some(value)) = (caps.name("subject"), caps.name("value")) else {
                continue;
            };
            let value_text = value.as_str();
            if INTERROGATIVES.iter().any(|q| value_text.starts_with(q)) {
                continue;
            }

            let subject_end = positions[subject.end()];
            let head = SUBJECT_SUFFIXES.iter().find_map(|suffix| {
                let n = suffix.chars().count();
                let end = subject_end.checked_sub(n)?;
                if !scan.raw_at(end, suffix) {
                    return None;
                }
                self.lexicon
                    .match_ending_at(&scan.chars, &scan.used, end)
                    .filter(|&(_, start)| start >= positions[subject.start()])
            });
            let Some((facet, mut start)) = head else {
                // Not about a known field; the leftover check reports it.
                continue;
            };
            while let Some(qualifier) = self.qualifier_before(scan, facet, start) {
                start = qualifier;
            }

            let negated = caps.name("neg").is_some();
            let condition = match (value_text, negated) {
                ("空", false) => Condition::Empty,
                ("空", true) => Condition::NotEmpty,
                (_, true) => {
                    return Err(Untranslatable::new(format!(
                        "不支持否定条件：{}不为{value_text}",
                        self.lexicon.facet(facet).column
                    )))
                }
                (v, false) => Condition::Equals(v.to_string()),
            };

            let mut end = positions[value.end()];
            if let Some(scope) = scan.word_at(end, SCOPES) {
                end += scope.chars().count();
            }
            found.push((start, end, facet, condition));
        }

        let mut filters = Vec::with_capacity(found.len());
        for (start, end, facet, condition) in found {
            scan.mask(start, end);
            filters.push(self.filter_for(facet, schema, condition));
        }
        Ok(filters)
    }

    /// Pronouns and follow-up markers. Only the first reference counts.
    fn take_references(&self, scan: &mut Scan) -> Option<ContextRef> {
        let mut context: Option<ContextRef> = None;
        let mut i = 0;
        while i < scan.chars.len() {
            let (word, plural) = if let Some(w) = scan.word_at(i, FOLLOW_UP_MARKERS) {
                (w, true)
            } else if let Some(w) = scan.word_at(i, PLURAL_PRONOUNS) {
                (w, true)
            } else if let Some(w) = scan.word_at(i, SINGULAR_PRONOUNS) {
                (w, false)
            } else {
                i += 1;
                continue;
            };
            let mut end = i + word.chars().count();
            let is_marker = FOLLOW_UP_MARKERS.contains(&word);

            // `这些中药`: the noun names what is referred to.
            let noun = if is_marker {
                None
            } else {
                self.lexicon
                    .match_at(&scan.chars, &scan.used, end)
                    .map(|(facet, len)| {
                        end += len;
                        facet
                    })
            };
            scan.mask(i, end);

            // A marker followed by `这些中药`: the named reference is more specific.
            let replace = match context {
                None => true,
                Some(existing) => existing.noun.is_none() && noun.is_some(),
            };
            if replace {
                context = Some(ContextRef { plural, noun });
            }
            i = end;
        }
        context
    }

    /// Start of a term naming the same entity right before `start`, as in
    /// `单味药剂量` or `中药的剂量`.
    fn qualifier_before(&self, scan: &Scan, facet: FacetId, start: usize) -> Option<usize> {
        let label = &self.lexicon.facet(facet).field.label;
        let end = if start > 0 && scan.chars[start - 1] == '的' {
            start - 1
        } else {
            start
        };
        let (qualifier, at) = self.lexicon.match_ending_at(&scan.chars, &scan.used, end)?;
        (qualifier != facet && self.lexicon.facet(qualifier).field.label == *label).then_some(at)
    }

    fn take_terms(&self, scan: &mut Scan) -> Vec<TermHit> {
        let mut hits = Vec::new();
        let mut i = 0;
        while i < scan.chars.len() {
            match self.lexicon.match_at(&scan.chars, &scan.used, i) {
                Some((facet, len)) => {
                    scan.mask(i, i + len);
                    hits.push(TermHit {
                        facet,
                        start: i,
                        end: i + len,
                    });
                    i += len;
                }
                None => i += 1,
            }
        }
        hits
    }

    /// Pick the previous-turn binding a reference points at.
    fn resolve_context(
        &self,
        context: ContextRef,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<Filter, Untranslatable> {
        let Some(last) = history.last() else {
            return Err(Untranslatable::new("问题引用了上文，但当前会话没有历史记录"));
        };
        let bindings: Vec<&Binding> = last.bindings.iter().filter(|b| !b.values.is_empty()).collect();
        if bindings.is_empty() {
            return Err(Untranslatable::new("上一轮问题没有可以引用的实体"));
        }

        let by_noun = context.noun.and_then(|facet| {
            let field = &self.lexicon.facet(facet).field;
            bindings
                .iter()
                .find(|b| FieldRef::of_binding(b) == *field)
                .or_else(|| bindings.iter().find(|b| b.label == field.label))
        });

        let preferred = if context.plural {
            [BindingOrigin::Result, BindingOrigin::Filter]
        } else {
            [BindingOrigin::Filter, BindingOrigin::Result]
        };
        let binding = by_noun
            .or_else(|| {
                preferred
                    .iter()
                    .find_map(|origin| bindings.iter().find(|b| b.origin == *origin))
            })
            .copied()
            .ok_or_else(|| Untranslatable::new("上一轮问题没有可以引用的实体"))?;

        let field = FieldRef::of_binding(binding);
        Ok(Filter {
            list: is_list(schema, &field),
            field,
            condition: Condition::AnyOf(binding.values.clone()),
        })
    }

    fn filter_for(&self, facet: FacetId, schema: &SchemaDescription, condition: Condition) -> Filter {
        let field = self.lexicon.facet(facet).field.clone();
        Filter {
            list: is_list(schema, &field),
            field,
            condition,
        }
    }

    // ── Query Assembly ───────────────────────────────────────────

    fn build(&self, parsed: &Parsed, schema: &SchemaDescription) -> Result<CandidateQuery, Untranslatable> {
        let anchor = schema.anchor().map(str::to_string);
        let first_target = &self.lexicon.facet(parsed.targets[0]).field;
        let root_label = anchor.clone().unwrap_or_else(|| first_target.label.clone());

        let is_anchor_field = |field: &FieldRef| {
            field.relationship.is_none() && anchor.as_deref() == Some(field.label.as_str())
        };
        let is_absence = |filter: &Filter| {
            matches!(filter.condition, Condition::Empty | Condition::NotEmpty)
                && filter.field.relationship.is_none()
                && !is_anchor_field(&filter.field)
                && schema
                    .label(&filter.field.label)
                    .is_some_and(|l| l.key == filter.field.property)
        };
        let conflicts = |field: &FieldRef, list: bool| {
            anchor.is_some()
                && !list
                && !is_anchor_field(field)
                && parsed.filters.iter().any(|f| &f.field == field)
        };

        let mut pattern = Pattern::new(schema, &root_label);
        let mut params = QueryParams::new();
        let mut conditions = Vec::new();
        let mut filter_bindings = Vec::new();
        let mut needs_root =
            parsed.aggregate == Aggregate::Frequency || parsed.filters.iter().any(|f| is_absence(f));

        // Filters
        let (mut f_count, mut ctx_count) = (0, 0);
        for filter in &parsed.filters {
            if is_absence(filter) {
                let hops = schema.path(&root_label, &filter.field.label).ok_or_else(|| {
                    unreachable_label(&root_label, &filter.field.label)
                })?;
                let exists = anonymous_path(pattern.root_var(), &hops);
                conditions.push(match filter.condition {
                    Condition::Empty => format!("NOT {exists}"),
                    _ => exists,
                });
                continue;
            }

            let expr = pattern.place(&filter.field, Branch::Primary)?;
            match &filter.condition {
                Condition::Equals(value) => {
                    let name = format!("f{f_count}");
                    f_count += 1;
                    conditions.push(if filter.list {
                        format!("${name} IN {expr}")
                    } else {
                        format!("{expr} = ${name}")
                    });
                    params.insert(name, ParamValue::Text(value.clone()));
                    filter_bindings.push(filter.field.bind(vec![value.clone()], BindingOrigin::Filter));
                }
                Condition::AnyOf(values) => {
                    let name = format!("ctx{ctx_count}");
                    ctx_count += 1;
                    conditions.push(if filter.list {
                        format!("any(x IN {expr} WHERE x IN ${name})")
                    } else {
                        format!("{expr} IN ${name}")
                    });
                    params.insert(name, ParamValue::List(values.clone()));
                    filter_bindings.push(filter.field.bind(values.clone(), BindingOrigin::Filter));
                }
                Condition::Empty => conditions.push(if filter.list {
                    format!("({expr} IS NULL OR size({expr}) = 0)")
                } else {
                    format!("({expr} IS NULL OR {expr} = '')")
                }),
                Condition::NotEmpty => conditions.push(if filter.list {
                    format!("size({expr}) > 0")
                } else {
                    format!("({expr} IS NOT NULL AND {expr} <> '')")
                }),
            }
        }

        // Targets
        let mut items: Vec<(String, String)> = Vec::new();
        let mut unwinds = Vec::new();
        let mut focus = None;
        let single = parsed.targets.len() == 1;
        for &target in &parsed.targets {
            let facet = self.lexicon.facet(target);
            let branch = if conflicts(&facet.field, facet.list) {
                needs_root = true;
                Branch::Secondary
            } else {
                Branch::Primary
            };

            let owner = (facet.show_owner && parsed.aggregate == Aggregate::None)
                .then(|| owner_key(schema, &facet.field))
                .flatten()
                .filter(|owner| !parsed.targets.iter().any(|&t| self.lexicon.facet(t).field == *owner));
            if let Some(owner) = owner {
                let column = self
                    .lexicon
                    .facet_for_field(&owner)
                    .map(|id| self.lexicon.facet(id).column.to_string())
                    .unwrap_or_else(|| format!("{}_{}", owner.label, owner.property));
                let expr = pattern.place(&owner, branch)?;
                if !items.iter().any(|(_, c)| *c == column) {
                    focus.get_or_insert(ResultFocus {
                        column: column.clone(),
                        field: owner.clone(),
                    });
                    items.push((expr, column));
                }
            }

            let mut expr = pattern.place(&facet.field, branch)?;
            if facet.list && single {
                let alias = format!("{}_item", facet.field.property);
                unwinds.push(format!("UNWIND {expr} AS {alias}"));
                expr = alias;
            }
            if !items.iter().any(|(_, c)| c == facet.column) {
                if parsed.aggregate != Aggregate::Count {
                    focus.get_or_insert(ResultFocus {
                        column: facet.column.to_string(),
                        field: facet.field.clone(),
                    });
                }
                items.push((expr, facet.column.to_string()));
            }
        }

        if !needs_root {
            pattern.prune();
        }

        let mut text = format!("MATCH {}", pattern.render());
        if !conditions.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&conditions.join(" AND "));
        }
        for unwind in &unwinds {
            text.push(' ');
            text.push_str(unwind);
        }

        let first_column = items.first().map(|(_, c)| c.clone()).unwrap_or_default();
        let projection = items
            .iter()
            .map(|(expr, column)| format!("{expr} AS {column}"))
            .collect::<Vec<_>>()
            .join(", ");
        match parsed.aggregate {
            Aggregate::None => {
                text.push_str(&format!(
                    " RETURN DISTINCT {projection} ORDER BY {first_column} LIMIT {}",
                    self.max_rows
                ));
            }
            Aggregate::Frequency => {
                let counter = if Some(pattern.root_label()) == anchor.as_deref() {
                    format!("count(DISTINCT {})", pattern.root_var())
                } else {
                    "count(*)".to_string()
                };
                text.push_str(&format!(
                    " RETURN {projection}, {counter} AS {FREQUENCY_COLUMN} ORDER BY {FREQUENCY_COLUMN} DESC, {first_column} LIMIT {}",
                    self.max_rows
                ));
            }
            Aggregate::Count => {
                let expr = items.first().map(|(e, _)| e.clone()).unwrap_or_default();
                text.push_str(&format!(
                    " RETURN count(DISTINCT {expr}) AS {COUNT_COLUMN} LIMIT 1"
                ));
            }
        }

        let mut candidate = CandidateQuery::new(text, params).with_filter_bindings(filter_bindings);
        if let Some(focus) = focus {
            candidate = candidate.with_focus(focus);
        }
        Ok(candidate)
    }
}

#[async_trait]
impl Translator for RuleTranslator {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn translate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<CandidateQuery, Untranslatable> {
        self.translate_question(question, schema, history)
    }
}

fn take_aggregate(scan: &mut Scan, hits: &[TermHit]) -> Aggregate {
    let mut aggregate = Aggregate::None;
    let mut i = 0;
    while i < scan.chars.len() {
        if let Some(w) = scan.word_at(i, FREQUENCY_WORDS) {
            let len = w.chars().count();
            scan.mask(i, i + len);
            aggregate = Aggregate::Frequency;
            i += len;
            continue;
        }
        if let Some(w) = scan.word_at(i, COUNT_WORDS) {
            let len = w.chars().count();
            scan.mask(i, i + len);
            if aggregate == Aggregate::None {
                aggregate = Aggregate::Count;
            }
            i += len;
            continue;
        }
        if let Some(w) = scan.word_at(i, &["多少", "几"]) {
            let end = i + w.chars().count();
            let measured = scan.chars.get(end).is_some_and(|c| MEASURES.contains(c));
            let before_term = hits.iter().any(|h| h.start == end);
            if measured || before_term {
                scan.mask(i, if measured { end + 1 } else { end });
                if aggregate == Aggregate::None {
                    aggregate = Aggregate::Count;
                }
            }
            i = end;
            continue;
        }
        i += 1;
    }
    aggregate
}

/// Terms not followed by `的` (or `中的`) are targets; the others modify a
/// later term. With no plain target, the last modifier is the target
/// (`中药的数量`).
fn classify_targets(scan: &Scan, hits: &[TermHit]) -> Vec<FacetId> {
    let mut targets: Vec<FacetId> = Vec::new();
    for (n, hit) in hits.iter().enumerate() {
        let has_later = n + 1 < hits.len();
        let modifier = ["的", "中的", "里的", "当中的"]
            .iter()
            .any(|w| scan.raw_at(hit.end, w))
            || (has_later && ["中", "里", "当中"].iter().any(|w| scan.raw_at(hit.end, w)));
        if !modifier && !targets.contains(&hit.facet) {
            targets.push(hit.facet);
        }
    }
    if targets.is_empty() {
        if let Some(last) = hits.last() {
            targets.push(last.facet);
        }
    }
    targets
}

fn is_list(schema: &SchemaDescription, field: &FieldRef) -> bool {
    field.relationship.is_none()
        && schema
            .label(&field.label)
            .and_then(|l| l.property(&field.property))
            .is_some_and(|p| p.list)
}

/// Key field of the entity owning `field`: for relationship properties, the
/// key of the relationship's target label.
fn owner_key(schema: &SchemaDescription, field: &FieldRef) -> Option<FieldRef> {
    let label = schema.label(&field.label)?;
    (label.key != field.property || field.relationship.is_some())
        .then(|| FieldRef::node(label.name.clone(), label.key.clone()))
}

fn unreachable_label(from: &str, to: &str) -> Untranslatable {
    Untranslatable::new(format!("图模型中无法从 {from} 连接到 {to}"))
}

/// `(c)-[:REL]->(:Label)…` with anonymous intermediate nodes.
fn anonymous_path(root_var: &str, hops: &[Hop]) -> String {
    let mut text = format!("({root_var})");
    for hop in hops {
        text.push_str(&rel_arrow(hop, ""));
        text.push_str(&format!("(:{})", hop.to));
    }
    text
}

fn rel_arrow(hop: &Hop, var: &str) -> String {
    if hop.forward {
        format!("-[{var}:{}]->", hop.relationship)
    } else {
        format!("<-[{var}:{}]-", hop.relationship)
    }
}

// ── Pattern Tree ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Primary,
    /// A second instance of a label, independent of the filtered one.
    Secondary,
}

struct PatternNode {
    label: String,
    var: String,
    branch: Branch,
    /// Parent node and the hop leading here from it.
    parent: Option<(usize, Hop)>,
    /// Variable of the relationship leading here, when one of its
    /// properties is read.
    rel_var: Option<String>,
    required: bool,
    removed: bool,
}

/// A tree of node patterns rooted at one label.
struct Pattern<'a> {
    schema: &'a SchemaDescription,
    nodes: Vec<PatternNode>,
    root: usize,
    taken: BTreeMap<String, usize>,
}

impl<'a> Pattern<'a> {
    fn new(schema: &'a SchemaDescription, root_label: &str) -> Self {
        let mut pattern = Self {
            schema,
            nodes: Vec::new(),
            root: 0,
            taken: BTreeMap::new(),
        };
        pattern.add_node(root_label, Branch::Primary, None);
        pattern
    }

    fn root_label(&self) -> &str {
        &self.nodes[self.root].label
    }

    fn root_var(&self) -> &str {
        &self.nodes[self.root].var
    }

    fn fresh_var(&mut self, base: &str) -> String {
        let count = self.taken.entry(base.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base.to_string()
        } else {
            format!("{base}{count}")
        }
    }

    fn add_node(&mut self, label: &str, branch: Branch, parent: Option<(usize, Hop)>) -> usize {
        let base = label
            .chars()
            .next()
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "n".to_string());
        let var = self.fresh_var(&base);
        self.nodes.push(PatternNode {
            label: label.to_string(),
            var,
            branch,
            parent,
            rel_var: None,
            required: false,
            removed: false,
        });
        self.nodes.len() - 1
    }

    fn children(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().enumerate().filter_map(move |(i, n)| {
            (!n.removed && n.parent.as_ref().is_some_and(|(p, _)| *p == idx)).then_some(i)
        })
    }

    /// Node for `label`, extending the tree along the catalog path from the
    /// root. Secondary nodes never reuse primary ones below the root.
    fn attach(&mut self, label: &str, branch: Branch) -> Result<usize, Untranslatable> {
        let root_label = self.nodes[0].label.clone();
        let hops = self
            .schema
            .path(&root_label, label)
            .ok_or_else(|| unreachable_label(&root_label, label))?;

        let mut current = 0;
        for hop in hops {
            let existing = self.children(current).find(|&c| {
                let node = &self.nodes[c];
                node.branch == branch
                    && node.label == hop.to
                    && node
                        .parent
                        .as_ref()
                        .is_some_and(|(_, h)| h.relationship == hop.relationship)
            });
            current = match existing {
                Some(c) => c,
                None => {
                    let to = hop.to.clone();
                    self.add_node(&to, branch, Some((current, hop)))
                }
            };
        }
        Ok(current)
    }

    /// The pair of nodes joined by `rel`, creating the target side if needed.
    /// Returns the node whose incoming hop is `rel`.
    fn attach_edge(&mut self, rel: &str, branch: Branch) -> Result<usize, Untranslatable> {
        let def = self
            .schema
            .relationship(rel)
            .ok_or_else(|| Untranslatable::new(format!("未知关系 {rel}")))?;
        let (source, target) = (def.source.clone(), def.target.clone());

        let source_idx = self.attach(&source, branch)?;
        if let Some(child) = self.children(source_idx).find(|&c| {
            self.nodes[c]
                .parent
                .as_ref()
                .is_some_and(|(_, h)| h.relationship == rel && h.forward)
        }) {
            return Ok(child);
        }
        if let Some((_, hop)) = &self.nodes[source_idx].parent {
            if hop.relationship == rel && !hop.forward {
                return Ok(source_idx);
            }
        }
        let hop = Hop {
            relationship: rel.to_string(),
            from: source.clone(),
            to: target.clone(),
            forward: true,
        };
        Ok(self.add_node(&target, branch, Some((source_idx, hop))))
    }

    /// Put `field` into the pattern and return the expression that reads it.
    fn place(&mut self, field: &FieldRef, branch: Branch) -> Result<String, Untranslatable> {
        match &field.relationship {
            None => {
                let idx = self.attach(&field.label, branch)?;
                self.nodes[idx].required = true;
                Ok(format!("{}.{}", self.nodes[idx].var, field.property))
            }
            Some(rel) => {
                let idx = self.attach_edge(rel, branch)?;
                self.nodes[idx].required = true;
                if let Some(parent) = self.nodes[idx].parent.as_ref().map(|(p, _)| *p) {
                    self.nodes[parent].required = true;
                }
                let var = match &self.nodes[idx].rel_var {
                    Some(v) => v.clone(),
                    None => {
                        let v = self.fresh_var("r");
                        self.nodes[idx].rel_var = Some(v.clone());
                        v
                    }
                };
                Ok(format!("{var}.{}", field.property))
            }
        }
    }

    /// Drop unneeded nodes from the top while the root has a single child.
    fn prune(&mut self) {
        loop {
            let root = self.root;
            if self.nodes[root].required {
                return;
            }
            let kids: Vec<usize> = self.children(root).collect();
            if kids.len() != 1 {
                return;
            }
            // A relationship variable on the hop below the root must stay.
            if self.nodes[kids[0]].rel_var.is_some() {
                return;
            }
            self.nodes[root].removed = true;
            self.nodes[kids[0]].parent = None;
            self.root = kids[0];
        }
    }

    /// `MATCH` pattern text: the first chain labels every node; later
    /// branches restart from an already-bound variable.
    fn render(&self) -> String {
        let mut chains = Vec::new();
        let root = &self.nodes[self.root];
        self.render_from(self.root, format!("({}:{})", root.var, root.label), &mut chains);
        chains.join(", ")
    }

    fn render_from(&self, idx: usize, current: String, chains: &mut Vec<String>) {
        let kids: Vec<usize> = self.children(idx).collect();
        if kids.is_empty() {
            chains.push(current);
            return;
        }
        for (n, child) in kids.into_iter().enumerate() {
            let base = if n == 0 {
                current.clone()
            } else {
                format!("({})", self.nodes[idx].var)
            };
            let node = &self.nodes[child];
            let Some((_, hop)) = &node.parent else {
                continue;
            };
            let rel_var = node.rel_var.as_deref().unwrap_or("");
            let segment = format!("{base}{}({}:{})", rel_arrow(hop, rel_var), node.var, node.label);
            self.render_from(child, segment, chains);
        }
    }
}
