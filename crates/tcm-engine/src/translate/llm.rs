//! Prompt-based translation against an OpenAI-compatible chat endpoint.
//!
//! The model sees the catalog, its example queries and the previous turn,
//! and must answer with exactly one Cypher statement. Its output is treated
//! like any other candidate: the guard decides whether it runs.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tcm_core::config::LlmSettings;
use tcm_core::{QueryParams, SchemaDescription, Turn};

use super::rules::refers_to_previous_turn;
use super::{CandidateQuery, Translator, Untranslatable};

/// What the model is told to answer when the catalog cannot express a question.
const REFUSAL: &str = "UNTRANSLATABLE";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no choices in response")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completion translator.
pub struct LlmTranslator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_rows: u64,
}

impl LlmTranslator {
    pub fn new(settings: &LlmSettings, max_rows: u64) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            max_rows,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.0,
            max_tokens: 1024,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatCompletionResponse = response.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }

    fn system_prompt(&self, schema: &SchemaDescription, history: &[Turn]) -> String {
        let mut prompt = format!(
            "你是一个“只生成 Neo4j Cypher 查询”的助手。所有答案必须来自数据库。

重要约束：
- 只允许只读查询，禁止 CREATE、MERGE、SET、DELETE、REMOVE、DROP、CALL 等写入或过程调用。
- 只能使用下面图模型中列出的标签、关系和属性。
- 标记为数组的属性（如 Case.symptoms / Case.tongue / Case.pulse）查询时需 UNWIND。
- 证型必须通过 (Case)-[:HAS_ZHENGXING]->(ZhengXing) 访问，不能从 Diagnosis 去连证型。
- Prescription.method = 煎服方法；CONTAINS_HERB.prep = 炮制方法；剂量(dose) 存在关系属性 r.dose。
- 统计频次时要用 count(DISTINCT c) 按病例计数。
- 查询“为空”时用 IS NULL / size(...)=0 或 NOT (c)-[:REL]->(:Node)。
- 值直接写成字符串字面量，不要使用 $参数。
- 返回字段命名必须中文（症状, 舌象, 脉象, 证型, 疾病, 处方, 煎服方法, 炮制方法, 中药, 剂量, 频次, 案例号, 原始文献）。
- 查询必须以 LIMIT 结尾，且不超过 {} 行。
- 如果图模型无法回答该问题，只输出 {REFUSAL}。

",
            self.max_rows
        );

        prompt.push_str("图模型：\n");
        for label in schema.labels() {
            let props: Vec<String> = label
                .properties
                .iter()
                .map(|p| {
                    if p.list {
                        format!("{}[数组]", p.name)
                    } else {
                        p.name.clone()
                    }
                })
                .collect();
            prompt.push_str(&format!(
                "- (:{}) key={} props=[{}]\n",
                label.name,
                label.key,
                props.join(", ")
            ));
        }
        prompt.push_str("关系：\n");
        for rel in schema.relationships() {
            let props: Vec<&str> = rel.properties.iter().map(|p| p.name.as_str()).collect();
            prompt.push_str(&format!(
                "- (:{})-[:{}]->(:{})",
                rel.source, rel.name, rel.target
            ));
            if !props.is_empty() {
                prompt.push_str(&format!(" props=[{}]", props.join(", ")));
            }
            prompt.push('\n');
        }

        if !schema.examples().is_empty() {
            prompt.push_str("\n示例：\n");
            for example in schema.examples() {
                prompt.push_str(&format!("- {example}\n"));
            }
        }

        if let Some(last) = history.last() {
            let context = serde_json::json!({
                "question": last.raw_question,
                "cypher": last.generated_query,
                "row_count": last.result_row_count,
                "entities": last.bindings,
            });
            prompt.push_str(&format!("\n【上一轮上下文】：\n{context}\n"));
        }
        prompt
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }

    async fn translate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<CandidateQuery, Untranslatable> {
        let context = prompt_context(question, history);
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: self.system_prompt(schema, context),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!("当前用户问题：{question}\n请直接给出唯一的可执行 Cypher。"),
            },
        ];

        let reply = self.complete(messages).await.map_err(|e| {
            tracing::warn!(model = %self.model, error = %e, "LLM translation failed");
            Untranslatable::new(format!("模型调用失败：{e}"))
        })?;

        let text = parse_reply(&reply, self.max_rows)?;
        tracing::debug!(model = %self.model, cypher = %text, "LLM produced query");
        Ok(CandidateQuery::new(text, QueryParams::new()).with_prior_context(!context.is_empty()))
    }
}

/// Prior turns worth showing the model: only for questions that refer back.
fn prompt_context<'a>(question: &str, history: &'a [Turn]) -> &'a [Turn] {
    if refers_to_previous_turn(question) {
        history
    } else {
        &[]
    }
}

fn unwind_where_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)UNWIND\s+([\w.\[\]]+)\s+AS\s+(\w+)\s+WHERE\s+")
            .unwrap_or_else(|e| unreachable!("unwind pattern is valid: {e}"))
    })
}

fn case_node_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\(c\s*:\s*Case\)").unwrap_or_else(|e| unreachable!("case pattern is valid: {e}"))
    })
}

/// Turn a model reply into query text.
///
/// Code fences are stripped, `UNWIND … AS x WHERE` (invalid Cypher) gets
/// the `WITH` it needs, whitespace is collapsed and a missing `LIMIT` is
/// appended.
fn parse_reply(reply: &str, max_rows: u64) -> Result<String, Untranslatable> {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest
            .strip_prefix("cypher")
            .or_else(|| rest.strip_prefix("Cypher"))
            .unwrap_or(rest);
    }
    let text = text.trim().trim_end_matches("```").trim().trim_end_matches(';').trim();

    if text.is_empty() || text.eq_ignore_ascii_case(REFUSAL) {
        return Err(Untranslatable::new("模型认为该问题无法用图模型回答"));
    }

    let keep_case = case_node_regex().is_match(text);
    let fixed = unwind_where_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        let prefix = if keep_case { "c, " } else { "" };
        format!("UNWIND {} AS {} WITH {prefix}{} WHERE ", &caps[1], &caps[2], &caps[2])
    });
    let mut collapsed = fixed.split_whitespace().collect::<Vec<_>>().join(" ");

    let inspection = super::inspect::inspect(&collapsed);
    if let Some(param) = inspection.parameters.iter().next() {
        return Err(Untranslatable::new(format!("模型生成的查询引用了未提供的参数 ${param}")));
    }
    if inspection.limit.is_none() && inspection.return_clauses == 1 {
        collapsed.push_str(&format!(" LIMIT {max_rows}"));
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tcm_core::{BindingOrigin, SchemaCatalog};

    use crate::translate::FieldRef;

    fn translator() -> LlmTranslator {
        let settings = LlmSettings {
            enabled: true,
            api_key: Some("test-key".to_string()),
            ..LlmSettings::default()
        };
        LlmTranslator::new(&settings, 200).unwrap()
    }

    #[test]
    fn test_fences_are_stripped() {
        let reply = "```cypher\nMATCH (h:Herb)\nRETURN h.name AS 中药 LIMIT 10;\n```";
        assert_eq!(
            parse_reply(reply, 200).unwrap(),
            "MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"
        );
    }

    #[test]
    fn test_unwind_where_gets_with() {
        let reply = "MATCH (c:Case) UNWIND c.symptoms AS s WHERE s <> '' RETURN s AS 症状 LIMIT 5";
        assert_eq!(
            parse_reply(reply, 200).unwrap(),
            "MATCH (c:Case) UNWIND c.symptoms AS s WITH c, s WHERE s <> '' RETURN s AS 症状 LIMIT 5"
        );
    }

    #[test]
    fn test_refusal_and_parameters_are_untranslatable() {
        assert!(parse_reply("UNTRANSLATABLE", 200).is_err());
        assert!(parse_reply("  ", 200).is_err());
        assert!(parse_reply("MATCH (h:Herb {name: $name}) RETURN h.name LIMIT 1", 200).is_err());
    }

    #[test]
    fn test_missing_limit_is_appended() {
        assert_eq!(
            parse_reply("MATCH (d:Diagnosis) RETURN d.name AS 疾病", 200).unwrap(),
            "MATCH (d:Diagnosis) RETURN d.name AS 疾病 LIMIT 200"
        );
    }

    #[test]
    fn test_prompt_carries_schema_and_previous_turn() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let turn = Turn {
            raw_question: "系统中的中药有哪些？".into(),
            generated_query: "MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 LIMIT 200".into(),
            result_row_count: 1,
            timestamp: Utc::now(),
            uses_prior_context: false,
            bindings: vec![FieldRef::node("Herb", "name").bind(vec!["白芍".into()], BindingOrigin::Result)],
        };
        let prompt = translator().system_prompt(&schema, &[turn]);
        assert!(prompt.contains("(:Case) key=case_id"));
        assert!(prompt.contains("symptoms[数组]"));
        assert!(prompt.contains("(:Prescription)-[:CONTAINS_HERB]->(:Herb) props=[dose, prep]"));
        assert!(prompt.contains("【上一轮上下文】"));
        assert!(prompt.contains("白芍"));
        assert!(prompt.contains("不超过 200 行"));
    }

    #[test]
    fn test_context_only_for_follow_ups() {
        let turn = Turn {
            raw_question: "系统中的中药有哪些？".into(),
            generated_query: "MATCH (h:Herb) RETURN DISTINCT h.name AS 中药 LIMIT 200".into(),
            result_row_count: 2,
            timestamp: Utc::now(),
            uses_prior_context: false,
            bindings: Vec::new(),
        };
        let history = [turn];
        assert!(prompt_context("请按字母顺序列出所有疾病名称", &history).is_empty());
        assert!(prompt_context("其他证型有哪些？", &history).is_empty());
        assert_eq!(prompt_context("它们的剂量是多少？", &history).len(), 1);
        assert_eq!(prompt_context("在此基础上，哪些案例有原始文献？", &history).len(), 1);
        assert!(prompt_context("它们的剂量是多少？", &[]).is_empty());

        let schema = SchemaCatalog::builtin().unwrap().describe();
        let prompt = translator().system_prompt(&schema, prompt_context("列出所有疾病", &history));
        assert!(!prompt.contains("【上一轮上下文】"));
    }

    #[test]
    fn test_ready_only_with_key() {
        assert!(translator().is_ready());
        let bare = LlmTranslator::new(&LlmSettings::default(), 200).unwrap();
        assert_eq!(bare.is_ready(), LlmSettings::default().api_key.is_some());
    }
}
