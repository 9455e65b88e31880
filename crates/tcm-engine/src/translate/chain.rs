//! Rules first, model second.

use async_trait::async_trait;
use tcm_core::{SchemaDescription, Turn};

use super::{CandidateQuery, LlmTranslator, RuleTranslator, Translator, Untranslatable};

/// Tries the rule grammar, then falls back to the model when one is
/// configured and ready. The rule failure is reported when neither succeeds.
pub struct ChainTranslator {
    rules: RuleTranslator,
    llm: Option<LlmTranslator>,
}

impl ChainTranslator {
    pub fn new(rules: RuleTranslator, llm: Option<LlmTranslator>) -> Self {
        Self { rules, llm }
    }

    pub fn llm(&self) -> Option<&LlmTranslator> {
        self.llm.as_ref()
    }
}

#[async_trait]
impl Translator for ChainTranslator {
    fn name(&self) -> &'static str {
        match self.llm {
            Some(_) => "rules+llm",
            None => "rules",
        }
    }

    async fn translate(
        &self,
        question: &str,
        schema: &SchemaDescription,
        history: &[Turn],
    ) -> Result<CandidateQuery, Untranslatable> {
        let rule_error = match self.rules.translate(question, schema, history).await {
            Ok(candidate) => return Ok(candidate),
            Err(e) => e,
        };

        let Some(llm) = self.llm.as_ref().filter(|l| l.is_ready()) else {
            return Err(rule_error);
        };
        tracing::debug!(reason = %rule_error, "Rules declined, asking model");
        llm.translate(question, schema, history).await.map_err(|e| {
            Untranslatable::new(format!("{rule_error}；{e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::config::LlmSettings;
    use tcm_core::SchemaCatalog;

    #[tokio::test]
    async fn test_rules_answer_without_model() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let chain = ChainTranslator::new(RuleTranslator::new(&schema, 200), None);
        assert_eq!(chain.name(), "rules");
        let q = chain.translate("系统中都有哪些证型？", &schema, &[]).await.unwrap();
        assert!(q.text().contains("ZhengXing"));
    }

    #[tokio::test]
    async fn test_unready_model_keeps_rule_error() {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        let llm = LlmTranslator::new(&LlmSettings::default(), 200).unwrap();
        let chain = ChainTranslator::new(RuleTranslator::new(&schema, 200), Some(llm));
        assert_eq!(chain.name(), "rules+llm");
        let err = chain.translate("系统中的医生有哪些？", &schema, &[]).await.unwrap_err();
        assert!(err.reason.contains("医生"));
    }
}
