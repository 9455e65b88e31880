//! The question pipeline.
//!
//! session context → translator → guard → executor → composer → session.
//! A turn is recorded only after a successful, non-dry-run answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use tcm_core::{AppConfig, QueryParams, ResultRow, ResultSet, SchemaCatalog, SchemaDescription, Turn};
use tcm_graph::GraphStore;

use crate::compose::{compose, AnswerFormat};
use crate::error::{AskError, Result};
use crate::executor::Executor;
use crate::guard::{Guard, ValidatedQuery};
use crate::session::SessionStore;
use crate::translate::{ChainTranslator, LlmTranslator, RuleTranslator, Translator};

pub const DEFAULT_SESSION: &str = "default";

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

/// One question.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    /// Translate and validate only: no execution, no recorded turn.
    #[serde(default)]
    pub dry_run: bool,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: default_session(),
            dry_run: false,
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Reply to an [`AskRequest`]. Failures carry an error and never rows; a dry
/// run carries an empty row list.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub ok: bool,
    pub question: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "QueryParams::is_empty")]
    pub params: QueryParams,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<ResultRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_format: Option<AnswerFormat>,
    pub used_prior_context: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AskResponse {
    fn failed(request: &AskRequest, error: &AskError) -> Self {
        Self {
            ok: false,
            question: request.question.clone(),
            session_id: request.session_id.clone(),
            query: None,
            params: QueryParams::new(),
            columns: Vec::new(),
            rows: None,
            answer: None,
            answer_format: None,
            used_prior_context: false,
            dry_run: request.dry_run,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Error code of a failed response.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Rebuild the shaped result, for rendering.
    pub fn result_set(&self) -> Option<ResultSet> {
        self.rows.as_ref().map(|rows| ResultSet {
            columns: self.columns.clone(),
            rows: rows.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmStatus {
    pub model: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub translator: String,
    pub translator_ready: bool,
    pub max_rows: u64,
    pub store_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmStatus>,
    pub active_sessions: usize,
}

struct Answered {
    query: ValidatedQuery,
    result: Option<ResultSet>,
}

pub struct Engine {
    schema: Arc<SchemaDescription>,
    translator: Arc<dyn Translator>,
    guard: Guard,
    executor: Executor,
    sessions: Arc<SessionStore>,
    llm: Option<LlmStatus>,
    ping_timeout: Duration,
    sweeper: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine. When called inside a tokio runtime the engine also
    /// starts the idle-session sweeper and stops it on drop; outside one,
    /// idle sessions are only evicted by explicit [`SessionStore::sweep`] calls.
    pub fn new(
        schema: Arc<SchemaDescription>,
        translator: Arc<dyn Translator>,
        store: Arc<dyn GraphStore>,
        sessions: Arc<SessionStore>,
        config: &AppConfig,
    ) -> Self {
        let llm = config.llm.enabled.then(|| LlmStatus {
            model: config.llm.model.clone(),
            ready: config.llm.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        });
        let sweeper = Handle::try_current().ok().map(|_| {
            let every = Duration::from_secs(config.session.sweep_interval_secs.max(1));
            tracing::debug!(every_secs = every.as_secs(), "Session sweeper started");
            sessions.spawn_sweeper(every)
        });
        Self {
            guard: Guard::new(Arc::clone(&schema), config.guard.max_rows),
            executor: Executor::new(store, &config.executor, &schema),
            schema,
            translator,
            sessions,
            llm,
            ping_timeout: Duration::from_millis(config.executor.timeout_ms),
            sweeper,
        }
    }

    /// Wire the full engine from configuration: catalog, rule translator
    /// (plus the model when enabled) and the configured session backend.
    pub fn from_config(config: &AppConfig, store: Arc<dyn GraphStore>) -> Result<Self> {
        let catalog = SchemaCatalog::load(config.catalog.path.as_deref().map(std::path::Path::new))
            .map_err(|e| AskError::Config(e.to_string()))?;
        let schema = catalog.describe();

        let rules = RuleTranslator::new(&schema, config.guard.max_rows);
        let llm = if config.llm.enabled {
            let llm = LlmTranslator::new(&config.llm, config.guard.max_rows)
                .map_err(|e| AskError::Config(e.to_string()))?;
            if !llm.is_ready() {
                tracing::warn!(model = %config.llm.model, "LLM enabled but no API key configured");
            }
            Some(llm)
        } else {
            None
        };
        let translator: Arc<dyn Translator> = Arc::new(ChainTranslator::new(rules, llm));

        let sessions = Arc::new(SessionStore::from_settings(&config.session)?);
        tracing::info!(
            translator = translator.name(),
            sessions = sessions.len(),
            history_cap = sessions.history_cap(),
            "Engine initialized"
        );
        Ok(Self::new(schema, translator, store, sessions, config))
    }

    pub fn schema(&self) -> &Arc<SchemaDescription> {
        &self.schema
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Answer one question. Never panics on bad input; every failure is a
    /// response with an error code.
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "ask",
            %request_id,
            session_id = %request.session_id,
            dry_run = request.dry_run
        );

        async {
            match self.answer(&request).await {
                Ok(answered) => {
                    let response = self.respond(&request, answered);
                    tracing::info!(
                        rows = response.rows.as_ref().map_or(0, Vec::len),
                        used_prior_context = response.used_prior_context,
                        "Question answered"
                    );
                    response
                }
                Err(e) => {
                    tracing::info!(code = e.code(), error = %e, "Question not answered");
                    AskResponse::failed(&request, &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn answer(&self, request: &AskRequest) -> Result<Answered> {
        let _gate = self.sessions.acquire(&request.session_id).await;
        let history = self.sessions.get_context(&request.session_id)?;

        let candidate = self
            .translator
            .translate(request.question.trim(), &self.schema, &history)
            .await
            .map_err(|e| AskError::Untranslatable(e.reason))?;
        tracing::debug!(cypher = %candidate.text(), "Candidate query");

        let query = self.guard.validate(candidate).map_err(|rejection| {
            tracing::warn!(reason = %rejection, "Query rejected by guard");
            AskError::from(rejection)
        })?;

        if request.dry_run {
            return Ok(Answered {
                query,
                result: None,
            });
        }

        let result = self.executor.execute(&query).await?;
        let turn = Turn {
            raw_question: request.question.clone(),
            generated_query: query.text().to_string(),
            result_row_count: result.len(),
            timestamp: Utc::now(),
            uses_prior_context: query.candidate().uses_prior_context(),
            bindings: query.candidate().bindings(&self.schema, &result),
        };
        self.sessions.record_turn(&request.session_id, turn)?;

        Ok(Answered {
            query,
            result: Some(result),
        })
    }

    fn respond(&self, request: &AskRequest, answered: Answered) -> AskResponse {
        let Answered { query, result } = answered;
        let (columns, rows, answer, answer_format) = match result {
            Some(result) => {
                let composed = compose(&request.question, &result);
                (result.columns, Some(result.rows), composed.text, Some(composed.format))
            }
            None => (query.columns(), Some(Vec::new()), None, None),
        };
        AskResponse {
            ok: true,
            question: request.question.clone(),
            session_id: request.session_id.clone(),
            query: Some(query.text().to_string()),
            params: query.params().clone(),
            columns,
            rows,
            answer,
            answer_format,
            used_prior_context: query.candidate().uses_prior_context(),
            dry_run: request.dry_run,
            error: None,
        }
    }

    /// Forget a session's history.
    pub fn reset_session(&self, session_id: &str) -> Result<bool> {
        let existed = self.sessions.reset(session_id)?;
        tracing::info!(session_id, existed, "Session reset");
        Ok(existed)
    }

    /// Component status. Pings the store but never runs a question.
    pub async fn health(&self) -> HealthReport {
        let store_error = match tokio::time::timeout(self.ping_timeout, self.executor.store().ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("ping timed out after {}ms", self.ping_timeout.as_millis())),
        };
        let translator_ready = self.translator.is_ready();
        HealthReport {
            ok: translator_ready && store_error.is_none(),
            translator: self.translator.name().to_string(),
            translator_ready,
            max_rows: self.guard.max_rows(),
            store_reachable: store_error.is_none(),
            store_error,
            llm: self.llm.clone(),
            active_sessions: self.sessions.len(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
