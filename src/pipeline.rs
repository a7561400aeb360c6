//! Query Pipeline
//!
//! Entry point for one question: cache lookup, intent classification, then
//! either a clarification, an out-of-domain reply, or schema selection followed
//! by the self-healing generate/execute loop and answer synthesis. Terminal
//! responses other than failures are written back to the cache.

use crate::ambiguity::ClarificationComposer;
use crate::cache::{normalize_key, CacheBackend, NoopCache, ResponseCache};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::execution::engine::{DataStore, QueryExecutor};
use crate::execution_loop::r#loop::{AttemptRecord, RetryController, RetryRun, RetryState};
use crate::intent::{Intent, IntentClassifier};
use crate::llm::TextGenerator;
use crate::response::Response;
use crate::schema_rag::bm25::Bm25Ranker;
use crate::schema_rag::catalog::{SchemaCatalog, SchemaContext};
use crate::schema_rag::retriever::SchemaRetriever;
use crate::schema_rag::RelevanceRanker;
use crate::sql_generator::SqlGenerator;
use crate::synthesizer::AnswerSynthesizer;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub struct QueryPipeline {
    config: PipelineConfig,
    catalog: SchemaCatalog,
    cache: ResponseCache,
    classifier: IntentClassifier,
    clarifier: ClarificationComposer,
    retriever: SchemaRetriever,
    generator: SqlGenerator,
    executor: QueryExecutor,
    controller: RetryController,
    synthesizer: AnswerSynthesizer,
}

impl QueryPipeline {
    pub fn builder(catalog: SchemaCatalog) -> QueryPipelineBuilder {
        QueryPipelineBuilder::new(catalog)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Resolve one question into a terminal response.
    ///
    /// Returns `Err` only for generation and ranking failures; execution
    /// failures become a `failed` response and cache trouble becomes a miss.
    pub async fn process_query(&self, question: &str) -> Result<Response> {
        let request_id = Uuid::new_v4();
        let span = info_span!("process_query", request_id = %request_id);
        self.resolve(question).instrument(span).await
    }

    /// Schema context the pipeline would hand the generator for `question`
    pub async fn select_schema(&self, question: &str) -> Result<SchemaContext> {
        self.retriever
            .select_relevant(question, &self.catalog, self.config.top_k)
            .await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    async fn resolve(&self, question: &str) -> Result<Response> {
        info!("Processing question: {}", question);
        let key = normalize_key(question);

        if let Some(cached) = self.cache.get(&key).await {
            info!("Serving cached response");
            return Ok(cached);
        }

        let summary = self.catalog.summary();
        let intent = self.classifier.classify(question, &summary).await?;
        info!("Intent: {}", intent);

        let response = match intent {
            Intent::Ambiguous => {
                let follow_up = self.clarifier.clarify(question, &summary).await?;
                Response::clarification(
                    follow_up,
                    "Question classified as ambiguous; asked for clarification.".to_string(),
                )
            }
            Intent::Unanswerable => Response::out_of_domain(
                format!(
                    "I can only answer questions related to this database ({}).",
                    self.catalog.table_names().join(", ")
                ),
                "Question classified as unrelated to the database.".to_string(),
            ),
            Intent::Answerable => self.answer(question).await?,
        };

        if response.is_cacheable() {
            self.cache.put(&key, &response).await;
        } else {
            info!("Not caching {:?} response", response.status);
        }

        Ok(response)
    }

    async fn answer(&self, question: &str) -> Result<Response> {
        let schema = self.select_schema(question).await?;
        let tables = schema.table_names().join(", ");

        let RetryRun { state, history } = self
            .controller
            .run(question, &schema, &self.generator, &self.executor)
            .await?;

        match state {
            RetryState::Succeeded { sql, rows, attempt } => {
                let answer = self.synthesizer.synthesize(question, &sql, &rows).await?;
                let shown = if self.config.include_rows {
                    Some(rows.truncated(self.config.max_prompt_rows))
                } else {
                    None
                };
                let reasoning = format!(
                    "Retrieved tables: [{}]. Generated SQL. {}Executed successfully on attempt {}.",
                    tables,
                    recovered_errors(&history),
                    attempt + 1
                );
                Ok(Response::answered(answer, sql, rows.row_count(), shown, reasoning))
            }
            RetryState::Exhausted { sql, error, .. } => {
                let class = history
                    .last()
                    .and_then(|record| record.error_class)
                    .map(|class| format!(" ({})", class))
                    .unwrap_or_default();
                let reasoning = format!(
                    "Retrieved tables: [{}]. {} attempts failed. Persistent error{}: {}",
                    tables,
                    history.len(),
                    class,
                    error
                );
                Ok(Response::failed(
                    format!(
                        "I failed to generate a valid query after {} retries.",
                        self.controller.max_retries()
                    ),
                    sql,
                    error,
                    reasoning,
                ))
            }
            other => Err(PipelineError::Execution(format!(
                "Retry loop stopped in non-terminal state: {:?}",
                other
            ))),
        }
    }
}

fn recovered_errors(history: &[AttemptRecord]) -> String {
    let fixed: Vec<String> = history
        .iter()
        .filter_map(|record| {
            record
                .error
                .as_ref()
                .map(|error| format!("attempt {} failed ({})", record.attempt + 1, error))
        })
        .collect();
    if fixed.is_empty() {
        String::new()
    } else {
        format!("Recovered after {}. ", fixed.join("; "))
    }
}

/// Assembles a `QueryPipeline` from injected capabilities.
///
/// The text generator and data store are required. Ranking defaults to BM25 and
/// caching defaults to off.
pub struct QueryPipelineBuilder {
    catalog: SchemaCatalog,
    config: PipelineConfig,
    llm: Option<Arc<dyn TextGenerator>>,
    ranker: Option<Arc<dyn RelevanceRanker>>,
    store: Option<Arc<dyn DataStore>>,
    cache: Option<Arc<dyn CacheBackend>>,
}

impl QueryPipelineBuilder {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            catalog,
            config: PipelineConfig::default(),
            llm: None,
            ranker: None,
            store: None,
            cache: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn TextGenerator>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn ranker(mut self, ranker: Arc<dyn RelevanceRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<QueryPipeline> {
        self.config.validate()?;
        if self.catalog.is_empty() {
            return Err(PipelineError::Schema(
                "Schema catalog has no tables".to_string(),
            ));
        }

        let llm = self
            .llm
            .ok_or_else(|| PipelineError::Config("No text generator configured".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| PipelineError::Config("No data store configured".to_string()))?;
        let ranker: Arc<dyn RelevanceRanker> = match self.ranker {
            Some(ranker) => ranker,
            None => Arc::new(Bm25Ranker::new()?),
        };
        let backend: Arc<dyn CacheBackend> = self.cache.unwrap_or_else(|| Arc::new(NoopCache));

        let timeouts = &self.config.timeouts;
        info!(
            "Pipeline ready: {} tables, store={}, top_k={}, max_retries={}",
            self.catalog.len(),
            store.name(),
            self.config.top_k,
            self.config.max_retries
        );

        Ok(QueryPipeline {
            cache: ResponseCache::new(backend, self.config.cache_ttl(), timeouts.cache()),
            classifier: IntentClassifier::new(Arc::clone(&llm), timeouts.llm()),
            clarifier: ClarificationComposer::new(Arc::clone(&llm), timeouts.llm()),
            retriever: SchemaRetriever::new(ranker, timeouts.ranking()),
            generator: SqlGenerator::new(Arc::clone(&llm), timeouts.llm()),
            executor: QueryExecutor::new(store, timeouts.execution()),
            controller: RetryController::new(self.config.max_retries),
            synthesizer: AnswerSynthesizer::new(llm, timeouts.llm(), self.config.max_prompt_rows),
            catalog: self.catalog,
            config: self.config,
        })
    }
}
