//! End-to-end pipeline behavior driven through scripted collaborators.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use text2sql_engine::cache::{CacheBackend, InMemoryCache};
use text2sql_engine::execution::engine::DataStore;
use text2sql_engine::execution::result::RowSet;
use text2sql_engine::execution::sqlite_engine::SqliteStore;
use text2sql_engine::llm::TextGenerator;
use text2sql_engine::schema_rag::bm25::Bm25Ranker;
use text2sql_engine::schema_rag::catalog::SchemaCatalog;
use text2sql_engine::schema_rag::{RankedCandidate, RelevanceRanker};
use text2sql_engine::seed::{default_descriptions, seed_store, SeedOptions};
use text2sql_engine::{PipelineConfig, PipelineError, QueryPipeline, ResponseStatus, Result};

#[derive(Default)]
struct Calls {
    classify: AtomicUsize,
    clarify: AtomicUsize,
    generate: AtomicUsize,
    synthesize: AtomicUsize,
}

/// Text generator that answers each pipeline stage from a script
struct ScriptedLlm {
    label: String,
    sql_replies: Mutex<VecDeque<String>>,
    last_sql: Mutex<String>,
    fail_generation: bool,
    calls: Calls,
    generator_prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(label: &str, sql_replies: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            sql_replies: Mutex::new(sql_replies.iter().map(|s| s.to_string()).collect()),
            last_sql: Mutex::new(String::new()),
            fail_generation: false,
            calls: Calls::default(),
            generator_prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing_generation(label: &str) -> Self {
        Self {
            fail_generation: true,
            ..Self::new(label, &[])
        }
    }

    fn count(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn total_calls(&self) -> usize {
        self.count(&self.calls.classify)
            + self.count(&self.calls.clarify)
            + self.count(&self.calls.generate)
            + self.count(&self.calls.synthesize)
    }
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Reply with exactly one label") {
            self.calls.classify.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("  {}\n", self.label.to_lowercase()));
        }
        if prompt.contains("clarifying question") {
            self.calls.clarify.fetch_add(1, Ordering::SeqCst);
            return Ok("Which orders do you want: recent ones, pending ones, or all of them?".to_string());
        }
        if prompt.contains("expert SQLite developer") {
            self.calls.generate.fetch_add(1, Ordering::SeqCst);
            self.generator_prompts.lock().unwrap().push(prompt.to_string());
            if self.fail_generation {
                return Err(PipelineError::Generation("503 Service Unavailable".to_string()));
            }
            // Last scripted reply repeats once the script runs out
            let mut replies = self.sql_replies.lock().unwrap();
            let mut last = self.last_sql.lock().unwrap();
            if let Some(next) = replies.pop_front() {
                *last = next;
            }
            return Ok(format!("```sql\n{}\n```", last));
        }
        if prompt.contains("User Question:") {
            self.calls.synthesize.fetch_add(1, Ordering::SeqCst);
            return Ok("Total revenue is $35.75.".to_string());
        }
        panic!("unexpected prompt: {}", prompt);
    }
}

struct CountingStore {
    inner: SqliteStore,
    calls: AtomicUsize,
}

#[async_trait]
impl DataStore for CountingStore {
    fn name(&self) -> &'static str {
        "counting-sqlite"
    }

    async fn execute(&self, sql: &str) -> Result<RowSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql).await
    }
}

struct CountingRanker {
    inner: Bm25Ranker,
    calls: AtomicUsize,
}

#[async_trait]
impl RelevanceRanker for CountingRanker {
    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<RankedCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rank(query, candidates).await
    }
}

struct BrokenCache;

#[async_trait]
impl CacheBackend for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(PipelineError::Cache("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(PipelineError::Cache("connection refused".to_string()))
    }

    async fn clear(&self) -> Result<()> {
        Err(PipelineError::Cache("connection refused".to_string()))
    }
}

struct Harness {
    pipeline: QueryPipeline,
    llm: Arc<ScriptedLlm>,
    store: Arc<CountingStore>,
    ranker: Arc<CountingRanker>,
}

impl Harness {
    fn executions(&self) -> usize {
        self.store.calls.load(Ordering::SeqCst)
    }

    fn rankings(&self) -> usize {
        self.ranker.calls.load(Ordering::SeqCst)
    }
}

/// Five tables so ranking actually runs with top_k = 3
fn revenue_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store
        .execute_batch(
            r#"
            CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, region TEXT);
            CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL);
            CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, amount REAL);
            CREATE TABLE order_items (order_id INTEGER, product_id INTEGER, quantity INTEGER);
            CREATE TABLE suppliers (id INTEGER PRIMARY KEY, name TEXT, country TEXT);
            INSERT INTO orders (customer_id, amount) VALUES (1, 10.5), (1, 20.0), (2, 5.25);
            "#,
        )
        .unwrap();
    store
}

fn harness(
    llm: ScriptedLlm,
    store: SqliteStore,
    cache: Arc<dyn CacheBackend>,
    config: PipelineConfig,
) -> Harness {
    let catalog: SchemaCatalog = store.introspect_catalog(0).unwrap();
    let llm = Arc::new(llm);
    let store = Arc::new(CountingStore {
        inner: store,
        calls: AtomicUsize::new(0),
    });
    let ranker = Arc::new(CountingRanker {
        inner: Bm25Ranker::new().unwrap(),
        calls: AtomicUsize::new(0),
    });

    let pipeline = QueryPipeline::builder(catalog)
        .config(config)
        .llm(llm.clone())
        .ranker(ranker.clone())
        .store(store.clone())
        .cache(cache)
        .build()
        .unwrap();

    Harness {
        pipeline,
        llm,
        store,
        ranker,
    }
}

fn default_harness(llm: ScriptedLlm) -> Harness {
    harness(
        llm,
        revenue_store(),
        Arc::new(InMemoryCache::new()),
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn test_total_revenue_answered_then_served_from_cache() {
    let h = default_harness(ScriptedLlm::new(
        "ANSWERABLE",
        &["SELECT SUM(amount) AS total FROM orders"],
    ));

    let first = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(first.status, ResponseStatus::Answered);
    assert!(!first.is_clarification);
    assert_eq!(first.sql.as_deref(), Some("SELECT SUM(amount) AS total FROM orders"));
    assert_eq!(first.answer, "Total revenue is $35.75.");
    assert_eq!(first.row_count, Some(1));
    assert_eq!(first.columns, Some(vec!["total".to_string()]));
    assert_eq!(first.rows, Some(vec![vec![json!(35.75)]]));
    assert!(first.reasoning.contains("orders"));

    let llm_calls = h.llm.total_calls();
    let executions = h.executions();
    assert_eq!(executions, 1);

    let second = h.pipeline.process_query("  what is   TOTAL revenue? ").await.unwrap();
    assert_eq!(
        serde_json::to_string(&second).unwrap(),
        serde_json::to_string(&first).unwrap()
    );
    assert_eq!(h.llm.total_calls(), llm_calls);
    assert_eq!(h.executions(), executions);
}

#[tokio::test]
async fn test_cached_float_is_byte_identical() {
    let store = revenue_store();
    let price = 1.079907802215119e-66_f64;
    store
        .with_connection(|conn| {
            conn.execute("INSERT INTO products (name, price) VALUES ('speck', ?1)", [price])?;
            Ok(())
        })
        .unwrap();
    let h = harness(
        ScriptedLlm::new("ANSWERABLE", &["SELECT price FROM products"]),
        store,
        Arc::new(InMemoryCache::new()),
        PipelineConfig::default(),
    );

    let first = h.pipeline.process_query("What is the product price?").await.unwrap();
    assert_eq!(first.rows, Some(vec![vec![json!(price)]]));
    let llm_calls = h.llm.total_calls();

    let second = h.pipeline.process_query("what is the product price?").await.unwrap();
    assert_eq!(h.llm.total_calls(), llm_calls);
    assert_eq!(second.rows, first.rows);
    assert_eq!(
        serde_json::to_string(&second).unwrap(),
        serde_json::to_string(&first).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_misses_share_one_cache_entry() {
    let cache = Arc::new(InMemoryCache::new());
    let h = harness(
        ScriptedLlm::new("ANSWERABLE", &["SELECT SUM(amount) AS total FROM orders"]),
        revenue_store(),
        cache.clone(),
        PipelineConfig::default(),
    );

    let (a, b) = tokio::join!(
        h.pipeline.process_query("What is total revenue?"),
        h.pipeline.process_query("what is TOTAL revenue?")
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status, ResponseStatus::Answered);
    assert_eq!(b.status, ResponseStatus::Answered);
    assert_eq!(a.rows, b.rows);
    assert_eq!(cache.len(), 1);

    let llm_calls = h.llm.total_calls();
    let executions = h.executions();
    let third = h.pipeline.process_query("what is total revenue?").await.unwrap();
    assert_eq!(third.rows, Some(vec![vec![json!(35.75)]]));
    assert_eq!(h.llm.total_calls(), llm_calls);
    assert_eq!(h.executions(), executions);
}

#[tokio::test]
async fn test_ambiguous_question_short_circuits() {
    let h = default_harness(ScriptedLlm::new("AMBIGUOUS", &["SELECT * FROM orders"]));

    let response = h.pipeline.process_query("Show me the orders").await.unwrap();
    assert_eq!(response.status, ResponseStatus::Clarification);
    assert!(response.is_clarification);
    assert!(response.sql.is_none());
    assert!(response.rows.is_none());
    assert!(response.answer.contains("Which orders"));

    assert_eq!(h.rankings(), 0);
    assert_eq!(h.llm.count(&h.llm.calls.generate), 0);
    assert_eq!(h.executions(), 0);

    // Clarifications are cached too
    h.pipeline.process_query("show me the orders").await.unwrap();
    assert_eq!(h.llm.count(&h.llm.calls.classify), 1);
    assert_eq!(h.llm.count(&h.llm.calls.clarify), 1);
}

#[tokio::test]
async fn test_unanswerable_question_is_out_of_domain() {
    let h = default_harness(ScriptedLlm::new("UNANSWERABLE", &[]));

    let response = h.pipeline.process_query("Write a poem about the sea").await.unwrap();
    assert_eq!(response.status, ResponseStatus::OutOfDomain);
    assert!(response.sql.is_none());
    assert!(response.answer.contains("orders"));
    assert_eq!(h.rankings(), 0);
    assert_eq!(h.executions(), 0);
}

#[tokio::test]
async fn test_retry_bound_with_always_failing_query() {
    let h = default_harness(ScriptedLlm::new("ANSWERABLE", &["SELECT SUM(revenue) FROM orders"]));

    let response = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(
        response.answer,
        "I failed to generate a valid query after 2 retries."
    );
    assert_eq!(response.sql.as_deref(), Some("SELECT SUM(revenue) FROM orders"));
    assert!(response
        .error
        .as_deref()
        .unwrap()
        .contains("no such column: revenue"));

    assert_eq!(h.llm.count(&h.llm.calls.generate), 3);
    assert_eq!(h.executions(), 3);
    assert_eq!(h.llm.count(&h.llm.calls.synthesize), 0);
    assert_eq!(h.rankings(), 1);

    // Failures are not cached: the same question runs the loop again
    h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(h.llm.count(&h.llm.calls.generate), 6);
}

#[tokio::test]
async fn test_zero_retries_executes_once() {
    let config = PipelineConfig {
        max_retries: 0,
        ..PipelineConfig::default()
    };
    let h = harness(
        ScriptedLlm::new("ANSWERABLE", &["SELECT SUM(revenue) FROM orders"]),
        revenue_store(),
        Arc::new(InMemoryCache::new()),
        config,
    );

    let response = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(h.llm.count(&h.llm.calls.generate), 1);
    assert_eq!(h.executions(), 1);
}

#[tokio::test]
async fn test_retry_converges_after_one_error() {
    let h = default_harness(ScriptedLlm::new(
        "ANSWERABLE",
        &[
            "SELECT SUM(revenue) FROM orders",
            "SELECT SUM(amount) AS total FROM orders",
        ],
    ));

    let response = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(response.status, ResponseStatus::Answered);
    assert_eq!(response.sql.as_deref(), Some("SELECT SUM(amount) AS total FROM orders"));
    assert_eq!(h.llm.count(&h.llm.calls.generate), 2);
    assert_eq!(h.executions(), 2);
    assert!(response.reasoning.contains("no such column: revenue"));

    let prompts = h.llm.generator_prompts.lock().unwrap();
    assert!(!prompts[0].contains("no such column"));
    assert!(prompts[1].contains("no such column: revenue"));
    assert!(prompts[1].contains("SELECT SUM(revenue) FROM orders"));
}

#[tokio::test]
async fn test_schema_context_is_bounded_and_fixed_across_retries() {
    let config = PipelineConfig {
        top_k: 2,
        ..PipelineConfig::default()
    };
    let h = harness(
        ScriptedLlm::new(
            "ANSWERABLE",
            &["SELECT SUM(revenue) FROM orders", "SELECT SUM(amount) FROM orders"],
        ),
        revenue_store(),
        Arc::new(InMemoryCache::new()),
        config,
    );

    h.pipeline
        .process_query("What is the total order amount?")
        .await
        .unwrap();

    assert_eq!(h.rankings(), 1);
    let prompts = h.llm.generator_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    for prompt in prompts.iter() {
        assert!(prompt.matches("CREATE TABLE").count() <= 2);
        assert!(prompt.contains("CREATE TABLE orders"));
    }
    let schema_part = |p: &str| p.split("Generate a valid").next().unwrap_or("").to_string();
    assert_eq!(schema_part(&prompts[0]), schema_part(&prompts[1]));
}

#[tokio::test]
async fn test_cache_outage_degrades_to_miss() {
    let h = harness(
        ScriptedLlm::new("ANSWERABLE", &["SELECT SUM(amount) AS total FROM orders"]),
        revenue_store(),
        Arc::new(BrokenCache),
        PipelineConfig::default(),
    );

    let first = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(first.status, ResponseStatus::Answered);
    let second = h.pipeline.process_query("What is total revenue?").await.unwrap();
    assert_eq!(second.status, ResponseStatus::Answered);
    assert_eq!(h.llm.count(&h.llm.calls.classify), 2);
}

#[tokio::test]
async fn test_generation_failure_propagates() {
    let h = default_harness(ScriptedLlm::failing_generation("ANSWERABLE"));

    let err = h.pipeline.process_query("What is total revenue?").await.unwrap_err();
    assert!(matches!(err, PipelineError::Generation(_)));
    assert_eq!(h.llm.count(&h.llm.calls.generate), 1);
    assert_eq!(h.executions(), 0);
}

#[tokio::test]
async fn test_demo_database_flow() {
    let store = SqliteStore::in_memory().unwrap();
    seed_store(
        &store,
        SeedOptions {
            rng_seed: Some(42),
            ..SeedOptions::default()
        },
    )
    .unwrap();

    let mut catalog = store.introspect_catalog(3).unwrap();
    catalog.apply_descriptions(&default_descriptions());
    let llm = Arc::new(ScriptedLlm::new(
        "ANSWERABLE",
        &["SELECT COUNT(*) AS n FROM customers WHERE region = 'North'"],
    ));
    let pipeline = QueryPipeline::builder(catalog)
        .llm(llm.clone())
        .store(Arc::new(store))
        .build()
        .unwrap();

    let response = pipeline
        .process_query("How many customers are in the North region?")
        .await
        .unwrap();
    assert_eq!(response.status, ResponseStatus::Answered);
    assert_eq!(response.row_count, Some(1));
    assert!(response.reasoning.contains("customers"));
}
