use text2sql_engine::cache::{CacheBackend, InMemoryCache, NoopCache, SqliteCache};
use text2sql_engine::execution::sqlite_engine::SqliteStore;
use text2sql_engine::llm::LlmClient;
use text2sql_engine::schema_rag::bm25::Bm25Ranker;
use text2sql_engine::schema_rag::catalog::{load_descriptions, SchemaCatalog};
use text2sql_engine::schema_rag::embedder::{EmbeddingRanker, SchemaEmbedder};
use text2sql_engine::schema_rag::retriever::SchemaRetriever;
use text2sql_engine::schema_rag::RelevanceRanker;
use text2sql_engine::seed::{create_demo_database, default_descriptions, SeedOptions};
use text2sql_engine::{LlmConfig, PipelineConfig, QueryPipeline, Response, ResponseStatus};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Sample values collected per text column during introspection
const SAMPLE_VALUES: usize = 3;

#[derive(Parser)]
#[command(name = "text2sql")]
#[command(about = "Answer natural-language questions over a SQLite database")]
#[command(version)]
struct Args {
    /// SQLite database to query
    #[arg(long, global = true, default_value = "ecommerce.db")]
    db: PathBuf,

    /// Pipeline configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Response cache backend
    #[arg(long, global = true, value_enum, default_value_t = CacheKind::Sqlite)]
    cache: CacheKind,

    /// File used by the sqlite cache backend
    #[arg(long, global = true, default_value = "text2sql_cache.db")]
    cache_path: PathBuf,

    /// Schema relevance ranker
    #[arg(long, global = true, value_enum, default_value_t = RankerKind::Bm25)]
    ranker: RankerKind,

    /// JSON file of {"table": "description"} merged into the catalog
    #[arg(long, global = true)]
    descriptions: Option<PathBuf>,

    /// Use a JSON catalog file instead of introspecting the database
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        question: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask questions interactively
    Repl,
    /// Print the catalog, or the tables selected for a question
    Schema { question: Option<String> },
    /// Create and populate the demo e-commerce database
    Seed {
        /// Fixed RNG seed for reproducible data
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached response
    Clear,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CacheKind {
    Memory,
    Sqlite,
    Off,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RankerKind {
    Bm25,
    Embedding,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Commands::Ask { question, json } => {
            let pipeline = build_pipeline(&args)?;
            let response = pipeline.process_query(question).await?;
            print_response(&response, *json)?;
            Ok(())
        }
        Commands::Repl => {
            let pipeline = build_pipeline(&args)?;
            run_repl(&pipeline).await
        }
        Commands::Schema { question } => show_schema(&args, question.as_deref()).await,
        Commands::Seed { rng_seed } => {
            let summary = create_demo_database(
                &args.db,
                SeedOptions {
                    rng_seed: *rng_seed,
                    ..SeedOptions::default()
                },
            )?;
            println!(
                "Seeded {}: {} customers, {} products, {} orders, {} order items",
                args.db.display(),
                summary.customers,
                summary.products,
                summary.orders,
                summary.order_items
            );
            Ok(())
        }
        Commands::Cache {
            action: CacheAction::Clear,
        } => {
            println!("{}", clear_cache(args.cache, &args.cache_path).await?);
            Ok(())
        }
    }
}

fn build_pipeline(args: &Args) -> Result<QueryPipeline> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let llm_config = LlmConfig::from_env()?;
    info!("Using model {} at {}", llm_config.model, llm_config.base_url);

    let store = open_store(&args.db)?;
    let catalog = load_catalog(args, &store)?;

    let pipeline = QueryPipeline::builder(catalog)
        .config(config)
        .llm(Arc::new(LlmClient::from_config(&llm_config)))
        .ranker(ranker(args.ranker, Some(&llm_config))?)
        .store(Arc::new(store))
        .cache(cache_backend(args.cache, &args.cache_path)?)
        .build()?;
    Ok(pipeline)
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    if !db.exists() {
        anyhow::bail!(
            "Database {} not found. Run `text2sql seed` to create the demo database.",
            db.display()
        );
    }
    SqliteStore::open_read_only(db).with_context(|| format!("opening {}", db.display()))
}

fn load_catalog(args: &Args, store: &SqliteStore) -> Result<SchemaCatalog> {
    let mut catalog = match &args.catalog {
        Some(path) => SchemaCatalog::load(path)?,
        None => store.introspect_catalog(SAMPLE_VALUES)?,
    };
    catalog.apply_descriptions(&default_descriptions());
    if let Some(path) = &args.descriptions {
        catalog.apply_descriptions(&load_descriptions(path)?);
    }
    Ok(catalog)
}

fn ranker(kind: RankerKind, llm_config: Option<&LlmConfig>) -> Result<Arc<dyn RelevanceRanker>> {
    match kind {
        RankerKind::Bm25 => Ok(Arc::new(Bm25Ranker::new()?)),
        RankerKind::Embedding => {
            let llm_config = match llm_config {
                Some(config) => config.clone(),
                None => LlmConfig::from_env()?,
            };
            let embedder = SchemaEmbedder::from_config(&llm_config);
            Ok(Arc::new(EmbeddingRanker::new(Arc::new(embedder))))
        }
    }
}

fn cache_backend(kind: CacheKind, path: &Path) -> Result<Arc<dyn CacheBackend>> {
    Ok(match kind {
        CacheKind::Memory => Arc::new(InMemoryCache::new()),
        CacheKind::Sqlite => Arc::new(SqliteCache::open(path)?),
        CacheKind::Off => Arc::new(NoopCache),
    })
}

/// Only the sqlite backend outlives a process, so it is the only one to clear
async fn clear_cache(kind: CacheKind, path: &Path) -> Result<String> {
    match kind {
        CacheKind::Sqlite => {
            cache_backend(kind, path)?.clear().await?;
            Ok(format!("Cache cleared ({})", path.display()))
        }
        CacheKind::Memory => Ok(
            "Nothing to clear: the memory cache only lives inside a running process".to_string(),
        ),
        CacheKind::Off => Ok("Nothing to clear: caching is off".to_string()),
    }
}

async fn show_schema(args: &Args, question: Option<&str>) -> Result<()> {
    let store = open_store(&args.db)?;
    let catalog = load_catalog(args, &store)?;

    let Some(question) = question else {
        println!("{}", catalog.summary());
        return Ok(());
    };

    let config = PipelineConfig::load(args.config.as_deref())?;
    let retriever = SchemaRetriever::new(ranker(args.ranker, None)?, config.timeouts.ranking());
    let context = retriever
        .select_relevant(question, &catalog, config.top_k)
        .await?;
    println!("Selected tables: {}\n", context.table_names().join(", "));
    println!("{}", context.render());
    Ok(())
}

async fn run_repl(pipeline: &QueryPipeline) -> Result<()> {
    println!("Tables: {}", pipeline.catalog().table_names().join(", "));
    println!("Ask a question, or type 'exit' to quit.");

    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match pipeline.process_query(question).await {
            Ok(response) => print_response(&response, false)?,
            Err(e) => error!("Failed to answer: {}", e),
        }
    }
    Ok(())
}

fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    match response.status {
        ResponseStatus::Clarification => println!("Clarification needed: {}", response.answer),
        _ => println!("{}", response.answer),
    }
    if let Some(sql) = &response.sql {
        println!("\nSQL: {}", sql);
    }
    if let Some(count) = response.row_count {
        println!("Rows: {}", count);
    }
    if let Some(error) = &response.error {
        println!("Last error: {}", error);
    }
    println!("Reasoning: {}", response.reasoning);
    Ok(())
}
