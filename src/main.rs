//! # Deskline CLI (`deskline`)
//!
//! The `deskline` binary runs the support-chat backend. It provides
//! commands for database initialization, serving the HTTP API, batch
//! article generation, and a one-shot query path for debugging the
//! retrieval/synthesis pipeline from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! deskline --config ./config/deskline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `deskline init` | Create the SQLite database and run schema migrations |
//! | `deskline serve` | Start the HTTP API server |
//! | `deskline articles <count>` | Batch-generate knowledge-base articles |
//! | `deskline ask "<query>"` | Run one retrieval+synthesis round trip |
//!
//! The server requires `GEMINI_API_KEY` and `TAVILY_API_KEY` in the
//! environment; `init` needs neither.

mod articles;
mod cache;
mod chat;
mod classifier;
mod config;
mod db;
mod lifecycle;
mod llm;
mod migrate;
mod models;
mod retriever;
mod server;
mod store;
mod synthesizer;
mod websearch;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Deskline — a retrieval-augmented IT support chat backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/deskline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "deskline",
    about = "Deskline — a retrieval-augmented IT support chat backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/deskline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Batch-generate knowledge-base articles.
    Articles {
        /// Number of articles to generate.
        #[arg(default_value_t = 3)]
        count: usize,
    },

    /// Run one retrieval + synthesis round trip and print the answer.
    ///
    /// Useful for verifying provider credentials and prompt output
    /// without going through the HTTP API.
    Ask {
        /// The support question.
        query: String,

        /// Optional category: hardware, software, network, security,
        /// or troubleshooting.
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Serve => {
            migrate::run_migrations(&config).await?;
            server::run_server(&config).await?;
        }
        Commands::Articles { count } => {
            migrate::run_migrations(&config).await?;
            let pool = db::connect(&config).await?;
            let store = store::Store::new(pool);
            let model: Arc<dyn llm::LanguageModel> =
                Arc::new(llm::GeminiClient::new(&config.llm)?);

            let generator = articles::ArticleGenerator::new(store, model);
            let generated = generator.generate_batch(count).await?;

            println!("Generated {} article(s):", generated.len());
            for article in &generated {
                println!("  {} — {}", article.id, article.title);
            }
        }
        Commands::Ask { query, category } => {
            let model: Arc<dyn llm::LanguageModel> =
                Arc::new(llm::GeminiClient::new(&config.llm)?);
            let search: Arc<dyn websearch::SearchProvider> =
                Arc::new(websearch::TavilyClient::new(&config.search)?);

            let cache = Arc::new(cache::SourceCache::new(
                config.search.cache_capacity,
                Duration::from_secs(config.search.cache_ttl_secs),
            ));
            let retriever = retriever::SourceRetriever::new(search, cache);
            let synthesizer = synthesizer::AnswerSynthesizer::new(model);

            let options = websearch::SearchOptions::from_config(&config.search);
            let sources = retriever.get_sources(&query, &options).await?;

            println!("Retrieved {} source(s):", sources.len());
            for (i, source) in sources.iter().enumerate() {
                println!("  {}. [{:.2}] {} — {}", i + 1, source.score, source.title, source.url);
            }
            println!();

            let answer = synthesizer
                .generate_answer(&query, &sources, category.as_deref())
                .await?;
            println!("{}", answer);
        }
    }

    Ok(())
}
