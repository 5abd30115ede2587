use anyhow::Result;
use clap::{Parser, Subcommand};
use insight_engine::config::Config;
use insight_engine::schema_rag::{
    retriever::{load_sqlite_schemas, load_yaml_schemas},
    ApiEmbedder, Embedder, HashEmbedder, SchemaIndex,
};
use insight_engine::sentry::{alert_bus::AlertBus, AnomalySentry};
use insight_engine::sql_executor::SqlExecutor;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "insight-engine")]
#[command(about = "Multi-agent natural-language business intelligence engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the schema index from a database or schema document
    IndexSchemas {
        /// Schema source kind
        #[arg(long, default_value = "sqlite")]
        from: String,

        /// Source path (defaults to the configured database)
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Start the anomaly sentry loop in headless mode
    RunSentry {
        /// Sweep interval in minutes
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn build_embedder(config: &Config) -> Arc<dyn Embedder> {
    if config.embedding_model == "local" {
        Arc::new(HashEmbedder::default())
    } else {
        Arc::new(ApiEmbedder::new(
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.embedding_model.clone(),
        ))
    }
}

async fn index_schemas(config: &Config, from: &str, source: Option<PathBuf>) -> Result<()> {
    let embedder = build_embedder(config);
    let index = SchemaIndex::open(&config.schema_library_dir(), embedder)?;

    let specs = match from {
        "sqlite" => {
            let url = source
                .map(|p| format!("sqlite://{}", p.display()))
                .unwrap_or_else(|| config.database_url.clone());
            let options = SqliteConnectOptions::from_str(&url)?.read_only(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            load_sqlite_schemas(&pool).await?
        }
        "yaml" => {
            let path = source.ok_or_else(|| anyhow::anyhow!("--source is required for yaml"))?;
            load_yaml_schemas(&path)?
        }
        other => anyhow::bail!("unsupported schema source '{}'", other),
    };

    for spec in &specs {
        index
            .index_table(&spec.table_name, &spec.ddl, spec.columns.clone())
            .await?;
    }

    info!("Indexed {} table schemas", specs.len());
    println!("Indexed {} table schemas", specs.len());
    Ok(())
}

async fn run_sentry(config: &Config, interval: Option<u64>) -> Result<()> {
    let interval = interval.unwrap_or(config.sentry_interval_minutes);
    let executor = Arc::new(SqlExecutor::connect(&config.database_url).await?);
    let bus = Arc::new(AlertBus::new());
    let sentry = Arc::new(AnomalySentry::new(executor, bus, interval));

    sentry.start().await;
    info!("Sentry running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    sentry.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env()?;

    match args.command {
        Command::IndexSchemas { from, source } => index_schemas(&config, &from, source).await,
        Command::RunSentry { interval } => run_sentry(&config, interval).await,
    }
}
