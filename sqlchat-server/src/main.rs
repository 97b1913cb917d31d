use std::sync::Arc;

use clap::Parser;
use sqlchat_core::{
    Agent, ConversationStore, OpenAiChatModel, OpenAiConfig, SqlChatConfig, ToolBox,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use sqlchat_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "sqlchat.toml")]
    config: String,

    /// Check the store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match SqlChatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    // Schema and seed rows must be in place before any request is served
    let (pool, report) = match sqlchat_core::db::open_store(&config.database).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", config.database.url, e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        seeded = report.seeded,
        employees = report.employee_count,
        "Database ready"
    );

    if args.health {
        match sqlchat_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite check failed: {}", e);
                std::process::exit(1);
            }
        }
        match sqlchat_core::db::list_tables(&pool).await {
            Ok(tables) => println!("✅ Tables: {}", tables.join(", ")),
            Err(e) => {
                println!("❌ Listing tables failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ sqlchat health check passed");
        return Ok(());
    }

    let api_key = match config.api_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{} (environment or .env)", e);
            std::process::exit(1);
        }
    };

    let model = OpenAiChatModel::new(OpenAiConfig::from_model_config(&config.model, api_key))?;
    tracing::info!(model = %config.model.model, base_url = %config.model.base_url, "Model client ready");

    let agent = Agent::from_config(
        Arc::new(model),
        ToolBox::sql(pool.clone()),
        Arc::new(ConversationStore::new()),
        &config.agent,
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState {
        pool: pool.clone(),
        agent: Arc::new(agent),
        config,
    });

    http::start_http_server(state, tx.subscribe()).await?;

    pool.close().await;
    Ok(())
}
