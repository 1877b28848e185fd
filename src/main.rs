use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use chatmeter::config::AppConfig;
use chatmeter::external::{CompletionProvider, OpenRouterProvider};
use chatmeter::logging::{init_logging, LoggingConfig};
use chatmeter::models::ModelCatalog;
use chatmeter::services::chat_service::{ChatService, ChatSettings};
use chatmeter::services::job_scheduler_service::JobSchedulerService;
use chatmeter::store::{MemoryUsageStore, PgUsageStore, UsageStore};
use chatmeter::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let logging = LoggingConfig::from_env().map_err(anyhow::Error::msg)?;
    init_logging(&logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = AppConfig::from_env().map_err(anyhow::Error::msg)?;

    let mut catalog = match &config.models_config {
        Some(path) => ModelCatalog::from_file(path)?,
        None => ModelCatalog::default(),
    };
    if let Some(model) = &config.default_model {
        catalog = catalog.with_default_model(model)?;
    }
    tracing::info!("🧠 Loaded {} models (default: {})", catalog.iter().count(), catalog.default_model());
    let catalog = Arc::new(catalog);

    let store: Arc<dyn UsageStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("🗄️ Using PostgreSQL usage store");
            Arc::new(
                PgUsageStore::connect(url, config.db_max_connections)
                    .await
                    .context("Failed to connect to database")?,
            )
        }
        None => {
            tracing::warn!("⚠️ DATABASE_URL not set - usage is kept in memory and lost on restart");
            Arc::new(MemoryUsageStore::new())
        }
    };

    let provider: Option<Arc<dyn CompletionProvider>> = match &config.llm.api_key {
        Some(key) => {
            let provider = OpenRouterProvider::new(key.clone(), config.llm.base_url.clone(), config.llm.timeout)?;
            tracing::info!("🤖 Completion provider: {} ({})", provider.name(), config.llm.base_url);
            Some(Arc::new(provider) as Arc<dyn CompletionProvider>)
        }
        None => {
            tracing::warn!("⚠️ OPENROUTER_API_KEY not set - chat requests will be rejected");
            None
        }
    };

    let chat = Arc::new(ChatService::new(
        store.clone(),
        provider,
        catalog.clone(),
        ChatSettings::from(&config.llm),
    ));

    let mut scheduler = if config.scheduler.enabled {
        let mut scheduler = JobSchedulerService::new(store.clone(), config.scheduler.test_mode).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("⏸️ Job scheduler disabled");
        None
    };

    let app = create_app(AppState { store, catalog, chat });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("🚀 chatmeter backend running at http://{}/", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown signal received");
        })
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.stop().await?;
    }

    Ok(())
}
